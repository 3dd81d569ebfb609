//! Author entity: faculty members and co-authors

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "authors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Canonical display name
    #[sea_orm(column_type = "Text")]
    pub name: String,

    /// Lowercased, punctuation-stripped matching key
    #[sea_orm(column_type = "Text")]
    pub normalized_name: String,

    /// Bibliography-service person id (e.g. a DBLP pid)
    #[sea_orm(unique, nullable)]
    pub external_id: Option<String>,

    pub is_faculty: bool,

    #[sea_orm(nullable)]
    pub email: Option<String>,

    #[sea_orm(nullable)]
    pub phone: Option<String>,

    #[sea_orm(nullable)]
    pub designation: Option<String>,

    #[sea_orm(nullable)]
    pub department: Option<String>,

    /// Cached count of associated publications
    pub total_publications: i32,

    /// Cached count of distinct collaborators
    pub total_collaborations: i32,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::publication_author::Entity")]
    PublicationAuthors,
}

impl Related<super::publication_author::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PublicationAuthors.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
