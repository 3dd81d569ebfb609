//! Publication entity: one de-duplicated bibliographic record

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "publications")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Source-format entry key, the authoritative dedup key
    #[sea_orm(unique)]
    pub entry_key: String,

    /// Upper-cased DOI, the fallback dedup key
    #[sea_orm(nullable)]
    pub doi: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub normalized_title: String,

    pub publication_type: String,

    pub year: Option<i32>,

    #[sea_orm(column_type = "Text", nullable)]
    pub journal: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub booktitle: Option<String>,

    #[sea_orm(nullable)]
    pub volume: Option<String>,

    #[sea_orm(nullable)]
    pub number: Option<String>,

    #[sea_orm(nullable)]
    pub pages: Option<String>,

    #[sea_orm(nullable)]
    pub publisher: Option<String>,

    #[sea_orm(nullable)]
    pub series: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub editor: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub url: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub ee: Option<String>,

    pub author_count: i32,

    pub has_faculty_author: bool,

    /// Provenance tag of the file this publication was first seen in
    #[sea_orm(nullable)]
    pub first_source_tag: Option<String>,

    pub venue_id: Option<i32>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::publication_author::Entity")]
    PublicationAuthors,

    #[sea_orm(has_many = "super::publication_source::Entity")]
    Sources,

    #[sea_orm(
        belongs_to = "super::venue::Entity",
        from = "Column::VenueId",
        to = "super::venue::Column::Id"
    )]
    Venue,
}

impl Related<super::publication_author::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PublicationAuthors.def()
    }
}

impl Related<super::publication_source::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sources.def()
    }
}

impl Related<super::venue::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Venue.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
