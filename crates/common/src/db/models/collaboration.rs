//! Collaboration edge between two authors
//!
//! Stored with `author_low_id < author_high_id` so an unordered pair maps
//! to exactly one row.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "collaborations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub author_low_id: i32,

    pub author_high_id: i32,

    /// Number of jointly authored publications
    pub collaboration_count: i32,

    pub first_year: Option<i32>,

    pub last_year: Option<i32>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// The endpoint that is not `author_id`
    pub fn other(&self, author_id: i32) -> i32 {
        if self.author_low_id == author_id {
            self.author_high_id
        } else {
            self.author_low_id
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::author::Entity",
        from = "Column::AuthorLowId",
        to = "super::author::Column::Id",
        on_delete = "Cascade"
    )]
    AuthorLow,

    #[sea_orm(
        belongs_to = "super::author::Entity",
        from = "Column::AuthorHighId",
        to = "super::author::Column::Id",
        on_delete = "Cascade"
    )]
    AuthorHigh,
}

impl ActiveModelBehavior for ActiveModel {}
