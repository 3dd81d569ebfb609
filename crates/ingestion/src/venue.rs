//! Venue tracking
//!
//! A publication's venue is its journal, or failing that its booktitle.
//! Venues are unique by name and carry running publication counters.

use crate::bibtex::ParsedEntry;
use pubtrack_common::db::models::*;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set};

pub const JOURNAL: &str = "journal";
pub const CONFERENCE: &str = "conference";

/// Venue name and type for an entry, if it names one
pub fn venue_of(entry: &ParsedEntry) -> Option<(&str, &'static str)> {
    entry
        .journal
        .as_deref()
        .map(|name| (name, JOURNAL))
        .or_else(|| entry.booktitle.as_deref().map(|name| (name, CONFERENCE)))
}

/// Find the entry's venue, creating it on first sight.
/// Returns the venue id and whether it was created.
pub async fn find_or_create<C>(db: &C, entry: &ParsedEntry) -> Result<Option<(i32, bool)>, DbErr>
where
    C: ConnectionTrait,
{
    let Some((name, venue_type)) = venue_of(entry) else {
        return Ok(None);
    };

    if let Some(venue) = VenueEntity::find()
        .filter(VenueColumn::Name.eq(name))
        .one(db)
        .await?
    {
        return Ok(Some((venue.id, false)));
    }

    let venue = VenueActiveModel {
        name: Set(name.to_string()),
        venue_type: Set(venue_type.to_string()),
        publisher: Set(entry.publisher.clone()),
        total_publications: Set(0),
        faculty_publications: Set(0),
        created_at: Set(chrono::Utc::now().into()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(Some((venue.id, true)))
}

/// Count one more publication at a venue
pub async fn record_publication<C>(db: &C, venue_id: i32, has_faculty_author: bool) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let mut update = VenueEntity::update_many()
        .col_expr(
            VenueColumn::TotalPublications,
            Expr::col(VenueColumn::TotalPublications).add(1),
        )
        .filter(VenueColumn::Id.eq(venue_id));

    if has_faculty_author {
        update = update.col_expr(
            VenueColumn::FacultyPublications,
            Expr::col(VenueColumn::FacultyPublications).add(1),
        );
    }

    update.exec(db).await?;
    Ok(())
}
