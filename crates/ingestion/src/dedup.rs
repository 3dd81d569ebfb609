//! Publication deduplication
//!
//! An entry whose entry key, or failing that whose DOI, is already stored
//! only adds its source tag to the stored publication's provenance. Any
//! other entry becomes a new publication with its ordered author list.

use crate::bibtex::ParsedEntry;
use crate::identity::AuthorIdentity;
use crate::venue;
use pubtrack_common::db::models::*;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// A parsed entry with its authors resolved, in listed order
#[derive(Clone, Debug)]
pub struct ResolvedEntry {
    pub entry: ParsedEntry,
    pub authors: Vec<AuthorIdentity>,
    pub source_tag: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupOutcome {
    Created,
    DuplicateByKey,
    DuplicateByDoi,
}

impl DedupOutcome {
    pub fn created(&self) -> bool {
        matches!(self, DedupOutcome::Created)
    }
}

/// What happened to one entry in the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedPublication {
    pub publication_id: i32,
    pub outcome: DedupOutcome,
    /// The source tag was new to an already stored publication
    pub provenance_added: bool,
    pub venue_created: bool,
    /// Distinct authors attached on creation, in listed order
    pub author_ids: Vec<i32>,
    pub year: Option<i32>,
}

/// Store one resolved entry
pub async fn ingest<C>(db: &C, resolved: &ResolvedEntry) -> Result<PersistedPublication, DbErr>
where
    C: ConnectionTrait,
{
    let entry = &resolved.entry;

    if let Some(existing) = PublicationEntity::find()
        .filter(PublicationColumn::EntryKey.eq(entry.entry_key.as_str()))
        .one(db)
        .await?
    {
        return duplicate(db, existing, DedupOutcome::DuplicateByKey, &resolved.source_tag).await;
    }

    if let Some(doi) = entry.doi.as_deref() {
        if let Some(existing) = PublicationEntity::find()
            .filter(PublicationColumn::Doi.eq(doi))
            .order_by_asc(PublicationColumn::Id)
            .one(db)
            .await?
        {
            return duplicate(db, existing, DedupOutcome::DuplicateByDoi, &resolved.source_tag).await;
        }
    }

    create(db, resolved).await
}

async fn duplicate<C>(
    db: &C,
    existing: Publication,
    outcome: DedupOutcome,
    source_tag: &str,
) -> Result<PersistedPublication, DbErr>
where
    C: ConnectionTrait,
{
    let provenance_added = add_provenance(db, existing.id, source_tag).await?;

    debug!(
        entry_key = %existing.entry_key,
        ?outcome,
        source_tag,
        provenance_added,
        "Duplicate publication"
    );

    Ok(PersistedPublication {
        publication_id: existing.id,
        outcome,
        provenance_added,
        venue_created: false,
        author_ids: Vec::new(),
        year: existing.year,
    })
}

/// Attach a source tag; false if the publication already carried it
pub async fn add_provenance<C>(db: &C, publication_id: i32, source_tag: &str) -> Result<bool, DbErr>
where
    C: ConnectionTrait,
{
    let present = PublicationSourceEntity::find()
        .filter(PublicationSourceColumn::PublicationId.eq(publication_id))
        .filter(PublicationSourceColumn::SourceTag.eq(source_tag))
        .one(db)
        .await?
        .is_some();
    if present {
        return Ok(false);
    }

    PublicationSourceActiveModel {
        publication_id: Set(publication_id),
        source_tag: Set(source_tag.to_string()),
        created_at: Set(chrono::Utc::now().into()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(true)
}

async fn create<C>(db: &C, resolved: &ResolvedEntry) -> Result<PersistedPublication, DbErr>
where
    C: ConnectionTrait,
{
    let entry = &resolved.entry;

    // Repeated identities keep their first slot; positions stay contiguous
    let mut seen = HashSet::new();
    let attached: Vec<(i32, &AuthorIdentity)> = resolved
        .authors
        .iter()
        .filter(|identity| seen.insert(identity.id))
        .zip(1..)
        .map(|(identity, position)| (position, identity))
        .collect();
    let has_faculty_author = attached.iter().any(|(_, identity)| identity.is_faculty);

    let venue = venue::find_or_create(db, entry).await?;
    let now = chrono::Utc::now();

    let publication = PublicationActiveModel {
        entry_key: Set(entry.entry_key.clone()),
        doi: Set(entry.doi.clone()),
        title: Set(entry.title.clone()),
        normalized_title: Set(entry.normalized_title.clone()),
        publication_type: Set(entry.publication_type.as_str().to_string()),
        year: Set(entry.year),
        journal: Set(entry.journal.clone()),
        booktitle: Set(entry.booktitle.clone()),
        volume: Set(entry.volume.clone()),
        number: Set(entry.number.clone()),
        pages: Set(entry.pages.clone()),
        publisher: Set(entry.publisher.clone()),
        series: Set(entry.series.clone()),
        editor: Set((!entry.editors.is_empty()).then(|| entry.editors.join(", "))),
        url: Set(entry.url.clone()),
        ee: Set(entry.ee.clone()),
        author_count: Set(attached.len() as i32),
        has_faculty_author: Set(has_faculty_author),
        first_source_tag: Set(Some(resolved.source_tag.clone())),
        venue_id: Set(venue.map(|(id, _)| id)),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    add_provenance(db, publication.id, &resolved.source_tag).await?;

    for (position, identity) in &attached {
        PublicationAuthorActiveModel {
            publication_id: Set(publication.id),
            author_id: Set(identity.id),
            author_position: Set(*position),
            ..Default::default()
        }
        .insert(db)
        .await?;
    }

    if let Some((venue_id, _)) = venue {
        venue::record_publication(db, venue_id, has_faculty_author).await?;
    }

    debug!(
        entry_key = %publication.entry_key,
        publication_id = publication.id,
        authors = attached.len(),
        "Created publication"
    );

    Ok(PersistedPublication {
        publication_id: publication.id,
        outcome: DedupOutcome::Created,
        provenance_added: false,
        venue_created: venue.is_some_and(|(_, created)| created),
        author_ids: attached.iter().map(|(_, identity)| identity.id).collect(),
        year: entry.year,
    })
}
