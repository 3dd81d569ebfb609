//! Offline author reconciliation
//!
//! Ingestion only merges identities by external id and exact normalized
//! name. Spelling variants ("S. Durga Bhavani" vs "Durga Bhavani S") are
//! reconciled afterwards: a [`NameMatcher`] proposes non-faculty authors
//! that look like a faculty author, and [`merge_authors`] folds one
//! author row into another.

use crate::errors::IngestionError;
use crate::graph::{self, canonical_pair, widen_years};
use crate::text::normalize_name;
use pubtrack_common::db::models::*;
use pubtrack_common::errors::AppError;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, instrument};

/// Decides whether two author names plausibly denote the same person
pub trait NameMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Similarity in `[0, 1]` if `candidate` matches `reference`
    fn score(&self, reference: &str, candidate: &str) -> Option<f64>;
}

/// Common reorderings of a name: middle names dropped, two-part names
/// swapped, initials moved between front and back. Returned normalized.
pub fn name_variations(name: &str) -> Vec<String> {
    let parts: Vec<&str> = name.split_whitespace().collect();
    let mut variations = Vec::new();

    if parts.len() >= 2 {
        let first = parts[0];
        let last = parts[parts.len() - 1];
        variations.push(name.to_string());

        if parts.len() > 2 {
            variations.push(format!("{} {}", first, last));
        }
        if parts.len() == 2 {
            variations.push(format!("{} {}", last, first));
        }
        if parts.len() == 3 {
            variations.push(format!("{} {} {}", parts[2], parts[0], parts[1]));
        }
        if first.len() <= 2 {
            variations.push(format!("{} {}", parts[1..].join(" "), first));
        }
        if last.len() <= 2 {
            variations.push(format!("{} {}", last, parts[..parts.len() - 1].join(" ")));
        }
    }

    let mut normalized: Vec<String> = Vec::new();
    for variation in variations {
        let norm = normalize_name(&variation);
        if !norm.is_empty() && !normalized.contains(&norm) {
            normalized.push(norm);
        }
    }
    normalized
}

/// Exact match against the reference's name variations
#[derive(Clone, Copy, Debug, Default)]
pub struct VariantMatcher;

impl NameMatcher for VariantMatcher {
    fn name(&self) -> &'static str {
        "variant"
    }

    fn score(&self, reference: &str, candidate: &str) -> Option<f64> {
        let candidate = normalize_name(candidate);
        name_variations(reference)
            .contains(&candidate)
            .then_some(1.0)
    }
}

/// Jaro-Winkler similarity of the normalized names
#[derive(Clone, Copy, Debug)]
pub struct FuzzyMatcher {
    pub threshold: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self { threshold: 0.92 }
    }
}

impl NameMatcher for FuzzyMatcher {
    fn name(&self) -> &'static str {
        "fuzzy"
    }

    fn score(&self, reference: &str, candidate: &str) -> Option<f64> {
        let score = strsim::jaro_winkler(&normalize_name(reference), &normalize_name(candidate));
        (score >= self.threshold).then_some(score)
    }
}

/// A proposed merge of `duplicate` into `canonical`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub canonical: Author,
    pub duplicate: Author,
    pub score: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub publications_transferred: usize,
    /// Publications both authors were already on
    pub publications_shared: usize,
    pub edges_rebuilt: usize,
}

/// Non-faculty authors that `matcher` pairs with a faculty author.
///
/// A candidate claimed equally well by two faculty authors is left out.
/// Candidates carrying a different external id are never proposed.
pub async fn find_merge_candidates<C>(
    db: &C,
    matcher: &dyn NameMatcher,
) -> Result<Vec<MergeCandidate>, IngestionError>
where
    C: ConnectionTrait,
{
    let faculty = AuthorEntity::find()
        .filter(AuthorColumn::IsFaculty.eq(true))
        .order_by_asc(AuthorColumn::Id)
        .all(db)
        .await?;
    let others = AuthorEntity::find()
        .filter(AuthorColumn::IsFaculty.eq(false))
        .order_by_asc(AuthorColumn::Id)
        .all(db)
        .await?;

    // duplicate id -> (best score, claiming faculty indexes)
    let mut best: BTreeMap<i32, (f64, Vec<usize>)> = BTreeMap::new();
    for (idx, canonical) in faculty.iter().enumerate() {
        for candidate in &others {
            if let (Some(a), Some(b)) = (&canonical.external_id, &candidate.external_id) {
                if a != b {
                    continue;
                }
            }
            let Some(score) = matcher.score(&canonical.name, &candidate.name) else {
                continue;
            };
            let slot = best.entry(candidate.id).or_insert((score, Vec::new()));
            if score > slot.0 {
                *slot = (score, vec![idx]);
            } else if score == slot.0 {
                slot.1.push(idx);
            }
        }
    }

    let by_id: HashMap<i32, &Author> = others.iter().map(|a| (a.id, a)).collect();
    let mut candidates = Vec::new();
    for (duplicate_id, (score, owners)) in best {
        match (owners.as_slice(), by_id.get(&duplicate_id)) {
            ([owner], Some(duplicate)) => candidates.push(MergeCandidate {
                canonical: faculty[*owner].clone(),
                duplicate: (*duplicate).clone(),
                score,
            }),
            (owners, _) if owners.len() > 1 => {
                debug!(duplicate_id, claims = owners.len(), "Ambiguous merge candidate skipped");
            }
            _ => {}
        }
    }

    info!(matcher = matcher.name(), candidates = candidates.len(), "Found merge candidates");
    Ok(candidates)
}

/// Fold `duplicate_id` into `canonical_id` in one transaction.
///
/// Associations move to the canonical author (dropped where it is already
/// listed), edges touching either author are rebuilt from the association
/// table, null profile fields and the faculty flag are backfilled, and the
/// duplicate row is deleted.
#[instrument(skip(db))]
pub async fn merge_authors<C>(
    db: &C,
    canonical_id: i32,
    duplicate_id: i32,
) -> Result<MergeReport, IngestionError>
where
    C: ConnectionTrait + TransactionTrait,
{
    if canonical_id == duplicate_id {
        return Err(AppError::Validation {
            message: "cannot merge an author into itself".into(),
            field: Some("duplicate_id".into()),
        }
        .into());
    }

    let txn = db.begin().await?;
    let canonical = find_author(&txn, canonical_id).await?;
    let duplicate = find_author(&txn, duplicate_id).await?;
    let mut report = MergeReport::default();

    // Move associations
    let canonical_pubs: HashSet<i32> = PublicationAuthorEntity::find()
        .filter(PublicationAuthorColumn::AuthorId.eq(canonical_id))
        .all(&txn)
        .await?
        .into_iter()
        .map(|link| link.publication_id)
        .collect();
    let duplicate_links = PublicationAuthorEntity::find()
        .filter(PublicationAuthorColumn::AuthorId.eq(duplicate_id))
        .all(&txn)
        .await?;

    let mut touched = Vec::with_capacity(duplicate_links.len());
    for link in duplicate_links {
        touched.push(link.publication_id);
        if canonical_pubs.contains(&link.publication_id) {
            PublicationAuthorEntity::delete_by_id(link.id).exec(&txn).await?;
            report.publications_shared += 1;
        } else {
            let mut active: PublicationAuthorActiveModel = link.into();
            active.author_id = Set(canonical_id);
            active.update(&txn).await?;
            report.publications_transferred += 1;
        }
    }

    CollaborationEntity::delete_many()
        .filter(
            Condition::any()
                .add(CollaborationColumn::AuthorLowId.is_in([canonical_id, duplicate_id]))
                .add(CollaborationColumn::AuthorHighId.is_in([canonical_id, duplicate_id])),
        )
        .exec(&txn)
        .await?;

    // Profile backfill; the external id moves only after the duplicate is gone
    let is_faculty = canonical.is_faculty || duplicate.is_faculty;
    let moved_external_id = match (&canonical.external_id, &duplicate.external_id) {
        (None, Some(ext)) => Some(ext.clone()),
        _ => None,
    };
    let mut active: AuthorActiveModel = canonical.clone().into();
    active.is_faculty = Set(is_faculty);
    active.email = Set(canonical.email.clone().or(duplicate.email.clone()));
    active.phone = Set(canonical.phone.clone().or(duplicate.phone.clone()));
    active.designation = Set(canonical.designation.clone().or(duplicate.designation.clone()));
    active.department = Set(canonical.department.clone().or(duplicate.department.clone()));
    active.updated_at = Set(chrono::Utc::now().into());

    AuthorEntity::delete_by_id(duplicate_id).exec(&txn).await?;
    if moved_external_id.is_some() {
        active.external_id = Set(moved_external_id);
    }
    active.update(&txn).await?;

    refresh_publications(&txn, &touched, is_faculty).await?;
    let coauthors = rebuild_edges(&txn, canonical_id, &mut report).await?;

    let mut refreshed = coauthors;
    refreshed.push(canonical_id);
    graph::refresh_author_stats(&txn, &refreshed).await?;

    txn.commit().await?;

    info!(
        canonical = %canonical.name,
        duplicate = %duplicate.name,
        transferred = report.publications_transferred,
        shared = report.publications_shared,
        "Merged authors"
    );
    Ok(report)
}

async fn find_author<C>(db: &C, id: i32) -> Result<Author, IngestionError>
where
    C: ConnectionTrait,
{
    AuthorEntity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::AuthorNotFound { id: id.to_string() }.into())
}

/// Recount authors on publications the duplicate was listed on
async fn refresh_publications<C>(db: &C, publication_ids: &[i32], faculty: bool) -> Result<(), IngestionError>
where
    C: ConnectionTrait,
{
    for &publication_id in publication_ids {
        let Some(publication) = PublicationEntity::find_by_id(publication_id).one(db).await? else {
            continue;
        };
        let author_count = PublicationAuthorEntity::find()
            .filter(PublicationAuthorColumn::PublicationId.eq(publication_id))
            .count(db)
            .await? as i32;

        let gained_faculty = faculty && !publication.has_faculty_author;
        if gained_faculty {
            if let Some(venue_id) = publication.venue_id {
                VenueEntity::update_many()
                    .col_expr(
                        VenueColumn::FacultyPublications,
                        Expr::col(VenueColumn::FacultyPublications).add(1),
                    )
                    .filter(VenueColumn::Id.eq(venue_id))
                    .exec(db)
                    .await?;
            }
        }

        let mut active: PublicationActiveModel = publication.into();
        active.author_count = Set(author_count);
        if gained_faculty {
            active.has_faculty_author = Set(true);
        }
        active.updated_at = Set(chrono::Utc::now().into());
        active.update(db).await?;
    }
    Ok(())
}

/// Recreate every edge of `author_id` from the association table.
/// Returns the co-author ids.
async fn rebuild_edges<C>(db: &C, author_id: i32, report: &mut MergeReport) -> Result<Vec<i32>, IngestionError>
where
    C: ConnectionTrait,
{
    let publication_ids: Vec<i32> = PublicationAuthorEntity::find()
        .filter(PublicationAuthorColumn::AuthorId.eq(author_id))
        .all(db)
        .await?
        .into_iter()
        .map(|link| link.publication_id)
        .collect();
    if publication_ids.is_empty() {
        return Ok(Vec::new());
    }

    let years: HashMap<i32, Option<i32>> = PublicationEntity::find()
        .filter(PublicationColumn::Id.is_in(publication_ids.clone()))
        .all(db)
        .await?
        .into_iter()
        .map(|publication| (publication.id, publication.year))
        .collect();
    let links = PublicationAuthorEntity::find()
        .filter(PublicationAuthorColumn::PublicationId.is_in(publication_ids))
        .filter(PublicationAuthorColumn::AuthorId.ne(author_id))
        .all(db)
        .await?;

    // co-author -> (count, first, last)
    let mut edges: BTreeMap<i32, (i32, Option<i32>, Option<i32>)> = BTreeMap::new();
    for link in links {
        let year = years.get(&link.publication_id).copied().flatten();
        let edge = edges.entry(link.author_id).or_insert((0, None, None));
        let (first, last) = widen_years(edge.1, edge.2, year);
        *edge = (edge.0 + 1, first, last);
    }

    let now = chrono::Utc::now();
    for (&coauthor, &(count, first_year, last_year)) in &edges {
        let (low, high) = canonical_pair(author_id, coauthor);
        CollaborationActiveModel {
            author_low_id: Set(low),
            author_high_id: Set(high),
            collaboration_count: Set(count),
            first_year: Set(first_year),
            last_year: Set(last_year),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        }
        .insert(db)
        .await?;
        report.edges_rebuilt += 1;
    }

    Ok(edges.into_keys().collect())
}
