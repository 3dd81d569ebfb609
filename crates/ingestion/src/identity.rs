//! Author identity resolution
//!
//! Maps a raw author name (plus the faculty attribution the roster gave
//! it) to one stable author row. Priority: external id, then normalized
//! name, then a new row. A name hit on a non-faculty author asserted to be
//! faculty promotes that row in place.

use crate::roster::FacultyProfile;
use crate::text::{collapse_whitespace, normalize_name};
use pubtrack_common::db::models::*;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// The resolved identity of one author occurrence
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorIdentity {
    pub id: i32,
    pub is_faculty: bool,
    pub external_id: Option<String>,
}

impl From<&Author> for AuthorIdentity {
    fn from(author: &Author) -> Self {
        Self {
            id: author.id,
            is_faculty: author.is_faculty,
            external_id: author.external_id.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Existing,
    Created,
    Promoted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub identity: AuthorIdentity,
    pub outcome: ResolutionOutcome,
}

type CacheKey = (String, Option<String>);

#[derive(Default)]
struct CacheLayer {
    keys: HashMap<CacheKey, i32>,
    authors: HashMap<i32, AuthorIdentity>,
}

/// Run-scoped memo of resolved identities.
///
/// Resolutions made while persisting an entry are staged and only become
/// visible to later entries after [`IdentityCache::commit`]; a rolled back
/// entry calls [`IdentityCache::discard`] so no cached id outlives its row.
#[derive(Default)]
pub struct IdentityCache {
    committed: CacheLayer,
    pending: CacheLayer,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, key: &CacheKey) -> Option<&AuthorIdentity> {
        let id = self
            .pending
            .keys
            .get(key)
            .or_else(|| self.committed.keys.get(key))?;
        self.pending
            .authors
            .get(id)
            .or_else(|| self.committed.authors.get(id))
    }

    fn stage(&mut self, key: CacheKey, identity: AuthorIdentity) {
        self.pending.keys.insert(key, identity.id);
        self.pending.authors.insert(identity.id, identity);
    }

    /// Publish staged resolutions
    pub fn commit(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.committed.keys.extend(pending.keys);
        self.committed.authors.extend(pending.authors);
    }

    /// Drop staged resolutions
    pub fn discard(&mut self) {
        self.pending = CacheLayer::default();
    }

    /// Committed identities
    pub(crate) fn len(&self) -> usize {
        self.committed.authors.len()
    }
}

/// Resolve one author occurrence to an author row, creating or promoting
/// it as needed.
///
/// A blank name never matches anything and always creates a new row.
pub async fn resolve<C>(
    db: &C,
    cache: &mut IdentityCache,
    name: &str,
    external_id: Option<&str>,
    is_faculty: bool,
    profile: Option<&FacultyProfile>,
) -> Result<Resolved, DbErr>
where
    C: ConnectionTrait,
{
    let display = collapse_whitespace(name);
    let normalized = normalize_name(&display);
    let key: CacheKey = (normalized.clone(), external_id.map(str::to_string));

    if !normalized.is_empty() {
        if let Some(identity) = cache.lookup(&key) {
            // A cached non-faculty hit still has to go through promotion
            if identity.is_faculty || !is_faculty {
                return Ok(Resolved {
                    identity: identity.clone(),
                    outcome: ResolutionOutcome::Existing,
                });
            }
        }
    }

    let existing = match external_id {
        Some(ext) => {
            AuthorEntity::find()
                .filter(AuthorColumn::ExternalId.eq(ext))
                .one(db)
                .await?
        }
        None => None,
    };

    let existing = match existing {
        Some(author) => Some(author),
        None if !normalized.is_empty() => {
            AuthorEntity::find()
                .filter(AuthorColumn::NormalizedName.eq(normalized.as_str()))
                .order_by_asc(AuthorColumn::Id)
                .all(db)
                .await?
                .into_iter()
                .find(|candidate| match (external_id, candidate.external_id.as_deref()) {
                    (Some(wanted), Some(held)) => wanted == held,
                    _ => true,
                })
        }
        None => None,
    };

    let resolved = match existing {
        Some(author) => update_existing(db, author, external_id, is_faculty, profile).await?,
        None => create(db, &display, &normalized, external_id, is_faculty, profile).await?,
    };

    if !normalized.is_empty() {
        cache.stage(key, resolved.identity.clone());
    }
    Ok(resolved)
}

async fn update_existing<C>(
    db: &C,
    author: Author,
    external_id: Option<&str>,
    is_faculty: bool,
    profile: Option<&FacultyProfile>,
) -> Result<Resolved, DbErr>
where
    C: ConnectionTrait,
{
    let promoted = is_faculty && !author.is_faculty;
    let mut active: AuthorActiveModel = author.clone().into();
    let mut changed = false;

    if promoted {
        active.is_faculty = Set(true);
        changed = true;
    }
    if let (Some(ext), None) = (external_id, author.external_id.as_ref()) {
        active.external_id = Set(Some(ext.to_string()));
        changed = true;
    }
    if let Some(profile) = profile {
        changed |= backfill(&mut active.email, &author.email, &profile.email);
        changed |= backfill(&mut active.phone, &author.phone, &profile.phone);
        changed |= backfill(&mut active.designation, &author.designation, &profile.designation);
        changed |= backfill(&mut active.department, &author.department, &profile.department);
    }

    let author = if changed {
        active.updated_at = Set(chrono::Utc::now().into());
        active.update(db).await?
    } else {
        author
    };

    if promoted {
        debug!(author_id = author.id, name = %author.name, "Promoted author to faculty");
    }

    Ok(Resolved {
        identity: AuthorIdentity::from(&author),
        outcome: if promoted {
            ResolutionOutcome::Promoted
        } else {
            ResolutionOutcome::Existing
        },
    })
}

/// Fill a null profile field; populated fields are never overwritten
fn backfill(
    slot: &mut ActiveValue<Option<String>>,
    current: &Option<String>,
    incoming: &Option<String>,
) -> bool {
    match (current, incoming) {
        (None, Some(value)) => {
            *slot = Set(Some(value.clone()));
            true
        }
        _ => false,
    }
}

async fn create<C>(
    db: &C,
    display: &str,
    normalized: &str,
    external_id: Option<&str>,
    is_faculty: bool,
    profile: Option<&FacultyProfile>,
) -> Result<Resolved, DbErr>
where
    C: ConnectionTrait,
{
    let now = chrono::Utc::now();
    let profile = profile.cloned().unwrap_or_default();

    let author = AuthorActiveModel {
        name: Set(display.to_string()),
        normalized_name: Set(normalized.to_string()),
        external_id: Set(external_id.map(str::to_string)),
        is_faculty: Set(is_faculty),
        email: Set(profile.email),
        phone: Set(profile.phone),
        designation: Set(profile.designation),
        department: Set(profile.department),
        total_publications: Set(0),
        total_collaborations: Set(0),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    debug!(author_id = author.id, name = %author.name, is_faculty, "Created author");

    Ok(Resolved {
        identity: AuthorIdentity::from(&author),
        outcome: ResolutionOutcome::Created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubtrack_common::DbPool;
    use sea_orm::PaginatorTrait;

    async fn db() -> DbPool {
        DbPool::connect_sqlite_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_same_name_resolves_to_one_author() {
        let pool = db().await;
        let mut cache = IdentityCache::new();

        let first = resolve(pool.conn(), &mut cache, "Bob  CoAuthor", None, false, None)
            .await
            .unwrap();
        cache.commit();
        let second = resolve(pool.conn(), &mut cache, "bob coauthor.", None, false, None)
            .await
            .unwrap();

        assert_eq!(first.outcome, ResolutionOutcome::Created);
        assert_eq!(second.outcome, ResolutionOutcome::Existing);
        assert_eq!(first.identity.id, second.identity.id);

        let row = AuthorEntity::find_by_id(first.identity.id)
            .one(pool.conn())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.name, "Bob CoAuthor");
    }

    #[tokio::test]
    async fn test_faculty_promotion_in_place() {
        let pool = db().await;
        let mut cache = IdentityCache::new();
        let profile = FacultyProfile {
            email: Some("jdoe@example.edu".into()),
            ..Default::default()
        };

        let plain = resolve(pool.conn(), &mut cache, "John Doe", None, false, None)
            .await
            .unwrap();
        cache.commit();
        let faculty = resolve(
            pool.conn(),
            &mut cache,
            "John Doe",
            Some("d/JohnDoe"),
            true,
            Some(&profile),
        )
        .await
        .unwrap();
        cache.commit();

        assert_eq!(faculty.outcome, ResolutionOutcome::Promoted);
        assert_eq!(faculty.identity.id, plain.identity.id);
        assert_eq!(AuthorEntity::find().count(pool.conn()).await.unwrap(), 1);

        let row = AuthorEntity::find_by_id(plain.identity.id)
            .one(pool.conn())
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_faculty);
        assert_eq!(row.external_id.as_deref(), Some("d/JohnDoe"));
        assert_eq!(row.email.as_deref(), Some("jdoe@example.edu"));

        // The cached non-faculty entry must now report the promoted state
        let again = resolve(pool.conn(), &mut cache, "John Doe", None, false, None)
            .await
            .unwrap();
        assert!(again.identity.is_faculty);
    }

    #[tokio::test]
    async fn test_external_id_beats_name() {
        let pool = db().await;
        let mut cache = IdentityCache::new();

        let a = resolve(pool.conn(), &mut cache, "S. Srirama", Some("s/SNS"), true, None)
            .await
            .unwrap();
        let b = resolve(pool.conn(), &mut cache, "Srirama S N", Some("s/SNS"), true, None)
            .await
            .unwrap();

        assert_eq!(a.identity.id, b.identity.id);
        assert_eq!(b.outcome, ResolutionOutcome::Existing);
    }

    #[tokio::test]
    async fn test_name_bound_to_other_external_id_is_skipped() {
        let pool = db().await;
        let mut cache = IdentityCache::new();

        let first = resolve(pool.conn(), &mut cache, "Anil Kumar", Some("k/Anil1"), true, None)
            .await
            .unwrap();
        let second = resolve(pool.conn(), &mut cache, "Anil Kumar", Some("k/Anil2"), true, None)
            .await
            .unwrap();
        let unattributed = resolve(pool.conn(), &mut cache, "Anil Kumar", None, false, None)
            .await
            .unwrap();

        assert_ne!(first.identity.id, second.identity.id);
        assert_eq!(second.outcome, ResolutionOutcome::Created);
        // Without an external id the lowest matching id wins
        assert_eq!(unattributed.identity.id, first.identity.id);
    }

    #[tokio::test]
    async fn test_backfill_never_overwrites() {
        let pool = db().await;
        let mut cache = IdentityCache::new();
        let original = FacultyProfile {
            email: Some("first@example.edu".into()),
            ..Default::default()
        };
        let later = FacultyProfile {
            email: Some("second@example.edu".into()),
            phone: Some("555-0100".into()),
            ..Default::default()
        };

        let created = resolve(pool.conn(), &mut cache, "Ada L", Some("l/Ada"), true, Some(&original))
            .await
            .unwrap();
        resolve(pool.conn(), &mut cache, "Ada L", Some("l/Ada"), true, Some(&later))
            .await
            .unwrap();

        let row = AuthorEntity::find_by_id(created.identity.id)
            .one(pool.conn())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.email.as_deref(), Some("first@example.edu"));
        assert_eq!(row.phone.as_deref(), Some("555-0100"));
    }

    #[tokio::test]
    async fn test_blank_name_always_creates() {
        let pool = db().await;
        let mut cache = IdentityCache::new();

        let a = resolve(pool.conn(), &mut cache, "  ", None, false, None).await.unwrap();
        let b = resolve(pool.conn(), &mut cache, "", None, false, None).await.unwrap();

        assert_ne!(a.identity.id, b.identity.id);
        assert_eq!(b.outcome, ResolutionOutcome::Created);
    }

    #[tokio::test]
    async fn test_discarded_resolutions_are_forgotten() {
        let pool = db().await;
        let mut cache = IdentityCache::new();

        resolve(pool.conn(), &mut cache, "Eve", None, false, None).await.unwrap();
        assert!(cache.lookup(&("eve".to_string(), None)).is_some());

        cache.discard();
        assert!(cache.lookup(&("eve".to_string(), None)).is_none());
        assert_eq!(cache.len(), 0);
    }
}
