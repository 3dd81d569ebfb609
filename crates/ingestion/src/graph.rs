//! Collaboration graph maintenance
//!
//! Edges are stored once per unordered author pair with the smaller id
//! first. Each newly created publication adds one to every pair among its
//! authors and widens the pair's year range.

use pubtrack_common::db::models::*;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, Set, SqlErr, TransactionTrait,
};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GraphUpdate {
    pub edges_created: usize,
    pub edges_updated: usize,
}

/// Canonical storage order of an unordered pair
pub fn canonical_pair(a: i32, b: i32) -> (i32, i32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Extend a `[first, last]` year range to cover `year`
pub fn widen_years(
    first: Option<i32>,
    last: Option<i32>,
    year: Option<i32>,
) -> (Option<i32>, Option<i32>) {
    match year {
        None => (first, last),
        Some(y) => (
            Some(first.map_or(y, |f| f.min(y))),
            Some(last.map_or(y, |l| l.max(y))),
        ),
    }
}

/// Count one jointly authored publication for every pair in `author_ids`,
/// then refresh the cached counts of every listed author.
pub async fn record_coauthorship<C>(
    db: &C,
    author_ids: &[i32],
    year: Option<i32>,
) -> Result<GraphUpdate, DbErr>
where
    C: ConnectionTrait + TransactionTrait,
{
    let mut update = GraphUpdate::default();

    for (i, &a) in author_ids.iter().enumerate() {
        for &b in &author_ids[i + 1..] {
            if a == b {
                continue;
            }
            let (low, high) = canonical_pair(a, b);

            match find_edge(db, low, high).await? {
                Some(edge) => {
                    bump_edge(db, edge, year).await?;
                    update.edges_updated += 1;
                }
                None => {
                    if insert_edge(db, low, high, year).await? {
                        update.edges_created += 1;
                    } else {
                        update.edges_updated += 1;
                    }
                }
            }
        }
    }

    refresh_author_stats(db, author_ids).await?;
    Ok(update)
}

async fn find_edge<C>(db: &C, low: i32, high: i32) -> Result<Option<Collaboration>, DbErr>
where
    C: ConnectionTrait,
{
    CollaborationEntity::find()
        .filter(CollaborationColumn::AuthorLowId.eq(low))
        .filter(CollaborationColumn::AuthorHighId.eq(high))
        .one(db)
        .await
}

async fn bump_edge<C>(db: &C, edge: Collaboration, year: Option<i32>) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let (first, last) = widen_years(edge.first_year, edge.last_year, year);
    let count = edge.collaboration_count + 1;

    let mut active: CollaborationActiveModel = edge.into();
    active.collaboration_count = Set(count);
    active.first_year = Set(first);
    active.last_year = Set(last);
    active.updated_at = Set(chrono::Utc::now().into());
    active.update(db).await?;
    Ok(())
}

/// Insert a fresh edge under a savepoint. A unique violation means the
/// pair appeared concurrently: the insert is rolled back and retried as an
/// update. Returns true if a new edge was created.
async fn insert_edge<C>(db: &C, low: i32, high: i32, year: Option<i32>) -> Result<bool, DbErr>
where
    C: ConnectionTrait + TransactionTrait,
{
    let now = chrono::Utc::now();
    let savepoint = db.begin().await?;

    let inserted = CollaborationActiveModel {
        author_low_id: Set(low),
        author_high_id: Set(high),
        collaboration_count: Set(1),
        first_year: Set(year),
        last_year: Set(year),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        ..Default::default()
    }
    .insert(&savepoint)
    .await;

    match inserted {
        Ok(_) => {
            savepoint.commit().await?;
            Ok(true)
        }
        Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            savepoint.rollback().await?;
            debug!(low, high, "Edge insert raced, retrying as update");
            match find_edge(db, low, high).await? {
                Some(edge) => {
                    bump_edge(db, edge, year).await?;
                    Ok(false)
                }
                None => Err(e),
            }
        }
        Err(e) => {
            savepoint.rollback().await?;
            Err(e)
        }
    }
}

/// Recompute cached publication and collaborator counts from the tables
pub async fn refresh_author_stats<C>(db: &C, author_ids: &[i32]) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    for &author_id in author_ids {
        let publications = PublicationAuthorEntity::find()
            .filter(PublicationAuthorColumn::AuthorId.eq(author_id))
            .count(db)
            .await?;
        let collaborators = CollaborationEntity::find()
            .filter(
                Condition::any()
                    .add(CollaborationColumn::AuthorLowId.eq(author_id))
                    .add(CollaborationColumn::AuthorHighId.eq(author_id)),
            )
            .count(db)
            .await?;

        AuthorEntity::update_many()
            .col_expr(AuthorColumn::TotalPublications, Expr::value(publications as i32))
            .col_expr(AuthorColumn::TotalCollaborations, Expr::value(collaborators as i32))
            .col_expr(AuthorColumn::UpdatedAt, Expr::value(chrono::Utc::now().fixed_offset()))
            .filter(AuthorColumn::Id.eq(author_id))
            .exec(db)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubtrack_common::DbPool;

    async fn author(pool: &DbPool, name: &str) -> i32 {
        let now = chrono::Utc::now();
        AuthorActiveModel {
            name: Set(name.to_string()),
            normalized_name: Set(name.to_lowercase()),
            external_id: Set(None),
            is_faculty: Set(false),
            email: Set(None),
            phone: Set(None),
            designation: Set(None),
            department: Set(None),
            total_publications: Set(0),
            total_collaborations: Set(0),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        }
        .insert(pool.conn())
        .await
        .unwrap()
        .id
    }

    #[test]
    fn test_widen_years() {
        assert_eq!(widen_years(None, None, Some(2020)), (Some(2020), Some(2020)));
        assert_eq!(widen_years(Some(2019), Some(2021), Some(2018)), (Some(2018), Some(2021)));
        assert_eq!(widen_years(Some(2019), Some(2021), Some(2023)), (Some(2019), Some(2023)));
        assert_eq!(widen_years(Some(2019), Some(2021), None), (Some(2019), Some(2021)));
    }

    #[test]
    fn test_canonical_pair() {
        assert_eq!(canonical_pair(7, 3), (3, 7));
        assert_eq!(canonical_pair(3, 7), (3, 7));
    }

    #[tokio::test]
    async fn test_pair_is_symmetric() {
        let pool = DbPool::connect_sqlite_memory().await.unwrap();
        let a = author(&pool, "a").await;
        let b = author(&pool, "b").await;

        let first = record_coauthorship(pool.conn(), &[b, a], Some(2021)).await.unwrap();
        let second = record_coauthorship(pool.conn(), &[a, b], Some(2019)).await.unwrap();

        assert_eq!(first.edges_created, 1);
        assert_eq!(second.edges_updated, 1);

        let edges = CollaborationEntity::find().all(pool.conn()).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!((edges[0].author_low_id, edges[0].author_high_id), (a, b));
        assert_eq!(edges[0].collaboration_count, 2);
        assert_eq!((edges[0].first_year, edges[0].last_year), (Some(2019), Some(2021)));
    }

    #[tokio::test]
    async fn test_duplicate_insert_becomes_update() {
        let pool = DbPool::connect_sqlite_memory().await.unwrap();
        let a = author(&pool, "a").await;
        let b = author(&pool, "b").await;

        assert!(insert_edge(pool.conn(), a, b, Some(2020)).await.unwrap());
        // Same pair again, as if another writer got there first
        assert!(!insert_edge(pool.conn(), a, b, Some(2022)).await.unwrap());

        let edges = CollaborationEntity::find().all(pool.conn()).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].collaboration_count, 2);
        assert_eq!((edges[0].first_year, edges[0].last_year), (Some(2020), Some(2022)));
    }

    #[tokio::test]
    async fn test_counts_refreshed() {
        let pool = DbPool::connect_sqlite_memory().await.unwrap();
        let a = author(&pool, "a").await;
        let b = author(&pool, "b").await;
        let c = author(&pool, "c").await;

        let update = record_coauthorship(pool.conn(), &[a, b, c], None).await.unwrap();
        assert_eq!(update.edges_created, 3);

        let row = AuthorEntity::find_by_id(a).one(pool.conn()).await.unwrap().unwrap();
        assert_eq!(row.total_collaborations, 2);
        // No association rows were written here
        assert_eq!(row.total_publications, 0);

        let edge = find_edge(pool.conn(), a, c).await.unwrap().unwrap();
        assert_eq!((edge.first_year, edge.last_year), (None, None));
    }
}
