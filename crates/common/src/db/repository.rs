//! Repository for read-side queries
//!
//! Writes happen inside the ingestion pipeline's unit of work; the
//! gateway and CLI only read through here.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::Result;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A collaborator of some author, with the edge attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorView {
    pub author: Author,
    pub collaboration_count: i32,
    pub first_year: Option<i32>,
    pub last_year: Option<i32>,
}

/// A publication with its ordered authors and provenance tags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationDetail {
    pub publication: Publication,
    pub authors: Vec<Author>,
    pub source_tags: Vec<String>,
    pub venue: Option<Venue>,
}

/// Row counts across the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub authors: u64,
    pub faculty_authors: u64,
    pub publications: u64,
    pub faculty_publications: u64,
    pub collaborations: u64,
    pub venues: u64,
    pub data_sources: Vec<DataSource>,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Author Operations
    // ========================================================================

    /// Find author by ID
    pub async fn find_author_by_id(&self, id: i32) -> Result<Option<Author>> {
        AuthorEntity::find_by_id(id)
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Find author by external person id
    pub async fn find_author_by_external_id(&self, external_id: &str) -> Result<Option<Author>> {
        AuthorEntity::find()
            .filter(AuthorColumn::ExternalId.eq(external_id))
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    /// Collaborators of an author, strongest edges first
    pub async fn find_collaborators(&self, author_id: i32) -> Result<Vec<CollaboratorView>> {
        let edges = CollaborationEntity::find()
            .filter(
                Condition::any()
                    .add(CollaborationColumn::AuthorLowId.eq(author_id))
                    .add(CollaborationColumn::AuthorHighId.eq(author_id)),
            )
            .order_by_desc(CollaborationColumn::CollaborationCount)
            .order_by_asc(CollaborationColumn::Id)
            .all(self.conn())
            .await?;

        let other_ids: Vec<i32> = edges.iter().map(|e| e.other(author_id)).collect();
        let mut authors: HashMap<i32, Author> = AuthorEntity::find()
            .filter(AuthorColumn::Id.is_in(other_ids))
            .all(self.conn())
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        Ok(edges
            .into_iter()
            .filter_map(|edge| {
                authors.remove(&edge.other(author_id)).map(|author| CollaboratorView {
                    author,
                    collaboration_count: edge.collaboration_count,
                    first_year: edge.first_year,
                    last_year: edge.last_year,
                })
            })
            .collect())
    }

    // ========================================================================
    // Publication Operations
    // ========================================================================

    /// Find publication by entry key, with authors in list order
    pub async fn find_publication_by_key(&self, key: &str) -> Result<Option<PublicationDetail>> {
        let Some(publication) = PublicationEntity::find()
            .filter(PublicationColumn::EntryKey.eq(key))
            .one(self.conn())
            .await?
        else {
            return Ok(None);
        };

        let links = PublicationAuthorEntity::find()
            .filter(PublicationAuthorColumn::PublicationId.eq(publication.id))
            .order_by_asc(PublicationAuthorColumn::AuthorPosition)
            .all(self.conn())
            .await?;

        let mut by_id: HashMap<i32, Author> = AuthorEntity::find()
            .filter(AuthorColumn::Id.is_in(links.iter().map(|l| l.author_id)))
            .all(self.conn())
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();
        let authors = links
            .iter()
            .filter_map(|l| by_id.remove(&l.author_id))
            .collect();

        let source_tags = PublicationSourceEntity::find()
            .filter(PublicationSourceColumn::PublicationId.eq(publication.id))
            .order_by_asc(PublicationSourceColumn::Id)
            .all(self.conn())
            .await?
            .into_iter()
            .map(|s| s.source_tag)
            .collect();

        let venue = match publication.venue_id {
            Some(venue_id) => VenueEntity::find_by_id(venue_id).one(self.conn()).await?,
            None => None,
        };

        Ok(Some(PublicationDetail {
            publication,
            authors,
            source_tags,
            venue,
        }))
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Row counts and data source sync state
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let conn = self.conn();

        Ok(DatabaseStats {
            authors: AuthorEntity::find().count(conn).await?,
            faculty_authors: AuthorEntity::find()
                .filter(AuthorColumn::IsFaculty.eq(true))
                .count(conn)
                .await?,
            publications: PublicationEntity::find().count(conn).await?,
            faculty_publications: PublicationEntity::find()
                .filter(PublicationColumn::HasFacultyAuthor.eq(true))
                .count(conn)
                .await?,
            collaborations: CollaborationEntity::find().count(conn).await?,
            venues: VenueEntity::find().count(conn).await?,
            data_sources: DataSourceEntity::find()
                .order_by_asc(DataSourceColumn::SourceName)
                .all(conn)
                .await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ActiveModelTrait, Set};

    async fn author(repo: &Repository, name: &str) -> Author {
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
        .insert(repo.conn())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_collaborators_from_either_endpoint() {
        let repo = Repository::new(DbPool::connect_sqlite_memory().await.unwrap());
        let a = author(&repo, "Ada").await;
        let b = author(&repo, "Bob").await;
        let now = chrono::Utc::now();

        CollaborationActiveModel {
            author_low_id: Set(a.id),
            author_high_id: Set(b.id),
            collaboration_count: Set(2),
            first_year: Set(Some(2019)),
            last_year: Set(Some(2021)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        }
        .insert(repo.conn())
        .await
        .unwrap();

        let of_a = repo.find_collaborators(a.id).await.unwrap();
        let of_b = repo.find_collaborators(b.id).await.unwrap();
        assert_eq!(of_a.len(), 1);
        assert_eq!(of_a[0].author.id, b.id);
        assert_eq!(of_b[0].author.id, a.id);
        assert_eq!(of_b[0].collaboration_count, 2);
    }

    #[tokio::test]
    async fn test_missing_publication_is_none() {
        let repo = Repository::new(DbPool::connect_sqlite_memory().await.unwrap());
        assert!(repo.find_publication_by_key("nope").await.unwrap().is_none());
        assert_eq!(repo.stats().await.unwrap().publications, 0);
    }
}
