//! Schema bootstrap
//!
//! Tables are derived from the entity definitions so Postgres and the
//! SQLite test database share one source of truth. Every statement is
//! `IF NOT EXISTS`, so bootstrapping an existing database is a no-op.

use crate::db::models::*;
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, DbErr, EntityTrait, Schema};
use tracing::debug;

/// Create all tables and indexes that do not exist yet
pub async fn create_schema<C>(db: &C) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let schema = Schema::new(db.get_database_backend());

    // Referenced tables first so foreign keys resolve
    create_table(db, &schema, AuthorEntity).await?;
    create_table(db, &schema, VenueEntity).await?;
    create_table(db, &schema, PublicationEntity).await?;
    create_table(db, &schema, PublicationAuthorEntity).await?;
    create_table(db, &schema, PublicationSourceEntity).await?;
    create_table(db, &schema, CollaborationEntity).await?;
    create_table(db, &schema, DataSourceEntity).await?;

    for index in indexes() {
        db.execute(db.get_database_backend().build(&index)).await?;
    }

    debug!("Schema bootstrap complete");
    Ok(())
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(db.get_database_backend().build(&stmt)).await?;
    Ok(())
}

fn indexes() -> Vec<IndexCreateStatement> {
    vec![
        // One association per (publication, author)
        Index::create()
            .name("ux_publication_authors_pair")
            .table(PublicationAuthorEntity)
            .col(PublicationAuthorColumn::PublicationId)
            .col(PublicationAuthorColumn::AuthorId)
            .unique()
            .if_not_exists()
            .to_owned(),
        // One provenance row per (publication, source tag)
        Index::create()
            .name("ux_publication_sources_pair")
            .table(PublicationSourceEntity)
            .col(PublicationSourceColumn::PublicationId)
            .col(PublicationSourceColumn::SourceTag)
            .unique()
            .if_not_exists()
            .to_owned(),
        // One edge per unordered author pair
        Index::create()
            .name("ux_collaborations_pair")
            .table(CollaborationEntity)
            .col(CollaborationColumn::AuthorLowId)
            .col(CollaborationColumn::AuthorHighId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("ix_authors_normalized_name")
            .table(AuthorEntity)
            .col(AuthorColumn::NormalizedName)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("ix_publications_doi")
            .table(PublicationEntity)
            .col(PublicationColumn::Doi)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("ix_publication_authors_author")
            .table(PublicationAuthorEntity)
            .col(PublicationAuthorColumn::AuthorId)
            .if_not_exists()
            .to_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use sea_orm::PaginatorTrait;

    #[tokio::test]
    async fn test_schema_bootstrap_is_idempotent() {
        let pool = DbPool::connect_sqlite_memory().await.unwrap();
        create_schema(pool.conn()).await.unwrap();

        let authors = AuthorEntity::find().count(pool.conn()).await.unwrap();
        assert_eq!(authors, 0);
    }
}
