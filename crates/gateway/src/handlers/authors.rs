//! Author lookups

use axum::{
    extract::{Path, State},
    Json,
};

use crate::AppState;
use pubtrack_common::{
    db::{models::Author, CollaboratorView, Repository},
    errors::{AppError, Result},
};

/// Numeric ids address the row; anything else is taken as an external
/// person id (percent-encode the `/`).
async fn resolve_author(repo: &Repository, id: &str) -> Result<Author> {
    let found = match id.parse::<i32>() {
        Ok(numeric) => repo.find_author_by_id(numeric).await?,
        Err(_) => repo.find_author_by_external_id(id).await?,
    };
    found.ok_or_else(|| AppError::AuthorNotFound { id: id.to_string() })
}

/// Get an author by id
pub async fn get_author(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Author>> {
    let repo = Repository::new(state.db.clone());
    Ok(Json(resolve_author(&repo, &id).await?))
}

/// Collaborators of an author, strongest first
pub async fn get_collaborators(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<CollaboratorView>>> {
    let repo = Repository::new(state.db.clone());
    let author = resolve_author(&repo, &id).await?;

    Ok(Json(repo.find_collaborators(author.id).await?))
}
