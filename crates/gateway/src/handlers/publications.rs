//! Publication lookup by entry key

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use pubtrack_common::{
    db::{PublicationDetail, Repository},
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize, Validate)]
pub struct PublicationQuery {
    #[validate(length(min = 1, max = 512))]
    pub key: String,
}

/// Get a publication with its ordered authors, provenance tags and venue
pub async fn get_publication(
    State(state): State<AppState>,
    Query(query): Query<PublicationQuery>,
) -> Result<Json<PublicationDetail>> {
    query.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("key".to_string()),
    })?;

    let repo = Repository::new(state.db.clone());
    let detail = repo
        .find_publication_by_key(&query.key)
        .await?
        .ok_or_else(|| AppError::PublicationNotFound {
            key: query.key.clone(),
        })?;

    Ok(Json(detail))
}
