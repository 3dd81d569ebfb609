//! Admin handlers: job triggers, job status and statistics
//!
//! Triggers claim the job slot before responding, so a second trigger of
//! the same kind gets 409 while the first is still running. The job
//! itself runs in a background task and reports through the job store.
//! A task that dies without reporting releases its slot as failed.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use pubtrack_common::{
    db::{DatabaseStats, Repository},
    errors::{AppError, Result},
    jobs::{JobKind, JobState, JobStatus, JobStore, JobTicket},
};
use pubtrack_ingestion::{DblpFetcher, IngestionPipeline};

/// Optional overrides for an ingest run
#[derive(Debug, Default, Deserialize, Validate)]
pub struct IngestRequest {
    #[validate(length(min = 1, max = 4096))]
    pub source_dir: Option<String>,

    #[validate(length(min = 1, max = 4096))]
    pub roster_path: Option<String>,
}

/// Optional overrides for a fetch run
#[derive(Debug, Default, Deserialize, Validate)]
pub struct FetchRequest {
    #[validate(length(min = 1, max = 4096))]
    pub roster_path: Option<String>,

    #[validate(length(min = 1, max = 4096))]
    pub output_dir: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub poll_url: String,
}

impl TriggerResponse {
    fn accepted(kind: JobKind, job_id: Uuid) -> (StatusCode, Json<Self>) {
        (
            StatusCode::ACCEPTED,
            Json(Self {
                job_id,
                kind,
                status: JobStatus::Running,
                poll_url: format!("/v1/admin/{}/status", kind),
            }),
        )
    }
}

/// Job state plus derived progress fields
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub state: JobState,
    pub progress_percent: f64,
    pub finished: bool,
}

impl From<JobState> for JobStatusResponse {
    fn from(state: JobState) -> Self {
        Self {
            progress_percent: state.progress_percent(),
            finished: state.is_terminal(),
            state,
        }
    }
}

/// Run `job` in the background. If it ends (or panics) while the store
/// still shows this ticket as running, the job is marked failed.
pub(crate) fn spawn_job<F>(store: Arc<dyn JobStore>, ticket: JobTicket, job: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let outcome = tokio::spawn(job).await;

        let state = store.get(ticket.kind).await;
        if state.job_id != Some(ticket.id) || state.is_terminal() {
            return;
        }

        let message = match outcome {
            Ok(()) => "Job ended without reporting a result".to_string(),
            Err(e) if e.is_panic() => "Job panicked".to_string(),
            Err(e) => format!("Job aborted: {}", e),
        };
        tracing::error!(job_id = %ticket.id, kind = %ticket.kind, %message, "Releasing stuck job");
        store.fail(&ticket, &message).await;
    })
}

fn validate<T: Validate>(request: &T) -> Result<()> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })
}

/// Start an ingest run in the background
pub async fn trigger_ingest(
    State(state): State<AppState>,
    body: Option<Json<IngestRequest>>,
) -> Result<(StatusCode, Json<TriggerResponse>)> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    validate(&request)?;

    let source_dir = request
        .source_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| state.config.ingestion.source_dir.clone());
    let roster_path = request
        .roster_path
        .map(PathBuf::from)
        .unwrap_or_else(|| state.config.ingestion.roster_path.clone());

    let ticket = state
        .job_store
        .start(JobKind::Ingest, &format!("Ingesting {}", source_dir.display()))
        .await?;
    let job_id = ticket.id;

    let pipeline = IngestionPipeline::new(
        state.db.primary.clone(),
        state.job_store.clone(),
        &state.config.ingestion,
    );
    let job_ticket = ticket.clone();
    spawn_job(state.job_store.clone(), ticket, async move {
        if let Err(e) = pipeline.run_started(&job_ticket, &source_dir, &roster_path).await {
            tracing::warn!(job_id = %job_ticket.id, error = %e, "Ingest job failed");
        }
    });

    tracing::info!(job_id = %job_id, "Ingest job started");
    Ok(TriggerResponse::accepted(JobKind::Ingest, job_id))
}

/// Start a DBLP fetch in the background
pub async fn trigger_fetch(
    State(state): State<AppState>,
    body: Option<Json<FetchRequest>>,
) -> Result<(StatusCode, Json<TriggerResponse>)> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    validate(&request)?;

    let mut config = state.config.dblp.clone();
    if let Some(dir) = request.output_dir {
        config.output_dir = PathBuf::from(dir);
    }
    let roster_path = request
        .roster_path
        .map(PathBuf::from)
        .unwrap_or_else(|| state.config.ingestion.roster_path.clone());

    let fetcher = DblpFetcher::new(config).map_err(AppError::from)?;
    let ticket = state
        .job_store
        .start(JobKind::Fetch, "Fetching DBLP bibliographies")
        .await?;
    let job_id = ticket.id;

    let store = state.job_store.clone();
    let job_ticket = ticket.clone();
    spawn_job(state.job_store.clone(), ticket, async move {
        if let Err(e) = fetcher.run_started(store.as_ref(), &job_ticket, &roster_path).await {
            tracing::warn!(job_id = %job_ticket.id, error = %e, "Fetch job failed");
        }
    });

    tracing::info!(job_id = %job_id, "Fetch job started");
    Ok(TriggerResponse::accepted(JobKind::Fetch, job_id))
}

pub async fn ingest_status(State(state): State<AppState>) -> Json<JobStatusResponse> {
    Json(state.job_store.get(JobKind::Ingest).await.into())
}

pub async fn fetch_status(State(state): State<AppState>) -> Json<JobStatusResponse> {
    Json(state.job_store.get(JobKind::Fetch).await.into())
}

/// Row counts and data source sync state
pub async fn stats(State(state): State<AppState>) -> Result<Json<DatabaseStats>> {
    let repo = Repository::new(state.db.clone());
    Ok(Json(repo.stats().await?))
}
