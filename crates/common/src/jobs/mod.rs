//! Background job state
//!
//! The gateway runs fetch and ingest jobs in the background and reports
//! their progress through a [`JobStore`]. At most one job of each kind
//! runs at a time; a second trigger is rejected with
//! [`AppError::JobAlreadyRunning`].

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Kind of background job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Fetch,
    Ingest,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Fetch => "fetch",
            JobKind::Ingest => "ingest",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job status enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Snapshot of a job kind's latest run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobState {
    pub kind: JobKind,
    pub status: JobStatus,
    pub job_id: Option<Uuid>,
    pub message: String,
    pub current: u64,
    pub total: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Final report of a finished run, serialized by the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<serde_json::Value>,
}

impl JobState {
    pub fn idle(kind: JobKind) -> Self {
        Self {
            kind,
            status: JobStatus::Idle,
            job_id: None,
            message: String::new(),
            current: 0,
            total: 0,
            started_at: None,
            finished_at: None,
            report: None,
        }
    }

    /// Completed or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    /// `current / total` as a percentage, 0 before the total is known
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64 / self.total as f64) * 100.0
        }
    }
}

/// Handle to a running job. Updates carrying a ticket from an older run
/// are ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobTicket {
    pub kind: JobKind,
    pub id: Uuid,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Mark `kind` as running, or fail if a run is already in progress
    async fn start(&self, kind: JobKind, message: &str) -> Result<JobTicket>;

    async fn get(&self, kind: JobKind) -> JobState;

    async fn progress(&self, ticket: &JobTicket, current: u64, total: u64, message: &str);

    async fn complete(&self, ticket: &JobTicket, message: &str, report: Option<serde_json::Value>);

    async fn fail(&self, ticket: &JobTicket, message: &str);
}

/// Process-local job store
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    states: Arc<RwLock<HashMap<JobKind, JobState>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, ticket: &JobTicket, f: F)
    where
        F: FnOnce(&mut JobState),
    {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&ticket.kind) {
            if state.job_id == Some(ticket.id) {
                f(state);
            }
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn start(&self, kind: JobKind, message: &str) -> Result<JobTicket> {
        let mut states = self.states.write().await;
        if let Some(state) = states.get(&kind) {
            if state.status == JobStatus::Running {
                return Err(AppError::JobAlreadyRunning {
                    kind: kind.to_string(),
                });
            }
        }

        let id = Uuid::now_v7();
        states.insert(
            kind,
            JobState {
                status: JobStatus::Running,
                job_id: Some(id),
                message: message.to_string(),
                started_at: Some(Utc::now()),
                ..JobState::idle(kind)
            },
        );

        Ok(JobTicket { kind, id })
    }

    async fn get(&self, kind: JobKind) -> JobState {
        self.states
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| JobState::idle(kind))
    }

    async fn progress(&self, ticket: &JobTicket, current: u64, total: u64, message: &str) {
        self.update(ticket, |state| {
            state.current = current;
            state.total = total;
            state.message = message.to_string();
        })
        .await;
    }

    async fn complete(&self, ticket: &JobTicket, message: &str, report: Option<serde_json::Value>) {
        self.update(ticket, |state| {
            state.status = JobStatus::Completed;
            state.message = message.to_string();
            state.finished_at = Some(Utc::now());
            state.report = report;
        })
        .await;
    }

    async fn fail(&self, ticket: &JobTicket, message: &str) {
        self.update(ticket, |state| {
            state.status = JobStatus::Failed;
            state.message = message.to_string();
            state.finished_at = Some(Utc::now());
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_start_conflicts() {
        let store = InMemoryJobStore::new();
        let ticket = store.start(JobKind::Ingest, "starting").await.unwrap();

        let err = store.start(JobKind::Ingest, "again").await.unwrap_err();
        assert!(matches!(err, AppError::JobAlreadyRunning { .. }));

        // Other kinds are independent
        store.start(JobKind::Fetch, "fetching").await.unwrap();

        store.complete(&ticket, "done", None).await;
        assert!(store.start(JobKind::Ingest, "rerun").await.is_ok());
    }

    #[tokio::test]
    async fn test_progress_and_failure() {
        let store = InMemoryJobStore::new();
        assert_eq!(store.get(JobKind::Fetch).await.status, JobStatus::Idle);

        let ticket = store.start(JobKind::Fetch, "starting").await.unwrap();
        store.progress(&ticket, 3, 4, "3 of 4").await;

        let state = store.get(JobKind::Fetch).await;
        assert_eq!(state.status, JobStatus::Running);
        assert_eq!(state.progress_percent(), 75.0);

        store.fail(&ticket, "boom").await;
        let state = store.get(JobKind::Fetch).await;
        assert_eq!(state.status, JobStatus::Failed);
        assert!(state.is_terminal());
        assert!(state.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_ticket_is_ignored() {
        let store = InMemoryJobStore::new();
        let old = store.start(JobKind::Ingest, "first").await.unwrap();
        store.complete(&old, "first done", None).await;

        let current = store.start(JobKind::Ingest, "second").await.unwrap();
        store.fail(&old, "late failure").await;

        let state = store.get(JobKind::Ingest).await;
        assert_eq!(state.status, JobStatus::Running);
        assert_eq!(state.job_id, Some(current.id));
    }
}
