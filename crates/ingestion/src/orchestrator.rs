//! Ingestion orchestrator
//!
//! Drives parse → resolve → dedup → graph over a directory of `.bib`
//! files. Parsing runs on the blocking pool, several files at a time, in
//! file order; every write goes through one transaction that is committed
//! every `checkpoint_every` entries. Each entry runs inside its own
//! savepoint so a failing entry is rolled back alone and counted.

use crate::bibtex::{parse_file, ParsedEntry, ParsedFile};
use crate::dedup::{self, DedupOutcome, PersistedPublication, ResolvedEntry};
use crate::errors::IngestionError;
use crate::graph::{self, GraphUpdate};
use crate::identity::{self, IdentityCache, ResolutionOutcome};
use crate::roster::FacultyRoster;
use crate::source_tag::source_tag_for_path;
use futures::stream::{self, StreamExt};
use pubtrack_common::config::IngestionConfig;
use pubtrack_common::db::models::*;
use pubtrack_common::jobs::{JobKind, JobStore, JobTicket};
use pubtrack_common::metrics;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbErr, EntityTrait, PaginatorTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    /// Some entries or files failed; everything else was stored
    PartiallySucceeded,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::PartiallySucceeded => "partially_succeeded",
        }
    }
}

/// Aggregate statistics of one ingestion run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub added: usize,
    pub skipped_duplicates: usize,
    pub authors_added: usize,
    pub authors_promoted: usize,
    pub edges_created: usize,
    pub errors: usize,
    pub files_processed: usize,
    pub entries_seen: usize,
    pub edges_updated: usize,
    pub venues_added: usize,
    pub provenance_added: usize,
    pub outcome: RunOutcome,
}

impl Default for IngestionReport {
    fn default() -> Self {
        Self {
            added: 0,
            skipped_duplicates: 0,
            authors_added: 0,
            authors_promoted: 0,
            edges_created: 0,
            errors: 0,
            files_processed: 0,
            entries_seen: 0,
            edges_updated: 0,
            venues_added: 0,
            provenance_added: 0,
            outcome: RunOutcome::Succeeded,
        }
    }
}

/// Result of one committed entry
struct EntryOutcome {
    persisted: PersistedPublication,
    authors_added: usize,
    authors_promoted: usize,
    graph: GraphUpdate,
}

impl IngestionReport {
    fn record_file(&mut self, parsed: &ParsedFile) {
        self.entries_seen += parsed.total_entries;
        self.skipped_duplicates += parsed.duplicates;
        self.errors += parsed.diagnostics.len();
    }

    fn record_entry(&mut self, outcome: &EntryOutcome) {
        self.authors_added += outcome.authors_added;
        self.authors_promoted += outcome.authors_promoted;
        self.edges_created += outcome.graph.edges_created;
        self.edges_updated += outcome.graph.edges_updated;

        let persisted = &outcome.persisted;
        if persisted.outcome.created() {
            self.added += 1;
            if persisted.venue_created {
                self.venues_added += 1;
            }
        } else {
            self.skipped_duplicates += 1;
        }
        if persisted.provenance_added {
            self.provenance_added += 1;
        }
    }

    fn finish(mut self) -> Self {
        self.outcome = if self.errors == 0 {
            RunOutcome::Succeeded
        } else {
            RunOutcome::PartiallySucceeded
        };
        self
    }
}

/// Ingestion pipeline over one database
pub struct IngestionPipeline {
    db: DatabaseConnection,
    job_store: Arc<dyn JobStore>,
    checkpoint_every: usize,
    parse_concurrency: usize,
    source_name: String,
}

impl IngestionPipeline {
    pub fn new(db: DatabaseConnection, job_store: Arc<dyn JobStore>, config: &IngestionConfig) -> Self {
        Self {
            db,
            job_store,
            checkpoint_every: config.checkpoint_every.max(1),
            parse_concurrency: config.parse_concurrency.max(1),
            source_name: config.source_name.clone(),
        }
    }

    /// Ingest every `.bib` file in `dir` against an already loaded roster.
    ///
    /// Rejected with [`AppError::JobAlreadyRunning`] while another ingest
    /// job is in progress.
    ///
    /// [`AppError::JobAlreadyRunning`]: pubtrack_common::AppError::JobAlreadyRunning
    pub async fn run(&self, dir: &Path, roster: &FacultyRoster) -> Result<IngestionReport, IngestionError> {
        let ticket = self
            .job_store
            .start(JobKind::Ingest, &format!("Ingesting {}", dir.display()))
            .await?;
        self.finish_job(&ticket, self.execute(&ticket, dir, roster).await)
            .await
    }

    /// Load the roster from disk, then ingest `dir`
    pub async fn run_from_files(&self, dir: &Path, roster_path: &Path) -> Result<IngestionReport, IngestionError> {
        let ticket = self
            .job_store
            .start(JobKind::Ingest, &format!("Ingesting {}", dir.display()))
            .await?;
        self.run_started(&ticket, dir, roster_path).await
    }

    /// Run under a ticket the caller already obtained from the job store
    pub async fn run_started(
        &self,
        ticket: &JobTicket,
        dir: &Path,
        roster_path: &Path,
    ) -> Result<IngestionReport, IngestionError> {
        let result = match FacultyRoster::load(roster_path) {
            Ok(roster) => self.execute(ticket, dir, &roster).await,
            Err(e) => Err(e),
        };
        self.finish_job(ticket, result).await
    }

    async fn finish_job(
        &self,
        ticket: &JobTicket,
        result: Result<IngestionReport, IngestionError>,
    ) -> Result<IngestionReport, IngestionError> {
        match &result {
            Ok(report) => {
                let message = format!(
                    "Added {} publications, {} duplicates, {} errors",
                    report.added, report.skipped_duplicates, report.errors
                );
                let snapshot = serde_json::to_value(report).ok();
                self.job_store.complete(ticket, &message, snapshot).await;
            }
            Err(e) => {
                self.job_store.fail(ticket, &e.to_string()).await;
            }
        }
        result
    }

    #[instrument(skip(self, ticket, roster), fields(dir = %dir.display()))]
    async fn execute(
        &self,
        ticket: &JobTicket,
        dir: &Path,
        roster: &FacultyRoster,
    ) -> Result<IngestionReport, IngestionError> {
        let started = Instant::now();

        // Fatal checks happen before the first write
        let files = discover_sources(dir)?;
        let total_files = files.len() as u64;
        info!(files = files.len(), faculty = roster.len(), "Starting ingestion");

        let result = self.ingest_files(ticket, files, total_files, roster).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(report) => {
                metrics::record_ingestion(elapsed, report.outcome.as_str());
                info!(
                    added = report.added,
                    skipped_duplicates = report.skipped_duplicates,
                    authors_added = report.authors_added,
                    authors_promoted = report.authors_promoted,
                    edges_created = report.edges_created,
                    errors = report.errors,
                    elapsed_secs = elapsed,
                    "Ingestion finished"
                );
                Ok(report)
            }
            Err(e) => {
                metrics::record_ingestion(elapsed, "failed");
                error!(error = %e, "Ingestion aborted");
                if let Err(sync_err) = record_sync_failure(&self.db, &self.source_name, &e).await {
                    warn!(error = %sync_err, "Could not record sync failure");
                }
                Err(e)
            }
        }
    }

    async fn ingest_files(
        &self,
        ticket: &JobTicket,
        files: Vec<PathBuf>,
        total_files: u64,
        roster: &FacultyRoster,
    ) -> Result<IngestionReport, IngestionError> {
        let mut report = IngestionReport::default();
        let mut cache = IdentityCache::new();
        let mut since_checkpoint = 0usize;
        let mut txn = self.db.begin().await?;

        let parsed = stream::iter(files)
            .map(|path| async move {
                let target = path.clone();
                let result = tokio::task::spawn_blocking(move || parse_file(&target)).await;
                (path, result)
            })
            .buffered(self.parse_concurrency);
        futures::pin_mut!(parsed);

        let mut done = 0u64;
        while let Some((path, result)) = parsed.next().await {
            done += 1;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let parsed_file = match result {
                Ok(Ok(parsed_file)) => parsed_file,
                Ok(Err(source)) => {
                    let e = IngestionError::FileUnreadable {
                        path: path.display().to_string(),
                        source,
                    };
                    warn!(file = %file_name, error = %e, "Skipping unreadable file");
                    metrics::record_entry_error("unreadable_file");
                    report.errors += 1;
                    continue;
                }
                Err(e) => {
                    let e = IngestionError::ParseTask(e.to_string());
                    warn!(file = %file_name, error = %e, "Skipping file");
                    metrics::record_entry_error("parse_task");
                    report.errors += 1;
                    continue;
                }
            };

            let source_tag = source_tag_for_path(&path);
            let owner = roster
                .by_external_id(&source_tag)
                .map(|record| record.faculty_name.clone())
                .unwrap_or_default();
            let suppressed = parsed_file.suppressed();
            report.record_file(&parsed_file);
            for diagnostic in &parsed_file.diagnostics {
                let e = IngestionError::MalformedEntry {
                    key: format!("{}:{}", file_name, diagnostic.line),
                    message: diagnostic.message.clone(),
                };
                warn!(error = %e, "Skipped malformed entry");
                metrics::record_entry_error("malformed");
            }

            let (mut added, mut failed) = (0usize, 0usize);
            for entry in parsed_file.entries {
                let entry_key = entry.entry_key.clone();
                let savepoint = txn.begin().await?;

                match persist_entry(&savepoint, &mut cache, roster, entry, &source_tag).await {
                    Ok(outcome) => {
                        savepoint.commit().await?;
                        cache.commit();
                        if outcome.persisted.outcome.created() {
                            metrics::record_publication_added(&source_tag);
                            added += 1;
                        }
                        report.record_entry(&outcome);
                    }
                    Err(e) => {
                        savepoint.rollback().await?;
                        cache.discard();
                        warn!(file = %file_name, entry_key = %entry_key, error = %e, "Entry rolled back");
                        metrics::record_entry_error("persist");
                        report.errors += 1;
                        failed += 1;
                    }
                }

                since_checkpoint += 1;
                if since_checkpoint >= self.checkpoint_every {
                    txn.commit().await?;
                    txn = self.db.begin().await?;
                    since_checkpoint = 0;
                    metrics::record_checkpoint();
                    debug!(added = report.added, "Checkpoint committed");
                }
            }

            report.files_processed += 1;
            info!(
                file = %file_name,
                source_tag = %source_tag,
                owner = %owner,
                entries = parsed_file.total_entries,
                suppressed,
                added,
                failed,
                "Processed file"
            );
            self.job_store
                .progress(
                    ticket,
                    done,
                    total_files,
                    &format!("Processed {} ({} of {})", file_name, done, total_files),
                )
                .await;
        }

        let report = report.finish();
        record_sync(&txn, &self.source_name, &report).await?;
        txn.commit().await?;
        debug!(identities = cache.len(), "Identity cache at end of run");

        Ok(report)
    }
}

/// Resolve, dedup and graph-update one entry inside its savepoint
async fn persist_entry(
    db: &DatabaseTransaction,
    cache: &mut IdentityCache,
    roster: &FacultyRoster,
    entry: ParsedEntry,
    source_tag: &str,
) -> Result<EntryOutcome, IngestionError> {
    let mut authors = Vec::with_capacity(entry.authors.len());
    let (mut authors_added, mut authors_promoted) = (0, 0);

    // Authors are resolved even for duplicates so later files converge
    for name in &entry.authors {
        let faculty = roster.match_author(name, source_tag);
        let profile = faculty.map(|record| record.profile());
        let resolved = identity::resolve(
            db,
            cache,
            name,
            faculty.and_then(|record| record.dblp_pid.as_deref()),
            faculty.is_some(),
            profile.as_ref(),
        )
        .await?;

        match resolved.outcome {
            ResolutionOutcome::Created => authors_added += 1,
            ResolutionOutcome::Promoted => authors_promoted += 1,
            ResolutionOutcome::Existing => {}
        }
        authors.push(resolved.identity);
    }

    let resolved = ResolvedEntry {
        entry,
        authors,
        source_tag: source_tag.to_string(),
    };
    let persisted = dedup::ingest(db, &resolved).await?;

    let graph = match persisted.outcome {
        DedupOutcome::Created => {
            graph::record_coauthorship(db, &persisted.author_ids, persisted.year).await?
        }
        DedupOutcome::DuplicateByKey | DedupOutcome::DuplicateByDoi => GraphUpdate::default(),
    };

    Ok(EntryOutcome {
        persisted,
        authors_added,
        authors_promoted,
        graph,
    })
}

/// Sorted `.bib` files directly inside `dir`
fn discover_sources(dir: &Path) -> Result<Vec<PathBuf>, IngestionError> {
    let unreadable = |e: std::io::Error| IngestionError::SourceUnreadable {
        path: dir.display().to_string(),
        message: e.to_string(),
    };

    let mut files = Vec::new();
    for item in std::fs::read_dir(dir).map_err(unreadable)? {
        let path = item.map_err(unreadable)?.path();
        let is_bib = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("bib"));
        if is_bib && path.is_file() {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(IngestionError::NoSourceFiles(dir.display().to_string()));
    }
    files.sort();
    Ok(files)
}

/// Upsert the data source row after a completed run: `active` when every
/// entry went in, `partial` with an error summary otherwise
async fn record_sync<C>(db: &C, source_name: &str, report: &IngestionReport) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let total = PublicationEntity::find().count(db).await? as i32;
    let (status, message) = match report.outcome {
        RunOutcome::Succeeded => ("active", None),
        RunOutcome::PartiallySucceeded => (
            "partial",
            Some(format!("{} entries or files failed", report.errors)),
        ),
    };
    upsert_source(db, source_name, status, message, Some(total)).await
}

async fn record_sync_failure<C>(db: &C, source_name: &str, error: &IngestionError) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    // Fatal errors abort before any write, including this one; anything
    // else stopped a run that had already checkpointed
    if error.is_fatal() {
        return Ok(());
    }
    upsert_source(db, source_name, "error", Some(error.to_string()), None).await
}

async fn upsert_source<C>(
    db: &C,
    source_name: &str,
    status: &str,
    error_message: Option<String>,
    total_records: Option<i32>,
) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let now = chrono::Utc::now();
    let existing = DataSourceEntity::find()
        .filter(DataSourceColumn::SourceName.eq(source_name))
        .one(db)
        .await?;

    match existing {
        Some(row) => {
            let mut active: DataSourceActiveModel = row.into();
            active.status = Set(status.to_string());
            active.error_message = Set(error_message);
            if let Some(total) = total_records {
                active.total_records = Set(total);
                active.last_sync = Set(Some(now.into()));
            }
            active.updated_at = Set(now.into());
            active.update(db).await?;
        }
        None => {
            DataSourceActiveModel {
                source_name: Set(source_name.to_string()),
                last_sync: Set(total_records.map(|_| now.into())),
                total_records: Set(total_records.unwrap_or(0)),
                status: Set(status.to_string()),
                error_message: Set(error_message),
                updated_at: Set(now.into()),
                ..Default::default()
            }
            .insert(db)
            .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_sources_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b_2.bib"), "").unwrap();
        std::fs::write(dir.path().join("a_1.BIB"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("nested.bib")).unwrap();

        let files = discover_sources(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a_1.BIB", "b_2.bib"]);
    }

    #[test]
    fn test_discover_sources_fatal_cases() {
        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            discover_sources(empty.path()),
            Err(IngestionError::NoSourceFiles(_))
        ));
        assert!(matches!(
            discover_sources(Path::new("/definitely/not/here")),
            Err(IngestionError::SourceUnreadable { .. })
        ));
    }

    #[test]
    fn test_report_outcome() {
        let clean = IngestionReport::default().finish();
        assert_eq!(clean.outcome, RunOutcome::Succeeded);

        let partial = IngestionReport {
            errors: 1,
            ..Default::default()
        }
        .finish();
        assert_eq!(partial.outcome, RunOutcome::PartiallySucceeded);
    }
}
