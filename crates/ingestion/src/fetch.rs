//! DBLP bibliography fetcher
//!
//! Downloads one `.bib` file per roster person id from the DBLP person
//! endpoint. Requests are spaced by a rate limiter and retried with
//! exponential backoff on 429, 5xx and network failures; any other status
//! fails that person id only.
//!
//! File names encode the person id (`/` becomes `_`, secondary ids of the
//! same person get `_1`, `_2`, ...) so the ingestion side can recover the
//! id as the source tag.

use crate::errors::FetchError;
use crate::roster::FacultyRoster;
use backoff::future::retry;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use pubtrack_common::config::DblpConfig;
use pubtrack_common::jobs::{JobKind, JobStore, JobTicket};
use pubtrack_common::metrics;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const USER_AGENT: &str = concat!("pubtrack/", env!("CARGO_PKG_VERSION"));

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One file to download
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchTarget {
    pub faculty_name: String,
    pub pid: String,
    pub file_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub pid: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchReport {
    pub faculty: usize,
    /// Roster records without any person id
    pub skipped: usize,
    pub attempted: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub failures: Vec<FetchFailure>,
}

/// Download targets for every person id on the roster, in roster order
pub fn fetch_targets(roster: &FacultyRoster) -> Vec<FetchTarget> {
    let mut targets = Vec::new();
    for record in roster.records() {
        let pids: Vec<&str> = record.pids().collect();
        for (idx, pid) in pids.iter().enumerate() {
            let suffix = if pids.len() > 1 {
                format!("_{}", idx + 1)
            } else {
                String::new()
            };
            targets.push(FetchTarget {
                faculty_name: record.faculty_name.clone(),
                pid: pid.to_string(),
                file_name: format!("{}{}.bib", pid.replace('/', "_"), suffix),
            });
        }
    }
    targets
}

pub struct DblpFetcher {
    client: reqwest::Client,
    limiter: Option<DirectLimiter>,
    config: DblpConfig,
}

impl DblpFetcher {
    pub fn new(config: DblpConfig) -> Result<Self, FetchError> {
        let base = reqwest::Url::parse(&config.base_url)
            .map_err(|e| FetchError::Config(format!("base_url {:?}: {}", config.base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(FetchError::Config(format!(
                "base_url {:?}: unsupported scheme",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()?;

        // A zero interval disables spacing
        let limiter = Quota::with_period(config.request_interval()).map(RateLimiter::direct);

        Ok(Self {
            client,
            limiter,
            config,
        })
    }

    pub fn person_url(&self, pid: &str) -> String {
        format!("{}/{}.bib", self.config.base_url.trim_end_matches('/'), pid)
    }

    fn backoff_policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_backoff_ms))
            .with_max_interval(Duration::from_secs(self.config.max_backoff_secs))
            .with_max_elapsed_time(Some(Duration::from_secs(self.config.max_elapsed_secs)))
            .build()
    }

    /// Download the BibTeX export of one person
    #[instrument(skip(self))]
    pub async fn fetch_bib(&self, pid: &str) -> Result<String, FetchError> {
        let url = self.person_url(pid);
        let this = self;
        let url = url.as_str();
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        retry(this.backoff_policy(), move || async move {
            if let Some(limiter) = &this.limiter {
                limiter.until_ready().await;
            }
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            this.fetch_once(url, attempt).await.map_err(|e| {
                if e.is_transient() {
                    warn!(error = %e, "Transient fetch failure, backing off");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    async fn fetch_once(&self, url: &str, attempt: u32) -> Result<String, FetchError> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_fetch("network_error");
                return Err(e.into());
            }
        };

        let status = response.status();
        metrics::record_fetch(status.as_str());

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                url: url.to_string(),
                attempts: attempt,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }

    /// Fetch every roster person id into `output_dir`, reporting progress
    /// to the job store. Individual failures are collected, not fatal.
    pub async fn fetch_roster(
        &self,
        roster: &FacultyRoster,
        store: &dyn JobStore,
        ticket: &JobTicket,
    ) -> Result<FetchReport, FetchError> {
        let out_dir = self.config.output_dir.clone();
        tokio::fs::create_dir_all(&out_dir).await?;

        let targets = fetch_targets(roster);
        let total = targets.len() as u64;
        let mut report = FetchReport {
            faculty: roster.len(),
            skipped: roster.records().iter().filter(|r| r.pids().next().is_none()).count(),
            ..Default::default()
        };
        info!(targets = targets.len(), output_dir = %out_dir.display(), "Starting DBLP fetch");

        for (idx, target) in targets.iter().enumerate() {
            report.attempted += 1;
            match self.fetch_to(target, &out_dir).await {
                Ok(path) => {
                    report.downloaded += 1;
                    debug!(pid = %target.pid, path = %path.display(), "Saved bibliography");
                }
                Err(e) => {
                    warn!(pid = %target.pid, faculty = %target.faculty_name, error = %e, "Fetch failed");
                    report.failed += 1;
                    report.failures.push(FetchFailure {
                        pid: target.pid.clone(),
                        message: e.to_string(),
                    });
                }
            }

            store
                .progress(
                    ticket,
                    idx as u64 + 1,
                    total,
                    &format!("Fetched {} ({} of {})", target.pid, idx + 1, total),
                )
                .await;
        }

        info!(
            downloaded = report.downloaded,
            failed = report.failed,
            "DBLP fetch finished"
        );
        Ok(report)
    }

    async fn fetch_to(&self, target: &FetchTarget, out_dir: &Path) -> Result<PathBuf, FetchError> {
        let body = self.fetch_bib(&target.pid).await?;
        let path = out_dir.join(&target.file_name);
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }

    /// Start a fetch job and run it to completion
    pub async fn run(&self, store: &dyn JobStore, roster_path: &Path) -> Result<FetchReport, FetchError> {
        let ticket = store.start(JobKind::Fetch, "Fetching DBLP bibliographies").await?;
        self.run_started(store, &ticket, roster_path).await
    }

    /// Run under a ticket the caller already obtained from the job store
    pub async fn run_started(
        &self,
        store: &dyn JobStore,
        ticket: &JobTicket,
        roster_path: &Path,
    ) -> Result<FetchReport, FetchError> {
        let result = match FacultyRoster::load(roster_path) {
            Ok(roster) => self.fetch_roster(&roster, store, ticket).await,
            Err(e) => Err(FetchError::Roster(e.to_string())),
        };

        match &result {
            Ok(report) => {
                let message = format!("Downloaded {} of {} files", report.downloaded, report.attempted);
                store
                    .complete(ticket, &message, serde_json::to_value(report).ok())
                    .await;
            }
            Err(e) => store.fail(ticket, &e.to_string()).await,
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_tag::derive_source_tag;
    use pubtrack_common::jobs::{InMemoryJobStore, JobStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const ROSTER: &str = r#"[
        { "faculty_name": "Satish Srirama", "dblp_pid": "s/SatishNarayanaSrirama", "other_pids": ["99/1234"] },
        { "faculty_name": "Ada Lovelace", "dblp_pid": "l/AdaLovelace" },
        { "faculty_name": "No Pid" }
    ]"#;

    /// Serve canned responses in order, repeating the last one
    async fn serve(responses: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let response = responses[n.min(responses.len() - 1)];
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/pid", addr), hits)
    }

    fn config(base_url: String, output_dir: PathBuf) -> DblpConfig {
        DblpConfig {
            base_url,
            timeout_secs: 5,
            request_interval_ms: 0,
            initial_backoff_ms: 10,
            max_backoff_secs: 1,
            max_elapsed_secs: 5,
            output_dir,
        }
    }

    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 14\r\nConnection: close\r\n\r\n@misc{K, x={}}";
    const TOO_MANY: &str = "HTTP/1.1 429 Too Many Requests\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const MISSING: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    #[test]
    fn test_targets_round_trip_to_source_tags() {
        let roster = FacultyRoster::from_json(ROSTER).unwrap();
        let targets = fetch_targets(&roster);
        let names: Vec<&str> = targets.iter().map(|t| t.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "s_SatishNarayanaSrirama_1.bib",
                "99_1234_2.bib",
                "l_AdaLovelace.bib"
            ]
        );
        for target in &targets {
            assert_eq!(derive_source_tag(&target.file_name), target.pid);
        }
    }

    #[test]
    fn test_person_url() {
        let fetcher = DblpFetcher::new(config("https://dblp.org/pid/".into(), PathBuf::from("."))).unwrap();
        assert_eq!(fetcher.person_url("s/Someone"), "https://dblp.org/pid/s/Someone.bib");
    }

    #[tokio::test]
    async fn test_retries_after_rate_limit() {
        let (base, hits) = serve(vec![TOO_MANY, TOO_MANY, OK]).await;
        let fetcher = DblpFetcher::new(config(base, PathBuf::from("."))).unwrap();

        let body = fetcher.fetch_bib("a/B").await.unwrap();
        assert_eq!(body, "@misc{K, x={}}");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_reports_attempts() {
        let (base, hits) = serve(vec![TOO_MANY]).await;
        let mut settings = config(base, PathBuf::from("."));
        settings.max_elapsed_secs = 1;
        let fetcher = DblpFetcher::new(settings).unwrap();

        let err = fetcher.fetch_bib("a/B").await.unwrap_err();
        let attempts = match &err {
            FetchError::RateLimited { attempts, .. } => *attempts,
            other => panic!("expected a rate limit error, got {other}"),
        };
        assert!(attempts > 1);
        assert_eq!(attempts as usize, hits.load(Ordering::SeqCst));
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        let err = DblpFetcher::new(config("not a url".into(), PathBuf::from("."))).err();
        assert!(matches!(err, Some(FetchError::Config(_))));
        let err = DblpFetcher::new(config("ftp://dblp.org/pid".into(), PathBuf::from("."))).err();
        assert!(matches!(err, Some(FetchError::Config(_))));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (base, hits) = serve(vec![MISSING]).await;
        let fetcher = DblpFetcher::new(config(base, PathBuf::from("."))).unwrap();

        let err = fetcher.fetch_bib("a/B").await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_writes_files_and_completes_job() {
        let (base, _) = serve(vec![OK]).await;
        let dir = tempfile::tempdir().unwrap();
        let roster_path = dir.path().join("roster.json");
        std::fs::write(&roster_path, ROSTER).unwrap();
        let out = dir.path().join("bib");

        let fetcher = DblpFetcher::new(config(base, out.clone())).unwrap();
        let store = InMemoryJobStore::new();
        let report = fetcher.run(&store, &roster_path).await.unwrap();

        assert_eq!(report.faculty, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.downloaded, 3);
        assert!(out.join("l_AdaLovelace.bib").exists());

        let state = store.get(JobKind::Fetch).await;
        assert_eq!(state.status, JobStatus::Completed);
        assert_eq!((state.current, state.total), (3, 3));
    }

    #[tokio::test]
    async fn test_missing_roster_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = DblpFetcher::new(config("http://127.0.0.1:9/pid".into(), dir.path().to_path_buf())).unwrap();
        let store = InMemoryJobStore::new();

        let err = fetcher
            .run(&store, &dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Roster(_)));
        assert_eq!(store.get(JobKind::Fetch).await.status, JobStatus::Failed);
    }
}
