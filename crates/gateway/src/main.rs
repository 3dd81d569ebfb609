//! PubTrack API Gateway
//!
//! HTTP surface over the ingestion service:
//! - Health and readiness checks
//! - Ingest and fetch triggers with polled job status
//! - Database statistics
//! - Read-only author, collaborator and publication lookups

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use pubtrack_common::{
    config::AppConfig,
    db::DbPool,
    jobs::{InMemoryJobStore, JobStore},
    metrics::{self, INGESTION_BUCKETS, METRICS_PREFIX},
    telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub job_store: Arc<dyn JobStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    telemetry::init_tracing(&config.observability)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    info!("Starting PubTrack API Gateway v{}", pubtrack_common::VERSION);

    let config = Arc::new(config);

    if config.observability.metrics_port != 0 {
        install_metrics_exporter(config.observability.metrics_port)?;
    }
    metrics::register_metrics();

    let db = DbPool::new(&config.database).await?;

    let state = AppState {
        config: config.clone(),
        db,
        job_store: Arc::new(InMemoryJobStore::new()),
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Serve Prometheus metrics on their own port
fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_ingestion_duration_seconds", METRICS_PREFIX)),
            INGESTION_BUCKETS,
        )?
        .install()?;

    info!(port, "Prometheus exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Admin endpoints
        .route("/admin/ingest", post(handlers::admin::trigger_ingest))
        .route("/admin/ingest/status", get(handlers::admin::ingest_status))
        .route("/admin/fetch", post(handlers::admin::trigger_fetch))
        .route("/admin/fetch/status", get(handlers::admin::fetch_status))
        .route("/admin/stats", get(handlers::admin::stats))

        // Read-only lookups
        .route("/authors/{id}", get(handlers::authors::get_author))
        .route("/authors/{id}/collaborators", get(handlers::authors::get_collaborators))
        .route("/publications", get(handlers::publications::get_publication));

    Router::new()
        .nest("/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors),
        )
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use pubtrack_common::jobs::JobKind;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn state() -> AppState {
        AppState {
            config: Arc::new(AppConfig::default()),
            db: DbPool::connect_sqlite_memory().await.unwrap(),
            job_store: Arc::new(InMemoryJobStore::new()),
        }
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = create_router(state().await);
        let (status, body) = call(app.clone(), "GET", "/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = call(app, "GET", "/v1/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["database"]["status"], "up");
    }

    #[tokio::test]
    async fn test_trigger_conflicts_with_running_job() {
        let state = state().await;
        state.job_store.start(JobKind::Ingest, "busy").await.unwrap();
        let app = create_router(state);

        let (status, body) = call(app.clone(), "POST", "/v1/admin/ingest").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "JOB_ALREADY_RUNNING");

        let (status, body) = call(app, "GET", "/v1/admin/ingest/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["finished"], false);
        assert_eq!(body["progress_percent"], 0.0);
    }

    #[tokio::test]
    async fn test_panicking_job_releases_its_slot() {
        let state = state().await;
        let ticket = state.job_store.start(JobKind::Ingest, "doomed").await.unwrap();
        handlers::admin::spawn_job(state.job_store.clone(), ticket, async {
            panic!("parser blew up");
        })
        .await
        .unwrap();

        let app = create_router(state);
        let (status, body) = call(app.clone(), "GET", "/v1/admin/ingest/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["finished"], true);
        assert_eq!(body["message"], "Job panicked");

        let (status, _) = call(app, "POST", "/v1/admin/ingest").await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_lookups_on_empty_database() {
        let app = create_router(state().await);

        let (status, body) = call(app.clone(), "GET", "/v1/authors/42").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "AUTHOR_NOT_FOUND");

        let (status, _) = call(app.clone(), "GET", "/v1/publications?key=DBLP:x/K1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(app.clone(), "GET", "/v1/publications?key=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(app, "GET", "/v1/admin/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["publications"], 0);
    }

    #[tokio::test]
    async fn test_fetch_status_defaults_to_idle() {
        let app = create_router(state().await);
        let (status, body) = call(app, "GET", "/v1/admin/fetch/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "fetch");
        assert_eq!(body["status"], "idle");
    }
}
