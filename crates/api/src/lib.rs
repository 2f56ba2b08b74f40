//! Sensor Ingest API Server
//!
//! HTTP front end for the record router, plus process bootstrap: settings,
//! logging, the connection pool and graceful shutdown.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

pub mod error;
mod routes;
pub mod settings;

pub use error::ApiError;
pub use routes::ingest::operation_for;
pub use settings::{ServerSettings, Settings, DEFAULT_CONFIG_PATH};

use router::RouterHandle;
use storage::{ConnectionPool, PoolStatus, Repository};

/// Plain-text reply of `GET /`
pub const BANNER: &str = "Hello from the sensor ingest service!";

/// Application state shared across handlers
pub struct AppState {
    /// Sending side of the record router
    pub router: RouterHandle,
    /// Backing pool; absent when the router runs on another store
    pub pool: Option<ConnectionPool>,
    /// Prometheus renderer, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(router: RouterHandle) -> Self {
        Self {
            router,
            pool: None,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn with_pool(mut self, pool: ConnectionPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_metrics(mut self, metrics: PrometheusHandle) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub router_open: bool,
    pub database: Option<PoolStatus>,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(banner_handler))
        .route("/api/v1/health", get(health_handler))
        .route(
            "/index.php/:study_number/:study_key/:table/:operation",
            post(routes::ingest::handle),
        )
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn banner_handler() -> &'static str {
    BANNER
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let database = state.pool.as_ref().map(ConnectionPool::status);
    let router_open = !state.router.is_closed();
    let healthy = router_open && database.as_ref().map_or(true, |db| !db.closed);

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        router_open,
        database,
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

/// Initialize logging
pub fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let level: Level = level.parse()?;
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Run the service until Ctrl-C
pub async fn run(settings: Settings, metrics: Option<PrometheusHandle>) -> anyhow::Result<()> {
    let database = settings.server.database_config()?;
    let pool = ConnectionPool::new(&database)?;
    let repository = Arc::new(Repository::new(pool.clone()));
    let (handle, router_task) = router::spawn(repository, settings.server.router_queue_capacity);

    let mut state = AppState::new(handle).with_pool(pool.clone());
    if let Some(metrics) = metrics {
        state = state.with_metrics(metrics);
    }
    let app = create_router(Arc::new(state));

    let addr = settings.bind_address();
    info!("Starting API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The app, and with it the last router handle, is gone; wait for queued writes.
    info!("Draining request router");
    router_task.await?;

    pool.close().await;
    info!("Connection pool closed");
    Ok(())
}
