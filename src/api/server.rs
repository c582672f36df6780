//! API server setup and configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::routes;
use crate::config::ApiServerConfig;
use crate::database::DbPool;
use crate::database::repositories::QueueRepository;
use crate::error::Result;
use crate::pipeline::PipelineOrchestrator;
use crate::queue::{DownloadManager, WorkQueue};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    /// Pipeline orchestrator owning all jobs
    pub orchestrator: Arc<PipelineOrchestrator>,
    /// Dedup & download manager
    pub download_manager: Arc<DownloadManager>,
    /// All work queues, for introspection routes
    pub queues: Vec<Arc<WorkQueue>>,
    /// Queue repository for listings across queues
    pub queue_repository: Arc<dyn QueueRepository>,
    /// Database pool for health checks
    pub db_pool: DbPool,
    /// Audio storage root for health stats
    pub audio_dir: PathBuf,
}

/// Build the application router with middleware.
pub fn build_router(state: AppState, config: &ApiServerConfig) -> Router {
    let mut router = Router::new()
        .nest("/api", routes::router())
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}

/// Run the API server until the shutdown token fires.
pub async fn serve(
    state: AppState,
    config: ApiServerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = build_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .map_err(|e| crate::Error::config(format!("invalid bind address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}
