//! Server setup and initialization
//!
//! Wires together persistence, file storage, the request executor, and the
//! background maintenance scheduler, then mounts the HTTP API router.

use crate::api::{self, AppState};
use crate::config::Config;
use crate::executor::RequestExecutor;
use crate::maintenance::MaintenanceScheduler;
use crate::persistence::SqlitePersistence;
use crate::storage::LocalDiskStorage;
use anyhow::Result;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes and state.
///
/// Initializes the SQLite persistence pool, local-disk file storage, the
/// request executor, and the maintenance scheduler, then wires them into
/// the `/api/*` router behind a shared `AppState`.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!(db_path = %config.database.db_path, "connecting to database");
    let persistence = SqlitePersistence::connect(&config.database.db_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to database: {e}"))?;
    let persistence: Arc<dyn crate::domain::PersistencePort> = Arc::new(persistence);

    tracing::info!(upload_dir = %config.database.upload_dir, "opening upload storage");
    let storage = LocalDiskStorage::new(config.database.upload_dir.clone())
        .await
        .map_err(|e| anyhow::anyhow!("failed to open upload directory: {e}"))?;
    let storage: Arc<dyn crate::storage::FileStoragePort> = Arc::new(storage);

    let executor = Arc::new(RequestExecutor::new());

    tracing::info!("starting maintenance scheduler");
    let scheduler = MaintenanceScheduler::new(Arc::clone(&persistence), Arc::clone(&storage))
        .await
        .map_err(|e| anyhow::anyhow!("failed to initialize maintenance scheduler: {e}"))?;
    // `JobScheduler` drives its jobs via its own background task but shuts
    // them down on drop, so the scheduler is parked for the process
    // lifetime inside this task rather than dropped at the end of `create_app`.
    tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            tracing::error!(error = %e, "failed to start maintenance scheduler");
            return;
        }
        std::future::pending::<()>().await;
    });

    let state = AppState { persistence, storage, executor };

    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(api::routes())
        .route_layer(middleware::from_fn(trace_requests))
        .with_state(state);

    Ok(app)
}

/// Wraps every request in a tracing span covering method, path, and
/// workspace id, logged at `info` once the handler returns.
async fn trace_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let workspace = request
        .headers()
        .get("X-Workspace-ID")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("1")
        .to_string();

    let started = Instant::now();
    let response = next.run(request).await;
    tracing::info!(
        method = %method,
        path = %path,
        workspace,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "handled request"
    );
    response
}

/// Start the HTTP server with the given configuration.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_thread_ids(true).with_level(true).init();

    tracing::info!("starting Relay server");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received shutdown signal");
}

async fn health_check() -> &'static str {
    "ok"
}
