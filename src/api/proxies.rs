//! `/proxies[/id]`, `/proxies/{id}/activate`, `/proxies/deactivate`,
//! `/proxies/{id}/test` (spec.md §6).

use super::{AppState, WorkspaceId};
use crate::domain::model::Proxy;
use crate::error::AppResult;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::time::{Duration, Instant};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/proxies", get(list).post(create))
        .route("/api/proxies/{id}", get(get_one).put(update).delete(delete_one))
        .route("/api/proxies/{id}/activate", post(activate))
        .route("/api/proxies/deactivate", post(deactivate))
        .route("/api/proxies/{id}/test", post(test_proxy))
}

async fn list(State(state): State<AppState>, WorkspaceId(ws): WorkspaceId) -> AppResult<Json<Vec<Proxy>>> {
    Ok(Json(state.persistence.list_proxies(ws).await?))
}

async fn get_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Json<Proxy>> {
    Ok(Json(state.persistence.get_proxy(ws, id).await?))
}

async fn create(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Json(mut body): Json<Proxy>,
) -> AppResult<Json<Proxy>> {
    body.workspace_id = ws;
    Ok(Json(state.persistence.create_proxy(body).await?))
}

async fn update(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
    Json(mut body): Json<Proxy>,
) -> AppResult<Json<Proxy>> {
    body.id = id;
    body.workspace_id = ws;
    Ok(Json(state.persistence.update_proxy(body).await?))
}

async fn delete_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<()> {
    state.persistence.delete_proxy(ws, id).await?;
    Ok(())
}

async fn activate(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Json<Proxy>> {
    Ok(Json(state.persistence.activate_proxy(ws, id).await?))
}

async fn deactivate(State(state): State<AppState>, WorkspaceId(ws): WorkspaceId) -> AppResult<()> {
    state.persistence.deactivate_proxies(ws).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct ProxyProbeResult {
    reachable: bool,
    latency_ms: u64,
    error: Option<String>,
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

async fn test_proxy(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Json<ProxyProbeResult>> {
    let proxy = state.persistence.get_proxy(ws, id).await?;
    Ok(Json(probe(&proxy.url).await))
}

/// A proxy "test" is a raw TCP reachability probe against the proxy's own
/// host:port, mirroring the per-WS-dial 10s budget (spec.md §5) rather than
/// routing a real request through it — the only thing worth confirming
/// before use is that something is listening.
async fn probe(url: &str) -> ProxyProbeResult {
    let parsed = match reqwest::Url::parse(url) {
        Ok(u) => u,
        Err(e) => return ProxyProbeResult { reachable: false, latency_ms: 0, error: Some(e.to_string()) },
    };
    let host = parsed.host_str().unwrap_or_default().to_string();
    let port = parsed.port_or_known_default().unwrap_or(80);

    let start = Instant::now();
    match tokio::time::timeout(PROBE_TIMEOUT, tokio::net::TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(_)) => ProxyProbeResult { reachable: true, latency_ms: start.elapsed().as_millis() as u64, error: None },
        Ok(Err(e)) => ProxyProbeResult { reachable: false, latency_ms: start.elapsed().as_millis() as u64, error: Some(e.to_string()) },
        Err(_) => ProxyProbeResult { reachable: false, latency_ms: PROBE_TIMEOUT.as_millis() as u64, error: Some("connection timed out".to_string()) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_reports_unreachable_for_an_unroutable_address() {
        let result = probe("http://192.0.2.1:9").await;
        assert!(!result.reachable);
    }

    #[tokio::test]
    async fn probe_reports_an_error_for_an_invalid_url() {
        let result = probe("not a url").await;
        assert!(!result.reachable);
        assert!(result.error.is_some());
    }
}
