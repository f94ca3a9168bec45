//! `GET /api/ws/relay` (spec.md §4.5, §6): upgrades to a WebSocket and hands
//! the connection to [`crate::ws::run_relay_session`].

use super::{build_scope, AppState, WorkspaceId};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/ws/relay", get(relay))
}

async fn relay(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| async move {
        let scope = build_scope(state.persistence.as_ref(), ws, None).await;
        crate::ws::run_relay_session(socket, state.persistence.as_ref(), ws, &scope).await;
    })
}
