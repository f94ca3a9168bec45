//! `/history[/id]` (spec.md §6).

use super::{AppState, WorkspaceId};
use crate::domain::model::HistoryRecord;
use crate::error::AppResult;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/history", get(list)).route("/api/history/{id}", get(get_one).delete(delete_one))
}

async fn list(State(state): State<AppState>, WorkspaceId(ws): WorkspaceId) -> AppResult<Json<Vec<HistoryRecord>>> {
    Ok(Json(state.persistence.list_history(ws).await?))
}

async fn get_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Json<HistoryRecord>> {
    Ok(Json(state.persistence.get_history(ws, id).await?))
}

async fn delete_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<()> {
    state.persistence.delete_history(ws, id).await?;
    Ok(())
}
