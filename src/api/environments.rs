//! `/environments[/id]`, `/environments/{id}/activate` (spec.md §6).

use super::{AppState, WorkspaceId};
use crate::domain::model::Environment;
use crate::error::AppResult;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/environments", get(list).post(create))
        .route("/api/environments/{id}", get(get_one).put(update).delete(delete_one))
        .route("/api/environments/{id}/activate", post(activate))
}

async fn list(State(state): State<AppState>, WorkspaceId(ws): WorkspaceId) -> AppResult<Json<Vec<Environment>>> {
    Ok(Json(state.persistence.list_environments(ws).await?))
}

async fn get_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Json<Environment>> {
    Ok(Json(state.persistence.get_environment(ws, id).await?))
}

async fn create(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Json(mut body): Json<Environment>,
) -> AppResult<Json<Environment>> {
    body.workspace_id = ws;
    Ok(Json(state.persistence.create_environment(body).await?))
}

async fn update(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
    Json(mut body): Json<Environment>,
) -> AppResult<Json<Environment>> {
    body.id = id;
    body.workspace_id = ws;
    Ok(Json(state.persistence.update_environment(body).await?))
}

async fn delete_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<()> {
    state.persistence.delete_environment(ws, id).await?;
    Ok(())
}

async fn activate(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Json<Environment>> {
    Ok(Json(state.persistence.activate_environment(ws, id).await?))
}
