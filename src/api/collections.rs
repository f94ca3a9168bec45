//! `/collections[/id]`, `/collections/reorder`, `/collections/{id}/duplicate`
//! (spec.md §6).

use super::{AppState, WorkspaceId};
use crate::domain::model::Collection;
use crate::domain::ReorderPatch;
use crate::error::AppResult;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/collections", get(list).post(create))
        .route("/api/collections/{id}", get(get_one).put(update).delete(delete_one))
        .route("/api/collections/reorder", post(reorder))
        .route("/api/collections/{id}/duplicate", post(duplicate))
}

async fn list(State(state): State<AppState>, WorkspaceId(ws): WorkspaceId) -> AppResult<Json<Vec<Collection>>> {
    Ok(Json(state.persistence.list_collections(ws).await?))
}

async fn get_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Json<Collection>> {
    Ok(Json(state.persistence.get_collection(ws, id).await?))
}

async fn create(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Json(mut body): Json<Collection>,
) -> AppResult<Json<Collection>> {
    body.workspace_id = ws;
    Ok(Json(state.persistence.create_collection(body).await?))
}

async fn update(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
    Json(mut body): Json<Collection>,
) -> AppResult<Json<Collection>> {
    body.id = id;
    body.workspace_id = ws;
    Ok(Json(state.persistence.update_collection(body).await?))
}

async fn delete_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<()> {
    state.persistence.delete_collection(ws, id).await?;
    Ok(())
}

async fn reorder(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Json(patch): Json<ReorderPatch>,
) -> AppResult<Json<Vec<Collection>>> {
    Ok(Json(state.persistence.reorder_collections(ws, patch).await?))
}

async fn duplicate(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Json<Collection>> {
    Ok(Json(state.persistence.duplicate_collection(ws, id).await?))
}
