//! `/files/upload`, `/files/cleanup`, `/files/{id}` (spec.md §6, §4.8).

use super::{AppState, WorkspaceId};
use crate::domain::model::UploadedFile;
use crate::error::{AppError, AppResult};
use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/files/upload", post(upload))
        .route("/api/files/cleanup", post(cleanup))
        .route("/api/files/{id}", get(download).delete(delete_one))
}

async fn upload(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    mut multipart: Multipart,
) -> AppResult<Json<UploadedFile>> {
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::Validation(e.to_string()))? {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        let bytes = field.bytes().await.map_err(|e| AppError::Validation(e.to_string()))?;

        let stored_name = state.storage.store(&bytes).await?;
        let uploaded = state
            .persistence
            .record_uploaded_file(UploadedFile {
                id: 0,
                workspace_id: ws,
                original_name,
                stored_name,
                content_type,
                size: bytes.len() as i64,
                created_at: chrono::Utc::now(),
            })
            .await?;
        return Ok(Json(uploaded));
    }
    Err(AppError::Validation("expected a \"file\" part".to_string()))
}

async fn download(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let meta = state.persistence.get_uploaded_file(ws, id).await?;
    let bytes = state.storage.open(&meta.stored_name).await?;
    Ok((
        [
            (header::CONTENT_TYPE, meta.content_type),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", meta.original_name)),
        ],
        Body::from(bytes),
    )
        .into_response())
}

async fn delete_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<()> {
    let meta = state.persistence.get_uploaded_file(ws, id).await?;
    state.storage.delete(&meta.stored_name).await?;
    state.persistence.delete_uploaded_file(ws, id).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct CleanupResult {
    removed: u64,
}

/// Manual trigger for the same sweep `MaintenanceScheduler` runs hourly
/// (spec.md §4.8 `sweep`).
async fn cleanup(State(state): State<AppState>) -> AppResult<Json<CleanupResult>> {
    let referenced_ids = state.persistence.list_referenced_file_ids().await?;
    let referenced_stored_names = state.persistence.resolve_stored_names(&referenced_ids).await?;
    let removed = state.storage.sweep(&referenced_stored_names).await?;
    Ok(Json(CleanupResult { removed }))
}
