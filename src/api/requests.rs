//! `/requests[/id]`, `/requests/reorder`, `/requests/{id}/duplicate`,
//! `/requests/{id}/execute`, `/execute` (spec.md §6).
//!
//! The two execute handlers share one body format: JSON for a plain
//! override patch, or `multipart/form-data` carrying `_metadata` + `_items`
//! + `file_<index>` parts when the caller wants to attach files inline
//! (spec.md §6 "Multipart execute").

use super::{build_scope, proxy_url_for, AppState, WorkspaceId};
use crate::domain::model::{BodyType, FormField, FormFieldType, Header, Method, RequestSpec, UploadedFile};
use crate::domain::ReorderPatch;
use crate::error::{AppError, AppResult};
use crate::executor::{ExecuteResult, ExecutionInput};
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/requests", get(list).post(create))
        .route("/api/requests/{id}", get(get_one).put(update).delete(delete_one))
        .route("/api/requests/reorder", post(reorder))
        .route("/api/requests/{id}/duplicate", post(duplicate))
        .route("/api/requests/{id}/execute", post(execute_saved))
        .route("/api/execute", post(execute_adhoc))
}

async fn list(State(state): State<AppState>, WorkspaceId(ws): WorkspaceId) -> AppResult<Json<Vec<RequestSpec>>> {
    Ok(Json(state.persistence.list_requests(ws).await?))
}

async fn get_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Json<RequestSpec>> {
    Ok(Json(state.persistence.get_request(ws, id).await?))
}

async fn create(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Json(mut body): Json<RequestSpec>,
) -> AppResult<Json<RequestSpec>> {
    body.workspace_id = ws;
    Ok(Json(state.persistence.create_request(body).await?))
}

async fn update(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
    Json(mut body): Json<RequestSpec>,
) -> AppResult<Json<RequestSpec>> {
    body.id = id;
    body.workspace_id = ws;
    Ok(Json(state.persistence.update_request(body).await?))
}

async fn delete_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<()> {
    state.persistence.delete_request(ws, id).await?;
    Ok(())
}

async fn reorder(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Json(patch): Json<ReorderPatch>,
) -> AppResult<Json<Vec<RequestSpec>>> {
    Ok(Json(state.persistence.reorder_requests(ws, patch).await?))
}

async fn duplicate(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Json<RequestSpec>> {
    Ok(Json(state.persistence.duplicate_request(ws, id).await?))
}

/// The execute override patch: any field left `None` inherits from the
/// stored request (saved execute) or from the `ExecutionInput` default
/// (ad-hoc execute, where `url` becomes mandatory).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutePatch {
    method: Option<Method>,
    url: Option<String>,
    headers: Option<Vec<Header>>,
    body: Option<String>,
    body_type: Option<BodyType>,
    #[serde(default)]
    variables: HashMap<String, String>,
    proxy_id: Option<i64>,
}

pub struct ExecutePayload {
    patch: ExecutePatch,
    form_fields: Option<Vec<FormField>>,
}

impl FromRequest<AppState> for ExecutePayload {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("multipart/form-data") {
            let workspace_id = req
                .headers()
                .get("X-Workspace-ID")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(crate::domain::model::DEFAULT_WORKSPACE_ID);
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::Validation(e.to_string()))?;
            parse_multipart_execute(multipart, state, workspace_id).await
        } else {
            let Json(patch) = Json::<ExecutePatch>::from_request(req, state)
                .await
                .map_err(|e| AppError::Validation(e.to_string()))?;
            Ok(ExecutePayload { patch, form_fields: None })
        }
    }
}

async fn parse_multipart_execute(
    mut multipart: Multipart,
    state: &AppState,
    workspace_id: i64,
) -> AppResult<ExecutePayload> {
    let mut metadata_raw = None;
    let mut items_raw = None;
    let mut file_bytes: HashMap<String, Vec<u8>> = HashMap::new();
    let mut file_meta: HashMap<String, (String, String)> = HashMap::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::Validation(e.to_string()))? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "_metadata" {
            metadata_raw = Some(field.text().await.map_err(|e| AppError::Validation(e.to_string()))?);
        } else if name == "_items" {
            items_raw = Some(field.text().await.map_err(|e| AppError::Validation(e.to_string()))?);
        } else if let Some(index) = name.strip_prefix("file_") {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
            let bytes = field.bytes().await.map_err(|e| AppError::Validation(e.to_string()))?;
            file_bytes.insert(index.to_string(), bytes.to_vec());
            file_meta.insert(index.to_string(), (file_name, content_type));
        }
    }

    let patch: ExecutePatch = match metadata_raw {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| AppError::Validation(format!("invalid _metadata: {e}")))?,
        None => ExecutePatch::default(),
    };

    let mut items: Vec<FormField> = match items_raw {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| AppError::Validation(format!("invalid _items: {e}")))?,
        None => Vec::new(),
    };

    for (index, item) in items.iter_mut().enumerate() {
        if item.field_type != FormFieldType::File {
            continue;
        }
        let key = index.to_string();
        let bytes = file_bytes
            .get(&key)
            .ok_or_else(|| AppError::Validation(format!("missing part file_{key}")))?;
        let (original_name, content_type) = file_meta.get(&key).cloned().unwrap_or_default();
        let stored_name = state.storage.store(bytes).await?;
        let uploaded = state
            .persistence
            .record_uploaded_file(UploadedFile {
                id: 0,
                workspace_id,
                original_name,
                stored_name,
                content_type,
                size: bytes.len() as i64,
                created_at: chrono::Utc::now(),
            })
            .await?;
        item.value = uploaded.id.to_string();
    }

    Ok(ExecutePayload { patch, form_fields: Some(items) })
}

fn apply_patch(input: &mut ExecutionInput, patch: ExecutePatch, form_fields: Option<Vec<FormField>>) {
    if let Some(method) = patch.method {
        input.method = method;
    }
    if let Some(url) = patch.url {
        input.url = url;
    }
    if let Some(headers) = patch.headers {
        input.headers = headers;
    }
    if let Some(body) = patch.body {
        input.body = body;
    }
    if let Some(body_type) = patch.body_type {
        input.body_type = body_type;
    }
    if patch.proxy_id.is_some() {
        input.proxy_id = patch.proxy_id;
    }
    if let Some(fields) = form_fields {
        input.form_fields = fields;
        input.body_type = BodyType::Formdata;
    }
}

async fn run_execute(
    state: &AppState,
    workspace_id: i64,
    collection_id: Option<i64>,
    request_id: Option<i64>,
    input: ExecutionInput,
    runtime_vars: HashMap<String, String>,
) -> (ExecuteResult, HashMap<String, String>) {
    let mut scope = build_scope(state.persistence.as_ref(), workspace_id, collection_id).await;
    scope.runtime.extend(runtime_vars);
    let proxy_url = proxy_url_for(state.persistence.as_ref(), workspace_id, input.proxy_id).await;

    let result = state
        .executor
        .execute(&input, &mut scope, proxy_url.as_deref(), state.persistence.as_ref(), state.storage.as_ref(), workspace_id)
        .await;

    let record = crate::domain::model::HistoryRecord {
        id: 0,
        workspace_id,
        request_id,
        flow_id: None,
        method: input.method.as_str().to_string(),
        url: result.resolved_url.clone(),
        request_headers: serde_json::to_value(&result.resolved_headers).unwrap_or_default(),
        request_body: input.body.clone(),
        status_code: if result.status_code == 0 { None } else { Some(result.status_code as i64) },
        response_headers: serde_json::to_value(&result.headers).unwrap_or_default(),
        response_body: result.body.clone(),
        duration_ms: result.duration_ms as i64,
        error: result.error.clone(),
        body_size: result.body_size as i64,
        is_binary: result.is_binary,
        created_at: chrono::Utc::now(),
    };
    if let Err(e) = state.persistence.record_history(record).await {
        tracing::warn!(error = %e, "failed to record execute history");
    }

    (result, scope.runtime)
}

async fn execute_saved(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
    payload: ExecutePayload,
) -> AppResult<Json<ExecuteResult>> {
    let base = state.persistence.get_request(ws, id).await?;
    let collection_id = base.collection_id;
    let mut input: ExecutionInput = (&base).into();
    let runtime_vars = payload.patch.variables.clone();
    apply_patch(&mut input, payload.patch, payload.form_fields);
    let (result, _) = run_execute(&state, ws, collection_id, Some(id), input, runtime_vars).await;
    Ok(Json(result))
}

async fn execute_adhoc(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    payload: ExecutePayload,
) -> AppResult<Json<ExecuteResult>> {
    let mut input = ExecutionInput::default();
    let runtime_vars = payload.patch.variables.clone();
    let proxy_id = payload.patch.proxy_id;
    let has_url = payload.patch.url.is_some();
    apply_patch(&mut input, payload.patch, payload.form_fields);
    if !has_url || input.url.is_empty() {
        return Err(AppError::Validation("ad-hoc execute requires a url".to_string()));
    }
    input.proxy_id = proxy_id;
    let (result, _) = run_execute(&state, ws, None, None, input, runtime_vars).await;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_patch_parses_camel_case_fields() {
        let patch: ExecutePatch = serde_json::from_str(r#"{"bodyType":"json","proxyId":3}"#).unwrap();
        assert_eq!(patch.body_type, Some(BodyType::Json));
        assert_eq!(patch.proxy_id, Some(3));
    }

    #[test]
    fn apply_patch_overlays_only_present_fields() {
        let mut input = ExecutionInput { url: "https://example.invalid".to_string(), ..Default::default() };
        let patch = ExecutePatch { body: Some("hi".to_string()), ..Default::default() };
        apply_patch(&mut input, patch, None);
        assert_eq!(input.url, "https://example.invalid");
        assert_eq!(input.body, "hi");
    }
}
