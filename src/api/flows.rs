//! `/flows[/id]`, `/flows/reorder`, `/flows/{id}/duplicate`, `/flows/{id}/run`,
//! `/flows/{id}/steps[/stepId]` (spec.md §6).

use super::{build_scope, proxy_url_for, AppState, WorkspaceId};
use crate::domain::model::{Flow, FlowStep};
use crate::domain::ReorderPatch;
use crate::error::AppResult;
use crate::flow::{FlowResult, FlowRunner};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/flows", get(list).post(create))
        .route("/api/flows/{id}", get(get_one).put(update).delete(delete_one))
        .route("/api/flows/reorder", post(reorder))
        .route("/api/flows/{id}/duplicate", post(duplicate))
        .route("/api/flows/{id}/run", post(run))
        .route("/api/flows/{id}/steps", get(list_steps).post(create_step))
        .route("/api/flows/{id}/steps/reorder", post(reorder_steps))
        .route("/api/flows/{id}/steps/{step_id}", get(get_step).put(update_step).delete(delete_step))
}

async fn list(State(state): State<AppState>, WorkspaceId(ws): WorkspaceId) -> AppResult<Json<Vec<Flow>>> {
    Ok(Json(state.persistence.list_flows(ws).await?))
}

async fn get_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Json<Flow>> {
    Ok(Json(state.persistence.get_flow(ws, id).await?))
}

async fn create(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Json(mut body): Json<Flow>,
) -> AppResult<Json<Flow>> {
    body.workspace_id = ws;
    Ok(Json(state.persistence.create_flow(body).await?))
}

async fn update(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
    Json(mut body): Json<Flow>,
) -> AppResult<Json<Flow>> {
    body.id = id;
    body.workspace_id = ws;
    Ok(Json(state.persistence.update_flow(body).await?))
}

async fn delete_one(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<()> {
    state.persistence.delete_flow(ws, id).await?;
    Ok(())
}

async fn reorder(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Json(patch): Json<ReorderPatch>,
) -> AppResult<Json<Vec<Flow>>> {
    Ok(Json(state.persistence.reorder_flows(ws, patch).await?))
}

async fn duplicate(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
) -> AppResult<Json<Flow>> {
    Ok(Json(state.persistence.duplicate_flow(ws, id).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunFlowRequest {
    selected_step_ids: Option<HashSet<i64>>,
    #[serde(default)]
    initial_vars: HashMap<String, String>,
}

async fn run(
    State(state): State<AppState>,
    WorkspaceId(ws): WorkspaceId,
    Path(id): Path<i64>,
    body: Option<Json<RunFlowRequest>>,
) -> AppResult<Json<FlowResult>> {
    let flow = state.persistence.get_flow(ws, id).await?;
    let steps = state.persistence.list_flow_steps(id).await?;
    let request = body.map(|Json(b)| b).unwrap_or_default();

    let mut scope = build_scope(state.persistence.as_ref(), ws, None).await;
    scope.runtime.extend(request.initial_vars);

    // `FlowRunner::run`'s proxy callback is synchronous, but resolving an
    // override means a persistence lookup — so every distinct proxy id a
    // step references (plus the workspace default) is resolved once up
    // front into a plain map the callback can read from.
    let mut distinct_ids: HashSet<Option<i64>> = steps.iter().map(|s| s.proxy_id).collect();
    distinct_ids.insert(None);
    let mut proxy_cache = HashMap::new();
    for proxy_id in distinct_ids {
        let url = proxy_url_for(state.persistence.as_ref(), ws, proxy_id).await;
        proxy_cache.insert(proxy_id, url);
    }

    let runner = FlowRunner::new(&state.executor, state.persistence.as_ref(), state.storage.as_ref(), ws);
    let result = runner
        .run(&flow, steps, request.selected_step_ids.as_ref(), scope, move |proxy_id| {
            proxy_cache.get(&proxy_id).cloned().flatten()
        })
        .await;
    Ok(Json(result))
}

async fn list_steps(
    State(state): State<AppState>,
    Path(flow_id): Path<i64>,
) -> AppResult<Json<Vec<FlowStep>>> {
    Ok(Json(state.persistence.list_flow_steps(flow_id).await?))
}

async fn get_step(
    State(state): State<AppState>,
    Path((flow_id, step_id)): Path<(i64, i64)>,
) -> AppResult<Json<FlowStep>> {
    Ok(Json(state.persistence.get_flow_step(flow_id, step_id).await?))
}

async fn create_step(
    State(state): State<AppState>,
    Path(flow_id): Path<i64>,
    Json(mut body): Json<FlowStep>,
) -> AppResult<Json<FlowStep>> {
    body.flow_id = flow_id;
    Ok(Json(state.persistence.create_flow_step(body).await?))
}

async fn reorder_steps(
    State(state): State<AppState>,
    Path(flow_id): Path<i64>,
    Json(patch): Json<ReorderPatch>,
) -> AppResult<Json<Vec<FlowStep>>> {
    Ok(Json(state.persistence.reorder_flow_steps(flow_id, patch).await?))
}

async fn update_step(
    State(state): State<AppState>,
    Path((flow_id, step_id)): Path<(i64, i64)>,
    Json(mut body): Json<FlowStep>,
) -> AppResult<Json<FlowStep>> {
    body.id = step_id;
    body.flow_id = flow_id;
    Ok(Json(state.persistence.update_flow_step(body).await?))
}

async fn delete_step(
    State(state): State<AppState>,
    Path((flow_id, step_id)): Path<(i64, i64)>,
) -> AppResult<()> {
    state.persistence.delete_flow_step(flow_id, step_id).await?;
    Ok(())
}
