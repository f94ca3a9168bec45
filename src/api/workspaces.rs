//! `/workspaces[/id]` — tenancy (spec.md §6).

use super::AppState;
use crate::domain::model::Workspace;
use crate::error::AppResult;
use axum::extract::{Path, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/workspaces", get(list).post(create))
        .route("/api/workspaces/{id}", get(get_one).put(update).delete(delete_one))
        .route("/api/workspaces/{id}/variables", put(set_variables))
}

#[derive(Deserialize)]
struct CreateWorkspace {
    name: String,
}

#[derive(Deserialize)]
struct UpdateWorkspace {
    name: String,
}

#[derive(Deserialize)]
struct SetVariables {
    variables: HashMap<String, String>,
}

async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<Workspace>>> {
    Ok(Json(state.persistence.list_workspaces().await?))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<Workspace>> {
    Ok(Json(state.persistence.get_workspace(id).await?))
}

async fn create(State(state): State<AppState>, Json(body): Json<CreateWorkspace>) -> AppResult<Json<Workspace>> {
    Ok(Json(state.persistence.create_workspace(&body.name).await?))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateWorkspace>,
) -> AppResult<Json<Workspace>> {
    Ok(Json(state.persistence.update_workspace(id, &body.name).await?))
}

async fn delete_one(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<()> {
    state.persistence.delete_workspace(id).await?;
    Ok(())
}

async fn set_variables(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<SetVariables>,
) -> AppResult<Json<Workspace>> {
    Ok(Json(state.persistence.set_workspace_variables(id, body.variables).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_workspace_deserializes_name() {
        let body: CreateWorkspace = serde_json::from_str(r#"{"name":"staging"}"#).unwrap();
        assert_eq!(body.name, "staging");
    }
}
