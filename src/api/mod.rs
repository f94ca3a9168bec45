//! HTTP API layer (spec.md §6): thin handlers translating JSON/multipart
//! requests into calls against `PersistencePort`/`FileStoragePort`/
//! `RequestExecutor`/`FlowRunner`. One `AppState` shared via
//! `axum::extract::State`, one router builder per entity group merged in
//! `server::create_app`, covering the full entity set spec.md §3 defines.

mod collections;
mod environments;
mod files;
mod flows;
mod history;
mod proxies;
mod requests;
mod workspaces;
mod ws;

use crate::domain::model::DEFAULT_WORKSPACE_ID;
use crate::domain::PersistencePort;
use crate::executor::RequestExecutor;
use crate::storage::FileStoragePort;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Router;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub persistence: Arc<dyn PersistencePort>,
    pub storage: Arc<dyn FileStoragePort>,
    pub executor: Arc<RequestExecutor>,
}

/// Extracts the `X-Workspace-ID` header, defaulting to workspace 1
/// (spec.md §6: "workspace scoped by `X-Workspace-ID` header, default 1").
pub struct WorkspaceId(pub i64);

impl<S> FromRequestParts<S> for WorkspaceId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get("X-Workspace-ID") {
            None => Ok(WorkspaceId(DEFAULT_WORKSPACE_ID)),
            Some(value) => {
                let text = value
                    .to_str()
                    .map_err(|_| (StatusCode::BAD_REQUEST, "X-Workspace-ID must be ASCII"))?;
                text.trim()
                    .parse()
                    .map(WorkspaceId)
                    .map_err(|_| (StatusCode::BAD_REQUEST, "X-Workspace-ID must be an integer"))
            }
        }
    }
}

/// Resolves the active proxy (if any) for a workspace, falling back through
/// per-entity overrides in the caller. Shared by the ad-hoc/saved execute
/// handlers, the Flow Runner invocation, and the WS relay handler so proxy
/// precedence (spec.md §4.4 step 5) is computed in exactly one place.
async fn active_proxy_url(persistence: &dyn PersistencePort, workspace_id: i64) -> Option<String> {
    persistence
        .get_active_proxy(workspace_id)
        .await
        .ok()
        .flatten()
        .map(|p| p.url)
}

async fn proxy_url_for(
    persistence: &dyn PersistencePort,
    workspace_id: i64,
    override_id: Option<i64>,
) -> Option<String> {
    if let Some(id) = override_id {
        if let Ok(proxy) = persistence.get_proxy(workspace_id, id).await {
            return Some(proxy.url);
        }
    }
    active_proxy_url(persistence, workspace_id).await
}

/// Loads the environment/collection-chain/workspace scopes for one execution
/// (spec.md §4.1 lookup order). `runtime` starts empty; callers merge any
/// caller-supplied initial variables into it afterward.
pub async fn build_scope(
    persistence: &dyn PersistencePort,
    workspace_id: i64,
    collection_id: Option<i64>,
) -> crate::variables::ScopeChain {
    let workspace = persistence
        .get_workspace(workspace_id)
        .await
        .map(|w| w.variables)
        .unwrap_or_default();
    let environment = persistence
        .get_active_environment(workspace_id)
        .await
        .ok()
        .flatten()
        .map(|e| e.variables)
        .unwrap_or_default();

    let mut collections = Vec::new();
    let mut next = collection_id;
    let mut guard = 0;
    while let Some(id) = next {
        guard += 1;
        if guard > 64 {
            break; // acyclicity is enforced at mutation time; this just bounds a runaway walk
        }
        match persistence.get_collection(workspace_id, id).await {
            Ok(c) => {
                next = c.parent_id;
                collections.push(c.variables);
            }
            Err(_) => break,
        }
    }

    crate::variables::ScopeChain { runtime: Default::default(), environment, collections, workspace }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(workspaces::routes())
        .merge(collections::routes())
        .merge(requests::routes())
        .merge(environments::routes())
        .merge(proxies::routes())
        .merge(flows::routes())
        .merge(files::routes())
        .merge(history::routes())
        .merge(ws::routes())
}
