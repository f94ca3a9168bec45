//! Data model and the Persistence Port contract (spec.md §3, §4.7)
//!
//! `PersistencePort` is the trait every handler in `api::*` programs
//! against; `persistence::SqlitePersistence` is the only implementation,
//! and handlers never touch `sqlx` directly.

pub mod model;

use async_trait::async_trait;
use model::*;

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub type PortResult<T> = Result<T, PortError>;

/// A bulk positional patch applied by `reorder`: entity id → new `sort_order`.
pub type ReorderPatch = Vec<(i64, i64)>;

#[async_trait]
pub trait PersistencePort: Send + Sync {
    // -- Workspaces --
    async fn list_workspaces(&self) -> PortResult<Vec<Workspace>>;
    async fn get_workspace(&self, id: i64) -> PortResult<Workspace>;
    async fn create_workspace(&self, name: &str) -> PortResult<Workspace>;
    async fn update_workspace(&self, id: i64, name: &str) -> PortResult<Workspace>;
    async fn delete_workspace(&self, id: i64) -> PortResult<()>;
    async fn set_workspace_variables(
        &self,
        id: i64,
        variables: std::collections::HashMap<String, String>,
    ) -> PortResult<Workspace>;

    // -- Collections --
    async fn list_collections(&self, workspace_id: i64) -> PortResult<Vec<Collection>>;
    async fn get_collection(&self, workspace_id: i64, id: i64) -> PortResult<Collection>;
    async fn create_collection(&self, c: Collection) -> PortResult<Collection>;
    async fn update_collection(&self, c: Collection) -> PortResult<Collection>;
    async fn delete_collection(&self, workspace_id: i64, id: i64) -> PortResult<()>;
    async fn reorder_collections(
        &self,
        workspace_id: i64,
        patch: ReorderPatch,
    ) -> PortResult<Vec<Collection>>;
    async fn duplicate_collection(&self, workspace_id: i64, id: i64) -> PortResult<Collection>;

    // -- Requests --
    async fn list_requests(&self, workspace_id: i64) -> PortResult<Vec<RequestSpec>>;
    async fn get_request(&self, workspace_id: i64, id: i64) -> PortResult<RequestSpec>;
    async fn create_request(&self, r: RequestSpec) -> PortResult<RequestSpec>;
    async fn update_request(&self, r: RequestSpec) -> PortResult<RequestSpec>;
    async fn delete_request(&self, workspace_id: i64, id: i64) -> PortResult<()>;
    async fn reorder_requests(
        &self,
        workspace_id: i64,
        patch: ReorderPatch,
    ) -> PortResult<Vec<RequestSpec>>;
    async fn duplicate_request(&self, workspace_id: i64, id: i64) -> PortResult<RequestSpec>;

    // -- Environments --
    async fn list_environments(&self, workspace_id: i64) -> PortResult<Vec<Environment>>;
    async fn get_environment(&self, workspace_id: i64, id: i64) -> PortResult<Environment>;
    async fn get_active_environment(&self, workspace_id: i64) -> PortResult<Option<Environment>>;
    async fn create_environment(&self, e: Environment) -> PortResult<Environment>;
    async fn update_environment(&self, e: Environment) -> PortResult<Environment>;
    async fn delete_environment(&self, workspace_id: i64, id: i64) -> PortResult<()>;
    async fn activate_environment(&self, workspace_id: i64, id: i64) -> PortResult<Environment>;

    // -- Proxies --
    async fn list_proxies(&self, workspace_id: i64) -> PortResult<Vec<Proxy>>;
    async fn get_proxy(&self, workspace_id: i64, id: i64) -> PortResult<Proxy>;
    async fn get_active_proxy(&self, workspace_id: i64) -> PortResult<Option<Proxy>>;
    async fn create_proxy(&self, p: Proxy) -> PortResult<Proxy>;
    async fn update_proxy(&self, p: Proxy) -> PortResult<Proxy>;
    async fn delete_proxy(&self, workspace_id: i64, id: i64) -> PortResult<()>;
    async fn activate_proxy(&self, workspace_id: i64, id: i64) -> PortResult<Proxy>;
    async fn deactivate_proxies(&self, workspace_id: i64) -> PortResult<()>;

    // -- Flows --
    async fn list_flows(&self, workspace_id: i64) -> PortResult<Vec<Flow>>;
    async fn get_flow(&self, workspace_id: i64, id: i64) -> PortResult<Flow>;
    async fn create_flow(&self, f: Flow) -> PortResult<Flow>;
    async fn update_flow(&self, f: Flow) -> PortResult<Flow>;
    async fn delete_flow(&self, workspace_id: i64, id: i64) -> PortResult<()>;
    async fn reorder_flows(&self, workspace_id: i64, patch: ReorderPatch) -> PortResult<Vec<Flow>>;
    async fn duplicate_flow(&self, workspace_id: i64, id: i64) -> PortResult<Flow>;

    // -- Flow steps --
    async fn list_flow_steps(&self, flow_id: i64) -> PortResult<Vec<FlowStep>>;
    async fn get_flow_step(&self, flow_id: i64, id: i64) -> PortResult<FlowStep>;
    async fn create_flow_step(&self, s: FlowStep) -> PortResult<FlowStep>;
    async fn update_flow_step(&self, s: FlowStep) -> PortResult<FlowStep>;
    async fn delete_flow_step(&self, flow_id: i64, id: i64) -> PortResult<()>;
    async fn reorder_flow_steps(&self, flow_id: i64, patch: ReorderPatch) -> PortResult<Vec<FlowStep>>;

    // -- History --
    async fn list_history(&self, workspace_id: i64) -> PortResult<Vec<HistoryRecord>>;
    async fn get_history(&self, workspace_id: i64, id: i64) -> PortResult<HistoryRecord>;
    async fn record_history(&self, h: HistoryRecord) -> PortResult<HistoryRecord>;
    async fn delete_history(&self, workspace_id: i64, id: i64) -> PortResult<()>;
    async fn evict_history_older_than(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> PortResult<u64>;

    // -- Uploaded files (metadata only; bytes live behind the File Storage Port) --
    async fn record_uploaded_file(&self, f: UploadedFile) -> PortResult<UploadedFile>;
    async fn get_uploaded_file(&self, workspace_id: i64, id: i64) -> PortResult<UploadedFile>;
    async fn delete_uploaded_file(&self, workspace_id: i64, id: i64) -> PortResult<()>;
    async fn list_referenced_file_ids(&self) -> PortResult<std::collections::HashSet<i64>>;
    /// Resolves a set of file ids to their stored (on-disk) names,
    /// ignoring ids that no longer exist (spec.md §4.8 `sweep`).
    async fn resolve_stored_names(
        &self,
        ids: &std::collections::HashSet<i64>,
    ) -> PortResult<std::collections::HashSet<String>>;
}
