//! SQLite implementation of the Persistence Port.
//!
//! A thin struct wrapping one `SqlitePool`, plain `sqlx::query`/`Row::get`
//! rather than the `query!` macros, generalized from a single JSON-blob
//! table to the full relational schema spec.md §3 requires. Activation
//! singleton enforcement and deep
//! duplication both run inside `pool.begin()` transactions, matching
//! spec.md §4.7's "the port is a transactional boundary" contract.

mod schema;

use crate::domain::model::*;
use crate::domain::{PersistencePort, PortError, PortResult, ReorderPatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row, Sqlite, Transaction};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    pub async fn connect(db_path: &str) -> Result<Self, sqlx::Error> {
        let url = format!("sqlite://{}?mode=rwc", db_path);
        let pool = SqlitePool::connect(&url).await?;
        schema::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn in_memory() -> Self {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        schema::init_schema(&pool).await.unwrap();
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn variables_from_json(s: &str) -> HashMap<String, String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn row_workspace(row: &sqlx::sqlite::SqliteRow) -> Workspace {
    let variables: String = row.get("variables");
    Workspace {
        id: row.get("id"),
        name: row.get("name"),
        variables: variables_from_json(&variables),
    }
}

fn row_collection(row: &sqlx::sqlite::SqliteRow) -> Collection {
    let variables: String = row.get("variables");
    Collection {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        parent_id: row.get("parent_id"),
        name: row.get("name"),
        sort_order: row.get("sort_order"),
        variables: variables_from_json(&variables),
    }
}

fn row_request(row: &sqlx::sqlite::SqliteRow) -> RequestSpec {
    let headers: String = row.get("headers");
    let cookies: String = row.get("cookies");
    let form_fields: String = row.get("form_fields");
    let method: String = row.get("method");
    let body_type: String = row.get("body_type");
    RequestSpec {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        collection_id: row.get("collection_id"),
        name: row.get("name"),
        method: Method::parse(&method).unwrap_or(Method::Get),
        url: row.get("url"),
        headers: serde_json::from_str(&headers).unwrap_or_default(),
        cookies: variables_from_json(&cookies),
        body: row.get("body"),
        body_type: BodyType::parse(&body_type).unwrap_or(BodyType::None),
        form_fields: serde_json::from_str(&form_fields).unwrap_or_default(),
        proxy_id: row.get("proxy_id"),
        pre_script: row.get("pre_script"),
        post_script: row.get("post_script"),
        sort_order: row.get("sort_order"),
    }
}

fn row_environment(row: &sqlx::sqlite::SqliteRow) -> Environment {
    let variables: String = row.get("variables");
    let is_active: i64 = row.get("is_active");
    Environment {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        variables: variables_from_json(&variables),
        is_active: is_active != 0,
    }
}

fn row_proxy(row: &sqlx::sqlite::SqliteRow) -> Proxy {
    let is_active: i64 = row.get("is_active");
    Proxy {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        url: row.get("url"),
        is_active: is_active != 0,
    }
}

fn row_flow(row: &sqlx::sqlite::SqliteRow) -> Flow {
    Flow {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        description: row.get("description"),
        sort_order: row.get("sort_order"),
    }
}

fn row_flow_step(row: &sqlx::sqlite::SqliteRow) -> FlowStep {
    let extract_vars: String = row.get("extract_vars");
    let headers: String = row.get("headers");
    let form_fields: String = row.get("form_fields");
    let cookies: String = row.get("cookies");
    let method: Option<String> = row.get("method");
    let body_type: Option<String> = row.get("body_type");
    let continue_on_error: i64 = row.get("continue_on_error");
    FlowStep {
        id: row.get("id"),
        flow_id: row.get("flow_id"),
        request_id: row.get("request_id"),
        step_order: row.get("step_order"),
        delay_ms: row.get::<i64, _>("delay_ms") as u64,
        extract_vars: variables_from_json(&extract_vars),
        condition: row.get("condition"),
        loop_count: row.get::<i64, _>("loop_count") as u32,
        pre_script: row.get("pre_script"),
        post_script: row.get("post_script"),
        continue_on_error: continue_on_error != 0,
        name: row.get("name"),
        method: method.and_then(|m| Method::parse(&m)),
        url: row.get("url"),
        headers: serde_json::from_str(&headers).unwrap_or_default(),
        body: row.get("body"),
        body_type: body_type.and_then(|b| BodyType::parse(&b)),
        form_fields: serde_json::from_str(&form_fields).unwrap_or_default(),
        proxy_id: row.get("proxy_id"),
        cookies: variables_from_json(&cookies),
    }
}

fn row_history(row: &sqlx::sqlite::SqliteRow) -> HistoryRecord {
    let request_headers: String = row.get("request_headers");
    let response_headers: String = row.get("response_headers");
    let is_binary: i64 = row.get("is_binary");
    let created_at: String = row.get("created_at");
    HistoryRecord {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        request_id: row.get("request_id"),
        flow_id: row.get("flow_id"),
        method: row.get("method"),
        url: row.get("url"),
        request_headers: serde_json::from_str(&request_headers).unwrap_or(serde_json::json!({})),
        request_body: row.get("request_body"),
        status_code: row.get("status_code"),
        response_headers: serde_json::from_str(&response_headers)
            .unwrap_or(serde_json::json!({})),
        response_body: row.get("response_body"),
        duration_ms: row.get("duration_ms"),
        error: row.get("error"),
        body_size: row.get("body_size"),
        is_binary: is_binary != 0,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    }
}

fn row_uploaded_file(row: &sqlx::sqlite::SqliteRow) -> UploadedFile {
    let created_at: String = row.get("created_at");
    UploadedFile {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        original_name: row.get("original_name"),
        stored_name: row.get("stored_name"),
        content_type: row.get("content_type"),
        size: row.get("size"),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
    }
}

/// Walks `parent_id` links starting at `start` and returns an error if `target`
/// is ever revisited, enforcing spec.md §3(b) / §9's acyclicity rule.
async fn assert_no_cycle(
    tx: &mut Transaction<'_, Sqlite>,
    workspace_id: i64,
    child_id: i64,
    new_parent_id: Option<i64>,
) -> PortResult<()> {
    let mut current = new_parent_id;
    let mut seen = HashSet::new();
    seen.insert(child_id);
    while let Some(id) = current {
        if !seen.insert(id) {
            return Err(PortError::Validation("cyclic collection parent".into()));
        }
        let row = sqlx::query("SELECT parent_id FROM collections WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&mut **tx)
            .await?;
        current = match row {
            Some(r) => r.get("parent_id"),
            None => break,
        };
    }
    Ok(())
}

#[async_trait]
impl PersistencePort for SqlitePersistence {
    async fn list_workspaces(&self) -> PortResult<Vec<Workspace>> {
        let rows = sqlx::query("SELECT * FROM workspaces ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_workspace).collect())
    }

    async fn get_workspace(&self, id: i64) -> PortResult<Workspace> {
        let row = sqlx::query("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_workspace(&r))
            .ok_or_else(|| PortError::NotFound(format!("workspace {id}")))
    }

    async fn create_workspace(&self, name: &str) -> PortResult<Workspace> {
        let id = sqlx::query("INSERT INTO workspaces (name, variables) VALUES (?, '{}')")
            .bind(name)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        self.get_workspace(id).await
    }

    async fn update_workspace(&self, id: i64, name: &str) -> PortResult<Workspace> {
        let n = sqlx::query("UPDATE workspaces SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("workspace {id}")));
        }
        self.get_workspace(id).await
    }

    async fn delete_workspace(&self, id: i64) -> PortResult<()> {
        if id == DEFAULT_WORKSPACE_ID {
            return Err(PortError::Validation(
                "the default workspace cannot be deleted".into(),
            ));
        }
        let mut tx = self.pool.begin().await?;
        for table in [
            "collections",
            "requests",
            "environments",
            "proxies",
            "history",
            "uploaded_files",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE workspace_id = ?"))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "DELETE FROM flow_steps WHERE flow_id IN (SELECT id FROM flows WHERE workspace_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM flows WHERE workspace_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM workspaces WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_workspace_variables(
        &self,
        id: i64,
        variables: HashMap<String, String>,
    ) -> PortResult<Workspace> {
        let json = serde_json::to_string(&variables).unwrap_or_else(|_| "{}".into());
        let n = sqlx::query("UPDATE workspaces SET variables = ? WHERE id = ?")
            .bind(json)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("workspace {id}")));
        }
        self.get_workspace(id).await
    }

    // -- Collections --

    async fn list_collections(&self, workspace_id: i64) -> PortResult<Vec<Collection>> {
        let rows = sqlx::query("SELECT * FROM collections WHERE workspace_id = ? ORDER BY sort_order")
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_collection).collect())
    }

    async fn get_collection(&self, workspace_id: i64, id: i64) -> PortResult<Collection> {
        let row = sqlx::query("SELECT * FROM collections WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_collection(&r))
            .ok_or_else(|| PortError::NotFound(format!("collection {id}")))
    }

    async fn create_collection(&self, c: Collection) -> PortResult<Collection> {
        let mut tx = self.pool.begin().await?;
        if c.parent_id.is_some() {
            assert_no_cycle(&mut tx, c.workspace_id, -1, c.parent_id).await?;
        }
        let variables = serde_json::to_string(&c.variables).unwrap_or_else(|_| "{}".into());
        let id = sqlx::query(
            "INSERT INTO collections (workspace_id, parent_id, name, sort_order, variables) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(c.workspace_id)
        .bind(c.parent_id)
        .bind(&c.name)
        .bind(c.sort_order)
        .bind(variables)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        tx.commit().await?;
        self.get_collection(c.workspace_id, id).await
    }

    async fn update_collection(&self, c: Collection) -> PortResult<Collection> {
        let mut tx = self.pool.begin().await?;
        if c.parent_id.is_some() {
            assert_no_cycle(&mut tx, c.workspace_id, c.id, c.parent_id).await?;
        }
        let variables = serde_json::to_string(&c.variables).unwrap_or_else(|_| "{}".into());
        let n = sqlx::query(
            "UPDATE collections SET parent_id = ?, name = ?, sort_order = ?, variables = ? WHERE id = ? AND workspace_id = ?",
        )
        .bind(c.parent_id)
        .bind(&c.name)
        .bind(c.sort_order)
        .bind(variables)
        .bind(c.id)
        .bind(c.workspace_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("collection {}", c.id)));
        }
        tx.commit().await?;
        self.get_collection(c.workspace_id, c.id).await
    }

    async fn delete_collection(&self, workspace_id: i64, id: i64) -> PortResult<()> {
        let mut tx = self.pool.begin().await?;
        delete_collection_cascade(&mut tx, workspace_id, id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reorder_collections(
        &self,
        workspace_id: i64,
        patch: ReorderPatch,
    ) -> PortResult<Vec<Collection>> {
        let mut tx = self.pool.begin().await?;
        for (id, order) in &patch {
            sqlx::query("UPDATE collections SET sort_order = ? WHERE id = ? AND workspace_id = ?")
                .bind(order)
                .bind(id)
                .bind(workspace_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        self.list_collections(workspace_id).await
    }

    async fn duplicate_collection(&self, workspace_id: i64, id: i64) -> PortResult<Collection> {
        let mut tx = self.pool.begin().await?;
        let root = fetch_collection(&mut tx, workspace_id, id).await?;
        let new_id = duplicate_collection_tree(&mut tx, workspace_id, &root, root.parent_id, true).await?;
        tx.commit().await?;
        self.get_collection(workspace_id, new_id).await
    }

    // -- Requests --

    async fn list_requests(&self, workspace_id: i64) -> PortResult<Vec<RequestSpec>> {
        let rows = sqlx::query("SELECT * FROM requests WHERE workspace_id = ? ORDER BY sort_order")
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_request).collect())
    }

    async fn get_request(&self, workspace_id: i64, id: i64) -> PortResult<RequestSpec> {
        let row = sqlx::query("SELECT * FROM requests WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_request(&r))
            .ok_or_else(|| PortError::NotFound(format!("request {id}")))
    }

    async fn create_request(&self, r: RequestSpec) -> PortResult<RequestSpec> {
        let id = insert_request(&self.pool, &r).await?;
        self.get_request(r.workspace_id, id).await
    }

    async fn update_request(&self, r: RequestSpec) -> PortResult<RequestSpec> {
        let n = sqlx::query(
            r#"UPDATE requests SET collection_id=?, name=?, method=?, url=?, headers=?, cookies=?,
               body=?, body_type=?, form_fields=?, proxy_id=?, pre_script=?, post_script=?, sort_order=?
               WHERE id=? AND workspace_id=?"#,
        )
        .bind(r.collection_id)
        .bind(&r.name)
        .bind(r.method.as_str())
        .bind(&r.url)
        .bind(serde_json::to_string(&r.headers).unwrap_or_default())
        .bind(serde_json::to_string(&r.cookies).unwrap_or_default())
        .bind(&r.body)
        .bind(r.body_type.as_str())
        .bind(serde_json::to_string(&r.form_fields).unwrap_or_default())
        .bind(r.proxy_id)
        .bind(&r.pre_script)
        .bind(&r.post_script)
        .bind(r.sort_order)
        .bind(r.id)
        .bind(r.workspace_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("request {}", r.id)));
        }
        self.get_request(r.workspace_id, r.id).await
    }

    async fn delete_request(&self, workspace_id: i64, id: i64) -> PortResult<()> {
        let n = sqlx::query("DELETE FROM requests WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("request {id}")));
        }
        Ok(())
    }

    async fn reorder_requests(
        &self,
        workspace_id: i64,
        patch: ReorderPatch,
    ) -> PortResult<Vec<RequestSpec>> {
        let mut tx = self.pool.begin().await?;
        for (id, order) in &patch {
            sqlx::query("UPDATE requests SET sort_order = ? WHERE id = ? AND workspace_id = ?")
                .bind(order)
                .bind(id)
                .bind(workspace_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        self.list_requests(workspace_id).await
    }

    async fn duplicate_request(&self, workspace_id: i64, id: i64) -> PortResult<RequestSpec> {
        let mut tx = self.pool.begin().await?;
        let mut src = fetch_request(&mut tx, workspace_id, id).await?;
        src.name = format!("{} (Copy)", src.name);
        let new_id = insert_request_tx(&mut tx, &src).await?;
        tx.commit().await?;
        self.get_request(workspace_id, new_id).await
    }

    // -- Environments --

    async fn list_environments(&self, workspace_id: i64) -> PortResult<Vec<Environment>> {
        let rows = sqlx::query("SELECT * FROM environments WHERE workspace_id = ? ORDER BY id")
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_environment).collect())
    }

    async fn get_environment(&self, workspace_id: i64, id: i64) -> PortResult<Environment> {
        let row = sqlx::query("SELECT * FROM environments WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_environment(&r))
            .ok_or_else(|| PortError::NotFound(format!("environment {id}")))
    }

    async fn get_active_environment(&self, workspace_id: i64) -> PortResult<Option<Environment>> {
        let row = sqlx::query(
            "SELECT * FROM environments WHERE workspace_id = ? AND is_active = 1 LIMIT 1",
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| row_environment(&r)))
    }

    async fn create_environment(&self, e: Environment) -> PortResult<Environment> {
        let variables = serde_json::to_string(&e.variables).unwrap_or_else(|_| "{}".into());
        let id = sqlx::query(
            "INSERT INTO environments (workspace_id, name, variables, is_active) VALUES (?, ?, ?, 0)",
        )
        .bind(e.workspace_id)
        .bind(&e.name)
        .bind(variables)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_environment(e.workspace_id, id).await
    }

    async fn update_environment(&self, e: Environment) -> PortResult<Environment> {
        let variables = serde_json::to_string(&e.variables).unwrap_or_else(|_| "{}".into());
        let n = sqlx::query(
            "UPDATE environments SET name = ?, variables = ? WHERE id = ? AND workspace_id = ?",
        )
        .bind(&e.name)
        .bind(variables)
        .bind(e.id)
        .bind(e.workspace_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("environment {}", e.id)));
        }
        self.get_environment(e.workspace_id, e.id).await
    }

    async fn delete_environment(&self, workspace_id: i64, id: i64) -> PortResult<()> {
        let n = sqlx::query("DELETE FROM environments WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("environment {id}")));
        }
        Ok(())
    }

    async fn activate_environment(&self, workspace_id: i64, id: i64) -> PortResult<Environment> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query("SELECT id FROM environments WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(PortError::NotFound(format!("environment {id}")));
        }
        sqlx::query("UPDATE environments SET is_active = 0 WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE environments SET is_active = 1 WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.get_environment(workspace_id, id).await
    }

    // -- Proxies --

    async fn list_proxies(&self, workspace_id: i64) -> PortResult<Vec<Proxy>> {
        let rows = sqlx::query("SELECT * FROM proxies WHERE workspace_id = ? ORDER BY id")
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_proxy).collect())
    }

    async fn get_proxy(&self, workspace_id: i64, id: i64) -> PortResult<Proxy> {
        let row = sqlx::query("SELECT * FROM proxies WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_proxy(&r))
            .ok_or_else(|| PortError::NotFound(format!("proxy {id}")))
    }

    async fn get_active_proxy(&self, workspace_id: i64) -> PortResult<Option<Proxy>> {
        let row = sqlx::query("SELECT * FROM proxies WHERE workspace_id = ? AND is_active = 1 LIMIT 1")
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_proxy(&r)))
    }

    async fn create_proxy(&self, p: Proxy) -> PortResult<Proxy> {
        let id = sqlx::query(
            "INSERT INTO proxies (workspace_id, name, url, is_active) VALUES (?, ?, ?, 0)",
        )
        .bind(p.workspace_id)
        .bind(&p.name)
        .bind(&p.url)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_proxy(p.workspace_id, id).await
    }

    async fn update_proxy(&self, p: Proxy) -> PortResult<Proxy> {
        let n = sqlx::query("UPDATE proxies SET name = ?, url = ? WHERE id = ? AND workspace_id = ?")
            .bind(&p.name)
            .bind(&p.url)
            .bind(p.id)
            .bind(p.workspace_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("proxy {}", p.id)));
        }
        self.get_proxy(p.workspace_id, p.id).await
    }

    async fn delete_proxy(&self, workspace_id: i64, id: i64) -> PortResult<()> {
        let n = sqlx::query("DELETE FROM proxies WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("proxy {id}")));
        }
        Ok(())
    }

    async fn activate_proxy(&self, workspace_id: i64, id: i64) -> PortResult<Proxy> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query("SELECT id FROM proxies WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(PortError::NotFound(format!("proxy {id}")));
        }
        sqlx::query("UPDATE proxies SET is_active = 0 WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE proxies SET is_active = 1 WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.get_proxy(workspace_id, id).await
    }

    async fn deactivate_proxies(&self, workspace_id: i64) -> PortResult<()> {
        sqlx::query("UPDATE proxies SET is_active = 0 WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- Flows --

    async fn list_flows(&self, workspace_id: i64) -> PortResult<Vec<Flow>> {
        let rows = sqlx::query("SELECT * FROM flows WHERE workspace_id = ? ORDER BY sort_order")
            .bind(workspace_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_flow).collect())
    }

    async fn get_flow(&self, workspace_id: i64, id: i64) -> PortResult<Flow> {
        let row = sqlx::query("SELECT * FROM flows WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_flow(&r))
            .ok_or_else(|| PortError::NotFound(format!("flow {id}")))
    }

    async fn create_flow(&self, f: Flow) -> PortResult<Flow> {
        let id = sqlx::query(
            "INSERT INTO flows (workspace_id, name, description, sort_order) VALUES (?, ?, ?, ?)",
        )
        .bind(f.workspace_id)
        .bind(&f.name)
        .bind(&f.description)
        .bind(f.sort_order)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_flow(f.workspace_id, id).await
    }

    async fn update_flow(&self, f: Flow) -> PortResult<Flow> {
        let n = sqlx::query(
            "UPDATE flows SET name = ?, description = ?, sort_order = ? WHERE id = ? AND workspace_id = ?",
        )
        .bind(&f.name)
        .bind(&f.description)
        .bind(f.sort_order)
        .bind(f.id)
        .bind(f.workspace_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("flow {}", f.id)));
        }
        self.get_flow(f.workspace_id, f.id).await
    }

    async fn delete_flow(&self, workspace_id: i64, id: i64) -> PortResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM flow_steps WHERE flow_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let n = sqlx::query("DELETE FROM flows WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("flow {id}")));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn reorder_flows(&self, workspace_id: i64, patch: ReorderPatch) -> PortResult<Vec<Flow>> {
        let mut tx = self.pool.begin().await?;
        for (id, order) in &patch {
            sqlx::query("UPDATE flows SET sort_order = ? WHERE id = ? AND workspace_id = ?")
                .bind(order)
                .bind(id)
                .bind(workspace_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        self.list_flows(workspace_id).await
    }

    async fn duplicate_flow(&self, workspace_id: i64, id: i64) -> PortResult<Flow> {
        let mut tx = self.pool.begin().await?;
        let src = sqlx::query("SELECT * FROM flows WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|r| row_flow(&r))
            .ok_or_else(|| PortError::NotFound(format!("flow {id}")))?;

        let new_flow_id = sqlx::query(
            "INSERT INTO flows (workspace_id, name, description, sort_order) VALUES (?, ?, ?, ?)",
        )
        .bind(workspace_id)
        .bind(format!("{} (Copy)", src.name))
        .bind(&src.description)
        .bind(src.sort_order)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let steps = sqlx::query("SELECT * FROM flow_steps WHERE flow_id = ? ORDER BY step_order")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;
        for row in steps.iter() {
            let step = row_flow_step(row);
            insert_flow_step_tx(&mut tx, new_flow_id, &step).await?;
        }
        tx.commit().await?;
        self.get_flow(workspace_id, new_flow_id).await
    }

    // -- Flow steps --

    async fn list_flow_steps(&self, flow_id: i64) -> PortResult<Vec<FlowStep>> {
        let rows = sqlx::query("SELECT * FROM flow_steps WHERE flow_id = ? ORDER BY step_order")
            .bind(flow_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_flow_step).collect())
    }

    async fn get_flow_step(&self, flow_id: i64, id: i64) -> PortResult<FlowStep> {
        let row = sqlx::query("SELECT * FROM flow_steps WHERE id = ? AND flow_id = ?")
            .bind(id)
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_flow_step(&r))
            .ok_or_else(|| PortError::NotFound(format!("flow step {id}")))
    }

    /// `step_order` is server-assigned, not client-supplied: every new step
    /// lands at the end of the flow's dense `1..N` run (spec.md §3 invariant
    /// (c)). Use `reorder_flow_steps` to move a step elsewhere.
    async fn create_flow_step(&self, mut s: FlowStep) -> PortResult<FlowStep> {
        let mut tx = self.pool.begin().await?;
        let next_order: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(step_order), 0) + 1 FROM flow_steps WHERE flow_id = ?",
        )
        .bind(s.flow_id)
        .fetch_one(&mut *tx)
        .await?;
        s.step_order = next_order;
        let id = insert_flow_step_tx(&mut tx, s.flow_id, &s).await?;
        tx.commit().await?;
        self.get_flow_step(s.flow_id, id).await
    }

    /// Leaves `step_order` untouched; position changes go through
    /// `reorder_flow_steps` so the `1..N` invariant can't be broken by a
    /// stray edit.
    async fn update_flow_step(&self, s: FlowStep) -> PortResult<FlowStep> {
        let n = sqlx::query(
            r#"UPDATE flow_steps SET request_id=?, delay_ms=?, extract_vars=?, condition=?,
               loop_count=?, pre_script=?, post_script=?, continue_on_error=?, name=?, method=?, url=?,
               headers=?, body=?, body_type=?, form_fields=?, proxy_id=?, cookies=?
               WHERE id=? AND flow_id=?"#,
        )
        .bind(s.request_id)
        .bind(s.delay_ms as i64)
        .bind(serde_json::to_string(&s.extract_vars).unwrap_or_default())
        .bind(&s.condition)
        .bind(s.loop_count as i64)
        .bind(&s.pre_script)
        .bind(&s.post_script)
        .bind(s.continue_on_error)
        .bind(&s.name)
        .bind(s.method.map(|m| m.as_str()))
        .bind(&s.url)
        .bind(serde_json::to_string(&s.headers).unwrap_or_default())
        .bind(&s.body)
        .bind(s.body_type.map(|b| b.as_str()))
        .bind(serde_json::to_string(&s.form_fields).unwrap_or_default())
        .bind(s.proxy_id)
        .bind(serde_json::to_string(&s.cookies).unwrap_or_default())
        .bind(s.id)
        .bind(s.flow_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("flow step {}", s.id)));
        }
        self.get_flow_step(s.flow_id, s.id).await
    }

    /// Deletes the step and shifts every later step's `step_order` down by
    /// one, keeping the flow's order set a gapless `1..N` (spec.md §8).
    async fn delete_flow_step(&self, flow_id: i64, id: i64) -> PortResult<()> {
        let mut tx = self.pool.begin().await?;
        let deleted_order: Option<i64> =
            sqlx::query_scalar("SELECT step_order FROM flow_steps WHERE id = ? AND flow_id = ?")
                .bind(id)
                .bind(flow_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(deleted_order) = deleted_order else {
            return Err(PortError::NotFound(format!("flow step {id}")));
        };
        sqlx::query("DELETE FROM flow_steps WHERE id = ? AND flow_id = ?")
            .bind(id)
            .bind(flow_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE flow_steps SET step_order = step_order - 1 WHERE flow_id = ? AND step_order > ?",
        )
        .bind(flow_id)
        .bind(deleted_order)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reorder_flow_steps(&self, flow_id: i64, patch: ReorderPatch) -> PortResult<Vec<FlowStep>> {
        let mut tx = self.pool.begin().await?;
        for (id, order) in &patch {
            sqlx::query("UPDATE flow_steps SET step_order = ? WHERE id = ? AND flow_id = ?")
                .bind(order)
                .bind(id)
                .bind(flow_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        self.list_flow_steps(flow_id).await
    }

    // -- History --

    async fn list_history(&self, workspace_id: i64) -> PortResult<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM history WHERE workspace_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_history).collect())
    }

    async fn get_history(&self, workspace_id: i64, id: i64) -> PortResult<HistoryRecord> {
        let row = sqlx::query("SELECT * FROM history WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_history(&r))
            .ok_or_else(|| PortError::NotFound(format!("history {id}")))
    }

    async fn record_history(&self, h: HistoryRecord) -> PortResult<HistoryRecord> {
        let id = sqlx::query(
            r#"INSERT INTO history (workspace_id, request_id, flow_id, method, url, request_headers,
               request_body, status_code, response_headers, response_body, duration_ms, error,
               body_size, is_binary, created_at) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
        )
        .bind(h.workspace_id)
        .bind(h.request_id)
        .bind(h.flow_id)
        .bind(&h.method)
        .bind(&h.url)
        .bind(serde_json::to_string(&h.request_headers).unwrap_or_default())
        .bind(&h.request_body)
        .bind(h.status_code)
        .bind(serde_json::to_string(&h.response_headers).unwrap_or_default())
        .bind(&h.response_body)
        .bind(h.duration_ms)
        .bind(&h.error)
        .bind(h.body_size)
        .bind(h.is_binary)
        .bind(h.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_history(h.workspace_id, id).await
    }

    async fn delete_history(&self, workspace_id: i64, id: i64) -> PortResult<()> {
        let n = sqlx::query("DELETE FROM history WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("history {id}")));
        }
        Ok(())
    }

    async fn evict_history_older_than(&self, cutoff: DateTime<Utc>) -> PortResult<u64> {
        let n = sqlx::query("DELETE FROM history WHERE created_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(n)
    }

    // -- Uploaded files --

    async fn record_uploaded_file(&self, f: UploadedFile) -> PortResult<UploadedFile> {
        let id = sqlx::query(
            "INSERT INTO uploaded_files (workspace_id, original_name, stored_name, content_type, size, created_at) VALUES (?,?,?,?,?,?)",
        )
        .bind(f.workspace_id)
        .bind(&f.original_name)
        .bind(&f.stored_name)
        .bind(&f.content_type)
        .bind(f.size)
        .bind(f.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_uploaded_file(f.workspace_id, id).await
    }

    async fn get_uploaded_file(&self, workspace_id: i64, id: i64) -> PortResult<UploadedFile> {
        let row = sqlx::query("SELECT * FROM uploaded_files WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_uploaded_file(&r))
            .ok_or_else(|| PortError::NotFound(format!("file {id}")))
    }

    async fn delete_uploaded_file(&self, workspace_id: i64, id: i64) -> PortResult<()> {
        let n = sqlx::query("DELETE FROM uploaded_files WHERE id = ? AND workspace_id = ?")
            .bind(id)
            .bind(workspace_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if n == 0 {
            return Err(PortError::NotFound(format!("file {id}")));
        }
        Ok(())
    }

    async fn list_referenced_file_ids(&self) -> PortResult<HashSet<i64>> {
        let mut ids = HashSet::new();
        for (table, col) in [("requests", "form_fields"), ("flow_steps", "form_fields")] {
            let rows = sqlx::query(&format!("SELECT {col} AS ff FROM {table}"))
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                let raw: String = row.get("ff");
                let fields: Vec<FormField> = serde_json::from_str(&raw).unwrap_or_default();
                for field in fields {
                    if field.field_type == FormFieldType::File {
                        if let Ok(id) = field.value.parse::<i64>() {
                            ids.insert(id);
                        }
                    }
                }
            }
        }
        Ok(ids)
    }

    async fn resolve_stored_names(&self, ids: &HashSet<i64>) -> PortResult<HashSet<String>> {
        let mut names = HashSet::new();
        for &id in ids {
            if let Some(row) = sqlx::query("SELECT stored_name FROM uploaded_files WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            {
                names.insert(row.get::<String, _>("stored_name"));
            }
        }
        Ok(names)
    }
}

async fn fetch_collection(
    tx: &mut Transaction<'_, Sqlite>,
    workspace_id: i64,
    id: i64,
) -> PortResult<Collection> {
    sqlx::query("SELECT * FROM collections WHERE id = ? AND workspace_id = ?")
        .bind(id)
        .bind(workspace_id)
        .fetch_optional(&mut **tx)
        .await?
        .map(|r| row_collection(&r))
        .ok_or_else(|| PortError::NotFound(format!("collection {id}")))
}

async fn fetch_request(
    tx: &mut Transaction<'_, Sqlite>,
    workspace_id: i64,
    id: i64,
) -> PortResult<RequestSpec> {
    sqlx::query("SELECT * FROM requests WHERE id = ? AND workspace_id = ?")
        .bind(id)
        .bind(workspace_id)
        .fetch_optional(&mut **tx)
        .await?
        .map(|r| row_request(&r))
        .ok_or_else(|| PortError::NotFound(format!("request {id}")))
}

async fn insert_request(pool: &SqlitePool, r: &RequestSpec) -> PortResult<i64> {
    let id = sqlx::query(
        r#"INSERT INTO requests (workspace_id, collection_id, name, method, url, headers, cookies,
           body, body_type, form_fields, proxy_id, pre_script, post_script, sort_order)
           VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
    )
    .bind(r.workspace_id)
    .bind(r.collection_id)
    .bind(&r.name)
    .bind(r.method.as_str())
    .bind(&r.url)
    .bind(serde_json::to_string(&r.headers).unwrap_or_default())
    .bind(serde_json::to_string(&r.cookies).unwrap_or_default())
    .bind(&r.body)
    .bind(r.body_type.as_str())
    .bind(serde_json::to_string(&r.form_fields).unwrap_or_default())
    .bind(r.proxy_id)
    .bind(&r.pre_script)
    .bind(&r.post_script)
    .bind(r.sort_order)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

async fn insert_request_tx(tx: &mut Transaction<'_, Sqlite>, r: &RequestSpec) -> PortResult<i64> {
    let id = sqlx::query(
        r#"INSERT INTO requests (workspace_id, collection_id, name, method, url, headers, cookies,
           body, body_type, form_fields, proxy_id, pre_script, post_script, sort_order)
           VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
    )
    .bind(r.workspace_id)
    .bind(r.collection_id)
    .bind(&r.name)
    .bind(r.method.as_str())
    .bind(&r.url)
    .bind(serde_json::to_string(&r.headers).unwrap_or_default())
    .bind(serde_json::to_string(&r.cookies).unwrap_or_default())
    .bind(&r.body)
    .bind(r.body_type.as_str())
    .bind(serde_json::to_string(&r.form_fields).unwrap_or_default())
    .bind(r.proxy_id)
    .bind(&r.pre_script)
    .bind(&r.post_script)
    .bind(r.sort_order)
    .execute(&mut **tx)
    .await?
    .last_insert_rowid();
    Ok(id)
}

async fn insert_flow_step_tx(
    tx: &mut Transaction<'_, Sqlite>,
    flow_id: i64,
    s: &FlowStep,
) -> PortResult<i64> {
    let id = sqlx::query(
        r#"INSERT INTO flow_steps (flow_id, request_id, step_order, delay_ms, extract_vars, condition,
           loop_count, pre_script, post_script, continue_on_error, name, method, url, headers, body,
           body_type, form_fields, proxy_id, cookies)
           VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"#,
    )
    .bind(flow_id)
    .bind(s.request_id)
    .bind(s.step_order)
    .bind(s.delay_ms as i64)
    .bind(serde_json::to_string(&s.extract_vars).unwrap_or_default())
    .bind(&s.condition)
    .bind(s.loop_count as i64)
    .bind(&s.pre_script)
    .bind(&s.post_script)
    .bind(s.continue_on_error)
    .bind(&s.name)
    .bind(s.method.map(|m| m.as_str()))
    .bind(&s.url)
    .bind(serde_json::to_string(&s.headers).unwrap_or_default())
    .bind(&s.body)
    .bind(s.body_type.map(|b| b.as_str()))
    .bind(serde_json::to_string(&s.form_fields).unwrap_or_default())
    .bind(s.proxy_id)
    .bind(serde_json::to_string(&s.cookies).unwrap_or_default())
    .execute(&mut **tx)
    .await?
    .last_insert_rowid();
    Ok(id)
}

async fn delete_collection_cascade(
    tx: &mut Transaction<'_, Sqlite>,
    workspace_id: i64,
    id: i64,
) -> PortResult<()> {
    let children = sqlx::query("SELECT id FROM collections WHERE parent_id = ? AND workspace_id = ?")
        .bind(id)
        .bind(workspace_id)
        .fetch_all(&mut **tx)
        .await?;
    for row in children {
        let child_id: i64 = row.get("id");
        Box::pin(delete_collection_cascade(tx, workspace_id, child_id)).await?;
    }
    sqlx::query("DELETE FROM requests WHERE collection_id = ? AND workspace_id = ?")
        .bind(id)
        .bind(workspace_id)
        .execute(&mut **tx)
        .await?;
    let n = sqlx::query("DELETE FROM collections WHERE id = ? AND workspace_id = ?")
        .bind(id)
        .bind(workspace_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    if n == 0 {
        return Err(PortError::NotFound(format!("collection {id}")));
    }
    Ok(())
}

/// Deep-copies a collection subtree. `is_root` controls the `" (Copy)"` name
/// suffix, applied only once per spec.md §8's round-trip law.
async fn duplicate_collection_tree(
    tx: &mut Transaction<'_, Sqlite>,
    workspace_id: i64,
    src: &Collection,
    new_parent_id: Option<i64>,
    is_root: bool,
) -> PortResult<i64> {
    let name = if is_root {
        format!("{} (Copy)", src.name)
    } else {
        src.name.clone()
    };
    let variables = serde_json::to_string(&src.variables).unwrap_or_else(|_| "{}".into());
    let new_id = sqlx::query(
        "INSERT INTO collections (workspace_id, parent_id, name, sort_order, variables) VALUES (?,?,?,?,?)",
    )
    .bind(workspace_id)
    .bind(new_parent_id)
    .bind(name)
    .bind(src.sort_order)
    .bind(variables)
    .execute(&mut **tx)
    .await?
    .last_insert_rowid();

    let requests = sqlx::query("SELECT * FROM requests WHERE collection_id = ? AND workspace_id = ?")
        .bind(src.id)
        .bind(workspace_id)
        .fetch_all(&mut **tx)
        .await?;
    for row in requests.iter() {
        let mut r = row_request(row);
        r.collection_id = Some(new_id);
        insert_request_tx(tx, &r).await?;
    }

    let children = sqlx::query("SELECT * FROM collections WHERE parent_id = ? AND workspace_id = ?")
        .bind(src.id)
        .bind(workspace_id)
        .fetch_all(&mut **tx)
        .await?;
    for row in children.iter() {
        let child = row_collection(row);
        Box::pin(duplicate_collection_tree(tx, workspace_id, &child, Some(new_id), false)).await?;
    }

    Ok(new_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_workspace_is_bootstrapped() {
        let store = SqlitePersistence::in_memory().await;
        let ws = store.get_workspace(DEFAULT_WORKSPACE_ID).await.unwrap();
        assert_eq!(ws.name, "Default");
    }

    #[tokio::test]
    async fn activating_an_environment_deactivates_siblings() {
        let store = SqlitePersistence::in_memory().await;
        let a = store
            .create_environment(Environment {
                id: 0,
                workspace_id: 1,
                name: "a".into(),
                variables: HashMap::new(),
                is_active: false,
            })
            .await
            .unwrap();
        let b = store
            .create_environment(Environment {
                id: 0,
                workspace_id: 1,
                name: "b".into(),
                variables: HashMap::new(),
                is_active: false,
            })
            .await
            .unwrap();
        store.activate_environment(1, a.id).await.unwrap();
        store.activate_environment(1, b.id).await.unwrap();
        let active = store.get_active_environment(1).await.unwrap().unwrap();
        assert_eq!(active.id, b.id);
    }

    #[tokio::test]
    async fn cyclic_collection_parent_is_rejected() {
        let store = SqlitePersistence::in_memory().await;
        let a = store
            .create_collection(Collection {
                id: 0,
                workspace_id: 1,
                parent_id: None,
                name: "a".into(),
                sort_order: 0,
                variables: HashMap::new(),
            })
            .await
            .unwrap();
        let mut b = store
            .create_collection(Collection {
                id: 0,
                workspace_id: 1,
                parent_id: Some(a.id),
                name: "b".into(),
                sort_order: 0,
                variables: HashMap::new(),
            })
            .await
            .unwrap();
        let mut a = a;
        a.parent_id = Some(b.id);
        let err = store.update_collection(a).await.unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
        b.name = "b renamed".into();
        store.update_collection(b).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_collection_copies_nested_requests() {
        let store = SqlitePersistence::in_memory().await;
        let root = store
            .create_collection(Collection {
                id: 0,
                workspace_id: 1,
                parent_id: None,
                name: "root".into(),
                sort_order: 0,
                variables: HashMap::new(),
            })
            .await
            .unwrap();
        store
            .create_request(RequestSpec {
                id: 0,
                workspace_id: 1,
                collection_id: Some(root.id),
                name: "ping".into(),
                method: Method::Get,
                url: "https://example.com".into(),
                headers: vec![],
                cookies: HashMap::new(),
                body: String::new(),
                body_type: BodyType::None,
                form_fields: vec![],
                proxy_id: None,
                pre_script: String::new(),
                post_script: String::new(),
                sort_order: 0,
            })
            .await
            .unwrap();

        let copy = store.duplicate_collection(1, root.id).await.unwrap();
        assert_eq!(copy.name, "root (Copy)");
        let copied_requests = store.list_requests(1).await.unwrap();
        assert_eq!(copied_requests.len(), 2);
    }

    fn new_flow_step(flow_id: i64, name: &str) -> FlowStep {
        FlowStep {
            id: 0,
            flow_id,
            request_id: None,
            step_order: 999, // ignored by create_flow_step, which assigns the next dense order
            delay_ms: 0,
            extract_vars: HashMap::new(),
            condition: None,
            loop_count: 1,
            pre_script: String::new(),
            post_script: String::new(),
            continue_on_error: false,
            name: name.into(),
            method: Some(Method::Get),
            url: "https://example.com".into(),
            headers: vec![],
            body: String::new(),
            body_type: Some(BodyType::None),
            form_fields: vec![],
            proxy_id: None,
            cookies: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn create_flow_step_appends_at_the_next_dense_order() {
        let store = SqlitePersistence::in_memory().await;
        let flow = store
            .create_flow(Flow { id: 0, workspace_id: 1, name: "f".into(), description: String::new(), sort_order: 0 })
            .await
            .unwrap();
        let a = store.create_flow_step(new_flow_step(flow.id, "a")).await.unwrap();
        let b = store.create_flow_step(new_flow_step(flow.id, "b")).await.unwrap();
        let c = store.create_flow_step(new_flow_step(flow.id, "c")).await.unwrap();
        assert_eq!((a.step_order, b.step_order, c.step_order), (1, 2, 3));
    }

    #[tokio::test]
    async fn delete_flow_step_closes_the_gap_in_step_order() {
        let store = SqlitePersistence::in_memory().await;
        let flow = store
            .create_flow(Flow { id: 0, workspace_id: 1, name: "f".into(), description: String::new(), sort_order: 0 })
            .await
            .unwrap();
        let a = store.create_flow_step(new_flow_step(flow.id, "a")).await.unwrap();
        let b = store.create_flow_step(new_flow_step(flow.id, "b")).await.unwrap();
        let c = store.create_flow_step(new_flow_step(flow.id, "c")).await.unwrap();

        store.delete_flow_step(flow.id, b.id).await.unwrap();

        let remaining = store.list_flow_steps(flow.id).await.unwrap();
        let orders: Vec<i64> = remaining.iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![1, 2]);
        assert_eq!(remaining[0].id, a.id);
        assert_eq!(remaining[1].id, c.id);
    }

    #[tokio::test]
    async fn update_flow_step_cannot_change_step_order() {
        let store = SqlitePersistence::in_memory().await;
        let flow = store
            .create_flow(Flow { id: 0, workspace_id: 1, name: "f".into(), description: String::new(), sort_order: 0 })
            .await
            .unwrap();
        let a = store.create_flow_step(new_flow_step(flow.id, "a")).await.unwrap();
        store.create_flow_step(new_flow_step(flow.id, "b")).await.unwrap();

        let mut edited = a.clone();
        edited.step_order = 99;
        edited.name = "a renamed".into();
        let updated = store.update_flow_step(edited).await.unwrap();

        assert_eq!(updated.step_order, 1);
        assert_eq!(updated.name, "a renamed");
    }

    #[tokio::test]
    async fn reorder_flow_steps_applies_the_given_patch() {
        let store = SqlitePersistence::in_memory().await;
        let flow = store
            .create_flow(Flow { id: 0, workspace_id: 1, name: "f".into(), description: String::new(), sort_order: 0 })
            .await
            .unwrap();
        let a = store.create_flow_step(new_flow_step(flow.id, "a")).await.unwrap();
        let b = store.create_flow_step(new_flow_step(flow.id, "b")).await.unwrap();

        let reordered = store.reorder_flow_steps(flow.id, vec![(a.id, 2), (b.id, 1)]).await.unwrap();
        assert_eq!(reordered[0].id, b.id);
        assert_eq!(reordered[1].id, a.id);
    }

    #[tokio::test]
    async fn history_eviction_removes_only_old_rows() {
        let store = SqlitePersistence::in_memory().await;
        store
            .record_history(HistoryRecord {
                id: 0,
                workspace_id: 1,
                request_id: None,
                flow_id: None,
                method: "GET".into(),
                url: "https://example.com".into(),
                request_headers: serde_json::json!({}),
                request_body: String::new(),
                status_code: Some(200),
                response_headers: serde_json::json!({}),
                response_body: String::new(),
                duration_ms: 10,
                error: None,
                body_size: 0,
                is_binary: false,
                created_at: Utc::now() - chrono::Duration::days(40),
            })
            .await
            .unwrap();
        store
            .record_history(HistoryRecord {
                id: 0,
                workspace_id: 1,
                request_id: None,
                flow_id: None,
                method: "GET".into(),
                url: "https://example.com".into(),
                request_headers: serde_json::json!({}),
                request_body: String::new(),
                status_code: Some(200),
                response_headers: serde_json::json!({}),
                response_body: String::new(),
                duration_ms: 10,
                error: None,
                body_size: 0,
                is_binary: false,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);
        let evicted = store.evict_history_older_than(cutoff).await.unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(store.list_history(1).await.unwrap().len(), 1);
    }
}
