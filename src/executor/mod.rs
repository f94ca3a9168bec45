//! Request Executor (spec.md §4.4).
//!
//! Implements spec.md §9's "polymorphism over execution specs": `Request`,
//! `FlowStep`, and ad-hoc execute payloads all convert into one
//! `ExecutionInput` before reaching `RequestExecutor::execute`, so there is
//! exactly one execute path regardless of caller. Follows an
//! assemble-then-send shape, generalized to honor `bodyType`, headers, proxy
//! precedence, and binary-response classification.

pub mod multipart;
pub mod transport;

use crate::domain::model::{BodyType, FormField, Header, Method};
use crate::domain::PersistencePort;
use crate::script::{self, RequestSnapshot, ResponseSnapshot, ScriptContext, ScriptResult};
use crate::storage::FileStoragePort;
use crate::variables::{resolve, ScopeChain};
use base64::Engine;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct ExecutionInput {
    pub name: String,
    pub method: Method,
    pub url: String,
    pub headers: Vec<Header>,
    pub cookies: HashMap<String, String>,
    pub body: String,
    pub body_type: BodyType,
    pub form_fields: Vec<FormField>,
    pub proxy_id: Option<i64>,
    pub pre_script: String,
    pub post_script: String,
}

impl From<&crate::domain::model::RequestSpec> for ExecutionInput {
    fn from(r: &crate::domain::model::RequestSpec) -> Self {
        Self {
            name: r.name.clone(),
            method: r.method,
            url: r.url.clone(),
            headers: r.headers.clone(),
            cookies: r.cookies.clone(),
            body: r.body.clone(),
            body_type: r.body_type,
            form_fields: r.form_fields.clone(),
            proxy_id: r.proxy_id,
            pre_script: r.pre_script.clone(),
            post_script: r.post_script.clone(),
        }
    }
}

impl From<&crate::domain::model::FlowStep> for ExecutionInput {
    fn from(s: &crate::domain::model::FlowStep) -> Self {
        Self {
            name: s.name.clone(),
            method: s.method.unwrap_or(Method::Get),
            url: s.url.clone(),
            headers: s.headers.clone(),
            cookies: s.cookies.clone(),
            body: s.body.clone(),
            body_type: s.body_type.unwrap_or(BodyType::None),
            form_fields: s.form_fields.clone(),
            proxy_id: s.proxy_id,
            pre_script: s.pre_script.clone(),
            post_script: s.post_script.clone(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecuteResult {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub resolved_url: String,
    pub resolved_headers: Vec<(String, String)>,
    pub is_binary: bool,
    pub body_size: u64,
    pub pre_script_result: Option<ScriptResult>,
    pub post_script_result: Option<ScriptResult>,
    pub unresolved_variables: Vec<String>,
}

pub struct RequestExecutor {
    clients: transport::ClientCache,
}

impl RequestExecutor {
    pub fn new() -> Self {
        Self { clients: transport::ClientCache::new() }
    }

    /// `scope` is mutated in place with any variable updates the pre/post
    /// scripts produce, so callers (the flow runner, the ad-hoc execute
    /// handler) can persist the delta into the right scope afterward.
    pub async fn execute(
        &self,
        input: &ExecutionInput,
        scope: &mut ScopeChain,
        proxy_url: Option<&str>,
        persistence: &dyn PersistencePort,
        storage: &dyn FileStoragePort,
        workspace_id: i64,
    ) -> ExecuteResult {
        let mut unresolved = Vec::new();

        let mut script_ctx = ScriptContext {
            runtime_vars: scope.runtime.clone(),
            environment_vars: scope.environment.clone(),
            collection_vars: scope.collections.first().cloned().unwrap_or_default(),
            workspace_vars: scope.workspace.clone(),
            request: RequestSnapshot {
                method: input.method.as_str().to_string(),
                url: input.url.clone(),
                headers: Vec::new(),
                body: input.body.clone(),
            },
            ..Default::default()
        };

        let pre_script_result = if input.pre_script.trim().is_empty() {
            None
        } else {
            let result = script::run(&input.pre_script, &mut script_ctx);
            apply_script_updates(scope, &result);
            Some(result)
        };

        let url_resolved = resolve(&input.url, scope);
        unresolved.extend(url_resolved.unresolved);
        let resolved_url = url_resolved.text;

        let mut resolved_headers = Vec::new();
        for h in input.headers.iter().filter(|h| h.enabled) {
            let r = resolve(&h.value, scope);
            unresolved.extend(r.unresolved);
            resolved_headers.push((h.name.clone(), r.text));
        }
        if !resolved_headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
            if let Some(ct) = input.body_type.default_content_type() {
                resolved_headers.push(("Content-Type".to_string(), ct.to_string()));
            }
        }

        // A pre-script that calls pm.execution.setNextRequest(null) stops the
        // flow before the request ever goes out (spec.md §4.6 step 3b).
        if matches!(
            pre_script_result.as_ref().map(|r| r.flow_action),
            Some(crate::script::types::FlowAction::Stop)
        ) {
            return ExecuteResult {
                status_code: 0,
                headers: Vec::new(),
                body: String::new(),
                duration_ms: 0,
                error: None,
                resolved_url,
                resolved_headers,
                is_binary: false,
                body_size: 0,
                pre_script_result,
                post_script_result: None,
                unresolved_variables: unresolved,
            };
        }

        let client = match self.clients.client_for(proxy_url) {
            Ok(c) => c,
            Err(e) => {
                let mut failure = transport_failure(resolved_url, resolved_headers, unresolved, e.to_string());
                failure.pre_script_result = pre_script_result.clone();
                return failure;
            }
        };

        let method = to_reqwest_method(input.method);
        let mut builder = client.request(method, &resolved_url);
        for (k, v) in &resolved_headers {
            builder = builder.header(k, v);
        }

        builder = match input.body_type {
            BodyType::None => builder,
            BodyType::Json | BodyType::Text | BodyType::Xml => {
                builder.body(resolve(&input.body, scope).text)
            }
            BodyType::Graphql => {
                let body_resolved = resolve(&input.body, scope).text;
                let wrapped = serde_json::json!({ "query": body_resolved, "variables": {} });
                builder.body(wrapped.to_string())
            }
            BodyType::FormUrlencoded => {
                let pairs = parse_form_pairs(&resolve(&input.body, scope).text);
                builder.form(&pairs)
            }
            BodyType::Formdata => {
                match multipart::build_form(&input.form_fields, persistence, storage, workspace_id).await {
                    Ok(form) => builder.multipart(form),
                    Err(e) => {
                        let mut failure =
                            transport_failure(resolved_url, resolved_headers, unresolved, e.to_string());
                        failure.pre_script_result = pre_script_result.clone();
                        return failure;
                    }
                }
            }
        };

        let start = Instant::now();
        let response = builder.send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let mut result = match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let response_headers: Vec<(String, String)> = resp
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                    .collect();
                let content_type = response_headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                let bytes = resp.bytes().await.unwrap_or_default();
                let (body, is_binary) = classify_body(&content_type, &bytes);
                ExecuteResult {
                    status_code: status,
                    headers: response_headers,
                    body_size: bytes.len() as u64,
                    body,
                    duration_ms,
                    error: None,
                    resolved_url: resolved_url.clone(),
                    resolved_headers: resolved_headers.clone(),
                    is_binary,
                    pre_script_result: pre_script_result.clone(),
                    post_script_result: None,
                    unresolved_variables: unresolved.clone(),
                }
            }
            Err(e) => {
                let mut failure = transport_failure(
                    resolved_url.clone(),
                    resolved_headers.clone(),
                    unresolved.clone(),
                    describe_transport_error(&e),
                );
                failure.pre_script_result = pre_script_result.clone();
                failure
            }
        };

        if !input.post_script.trim().is_empty() && result.error.is_none() {
            script_ctx.response = Some(ResponseSnapshot {
                status: result.status_code,
                headers: result.headers.clone(),
                body: result.body.clone(),
                response_time_ms: result.duration_ms,
            });
            script_ctx.runtime_vars = scope.runtime.clone();
            let post_result = script::run(&input.post_script, &mut script_ctx);
            apply_script_updates(scope, &post_result);
            result.post_script_result = Some(post_result);
        }

        result
    }
}

impl Default for RequestExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_script_updates(scope: &mut ScopeChain, result: &ScriptResult) {
    scope.runtime.extend(result.updated_vars.clone());
    scope.environment.extend(result.updated_env_vars.clone());
}

fn to_reqwest_method(m: Method) -> reqwest::Method {
    match m {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Patch => reqwest::Method::PATCH,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
        Method::Ws => reqwest::Method::GET,
    }
}

fn parse_form_pairs(body: &str) -> Vec<(String, String)> {
    serde_json::from_str::<Vec<(String, String)>>(body).unwrap_or_else(|_| {
        body.split('&')
            .filter(|s| !s.is_empty())
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    })
}

/// spec.md §3(e): non-text content-type or UTF-8 failure ⇒ binary, stored base64.
fn classify_body(content_type: &str, bytes: &[u8]) -> (String, bool) {
    let looks_textual = content_type.is_empty()
        || content_type.starts_with("text/")
        || content_type.contains("json")
        || content_type.contains("xml")
        || content_type.contains("javascript")
        || content_type.contains("urlencoded");

    if looks_textual {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return (text.to_string(), false);
        }
    }
    (base64::engine::general_purpose::STANDARD.encode(bytes), true)
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else if e.is_builder() {
        format!("invalid request: {e}")
    } else {
        e.to_string()
    }
}

fn transport_failure(
    resolved_url: String,
    resolved_headers: Vec<(String, String)>,
    unresolved: Vec<String>,
    error: String,
) -> ExecuteResult {
    ExecuteResult {
        status_code: 0,
        headers: Vec::new(),
        body: String::new(),
        duration_ms: 0,
        error: Some(error),
        resolved_url,
        resolved_headers,
        is_binary: false,
        body_size: 0,
        pre_script_result: None,
        post_script_result: None,
        unresolved_variables: unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_body_detects_utf8_failure_as_binary() {
        let invalid = vec![0xff, 0xfe, 0xfd];
        let (body, is_binary) = classify_body("application/octet-stream", &invalid);
        assert!(is_binary);
        let decoded = base64::engine::general_purpose::STANDARD.decode(body).unwrap();
        assert_eq!(decoded, invalid);
    }

    #[test]
    fn classify_body_keeps_json_as_text() {
        let (body, is_binary) = classify_body("application/json", b"{\"a\":1}");
        assert!(!is_binary);
        assert_eq!(body, "{\"a\":1}");
    }

    #[test]
    fn execution_input_from_flow_step_defaults_missing_method_to_get() {
        let step = crate::domain::model::FlowStep {
            id: 1,
            flow_id: 1,
            request_id: None,
            step_order: 1,
            delay_ms: 0,
            extract_vars: HashMap::new(),
            condition: None,
            loop_count: 1,
            pre_script: String::new(),
            post_script: String::new(),
            continue_on_error: false,
            name: "inline".into(),
            method: None,
            url: "https://example.com".into(),
            headers: vec![],
            body: String::new(),
            body_type: None,
            form_fields: vec![],
            proxy_id: None,
            cookies: HashMap::new(),
        };
        let input: ExecutionInput = (&step).into();
        assert_eq!(input.method, Method::Get);
    }
}
