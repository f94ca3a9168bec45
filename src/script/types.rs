//! Shared context/result types for both script dialects (spec.md §4.2, §4.3, §9).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowAction {
    Next,
    Stop,
    Repeat,
    Goto,
}

/// A snapshot of the executed response, handed to both dialects.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub response_time_ms: u64,
}

impl ResponseSnapshot {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// A snapshot of the resolved outgoing request, handed to `pm.request`.
#[derive(Debug, Clone, Default)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptContext {
    pub runtime_vars: HashMap<String, String>,
    pub environment_vars: HashMap<String, String>,
    pub collection_vars: HashMap<String, String>,
    pub workspace_vars: HashMap<String, String>,
    pub response: Option<ResponseSnapshot>,
    pub request: RequestSnapshot,
    pub iteration: u32,
    pub loop_count: u32,
    pub request_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptResult {
    pub success: bool,
    pub assertions_passed: u32,
    pub assertions_failed: u32,
    pub errors: Vec<String>,
    pub error_details: Vec<ErrorDetail>,
    pub updated_vars: HashMap<String, String>,
    pub updated_env_vars: HashMap<String, String>,
    pub flow_action: FlowAction,
    pub goto_step_name: Option<String>,
    pub goto_step_order: Option<i64>,
}

impl Default for ScriptResult {
    fn default() -> Self {
        Self {
            success: true,
            assertions_passed: 0,
            assertions_failed: 0,
            errors: Vec::new(),
            error_details: Vec::new(),
            updated_vars: HashMap::new(),
            updated_env_vars: HashMap::new(),
            flow_action: FlowAction::Next,
            goto_step_name: None,
            goto_step_order: None,
        }
    }
}

impl ScriptResult {
    pub fn record_assertion(&mut self, passed: bool, message: impl Into<String>) {
        if passed {
            self.assertions_passed += 1;
        } else {
            self.assertions_failed += 1;
            self.success = false;
            self.errors.push(message.into());
        }
    }

    pub fn limit_exceeded(mut self, what: &str) -> Self {
        self.success = false;
        self.errors.push(format!("limit exceeded: {what}"));
        self.flow_action = FlowAction::Stop;
        self
    }
}

/// Detects which dialect a script is written in: leading `{`/`[` is DSL,
/// anything else is JavaScript (spec.md §4.4, §9).
pub fn detect_dialect(script: &str) -> Dialect {
    match script.trim_start().chars().next() {
        Some('{') | Some('[') => Dialect::Dsl,
        _ => Dialect::JavaScript,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Dsl,
    JavaScript,
}
