//! Core data model (spec.md §3)
//!
//! Entities are plain serde structs shared between the sqlite persistence
//! layer and the JSON HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const DEFAULT_WORKSPACE_ID: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    pub workspace_id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub sort_order: i64,
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Ws,
}

impl Default for Method {
    fn default() -> Self {
        Method::Get
    }
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Ws => "WS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "PATCH" => Method::Patch,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "WS" => Method::Ws,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BodyType {
    None,
    Json,
    Text,
    Xml,
    FormUrlencoded,
    Formdata,
    Graphql,
}

impl Default for BodyType {
    fn default() -> Self {
        BodyType::None
    }
}

impl BodyType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "none" => BodyType::None,
            "json" => BodyType::Json,
            "text" => BodyType::Text,
            "xml" => BodyType::Xml,
            "form-urlencoded" => BodyType::FormUrlencoded,
            "formdata" => BodyType::Formdata,
            "graphql" => BodyType::Graphql,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BodyType::None => "none",
            BodyType::Json => "json",
            BodyType::Text => "text",
            BodyType::Xml => "xml",
            BodyType::FormUrlencoded => "form-urlencoded",
            BodyType::Formdata => "formdata",
            BodyType::Graphql => "graphql",
        }
    }

    pub fn default_content_type(&self) -> Option<&'static str> {
        match self {
            BodyType::None => None,
            BodyType::Json | BodyType::Graphql => Some("application/json"),
            BodyType::Text => Some("text/plain"),
            BodyType::Xml => Some("application/xml"),
            BodyType::FormUrlencoded => Some("application/x-www-form-urlencoded"),
            BodyType::Formdata => None, // multipart boundary is chosen by the transport
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormField {
    pub key: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub field_type: FormFieldType,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormFieldType {
    #[default]
    Text,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    pub id: i64,
    pub workspace_id: i64,
    pub collection_id: Option<i64>,
    pub name: String,
    pub method: Method,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    pub body_type: BodyType,
    #[serde(default)]
    pub form_fields: Vec<FormField>,
    pub proxy_id: Option<i64>,
    #[serde(default)]
    pub pre_script: String,
    #[serde(default)]
    pub post_script: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub variables: HashMap<String, String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub url: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStep {
    pub id: i64,
    pub flow_id: i64,
    pub request_id: Option<i64>,
    pub step_order: i64,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub extract_vars: HashMap<String, String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,
    #[serde(default)]
    pub pre_script: String,
    #[serde(default)]
    pub post_script: String,
    #[serde(default)]
    pub continue_on_error: bool,

    // Inline request fields, used when `request_id` is None.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub method: Option<Method>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub body_type: Option<BodyType>,
    #[serde(default)]
    pub form_fields: Vec<FormField>,
    #[serde(default)]
    pub proxy_id: Option<i64>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
}

fn default_loop_count() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub workspace_id: i64,
    pub request_id: Option<i64>,
    pub flow_id: Option<i64>,
    pub method: String,
    pub url: String,
    pub request_headers: Value,
    pub request_body: String,
    pub status_code: Option<i64>,
    pub response_headers: Value,
    pub response_body: String,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub body_size: i64,
    pub is_binary: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: i64,
    pub workspace_id: i64,
    pub original_name: String,
    pub stored_name: String,
    pub content_type: String,
    pub size: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
