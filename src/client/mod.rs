pub mod memory;
pub mod rest;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::filter::FilterState;
use crate::plan::PlanDraft;
use crate::record::RecordKind;

pub use memory::MemoryBackend;
pub use rest::{RestClient, RestOptions, RetryPolicy};

/// Per-item remote operation driven by the bulk coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemOperation {
    Execute,
    Delete,
    Tag,
}

impl ItemOperation {
    pub fn verb(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Delete => "delete",
            Self::Tag => "tag",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("permission denied for {resource}")]
    PermissionDenied { resource: String },

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {source}")]
    Network {
        #[source]
        source: reqwest::Error,
    },

    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("unexpected response: {message}")]
    Decode { message: String },

    #[error("invalid endpoint: {message}")]
    Endpoint { message: String },

    #[error("failed to build HTTP client: {message}")]
    Setup { message: String },
}

impl ApiError {
    pub fn from_status(status: u16, resource: &str, body: String) -> Self {
        match status {
            404 => Self::NotFound {
                resource: resource.to_string(),
            },
            401 | 403 => Self::PermissionDenied {
                resource: resource.to_string(),
            },
            _ => Self::Status {
                status,
                body: truncate_body(body),
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::PermissionDenied { .. } => Some(403),
            Self::Status { status, .. } => Some(*status),
            Self::Network { source } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether an idempotent read may be attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Unavailable { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Message shown to the user for a failed operation on one record.
    pub fn user_message(&self, verb: &str, kind: RecordKind, id: &str) -> String {
        match self {
            Self::NotFound { .. } => format!("{} {id} not found", kind.singular()),
            Self::PermissionDenied { .. } => {
                format!("permission denied: cannot {verb} {} {id}", kind.singular())
            }
            other => format!("failed to {verb} {} {id}: {other}", kind.singular()),
        }
    }
}

fn truncate_body(body: String) -> String {
    const MAX: usize = 512;
    let body = body.trim().to_string();
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// The REST backend that owns persistence and business logic.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn list_records(
        &self,
        kind: RecordKind,
        filters: &FilterState,
    ) -> Result<Vec<Value>, ApiError>;

    async fn get_record(&self, kind: RecordKind, id: &str) -> Result<Value, ApiError>;

    async fn perform_item_operation(
        &self,
        kind: RecordKind,
        op: ItemOperation,
        id: &str,
        params: Option<&Value>,
    ) -> Result<(), ApiError>;

    async fn create_plan(&self, draft: &PlanDraft) -> Result<Value, ApiError>;

    async fn update_plan(&self, id: &str, draft: &PlanDraft) -> Result<Value, ApiError>;

    async fn delete_plan(&self, id: &str) -> Result<(), ApiError>;
}

/// Pulls the record array out of a list response.
pub fn extract_items(value: Value, kind: RecordKind) -> Result<Vec<Value>, ApiError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in ["items", "data", "results", kind.export_key()] {
                match map.remove(key) {
                    Some(Value::Array(items)) => return Ok(items),
                    Some(Value::Object(inner)) => {
                        return extract_items(Value::Object(inner), kind);
                    }
                    _ => {}
                }
            }
            Err(ApiError::Decode {
                message: format!("no {} array in response object", kind.plural()),
            })
        }
        other => Err(ApiError::Decode {
            message: format!("expected array or object, got {}", json_type(&other)),
        }),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
