use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;

use super::{ApiError, Collaborator, ItemOperation};
use crate::filter::FilterState;
use crate::plan::PlanDraft;
use crate::record::RecordKind;

const ALL_KINDS: [RecordKind; 3] = [
    RecordKind::TestCase,
    RecordKind::TestPlan,
    RecordKind::TestResult,
];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse dataset {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemCall {
    pub kind: RecordKind,
    pub op: ItemOperation,
    pub id: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<RecordKind, Vec<Value>>,
    failing: HashMap<String, u16>,
    list_failure: Option<String>,
    calls: Vec<ItemCall>,
    next_plan: usize,
}

/// In-process collaborator backed by a JSON dataset.
///
/// Serves offline mode (`--offline FILE`, same shape as an export document)
/// and lets tests inject per-id failures and observe every item call.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

fn value_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(self, kind: RecordKind, records: Vec<Value>) -> Self {
        self.lock().records.insert(kind, records);
        self
    }

    /// Loads `{ "test_cases": [...], "test_plans": [...], "test_results": [...] }`.
    pub fn from_dataset(dataset: &Value) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.lock();
            for kind in ALL_KINDS {
                if let Some(Value::Array(items)) = dataset.get(kind.export_key()) {
                    state.records.insert(kind, items.clone());
                }
            }
        }
        backend
    }

    pub async fn from_file(path: &Path) -> Result<Self, DatasetError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DatasetError::Read {
                path: path.display().to_string(),
                source: e,
            })?;
        let dataset: Value = serde_json::from_str(&raw).map_err(|e| DatasetError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self::from_dataset(&dataset))
    }

    /// Every item operation on `id` fails with the given HTTP status.
    pub fn fail_on(&self, id: &str, status: u16) {
        self.lock().failing.insert(id.to_string(), status);
    }

    pub fn fail_listing(&self, message: Option<&str>) {
        self.lock().list_failure = message.map(|m| m.to_string());
    }

    pub fn calls(&self) -> Vec<ItemCall> {
        self.lock().calls.clone()
    }

    pub fn records(&self, kind: RecordKind) -> Vec<Value> {
        self.lock().records.get(&kind).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn position(items: &[Value], id: &str) -> Option<usize> {
    items
        .iter()
        .position(|v| value_id(v).as_deref() == Some(id))
}

fn merge_tags(record: &mut Value, params: Option<&Value>) {
    let incoming: Vec<Value> = params
        .and_then(|p| p.get("tags"))
        .and_then(|t| t.as_array())
        .cloned()
        .unwrap_or_default();
    if let Value::Object(map) = record {
        let tags = map
            .entry("tags".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !tags.is_array() {
            *tags = Value::Array(Vec::new());
        }
        if let Value::Array(existing) = tags {
            for tag in incoming {
                if !existing.contains(&tag) {
                    existing.push(tag);
                }
            }
        }
    }
}

fn plan_value(id: &str, draft: &PlanDraft) -> Value {
    let mut value = serde_json::to_value(draft).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut value {
        map.insert("id".to_string(), Value::String(id.to_string()));
    }
    value
}

#[async_trait]
impl Collaborator for MemoryBackend {
    async fn list_records(
        &self,
        kind: RecordKind,
        _filters: &FilterState,
    ) -> Result<Vec<Value>, ApiError> {
        let state = self.lock();
        if let Some(message) = state.list_failure.as_ref() {
            return Err(ApiError::Unavailable {
                message: message.clone(),
            });
        }
        Ok(state.records.get(&kind).cloned().unwrap_or_default())
    }

    async fn get_record(&self, kind: RecordKind, id: &str) -> Result<Value, ApiError> {
        let state = self.lock();
        let items = state.records.get(&kind).map(|v| v.as_slice()).unwrap_or(&[]);
        position(items, id)
            .map(|idx| items[idx].clone())
            .ok_or_else(|| ApiError::NotFound {
                resource: format!("{} {id}", kind.singular()),
            })
    }

    async fn perform_item_operation(
        &self,
        kind: RecordKind,
        op: ItemOperation,
        id: &str,
        params: Option<&Value>,
    ) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.calls.push(ItemCall {
            kind,
            op,
            id: id.to_string(),
        });
        let resource = format!("{} {id}", kind.singular());
        if let Some(status) = state.failing.get(id).copied() {
            return Err(ApiError::from_status(
                status,
                &resource,
                format!("injected failure for {id}"),
            ));
        }
        let items = state.records.entry(kind).or_default();
        let idx = position(items, id).ok_or(ApiError::NotFound { resource })?;
        match op {
            ItemOperation::Execute => {
                if let Value::Object(map) = &mut items[idx] {
                    map.insert("status".to_string(), Value::String("running".to_string()));
                }
            }
            ItemOperation::Delete => {
                items.remove(idx);
            }
            ItemOperation::Tag => merge_tags(&mut items[idx], params),
        }
        Ok(())
    }

    async fn create_plan(&self, draft: &PlanDraft) -> Result<Value, ApiError> {
        let mut state = self.lock();
        state.next_plan += 1;
        let id = format!("plan-{}", state.next_plan);
        let mut value = plan_value(&id, draft);
        if let Value::Object(map) = &mut value {
            map.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));
        }
        state
            .records
            .entry(RecordKind::TestPlan)
            .or_default()
            .push(value.clone());
        Ok(value)
    }

    async fn update_plan(&self, id: &str, draft: &PlanDraft) -> Result<Value, ApiError> {
        let mut state = self.lock();
        let items = state.records.entry(RecordKind::TestPlan).or_default();
        let idx = position(items, id).ok_or_else(|| ApiError::NotFound {
            resource: format!("test plan {id}"),
        })?;
        let updated = plan_value(id, draft);
        if let (Value::Object(existing), Value::Object(fields)) = (&mut items[idx], updated) {
            for (k, v) in fields {
                existing.insert(k, v);
            }
            existing.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
        }
        Ok(items[idx].clone())
    }

    async fn delete_plan(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.lock();
        let items = state.records.entry(RecordKind::TestPlan).or_default();
        let idx = position(items, id).ok_or_else(|| ApiError::NotFound {
            resource: format!("test plan {id}"),
        })?;
        items.remove(idx);
        Ok(())
    }
}
