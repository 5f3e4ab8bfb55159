pub mod models;

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use models::{TestCase, TestPlan, TestResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    TestCase,
    TestPlan,
    TestResult,
}

impl RecordKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "case" | "cases" | "test-case" | "test-cases" => Some(Self::TestCase),
            "plan" | "plans" | "test-plan" | "test-plans" => Some(Self::TestPlan),
            "result" | "results" | "test-result" | "test-results" => Some(Self::TestResult),
            _ => None,
        }
    }

    /// Collection segment used by the REST backend and the export filename.
    pub fn path(self) -> &'static str {
        match self {
            Self::TestCase => "test-cases",
            Self::TestPlan => "test-plans",
            Self::TestResult => "test-results",
        }
    }

    /// Top-level key of an export document.
    pub fn export_key(self) -> &'static str {
        match self {
            Self::TestCase => "test_cases",
            Self::TestPlan => "test_plans",
            Self::TestResult => "test_results",
        }
    }

    pub fn singular(self) -> &'static str {
        match self {
            Self::TestCase => "test case",
            Self::TestPlan => "test plan",
            Self::TestResult => "test result",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            Self::TestCase => "test cases",
            Self::TestPlan => "test plans",
            Self::TestResult => "test results",
        }
    }

    pub fn label(self, count: usize) -> &'static str {
        if count == 1 {
            self.singular()
        } else {
            self.plural()
        }
    }
}

impl Serialize for RecordKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.path())
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// A backend-owned entity shown in a list view.
///
/// Implementors are decoded from loosely-typed JSON; `normalize` runs once at
/// ingestion and is the only place where documented defaults are applied.
/// Everything else reads the normalized fields as they are.
pub trait Record:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: RecordKind;
    /// Categorical fields counted by the stat cards.
    const CATEGORY_KEYS: &'static [&'static str];
    /// Derived predicates counted by the stat cards.
    const DERIVED_FLAGS: &'static [&'static str] = &[];
    /// Alternate spellings accepted on input, as `(alias, canonical)`. The
    /// canonical key wins when both are present.
    const ALIASES: &'static [(&'static str, &'static str)] = &[];

    type Export: Serialize;

    fn id(&self) -> &str;
    fn name(&self) -> &str;

    /// Free-text fields matched by the search box.
    fn search_fields(&self) -> Vec<&str>;

    /// Categorical lookup by canonical snake_case key.
    fn field(&self, key: &str) -> Option<&str>;

    fn timestamp(&self) -> Option<DateTime<Utc>>;

    /// Categorical match used by filters. List-valued fields match when any
    /// element equals `value`.
    fn matches_field(&self, key: &str, value: &str) -> bool {
        self.field(key) == Some(value)
    }

    fn has_flag(&self, _flag: &str) -> bool {
        false
    }

    fn normalize(&mut self) {}

    fn export(&self) -> Self::Export;
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed {kind} record: {source}")]
    Malformed {
        kind: RecordKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} record has an empty id")]
    MissingId { kind: RecordKind },
}

fn resolve_aliases(value: &mut Value, aliases: &[(&str, &str)]) {
    let Value::Object(map) = value else {
        return;
    };
    for (alias, canonical) in aliases {
        let Some(v) = map.remove(*alias) else {
            continue;
        };
        if map.get(*canonical).map_or(true, Value::is_null) {
            map.insert(canonical.to_string(), v);
        }
    }
}

pub fn ingest_one<R: Record>(mut value: Value) -> Result<R, RecordError> {
    resolve_aliases(&mut value, R::ALIASES);
    let mut record: R = serde_json::from_value(value).map_err(|e| RecordError::Malformed {
        kind: R::KIND,
        source: e,
    })?;
    if record.id().trim().is_empty() {
        return Err(RecordError::MissingId { kind: R::KIND });
    }
    record.normalize();
    Ok(record)
}

/// Decodes every element independently; undecodable elements are skipped.
pub fn ingest<R: Record>(values: Vec<Value>) -> Vec<R> {
    let mut out = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        match ingest_one::<R>(value) {
            Ok(record) => out.push(record),
            Err(e) => {
                tracing::warn!(kind = %R::KIND, index, error = %e, "skipping record");
            }
        }
    }
    out
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn lenient_id<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(d)?;
    Ok(scalar_to_string(&raw).unwrap_or_default())
}

pub(crate) fn lenient_text<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(d)?;
    Ok(raw.as_ref().and_then(scalar_to_string).unwrap_or_default())
}

pub(crate) fn lenient_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(d)?;
    Ok(raw
        .as_ref()
        .and_then(scalar_to_string)
        .filter(|s| !s.trim().is_empty()))
}

pub(crate) fn lenient_string_list<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(d)?;
    Ok(match raw {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(obj) => obj.get("id").and_then(scalar_to_string),
                other => scalar_to_string(other),
            })
            .collect(),
        _ => Vec::new(),
    })
}

pub(crate) fn lenient_object<'de, D>(d: D) -> Result<serde_json::Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(d)?;
    Ok(match raw {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    })
}

pub(crate) fn lenient_timestamp<'de, D>(d: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(d)?;
    Ok(raw.as_ref().and_then(|v| v.as_str()).and_then(parse_timestamp))
}

pub(crate) fn lenient_number<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(d)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
