use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
    lenient_id, lenient_number, lenient_object, lenient_string, lenient_string_list,
    lenient_text, lenient_timestamp, Record, RecordKind,
};

pub const NEVER_RUN: &str = "never_run";
pub const MANUAL: &str = "manual";
pub const PLAN_DRAFT: &str = "draft";
pub const RESULT_PENDING: &str = "pending";

fn metadata_str(metadata: &Map<String, Value>, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub test_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub target_subsystem: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub test_script: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub generation_method: Option<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub metadata: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Projection written by the export action.
#[derive(Clone, Debug, Serialize)]
pub struct ExportedTestCase {
    pub id: String,
    pub name: String,
    pub description: String,
    pub test_type: Option<String>,
    pub target_subsystem: Option<String>,
    pub test_script: String,
    pub metadata: Map<String, Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for TestCase {
    const KIND: RecordKind = RecordKind::TestCase;
    const CATEGORY_KEYS: &'static [&'static str] =
        &["status", "test_type", "target_subsystem", "generation_method"];
    const DERIVED_FLAGS: &'static [&'static str] = &["never_run", "ai_generated"];
    const ALIASES: &'static [(&'static str, &'static str)] = &[
        ("testType", "test_type"),
        ("targetSubsystem", "target_subsystem"),
        ("testScript", "test_script"),
        ("generationMethod", "generation_method"),
        ("createdAt", "created_at"),
        ("updatedAt", "updated_at"),
    ];

    type Export = ExportedTestCase;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut out = vec![self.name.as_str(), self.description.as_str()];
        if let Some(subsystem) = self.target_subsystem.as_deref() {
            out.push(subsystem);
        }
        out
    }

    fn field(&self, key: &str) -> Option<&str> {
        match key {
            "id" => Some(&self.id),
            "name" => Some(&self.name),
            "test_type" => self.test_type.as_deref(),
            "target_subsystem" => self.target_subsystem.as_deref(),
            "status" | "execution_status" => self.status.as_deref(),
            "generation_method" => self.generation_method.as_deref(),
            "tag" | "tags" => self.tags.first().map(|s| s.as_str()),
            _ => None,
        }
    }

    fn matches_field(&self, key: &str, value: &str) -> bool {
        match key {
            "tag" | "tags" => self.tags.iter().any(|t| t == value),
            _ => self.field(key) == Some(value),
        }
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn has_flag(&self, flag: &str) -> bool {
        match flag {
            "never_run" => self.status.as_deref() == Some(NEVER_RUN),
            "ai_generated" => self.generation_method.as_deref().unwrap_or(MANUAL) != MANUAL,
            _ => false,
        }
    }

    fn normalize(&mut self) {
        if self.status.is_none() {
            self.status = Some(
                metadata_str(&self.metadata, "execution_status")
                    .unwrap_or_else(|| NEVER_RUN.to_string()),
            );
        }
        if self.generation_method.is_none() {
            self.generation_method = Some(
                metadata_str(&self.metadata, "generation_method")
                    .unwrap_or_else(|| MANUAL.to_string()),
            );
        }
    }

    fn export(&self) -> ExportedTestCase {
        ExportedTestCase {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            test_type: self.test_type.clone(),
            target_subsystem: self.target_subsystem.clone(),
            test_script: self.test_script.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub test_case_ids: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub schedule: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for TestPlan {
    const KIND: RecordKind = RecordKind::TestPlan;
    const CATEGORY_KEYS: &'static [&'static str] = &["status"];
    const DERIVED_FLAGS: &'static [&'static str] = &["empty", "scheduled"];
    const ALIASES: &'static [(&'static str, &'static str)] = &[
        ("test_cases", "test_case_ids"),
        ("testCaseIds", "test_case_ids"),
        ("createdAt", "created_at"),
        ("updatedAt", "updated_at"),
    ];

    type Export = TestPlan;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.description.as_str()]
    }

    fn field(&self, key: &str) -> Option<&str> {
        match key {
            "id" => Some(&self.id),
            "name" => Some(&self.name),
            "status" => self.status.as_deref(),
            "schedule" => self.schedule.as_deref(),
            _ => None,
        }
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn has_flag(&self, flag: &str) -> bool {
        match flag {
            "empty" => self.test_case_ids.is_empty(),
            "scheduled" => self.schedule.is_some(),
            _ => false,
        }
    }

    fn normalize(&mut self) {
        if self.status.is_none() {
            self.status = Some(PLAN_DRAFT.to_string());
        }
    }

    fn export(&self) -> TestPlan {
        self.clone()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub test_case_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub test_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub duration_seconds: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub environment: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub error_message: Option<String>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub metadata: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Record for TestResult {
    const KIND: RecordKind = RecordKind::TestResult;
    const CATEGORY_KEYS: &'static [&'static str] = &["status", "environment"];
    const DERIVED_FLAGS: &'static [&'static str] = &["has_error"];
    const ALIASES: &'static [(&'static str, &'static str)] = &[
        ("name", "test_name"),
        ("testName", "test_name"),
        ("execution_time", "duration_seconds"),
        ("testCaseId", "test_case_id"),
        ("errorMessage", "error_message"),
        ("createdAt", "created_at"),
    ];

    type Export = TestResult;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.test_name
    }

    fn search_fields(&self) -> Vec<&str> {
        let mut out = vec![self.test_name.as_str()];
        for v in [
            self.test_case_id.as_deref(),
            self.environment.as_deref(),
            self.error_message.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            out.push(v);
        }
        out
    }

    fn field(&self, key: &str) -> Option<&str> {
        match key {
            "id" => Some(&self.id),
            "test_case_id" => self.test_case_id.as_deref(),
            "status" => self.status.as_deref(),
            "environment" => self.environment.as_deref(),
            _ => None,
        }
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn has_flag(&self, flag: &str) -> bool {
        match flag {
            "has_error" => self.error_message.is_some(),
            _ => false,
        }
    }

    fn normalize(&mut self) {
        if self.status.is_none() {
            self.status = Some(RESULT_PENDING.to_string());
        }
    }

    fn export(&self) -> TestResult {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::record::ingest_one;

    #[test]
    fn test_case_defaults_apply_at_ingestion() {
        let tc: TestCase = ingest_one(json!({"id": "t1", "name": "Boot Test"})).unwrap();
        assert_eq!(tc.status.as_deref(), Some(NEVER_RUN));
        assert_eq!(tc.generation_method.as_deref(), Some(MANUAL));
        assert!(tc.has_flag("never_run"));
        assert!(!tc.has_flag("ai_generated"));
    }

    #[test]
    fn test_case_status_falls_back_to_metadata() {
        let tc: TestCase = ingest_one(json!({
            "id": "t1",
            "metadata": {"execution_status": "completed", "generation_method": "ai_diff"}
        }))
        .unwrap();
        assert_eq!(tc.field("status"), Some("completed"));
        assert_eq!(tc.field("execution_status"), Some("completed"));
        assert!(tc.has_flag("ai_generated"));
    }

    #[test]
    fn test_case_tolerates_wrong_field_types() {
        let tc: TestCase = ingest_one(json!({
            "id": "t9",
            "name": null,
            "test_type": 7,
            "target_subsystem": {"nested": true},
            "metadata": "oops",
            "tags": "not-a-list",
            "created_at": "garbage"
        }))
        .unwrap();
        assert_eq!(tc.name, "");
        assert_eq!(tc.field("test_type"), Some("7"));
        assert_eq!(tc.field("target_subsystem"), None);
        assert!(tc.metadata.is_empty());
        assert!(tc.tags.is_empty());
        assert!(tc.timestamp().is_none());
    }

    #[test]
    fn plan_accepts_test_cases_alias_and_defaults_status() {
        let plan: TestPlan = ingest_one(json!({
            "id": "p1",
            "name": "Nightly",
            "test_cases": ["t1", "t2"]
        }))
        .unwrap();
        assert_eq!(plan.test_case_ids, vec!["t1", "t2"]);
        assert_eq!(plan.field("status"), Some(PLAN_DRAFT));
        assert!(!plan.has_flag("empty"));
        assert!(!plan.has_flag("scheduled"));
    }

    #[test]
    fn plan_test_cases_may_be_objects() {
        let plan: TestPlan = ingest_one(json!({
            "id": "p1",
            "test_cases": [{"id": "t1", "name": "Boot Test"}, {"id": 7}, {"name": "no id"}]
        }))
        .unwrap();
        assert_eq!(plan.test_case_ids, vec!["t1", "7"]);
        assert!(!plan.has_flag("empty"));
    }

    #[test]
    fn any_tag_matches_a_tag_filter() {
        let tc: TestCase = ingest_one(json!({"id": "t1", "tags": ["smoke", "nightly"]})).unwrap();
        assert!(tc.matches_field("tag", "nightly"));
        assert!(tc.matches_field("tag", "smoke"));
        assert!(!tc.matches_field("tag", "weekly"));
        assert!(tc.matches_field("status", NEVER_RUN));
    }

    #[test]
    fn result_reads_execution_time_as_duration() {
        let result: TestResult = ingest_one(json!({
            "id": "r1",
            "name": "Boot Test",
            "execution_time": "12.5",
            "error_message": "kernel panic"
        }))
        .unwrap();
        assert_eq!(result.duration_seconds, Some(12.5));
        assert_eq!(result.name(), "Boot Test");
        assert_eq!(result.field("status"), Some(RESULT_PENDING));
        assert!(result.has_flag("has_error"));
    }
}
