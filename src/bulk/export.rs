use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::{Record, RecordKind};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize export: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write export {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// `test-cases-export-2024-03-01.json`
pub fn export_filename(kind: RecordKind, date: NaiveDate) -> String {
    format!("{}-export-{}.json", kind.path(), date.format("%Y-%m-%d"))
}

pub fn export_entry<R: Record>(record: &R) -> Result<Value, ExportError> {
    serde_json::to_value(record.export()).map_err(|e| ExportError::Serialize { source: e })
}

/// `{ "exported_at": ..., "<kind key>": [entries] }`
pub fn export_document(kind: RecordKind, entries: Vec<Value>, now: DateTime<Utc>) -> Value {
    let mut doc = Map::new();
    doc.insert(
        "exported_at".to_string(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    doc.insert(kind.export_key().to_string(), Value::Array(entries));
    Value::Object(doc)
}

pub async fn write_export(
    dir: &Path,
    kind: RecordKind,
    doc: &Value,
    now: DateTime<Utc>,
) -> Result<PathBuf, ExportError> {
    let path = dir.join(export_filename(kind, now.date_naive()));
    let body = serde_json::to_vec_pretty(doc).map_err(|e| ExportError::Serialize { source: e })?;
    let write = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, body).await
    };
    write.await.map_err(|e| ExportError::Write {
        path: path.display().to_string(),
        source: e,
    })?;
    tracing::info!(path = %path.display(), "export written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::record::{ingest_one, TestCase};

    #[test]
    fn filename_follows_kind_and_day() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            export_filename(RecordKind::TestCase, day),
            "test-cases-export-2024-03-01.json"
        );
        assert_eq!(
            export_filename(RecordKind::TestResult, day),
            "test-results-export-2024-03-01.json"
        );
    }

    #[test]
    fn test_case_entries_carry_exactly_the_exported_fields() {
        let case: TestCase = ingest_one(json!({
            "id": "t1", "name": "Boot Test", "test_type": "unit", "tags": ["smoke"],
            "status": "completed", "metadata": {"owner": "mm"}
        }))
        .unwrap();
        let entry = export_entry(&case).unwrap();
        let mut keys: Vec<&str> = entry.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "created_at",
                "description",
                "id",
                "metadata",
                "name",
                "target_subsystem",
                "test_script",
                "test_type"
            ]
        );
    }

    #[tokio::test]
    async fn unwritable_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        tokio::fs::write(&blocker, b"x").await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let doc = export_document(RecordKind::TestCase, vec![], now);
        let err = write_export(&blocker, RecordKind::TestCase, &doc, now)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Write { .. }));
    }
}
