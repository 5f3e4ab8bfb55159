use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::bulk::{BulkAction, BulkOptions, BulkOutcome, Phase, Progress, Trigger};
use crate::client::MemoryBackend;
use crate::dashboard::{Dashboard, LoadState};
use crate::filter::{derive, filter_records, DateRange, FilterState, Query};
use crate::record::{ingest, Record, RecordKind, TestCase};
use crate::selection::SelectionSet;

fn scenario_cases() -> Vec<Value> {
    vec![
        json!({"id": "t1", "name": "Boot Test", "description": "boots the kernel",
               "testType": "unit", "status": "completed",
               "created_at": "2024-03-01T08:00:00Z"}),
        json!({"id": "t2", "name": "Memory Stress", "description": "allocator pressure",
               "test_type": "integration", "created_at": "2024-03-02T09:30:00Z"}),
    ]
}

fn corpus() -> Vec<TestCase> {
    let types = ["unit", "integration", "performance"];
    let subsystems = ["mm", "fs", "net", "sched"];
    let statuses = ["completed", "failed", "never_run"];
    let mut values = Vec::new();
    for i in 0..36 {
        values.push(json!({
            "id": format!("c{i}"),
            "name": format!("case {i} {}", subsystems[i % 4]),
            "description": if i % 5 == 0 { "Memory heavy" } else { "plain" },
            "test_type": types[i % 3],
            "target_subsystem": subsystems[i % 4],
            "status": statuses[i % 3],
            "generation_method": if i % 2 == 0 { "ai_generated" } else { "manual" },
            "created_at": format!("2024-03-{:02}T12:00:00Z", 1 + i % 20),
        }));
    }
    ingest(values)
}

fn ids<R: Record>(records: &[R]) -> Vec<&str> {
    records.iter().map(|r| r.id()).collect()
}

fn dashboard(backend: Arc<MemoryBackend>) -> Dashboard<TestCase, MemoryBackend> {
    Dashboard::new(backend, BulkOptions::default())
}

#[test]
fn filter_conjunction_over_disjoint_keys() {
    let records = corpus();
    let pairs = [
        ("test_type", "unit", "target_subsystem", "mm"),
        ("status", "failed", "test_type", "integration"),
        ("target_subsystem", "net", "status", "never_run"),
    ];
    for (k1, v1, k2, v2) in pairs {
        let both = filter_records(
            &records,
            &Query {
                filters: FilterState::new().with(k1, v1).with(k2, v2),
                ..Query::default()
            },
        );
        let first = filter_records(
            &records,
            &Query {
                filters: FilterState::new().with(k1, v1),
                ..Query::default()
            },
        );
        let second: HashSet<&str> = records
            .iter()
            .filter(|r| r.field(k2) == Some(v2))
            .map(|r| r.id())
            .collect();
        let expected: Vec<&str> = ids(&first)
            .into_iter()
            .filter(|id| second.contains(id))
            .collect();
        assert_eq!(ids(&both), expected, "{k1}={v1} and {k2}={v2}");
    }
}

#[test]
fn derivation_is_idempotent_and_a_subset() {
    let records = corpus();
    let queries = [
        Query::default(),
        Query {
            search: "memory".to_string(),
            ..Query::default()
        },
        Query {
            search: "  ".to_string(),
            filters: FilterState::new().with("status", "completed"),
            date_range: DateRange::parse("2024-03-05", "2024-03-10").ok(),
        },
    ];
    let all: HashSet<&str> = ids(&records).into_iter().collect();
    for query in &queries {
        let once = filter_records(&records, query);
        let twice = filter_records(&once, query);
        assert_eq!(ids(&once), ids(&twice));
        assert!(ids(&once).iter().all(|id| all.contains(id)));
        assert!(once.len() <= records.len());
    }
}

#[test]
fn selection_is_pruned_to_visible_ids() {
    let records = corpus();
    let mut sel = SelectionSet::new();
    for id in ["c0", "c1", "c2", "c3", "missing"] {
        sel.select(id);
    }
    let view = derive(
        &records,
        &Query {
            filters: FilterState::new().with("test_type", "unit"),
            ..Query::default()
        },
    );
    let visible: HashSet<&str> = view.ids().collect();
    let before: HashSet<String> = sel.iter().map(str::to_string).collect();
    sel.reconcile(view.ids());
    let after: HashSet<String> = sel.iter().map(str::to_string).collect();
    let expected: HashSet<String> = before
        .into_iter()
        .filter(|id| visible.contains(id.as_str()))
        .collect();
    assert_eq!(after, expected);
    assert!(sel.contains("c0") && sel.contains("c3"));
}

#[test]
fn scenario_filter_and_search() {
    let records: Vec<TestCase> = ingest(scenario_cases());
    let unit = filter_records(
        &records,
        &Query {
            filters: FilterState::new().with("testType", "unit"),
            ..Query::default()
        },
    );
    assert_eq!(ids(&unit), vec!["t1"]);
    let mem = filter_records(
        &records,
        &Query {
            search: "mem".to_string(),
            ..Query::default()
        },
    );
    assert_eq!(ids(&mem), vec!["t2"]);
}

#[test]
fn tag_filter_matches_any_tag() {
    let records: Vec<TestCase> = ingest(vec![
        json!({"id": "t1", "tags": ["smoke", "nightly"]}),
        json!({"id": "t2", "tags": ["nightly"]}),
        json!({"id": "t3", "tags": ["smoke"]}),
        json!({"id": "t4"}),
    ]);
    let query = Query {
        filters: FilterState::parse_pairs(&["tag=nightly"]).unwrap(),
        ..Query::default()
    };
    assert_eq!(ids(&filter_records(&records, &query)), vec!["t1", "t2"]);
}

#[test]
fn records_with_both_key_spellings_are_kept() {
    let records: Vec<TestCase> = ingest(vec![
        json!({"id": "t1", "test_type": "unit", "testType": "unit",
               "created_at": "2024-03-01T08:00:00Z", "createdAt": "2024-03-01T08:00:00Z"}),
    ]);
    assert_eq!(records.len(), 1);
    let view = derive(
        &records,
        &Query {
            filters: FilterState::new().with("testType", "unit"),
            date_range: DateRange::parse("2024-03-01", "2024-03-01").ok(),
            ..Query::default()
        },
    );
    assert_eq!(view.stats.total, 1);
}

#[tokio::test]
async fn bulk_run_accounts_for_every_item() {
    let backend = Arc::new(MemoryBackend::new().with_records(
        RecordKind::TestCase,
        (0..7).map(|i| json!({"id": format!("c{i}"), "name": "x"})).collect(),
    ));
    backend.fail_on("c2", 500);
    backend.fail_on("c5", 403);
    let mut dash = Dashboard::<TestCase, _>::new(
        backend.clone(),
        BulkOptions {
            concurrency: 3,
            ..BulkOptions::default()
        },
    );
    dash.refresh().await;
    dash.select_all();
    assert_eq!(
        dash.request_bulk(BulkAction::Execute, Trigger::Bulk),
        Ok(Phase::Confirming)
    );
    dash.confirm_bulk().unwrap();
    let mut seen: Vec<Progress> = Vec::new();
    let summary = dash.execute_bulk(|p| seen.push(p)).await.unwrap();

    assert_eq!(summary.successes.len() + summary.failures.len(), 7);
    assert_eq!(summary.outcome, BulkOutcome::Partial { succeeded: 5, failed: 2 });
    assert_eq!(seen.len(), 7);
    assert!(seen.windows(2).all(|w| w[0].completed < w[1].completed));
    let last = seen.last().unwrap();
    assert_eq!((last.completed, last.total), (7, 7));
    assert_eq!(last.fraction(), 1.0);
    let order: Vec<String> = backend.calls().into_iter().map(|c| c.id).collect();
    assert_eq!(order, (0..7).map(|i| format!("c{i}")).collect::<Vec<_>>());
    assert_eq!(dash.phase(), Phase::Idle);
}

#[tokio::test]
async fn empty_selection_is_a_no_op() {
    let backend = Arc::new(MemoryBackend::new().with_records(RecordKind::TestCase, scenario_cases()));
    let mut dash = dashboard(backend.clone());
    dash.refresh().await;
    assert!(dash.request_bulk(BulkAction::Delete, Trigger::Bulk).is_err());
    assert_eq!(dash.phase(), Phase::Idle);
    assert!(dash.bulk_run().is_none());
    assert!(backend.calls().is_empty());
    let notes = dash.take_notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].level, crate::notify::Level::Warning);
}

#[tokio::test]
async fn scenario_partial_delete() {
    let backend = Arc::new(MemoryBackend::new().with_records(RecordKind::TestCase, scenario_cases()));
    backend.fail_on("t2", 500);
    let mut dash = dashboard(backend.clone());
    dash.refresh().await;
    assert!(dash.select("t1"));
    assert!(dash.select("t2"));
    assert_eq!(
        dash.request_bulk(BulkAction::Delete, Trigger::Bulk),
        Ok(Phase::Confirming)
    );
    assert_eq!(
        dash.prompt().map(|p| p.count),
        Some(2)
    );
    dash.confirm_bulk().unwrap();
    let summary = dash.execute_bulk(|_| {}).await.unwrap();

    assert_eq!(summary.outcome, BulkOutcome::Partial { succeeded: 1, failed: 1 });
    assert_eq!(summary.message(), "Delete: 1 succeeded, 1 failed");
    assert_eq!(summary.failures[0].id, "t2");
    assert!(dash.selection().is_empty());
    assert!(!dash.selection().is_frozen());
    assert_eq!(ids(dash.filtered()), vec!["t2"]);
    assert!(dash
        .notifications()
        .iter()
        .any(|n| n.message == "Delete: 1 succeeded, 1 failed"));
}

#[tokio::test]
async fn scenario_export_writes_one_document() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemoryBackend::new().with_records(RecordKind::TestCase, scenario_cases()));
    let mut dash = Dashboard::<TestCase, _>::new(
        backend.clone(),
        BulkOptions {
            export_dir: dir.path().to_path_buf(),
            ..BulkOptions::default()
        },
    );
    dash.refresh().await;
    dash.select_all();
    dash.request_bulk(BulkAction::Export, Trigger::Bulk).unwrap();
    dash.confirm_bulk().unwrap();
    let summary = dash.execute_bulk(|_| {}).await.unwrap();

    assert_eq!(summary.outcome, BulkOutcome::AllSucceeded { count: 2 });
    assert!(backend.calls().is_empty());
    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
    let path = summary.export_path.unwrap();
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("test-cases-export-") && name.ends_with(".json"));
    let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let entries = doc["test_cases"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["id"], "t1");
    assert_eq!(entries[0]["test_type"], "unit");
    let stamp = doc["exported_at"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
}

#[tokio::test]
async fn failed_refresh_keeps_cached_records() {
    let backend = Arc::new(MemoryBackend::new().with_records(RecordKind::TestCase, scenario_cases()));
    let mut dash = dashboard(backend.clone());
    assert_eq!(dash.refresh().await, &LoadState::Ready);
    backend.fail_listing(Some("connection refused"));
    assert!(matches!(dash.refresh().await, LoadState::Stale { .. }));
    assert_eq!(dash.filtered().len(), 2);
    assert_eq!(dash.take_notifications().len(), 1);
}

#[tokio::test]
async fn offline_dataset_loads_like_an_export() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dataset.json");
    let dataset = json!({
        "exported_at": "2024-03-05T10:00:00.000Z",
        "test_cases": scenario_cases(),
        "test_results": [{"id": "r1", "test_name": "boot", "status": "passed"}],
    });
    std::fs::write(&path, serde_json::to_vec(&dataset).unwrap()).unwrap();

    let offline = MemoryBackend::from_file(&path).await.unwrap();
    let fallback: Vec<TestCase> = ingest(offline.records(RecordKind::TestCase));
    assert_eq!(fallback.len(), 2);
    assert_eq!(offline.records(RecordKind::TestResult).len(), 1);

    let down = Arc::new(MemoryBackend::new());
    down.fail_listing(Some("unreachable"));
    let mut dash = dashboard(down).with_fallback(fallback);
    assert!(matches!(dash.refresh().await, LoadState::Stale { .. }));
    dash.set_filter("testType", "unit");
    assert_eq!(ids(dash.filtered()), vec!["t1"]);
}
