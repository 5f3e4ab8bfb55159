use itertools::Itertools;
use serde::Serialize;

use crate::filter::{DerivedView, Stats};
use crate::record::Record;
use crate::selection::SelectionSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" | "txt" | "table" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn infer_format_from_path(path: &str) -> Option<OutputFormat> {
    let lower = path.trim().to_lowercase();
    if lower.ends_with(".json") {
        return Some(OutputFormat::Json);
    }
    if lower.ends_with(".txt") {
        return Some(OutputFormat::Text);
    }
    None
}

const NAME_WIDTH: usize = 32;

fn clip(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut out: String = value.chars().take(width.saturating_sub(1)).collect();
    out.push('~');
    out
}

fn stats_lines(stats: &Stats) -> Vec<String> {
    let mut lines = vec![format!(":: {:<10}: {}", "Total", stats.total)];
    for (key, counts) in &stats.categories {
        if counts.is_empty() {
            continue;
        }
        let parts = counts.iter().map(|(v, n)| format!("{v}={n}")).join(", ");
        lines.push(format!(":: {:<10}: {}", key, parts));
    }
    for (flag, count) in &stats.derived {
        lines.push(format!(":: {:<10}: {}", flag, count));
    }
    lines
}

/// Plain table of the derived list followed by the stat cards.
pub fn render_text<R: Record>(view: &DerivedView<R>, selection: &SelectionSet) -> Vec<u8> {
    let keys = R::CATEGORY_KEYS;
    let id_width = view
        .filtered
        .iter()
        .map(|r| r.id().chars().count())
        .max()
        .unwrap_or(2)
        .max(2);

    let mut out = String::new();
    let mut header = format!("  {:<id_width$}  {:<NAME_WIDTH$}", "ID", "NAME");
    for key in keys {
        header.push_str(&format!("  {:<16}", key.to_uppercase()));
    }
    header.push_str("  CREATED");
    out.push_str(header.trim_end());
    out.push('\n');

    for record in &view.filtered {
        let mark = if selection.contains(record.id()) { '*' } else { ' ' };
        let mut line = format!(
            "{mark} {:<id_width$}  {:<NAME_WIDTH$}",
            record.id(),
            clip(record.name(), NAME_WIDTH)
        );
        for key in keys {
            line.push_str(&format!("  {:<16}", clip(record.field(key).unwrap_or("-"), 16)));
        }
        let created = record
            .timestamp()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        line.push_str(&format!("  {created}"));
        out.push_str(line.trim_end());
        out.push('\n');
    }

    out.push('\n');
    for line in stats_lines(&view.stats) {
        out.push_str(&line);
        out.push('\n');
    }
    out.into_bytes()
}

#[derive(Serialize)]
struct JsonView<'a, R: Record> {
    kind: crate::record::RecordKind,
    stats: &'a Stats,
    selected: Vec<&'a str>,
    records: &'a [R],
}

pub fn render_json<R: Record>(view: &DerivedView<R>, selection: &SelectionSet) -> Vec<u8> {
    let doc = JsonView {
        kind: R::KIND,
        stats: &view.stats,
        selected: selection.iter().collect(),
        records: &view.filtered,
    };
    let mut out = serde_json::to_vec_pretty(&doc).unwrap_or_else(|_| b"{}".to_vec());
    out.push(b'\n');
    out
}

pub fn render<R: Record>(
    format: OutputFormat,
    view: &DerivedView<R>,
    selection: &SelectionSet,
) -> Vec<u8> {
    match format {
        OutputFormat::Text => render_text(view, selection),
        OutputFormat::Json => render_json(view, selection),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::filter::{derive, Query};
    use crate::record::{ingest, TestCase};

    fn view() -> DerivedView<TestCase> {
        let records: Vec<TestCase> = ingest(vec![
            json!({"id": "t1", "name": "Boot Test", "test_type": "unit", "status": "completed",
                   "created_at": "2024-03-01T08:00:00Z"}),
            json!({"id": "t2", "name": "Mem Test", "test_type": "integration"}),
        ]);
        derive(&records, &Query::default())
    }

    #[test]
    fn format_parsing_and_inference() {
        assert_eq!(OutputFormat::parse("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("table"), Some(OutputFormat::Text));
        assert_eq!(OutputFormat::parse("xml"), None);
        assert_eq!(infer_format_from_path("out/cases.json"), Some(OutputFormat::Json));
        assert_eq!(infer_format_from_path("cases"), None);
    }

    #[test]
    fn text_marks_selected_rows_and_prints_stats() {
        let mut sel = SelectionSet::new();
        sel.select("t2");
        let text = String::from_utf8(render_text(&view(), &sel)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("  ID"));
        assert!(lines[1].starts_with("  t1"));
        assert!(lines[1].ends_with("2024-03-01 08:00"));
        assert!(lines[2].starts_with("* t2"));
        assert!(text.contains(":: Total     : 2"));
        assert!(text.contains(":: never_run : 1"));
    }

    #[test]
    fn json_carries_stats_and_records() {
        let out = render_json(&view(), &SelectionSet::new());
        let doc: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["kind"], "test-cases");
        assert_eq!(doc["stats"]["total"], 2);
        assert_eq!(doc["records"].as_array().unwrap().len(), 2);
        assert_eq!(doc["records"][1]["status"], "never_run");
    }
}
