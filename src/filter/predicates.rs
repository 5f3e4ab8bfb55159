use chrono::{DateTime, Utc};

use crate::record::Record;

use super::{DateRange, FilterState};

pub(in crate::filter) fn matches_search<R: Record>(record: &R, needle_lower: &str) -> bool {
    if needle_lower.is_empty() {
        return true;
    }
    record
        .search_fields()
        .iter()
        .any(|field| field.to_lowercase().contains(needle_lower))
}

pub(in crate::filter) fn matches_filters<R: Record>(record: &R, filters: &FilterState) -> bool {
    filters
        .iter()
        .all(|(key, expected)| record.matches_field(key, expected))
}

pub(in crate::filter) fn matches_date_range<R: Record>(
    record: &R,
    range: Option<&DateRange>,
) -> bool {
    let Some(range) = range else {
        return true;
    };
    match record.timestamp() {
        Some(ts) => within(ts, range),
        None => false,
    }
}

fn within(ts: DateTime<Utc>, range: &DateRange) -> bool {
    let (start, end) = range.bounds();
    ts >= start && ts <= end
}

/// Converts `testType` style keys to `test_type`.
pub(crate) fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.trim().chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == '-' || ch == ' ' {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    out
}
