mod predicates;
pub mod stats;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use thiserror::Error;

use crate::record::Record;

pub(crate) use predicates::normalize_key;
pub use stats::Stats;

/// Selected value per filter key. An unset or empty value means no constraint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterState {
    values: BTreeMap<String, String>,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the state changed.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        let key = normalize_key(key);
        let value = value.trim();
        if key.is_empty() {
            return false;
        }
        if value.is_empty() {
            return self.values.remove(&key).is_some();
        }
        self.values.insert(key, value.to_string()).as_deref() != Some(value)
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn clear(&mut self, key: &str) -> bool {
        self.values.remove(&normalize_key(key)).is_some()
    }

    pub fn clear_all(&mut self) -> bool {
        let changed = !self.values.is_empty();
        self.values.clear();
        changed
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&normalize_key(key)).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parses `key=value` pairs as accepted by `--filter`.
    pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self, String> {
        let mut out = Self::new();
        for raw in pairs {
            let raw = raw.as_ref();
            let (key, value) = raw
                .split_once('=')
                .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
            if key.trim().is_empty() {
                return Err(format!("empty filter key in '{raw}'"));
            }
            out.set(key, value);
        }
        Ok(out)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("invalid date '{value}', expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("date range start {start} is after end {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
}

/// Inclusive day range, from the start of `start` to the end of `end` (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, DateRangeError> {
        Self::new(parse_day(start)?, parse_day(end)?)
    }

    /// Open-ended ranges are clamped to the representable calendar.
    pub fn from_bounds(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>, DateRangeError> {
        match (start, end) {
            (None, None) => Ok(None),
            (start, end) => {
                let start = start.map(parse_day).transpose()?.unwrap_or(NaiveDate::MIN);
                let end = end.map(parse_day).transpose()?.unwrap_or(NaiveDate::MAX);
                Self::new(start, end).map(Some)
            }
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self
            .start
            .and_hms_opt(0, 0, 0)
            .map(|n| Utc.from_utc_datetime(&n))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = self
            .end
            .and_hms_nano_opt(23, 59, 59, 999_999_999)
            .map(|n| Utc.from_utc_datetime(&n))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (start, end)
    }
}

fn parse_day(value: &str) -> Result<NaiveDate, DateRangeError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| DateRangeError::InvalidDate {
        value: value.to_string(),
    })
}

/// Every input of the derived list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    pub search: String,
    pub filters: FilterState,
    pub date_range: Option<DateRange>,
}

impl Query {
    pub fn is_empty(&self) -> bool {
        self.search.trim().is_empty() && self.filters.is_empty() && self.date_range.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct DerivedView<R> {
    pub filtered: Vec<R>,
    pub stats: Stats,
}

impl<R: Record> DerivedView<R> {
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.filtered.iter().map(|r| r.id())
    }
}

impl<R> Default for DerivedView<R> {
    fn default() -> Self {
        Self {
            filtered: Vec::new(),
            stats: Stats::default(),
        }
    }
}

pub fn matches<R: Record>(record: &R, query: &Query) -> bool {
    let needle = query.search.trim().to_lowercase();
    predicates::matches_search(record, &needle)
        && predicates::matches_filters(record, &query.filters)
        && predicates::matches_date_range(record, query.date_range.as_ref())
}

/// Order-preserving subset of `records` satisfying every active predicate.
pub fn filter_records<R: Record>(records: &[R], query: &Query) -> Vec<R> {
    let needle = query.search.trim().to_lowercase();
    records
        .iter()
        .filter(|r| {
            predicates::matches_search(*r, &needle)
                && predicates::matches_filters(*r, &query.filters)
                && predicates::matches_date_range(*r, query.date_range.as_ref())
        })
        .cloned()
        .collect()
}

pub fn derive<R: Record>(records: &[R], query: &Query) -> DerivedView<R> {
    let filtered = filter_records(records, query);
    let stats = Stats::collect(&filtered);
    DerivedView { filtered, stats }
}
