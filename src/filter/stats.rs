use std::collections::BTreeMap;

use serde::Serialize;

use crate::record::Record;

/// Aggregate counts shown on the summary cards, always over the filtered list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub categories: BTreeMap<String, BTreeMap<String, usize>>,
    pub derived: BTreeMap<String, usize>,
}

impl Stats {
    pub fn collect<R: Record>(records: &[R]) -> Self {
        let mut categories: BTreeMap<String, BTreeMap<String, usize>> = R::CATEGORY_KEYS
            .iter()
            .map(|k| (k.to_string(), BTreeMap::new()))
            .collect();
        let mut derived: BTreeMap<String, usize> = R::DERIVED_FLAGS
            .iter()
            .map(|f| (f.to_string(), 0))
            .collect();

        for record in records {
            for key in R::CATEGORY_KEYS {
                if let Some(value) = record.field(key) {
                    if let Some(counts) = categories.get_mut(*key) {
                        *counts.entry(value.to_string()).or_insert(0) += 1;
                    }
                }
            }
            for flag in R::DERIVED_FLAGS {
                if record.has_flag(flag) {
                    if let Some(count) = derived.get_mut(*flag) {
                        *count += 1;
                    }
                }
            }
        }

        Self {
            total: records.len(),
            categories,
            derived,
        }
    }

    pub fn count(&self, key: &str, value: &str) -> usize {
        self.categories
            .get(key)
            .and_then(|m| m.get(value))
            .copied()
            .unwrap_or(0)
    }

    pub fn derived(&self, flag: &str) -> usize {
        self.derived.get(flag).copied().unwrap_or(0)
    }
}
