use std::collections::BTreeSet;

/// Ids checked for bulk action.
///
/// The set must stay a subset of the ids currently on screen: call
/// [`SelectionSet::reconcile`] after every change of the derived list. While a
/// bulk run is in flight the set is frozen and every edit is ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionSet {
    ids: BTreeSet<String>,
    frozen: bool,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, id: &str) -> bool {
        if self.frozen {
            tracing::debug!(id, "selection frozen, ignoring select");
            return false;
        }
        self.ids.insert(id.to_string())
    }

    pub fn deselect(&mut self, id: &str) -> bool {
        if self.frozen {
            tracing::debug!(id, "selection frozen, ignoring deselect");
            return false;
        }
        self.ids.remove(id)
    }

    pub fn toggle(&mut self, id: &str) -> bool {
        if self.contains(id) {
            self.deselect(id)
        } else {
            self.select(id)
        }
    }

    /// Selects exactly the given ids (the visible rows).
    pub fn select_all<'a, I>(&mut self, visible: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.frozen {
            return false;
        }
        let next: BTreeSet<String> = visible.into_iter().map(|s| s.to_string()).collect();
        if next == self.ids {
            return false;
        }
        self.ids = next;
        true
    }

    pub fn clear(&mut self) -> bool {
        if self.frozen {
            return false;
        }
        let changed = !self.ids.is_empty();
        self.ids.clear();
        changed
    }

    /// Drops ids that are no longer visible. Returns how many were pruned.
    pub fn reconcile<'a, I>(&mut self, visible: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        // a frozen set is cleared as soon as the run ends
        if self.ids.is_empty() || self.frozen {
            return 0;
        }
        let visible: BTreeSet<&str> = visible.into_iter().collect();
        let kept: BTreeSet<String> = self
            .ids
            .iter()
            .filter(|id| visible.contains(id.as_str()))
            .cloned()
            .collect();
        let pruned = self.ids.len() - kept.len();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned stale selection");
            self.ids = kept;
        }
        pruned
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(|s| s.as_str())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Unfreezes and empties the set; used when a bulk run finishes.
    pub(crate) fn release_and_clear(&mut self) {
        self.frozen = false;
        self.ids.clear();
    }
}
