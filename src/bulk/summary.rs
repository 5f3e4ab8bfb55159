use std::path::PathBuf;

use serde::Serialize;

use super::{capitalize, BulkAction, ItemFailure};
use crate::notify::{Level, Notification};
use crate::record::RecordKind;

/// Exactly one of these describes any finished run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BulkOutcome {
    AllSucceeded { count: usize },
    AllFailed { count: usize },
    Partial { succeeded: usize, failed: usize },
}

impl BulkOutcome {
    pub fn classify(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (count, 0) => Self::AllSucceeded { count },
            (0, count) => Self::AllFailed { count },
            (succeeded, failed) => Self::Partial { succeeded, failed },
        }
    }

    pub fn level(self) -> Level {
        match self {
            Self::AllSucceeded { .. } => Level::Success,
            Self::AllFailed { .. } => Level::Error,
            Self::Partial { .. } => Level::Warning,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BulkSummary {
    pub action: BulkAction,
    pub kind: RecordKind,
    pub outcome: BulkOutcome,
    pub successes: Vec<String>,
    pub failures: Vec<ItemFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,
}

impl BulkSummary {
    pub fn message(&self) -> String {
        let verb = self.action.verb();
        match self.outcome {
            BulkOutcome::AllSucceeded { count } => {
                let mut msg = format!(
                    "{} {count} {}",
                    self.action.past_tense(),
                    self.kind.label(count)
                );
                if let Some(path) = self.export_path.as_ref() {
                    msg.push_str(&format!(" to {}", path.display()));
                }
                msg
            }
            BulkOutcome::AllFailed { count } => {
                let mut msg = format!("Failed to {verb} {count} {}", self.kind.label(count));
                if let (1, Some(f)) = (count, self.failures.first()) {
                    msg.push_str(&format!(": {}", f.error));
                }
                msg
            }
            BulkOutcome::Partial { succeeded, failed } => {
                format!("{}: {succeeded} succeeded, {failed} failed", capitalize(verb))
            }
        }
    }

    pub fn notification(&self) -> Notification {
        Notification::new(self.outcome.level(), self.message())
    }
}
