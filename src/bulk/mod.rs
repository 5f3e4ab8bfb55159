pub mod export;
pub mod summary;

use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;

use chrono::Utc;
use futures::StreamExt;
use governor::{Quota, RateLimiter};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::client::{Collaborator, ItemOperation};
use crate::filter::DerivedView;
use crate::record::Record;
use crate::selection::SelectionSet;

pub use export::ExportError;
pub use summary::{BulkOutcome, BulkSummary};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BulkAction {
    Execute,
    Delete,
    Tag { tags: Vec<String> },
    Export,
}

impl BulkAction {
    pub fn parse(name: &str, tags: Vec<String>) -> Result<Self, String> {
        match name.trim().to_lowercase().as_str() {
            "execute" | "run" => Ok(Self::Execute),
            "delete" | "rm" => Ok(Self::Delete),
            "export" => Ok(Self::Export),
            "tag" if tags.is_empty() => Err("tag action needs at least one --tag".to_string()),
            "tag" => Ok(Self::Tag { tags }),
            other => Err(format!(
                "unknown action '{other}', expected execute, delete, tag or export"
            )),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Delete => "delete",
            Self::Tag { .. } => "tag",
            Self::Export => "export",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Execute => "Executed",
            Self::Delete => "Deleted",
            Self::Tag { .. } => "Tagged",
            Self::Export => "Exported",
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Delete)
    }

    /// Remote operation per item; `None` for the local-only export.
    pub fn operation(&self) -> Option<ItemOperation> {
        match self {
            Self::Execute => Some(ItemOperation::Execute),
            Self::Delete => Some(ItemOperation::Delete),
            Self::Tag { .. } => Some(ItemOperation::Tag),
            Self::Export => None,
        }
    }

    fn params(&self) -> Option<Value> {
        match self {
            Self::Tag { tags } => Some(json!({ "tags": tags })),
            _ => None,
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Where the request came from: a row action or the bulk toolbar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Single,
    Bulk,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Confirming,
    Running,
    Summarizing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Confirming => "confirming",
            Self::Running => "running",
            Self::Summarizing => "summarizing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BulkError {
    #[error("select at least one item to {action}")]
    EmptySelection { action: String },

    #[error("another bulk operation is {phase}")]
    Busy { phase: Phase },

    #[error("no bulk operation awaiting confirmation")]
    NotConfirming,

    #[error("no confirmed bulk operation to run")]
    NotRunning,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub id: String,
    pub error: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Fraction in `[0, 1]`; exactly `1.0` once `completed == total`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 || self.completed >= self.total {
            return 1.0;
        }
        self.completed as f64 / self.total as f64
    }
}

/// Transient state of one in-flight bulk action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkOperationRun {
    pub action: BulkAction,
    pub total: usize,
    pub completed: usize,
    pub successes: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl BulkOperationRun {
    fn new(action: BulkAction, total: usize) -> Self {
        Self {
            action,
            total,
            completed: 0,
            successes: Vec::with_capacity(total),
            failures: Vec::new(),
        }
    }

    fn succeed(&mut self, id: String) {
        self.successes.push(id);
        self.completed += 1;
    }

    fn fail(&mut self, id: String, error: String) {
        self.failures.push(ItemFailure { id, error });
        self.completed += 1;
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.completed,
            total: self.total,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub action: BulkAction,
    pub count: usize,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct BulkOptions {
    /// Item calls in flight at once; 1 keeps the run strictly sequential.
    pub concurrency: usize,
    /// Item calls per second.
    pub rate: Option<u32>,
    pub export_dir: PathBuf,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            rate: None,
            export_dir: PathBuf::from("."),
        }
    }
}

/// Drives `Idle -> Confirming -> Running -> Summarizing -> Idle`.
///
/// Items are resolved once, in derived-list order, when the run starts. The
/// selection stays frozen from then until the summary is produced and is
/// cleared whatever the outcome.
#[derive(Debug)]
pub struct BulkCoordinator<R> {
    options: BulkOptions,
    phase: Phase,
    pending: Option<(BulkAction, usize)>,
    run: Option<BulkOperationRun>,
    items: Vec<R>,
}

impl<R: Record> BulkCoordinator<R> {
    pub fn new(options: BulkOptions) -> Self {
        Self {
            options,
            phase: Phase::Idle,
            pending: None,
            run: None,
            items: Vec::new(),
        }
    }

    pub fn options(&self) -> &BulkOptions {
        &self.options
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The active run, from entering `Running` until `execute` hands back
    /// its summary.
    pub fn run(&self) -> Option<&BulkOperationRun> {
        self.run.as_ref()
    }

    pub fn needs_confirmation(action: &BulkAction, trigger: Trigger, count: usize) -> bool {
        action.is_destructive() || trigger == Trigger::Bulk || count > 1
    }

    /// Starts a bulk action; returns the phase entered.
    pub fn request(
        &mut self,
        action: BulkAction,
        trigger: Trigger,
        selection: &mut SelectionSet,
        derived: &DerivedView<R>,
    ) -> Result<Phase, BulkError> {
        if self.phase != Phase::Idle {
            return Err(BulkError::Busy { phase: self.phase });
        }
        if selection.is_empty() {
            tracing::warn!(action = action.verb(), "bulk action requested with nothing selected");
            return Err(BulkError::EmptySelection {
                action: action.verb().to_string(),
            });
        }
        if Self::needs_confirmation(&action, trigger, selection.len()) {
            self.pending = Some((action, selection.len()));
            self.phase = Phase::Confirming;
            return Ok(Phase::Confirming);
        }
        self.start(action, selection, derived)?;
        Ok(Phase::Running)
    }

    pub fn prompt(&self) -> Option<ConfirmPrompt> {
        let (action, count) = self.pending.as_ref()?;
        let kind = R::KIND.label(*count);
        let mut message = format!("{} {count} {kind}?", capitalize(action.verb()));
        if action.is_destructive() {
            message.push_str(" This cannot be undone.");
        }
        Some(ConfirmPrompt {
            action: action.clone(),
            count: *count,
            message,
        })
    }

    pub fn confirm(
        &mut self,
        selection: &mut SelectionSet,
        derived: &DerivedView<R>,
    ) -> Result<(), BulkError> {
        if self.phase != Phase::Confirming {
            return Err(BulkError::NotConfirming);
        }
        let (action, _) = self.pending.take().ok_or(BulkError::NotConfirming)?;
        self.start(action, selection, derived)
    }

    /// Backs out of a pending confirmation. Returns false when nothing was pending.
    pub fn cancel(&mut self) -> bool {
        if self.phase != Phase::Confirming {
            return false;
        }
        self.pending = None;
        self.phase = Phase::Idle;
        true
    }

    fn start(
        &mut self,
        action: BulkAction,
        selection: &mut SelectionSet,
        derived: &DerivedView<R>,
    ) -> Result<(), BulkError> {
        let items: Vec<R> = derived
            .filtered
            .iter()
            .filter(|r| selection.contains(r.id()))
            .cloned()
            .collect();
        if items.is_empty() {
            self.phase = Phase::Idle;
            return Err(BulkError::EmptySelection {
                action: action.verb().to_string(),
            });
        }
        tracing::info!(action = action.verb(), items = items.len(), "bulk run started");
        selection.freeze();
        self.run = Some(BulkOperationRun::new(action, items.len()));
        self.items = items;
        self.phase = Phase::Running;
        Ok(())
    }

    /// Processes every resolved item and returns to `Idle`.
    pub async fn execute<C, F>(
        &mut self,
        client: &C,
        selection: &mut SelectionSet,
        mut on_progress: F,
    ) -> Result<BulkSummary, BulkError>
    where
        C: Collaborator + ?Sized,
        F: FnMut(Progress),
    {
        if self.phase != Phase::Running || self.run.is_none() {
            return Err(BulkError::NotRunning);
        }
        let items = std::mem::take(&mut self.items);
        let options = &self.options;
        let Some(run) = self.run.as_mut() else {
            return Err(BulkError::NotRunning);
        };

        let export_path = match run.action.operation() {
            Some(op) => {
                Self::run_remote(options, client, op, &items, run, &mut on_progress).await;
                None
            }
            None => Self::run_export(options, &items, run, &mut on_progress).await,
        };

        self.phase = Phase::Summarizing;
        let run = self.run.take().ok_or(BulkError::NotRunning)?;
        let summary = BulkSummary {
            kind: R::KIND,
            outcome: BulkOutcome::classify(run.successes.len(), run.failures.len()),
            action: run.action,
            successes: run.successes,
            failures: run.failures,
            export_path,
        };
        tracing::info!(
            action = summary.action.verb(),
            succeeded = summary.successes.len(),
            failed = summary.failures.len(),
            "bulk run finished"
        );
        selection.release_and_clear();
        self.phase = Phase::Idle;
        Ok(summary)
    }

    async fn run_remote<C, F>(
        options: &BulkOptions,
        client: &C,
        op: ItemOperation,
        items: &[R],
        run: &mut BulkOperationRun,
        on_progress: &mut F,
    ) where
        C: Collaborator + ?Sized,
        F: FnMut(Progress),
    {
        let kind = R::KIND;
        let params = run.action.params();
        let params = params.as_ref();
        let limiter = options
            .rate
            .and_then(NonZeroU32::new)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        let limiter = limiter.as_ref();

        let calls = items.iter().map(move |item| {
            let id = item.id().to_string();
            async move {
                if let Some(lim) = limiter {
                    lim.until_ready().await;
                }
                let result = client.perform_item_operation(kind, op, &id, params).await;
                (id, result)
            }
        });
        // buffered keeps completion order equal to item order
        let mut results =
            std::pin::pin!(futures::stream::iter(calls).buffered(options.concurrency.max(1)));

        while let Some((id, result)) = results.next().await {
            match result {
                Ok(()) => run.succeed(id),
                Err(e) => {
                    let message = e.user_message(op.verb(), kind, &id);
                    tracing::warn!(id = %id, error = %e, "bulk item failed");
                    run.fail(id, message);
                }
            }
            on_progress(run.progress());
        }
    }

    async fn run_export<F>(
        options: &BulkOptions,
        items: &[R],
        run: &mut BulkOperationRun,
        on_progress: &mut F,
    ) -> Option<PathBuf>
    where
        F: FnMut(Progress),
    {
        let mut entries = Vec::with_capacity(items.len());
        let mut failure: Option<ExportError> = None;
        for (done, item) in items.iter().enumerate() {
            if failure.is_none() {
                match export::export_entry(item) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => failure = Some(e),
                }
            }
            // synthetic progress; the single write below decides the outcome
            if done + 1 < items.len() {
                on_progress(Progress {
                    completed: done + 1,
                    total: items.len(),
                });
            }
        }

        let now = Utc::now();
        let written = match failure {
            Some(e) => Err(e),
            None => {
                let doc = export::export_document(R::KIND, entries, now);
                export::write_export(&options.export_dir, R::KIND, &doc, now).await
            }
        };

        let path = match written {
            Ok(path) => {
                for item in items {
                    run.succeed(item.id().to_string());
                }
                Some(path)
            }
            Err(e) => {
                tracing::warn!(error = %e, "export failed");
                let message = e.to_string();
                for item in items {
                    run.fail(item.id().to_string(), message.clone());
                }
                None
            }
        };
        on_progress(run.progress());
        path
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
