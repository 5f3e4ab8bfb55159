use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use crate::bulk::{
    BulkAction, BulkCoordinator, BulkError, BulkOperationRun, BulkOptions, BulkSummary,
    ConfirmPrompt, Phase, Progress, Trigger,
};
use crate::client::Collaborator;
use crate::filter::{derive, DateRange, DerivedView, FilterState, Query, Stats};
use crate::notify::Notification;
use crate::plan::{self, PlanDraft, PlanError};
use crate::record::{ingest, ingest_one, Record, TestPlan};
use crate::selection::SelectionSet;

pub const MAX_NOTIFICATIONS: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
    /// Showing cached or offline data after a failed refresh.
    Stale { reason: String },
    /// Nothing to show; the list is empty.
    Failed { reason: String },
}

/// State of one list view: fetched records, the derived list, the selection
/// and the bulk coordinator.
///
/// Every input change recomputes the derived view and reconciles the
/// selection against it.
#[derive(Debug)]
pub struct Dashboard<R, C: ?Sized> {
    client: Arc<C>,
    records: Vec<R>,
    loaded: bool,
    state: LoadState,
    server_filters: FilterState,
    query: Query,
    derived: DerivedView<R>,
    selection: SelectionSet,
    coordinator: BulkCoordinator<R>,
    fallback: Option<Vec<R>>,
    notifications: Vec<Notification>,
}

impl<R, C> Dashboard<R, C>
where
    R: Record,
    C: Collaborator + ?Sized,
{
    pub fn new(client: Arc<C>, options: BulkOptions) -> Self {
        Self {
            client,
            records: Vec::new(),
            loaded: false,
            state: LoadState::Loading,
            server_filters: FilterState::new(),
            query: Query::default(),
            derived: DerivedView::default(),
            selection: SelectionSet::new(),
            coordinator: BulkCoordinator::new(options),
            fallback: None,
            notifications: Vec::new(),
        }
    }

    /// Records shown when the backend is unreachable and nothing was loaded yet.
    pub fn with_fallback(mut self, records: Vec<R>) -> Self {
        self.fallback = Some(records);
        self
    }

    /// Filters forwarded to `list_records`; the derived list is still
    /// computed locally from `query`.
    pub fn with_server_filters(mut self, filters: FilterState) -> Self {
        self.server_filters = filters;
        self
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self.recompute();
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn filtered(&self) -> &[R] {
        &self.derived.filtered
    }

    pub fn stats(&self) -> &Stats {
        &self.derived.stats
    }

    pub fn derived(&self) -> &DerivedView<R> {
        &self.derived
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn bulk_run(&self) -> Option<&BulkOperationRun> {
        self.coordinator.run()
    }

    pub fn phase(&self) -> Phase {
        self.coordinator.phase()
    }

    pub async fn refresh(&mut self) -> &LoadState {
        self.state = LoadState::Loading;
        let kind = R::KIND;
        match self.client.list_records(kind, &self.server_filters).await {
            Ok(values) => {
                self.records = ingest(values);
                self.loaded = true;
                self.state = LoadState::Ready;
                tracing::debug!(kind = %kind, count = self.records.len(), "refreshed");
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(kind = %kind, error = %reason, "refresh failed");
                if self.loaded {
                    self.notify(Notification::warning(format!(
                        "Failed to refresh {}: {reason}; showing cached data",
                        kind.plural()
                    )));
                    self.state = LoadState::Stale { reason };
                } else if let Some(fallback) = self.fallback.as_ref() {
                    self.records = fallback.clone();
                    self.notify(Notification::warning(format!(
                        "Backend unavailable ({reason}); showing offline {}",
                        kind.plural()
                    )));
                    self.state = LoadState::Stale { reason };
                } else {
                    self.records.clear();
                    self.notify(Notification::error(format!(
                        "Failed to load {}: {reason}",
                        kind.plural()
                    )));
                    self.state = LoadState::Failed { reason };
                }
            }
        }
        self.recompute();
        &self.state
    }

    /// Loads one record by id for a detail view.
    pub async fn fetch_record(&mut self, id: &str) -> Option<R> {
        let kind = R::KIND;
        match self.client.get_record(kind, id).await {
            Ok(value) => match ingest_one::<R>(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    self.notify(Notification::error(e.to_string()));
                    None
                }
            },
            Err(e) => {
                self.notify(Notification::error(e.user_message("load", kind, id)));
                None
            }
        }
    }

    fn recompute(&mut self) {
        self.derived = derive(&self.records, &self.query);
        self.selection.reconcile(self.derived.ids());
    }

    pub fn set_search(&mut self, text: &str) {
        if self.query.search != text {
            self.query.search = text.to_string();
            self.recompute();
        }
    }

    pub fn set_filter(&mut self, key: &str, value: &str) {
        if self.query.filters.set(key, value) {
            self.recompute();
        }
    }

    pub fn clear_filter(&mut self, key: &str) {
        if self.query.filters.clear(key) {
            self.recompute();
        }
    }

    pub fn clear_filters(&mut self) {
        if self.query.filters.clear_all() {
            self.recompute();
        }
    }

    pub fn set_date_range(&mut self, range: Option<DateRange>) {
        if self.query.date_range != range {
            self.query.date_range = range;
            self.recompute();
        }
    }

    fn is_visible(&self, id: &str) -> bool {
        self.derived.ids().any(|v| v == id)
    }

    /// Only visible rows can be selected.
    pub fn select(&mut self, id: &str) -> bool {
        self.is_visible(id) && self.selection.select(id)
    }

    pub fn deselect(&mut self, id: &str) -> bool {
        self.selection.deselect(id)
    }

    pub fn toggle(&mut self, id: &str) -> bool {
        if self.selection.contains(id) {
            self.selection.deselect(id)
        } else {
            self.select(id)
        }
    }

    pub fn select_all(&mut self) -> bool {
        self.selection.select_all(self.derived.ids())
    }

    pub fn clear_selection(&mut self) -> bool {
        self.selection.clear()
    }

    pub fn request_bulk(&mut self, action: BulkAction, trigger: Trigger) -> Result<Phase, BulkError> {
        let result = self
            .coordinator
            .request(action, trigger, &mut self.selection, &self.derived);
        if let Err(e) = &result {
            self.notify(Notification::warning(e.to_string()));
        }
        result
    }

    pub fn prompt(&self) -> Option<ConfirmPrompt> {
        self.coordinator.prompt()
    }

    pub fn confirm_bulk(&mut self) -> Result<(), BulkError> {
        let result = self.coordinator.confirm(&mut self.selection, &self.derived);
        if let Err(e) = &result {
            self.notify(Notification::warning(e.to_string()));
        }
        result
    }

    pub fn cancel_bulk(&mut self) -> bool {
        self.coordinator.cancel()
    }

    /// Runs the confirmed action, then refreshes the list from the backend.
    pub async fn execute_bulk<F>(&mut self, on_progress: F) -> Result<BulkSummary, BulkError>
    where
        F: FnMut(Progress),
    {
        let summary = self
            .coordinator
            .execute(self.client.as_ref(), &mut self.selection, on_progress)
            .await?;
        self.notify(summary.notification());
        self.refresh().await;
        Ok(summary)
    }

    /// Fixed-interval polling. The first refresh happens immediately; `ticks`
    /// bounds the number of refreshes and `on_refresh` may stop early with
    /// `ControlFlow::Break`.
    pub async fn watch<F>(&mut self, every: Duration, ticks: Option<usize>, mut on_refresh: F)
    where
        F: FnMut(&mut Self) -> ControlFlow<()>,
    {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut done = 0usize;
        loop {
            interval.tick().await;
            self.refresh().await;
            let flow = on_refresh(self);
            done += 1;
            if flow.is_break() || ticks.is_some_and(|limit| done >= limit) {
                break;
            }
        }
    }

    /// Queues a notification, dropping the oldest beyond `MAX_NOTIFICATIONS`.
    pub fn notify(&mut self, notification: Notification) {
        if self.notifications.len() >= MAX_NOTIFICATIONS {
            let excess = self.notifications.len() + 1 - MAX_NOTIFICATIONS;
            self.notifications.drain(..excess);
        }
        self.notifications.push(notification);
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn dismiss(&mut self, index: usize) -> Option<Notification> {
        (index < self.notifications.len()).then(|| self.notifications.remove(index))
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }
}

impl<C> Dashboard<TestPlan, C>
where
    C: Collaborator + ?Sized,
{
    pub async fn create_plan(&mut self, draft: &PlanDraft) -> Result<TestPlan, PlanError> {
        let result = plan::create_plan(self.client.as_ref(), draft).await;
        let created = self.plan_result(result)?;
        self.notify(Notification::success(format!(
            "Created test plan {}",
            created.name
        )));
        self.refresh().await;
        Ok(created)
    }

    pub async fn update_plan(&mut self, id: &str, draft: &PlanDraft) -> Result<TestPlan, PlanError> {
        let result = plan::update_plan(self.client.as_ref(), id, draft).await;
        let updated = self.plan_result(result)?;
        self.notify(Notification::success(format!("Updated test plan {id}")));
        self.refresh().await;
        Ok(updated)
    }

    pub async fn delete_plan(&mut self, id: &str) -> Result<(), PlanError> {
        let result = plan::delete_plan(self.client.as_ref(), id).await;
        self.plan_result(result)?;
        self.notify(Notification::success(format!("Deleted test plan {id}")));
        self.refresh().await;
        Ok(())
    }

    fn plan_result<T>(&mut self, result: Result<T, PlanError>) -> Result<T, PlanError> {
        if let Err(e) = &result {
            match e {
                PlanError::Invalid(errors) => {
                    for field in &errors.fields {
                        self.notify(Notification::warning(field.to_string()));
                    }
                }
                other => self.notify(Notification::error(other.to_string())),
            }
        }
        result
    }
}
