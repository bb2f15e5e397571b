use crate::errors::{AppError, AppResult};
use crate::models::{
    GroupedList, ListError, ListEvent, ListSettings, ListSnapshot, Operation, Record, RecordFilter, RecordKey,
};
use crate::scheduler::{run_blocking, WorkerLane};
use crate::session::{LoadSession, SessionCounter};
use crate::store::RecordStore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

struct LoaderState {
    list: Arc<GroupedList>,
    load_offset: usize,
    filter: RecordFilter,
    sessions: SessionCounter,
    refreshing: bool,
    pending_deletes: usize,
    revision: u64,
    subscribers: Vec<mpsc::UnboundedSender<ListEvent>>,
}

impl LoaderState {
    fn snapshot(&self) -> ListSnapshot {
        ListSnapshot {
            revision: self.revision,
            list: self.list.clone(),
            in_flight: self.sessions.is_active() || self.pending_deletes > 0,
            refreshing: self.refreshing,
        }
    }

    fn publish_state(&mut self) {
        self.revision += 1;
        let event = ListEvent::State(self.snapshot());
        self.broadcast(event);
    }

    fn publish_error(&mut self, operation: Operation, error: &AppError) {
        let Some(kind) = error.kind() else {
            return;
        };
        let event = ListEvent::Error(ListError {
            error_id: Uuid::new_v4().to_string(),
            kind,
            operation,
            message: error.to_string(),
        });
        self.broadcast(event);
    }

    fn broadcast(&mut self, event: ListEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

struct Fetched {
    records: Vec<Record>,
    total: usize,
    end_of_data: bool,
}

struct Inner {
    store: Arc<dyn RecordStore>,
    settings: ListSettings,
    lane: WorkerLane,
    state: Mutex<LoaderState>,
}

/// Owns the grouped list shown by the presentation layer and serializes every
/// store access through one worker lane.
///
/// Loads are single-flight: issuing `load_new`, `refresh` or `load_more`
/// supersedes any load still outstanding, and a superseded load's result is
/// dropped when it arrives. Deletes share the lane in FIFO order but neither
/// cancel nor get cancelled by loads; each one edits whatever list is current
/// once its store call has succeeded.
#[derive(Clone)]
pub struct ListLoadCoordinator {
    inner: Arc<Inner>,
}

impl ListLoadCoordinator {
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<dyn RecordStore>, settings: ListSettings) -> AppResult<Self> {
        settings.validate()?;
        let lane = WorkerLane::start("list-loader")?;
        let state = LoaderState {
            list: Arc::new(GroupedList::default()),
            load_offset: 0,
            filter: RecordFilter::default(),
            sessions: SessionCounter::new(),
            refreshing: false,
            pending_deletes: 0,
            revision: 0,
            subscribers: Vec::new(),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                settings,
                lane,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn settings(&self) -> ListSettings {
        self.inner.settings
    }

    pub fn filter(&self) -> RecordFilter {
        self.inner.lock_state().filter.clone()
    }

    pub fn snapshot(&self) -> ListSnapshot {
        self.inner.lock_state().snapshot()
    }

    /// Registers an observer. The current state is delivered first.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ListEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.inner.lock_state();
        if sender.send(ListEvent::State(state.snapshot())).is_ok() {
            state.subscribers.push(sender);
        }
        receiver
    }

    /// Waits for every operation issued so far to finish.
    pub async fn flush(&self) -> AppResult<()> {
        self.inner.lane.flush().await
    }

    /// Full reload from the first page.
    pub fn load_new(&self, filter: RecordFilter) {
        let session = {
            let mut state = self.inner.lock_state();
            state.filter = filter;
            state.sessions.begin(Operation::LoadNew)
        };
        tracing::debug!(session = session.id, "load-new issued");

        let inner = self.inner.clone();
        self.dispatch_load(session, move || inner.run_load_new(session));
    }

    /// Re-reads the currently visible window while keeping it on screen.
    pub fn refresh(&self) {
        let session = self.inner.lock_state().sessions.begin(Operation::Refresh);
        tracing::debug!(session = session.id, "refresh issued");

        let inner = self.inner.clone();
        self.dispatch_load(session, move || inner.run_refresh(session));
    }

    /// Appends the next page. Ignored while another load is outstanding or
    /// once the list is known to be complete.
    pub fn load_more(&self) {
        let session = {
            let mut state = self.inner.lock_state();
            if state.sessions.is_active() {
                tracing::debug!("load-more ignored: a load is already in flight");
                return;
            }
            if state.list.is_exhausted() || state.list.is_empty_marker() {
                return;
            }
            state.sessions.begin(Operation::LoadMore)
        };
        tracing::debug!(session = session.id, "load-more issued");

        let inner = self.inner.clone();
        self.dispatch_load(session, move || inner.run_load_more(session));
    }

    /// Deletes a visible record from the store, then from the list.
    pub fn delete(&self, key: RecordKey) {
        self.inner.lock_state().pending_deletes += 1;

        let inner = self.inner.clone();
        let submitted = self.inner.lane.submit(move || inner.run_delete(key));
        if let Err(error) = submitted {
            tracing::error!(error = %error, "delete could not be scheduled");
            let mut state = self.inner.lock_state();
            state.pending_deletes = state.pending_deletes.saturating_sub(1);
            state.publish_state();
            state.publish_error(Operation::Delete, &error);
        }
    }

    fn dispatch_load<F, Fut>(&self, session: LoadSession, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if let Err(error) = self.inner.lane.submit(job) {
            tracing::error!(session = session.id, error = %error, "load could not be scheduled");
            let mut state = self.inner.lock_state();
            if state.sessions.finish(&session) {
                state.publish_state();
                state.publish_error(session.operation, &error);
            }
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, session: &LoadSession) -> bool {
        self.lock_state().sessions.is_current(session)
    }

    async fn run_load_new(self: Arc<Self>, session: LoadSession) {
        let filter = {
            let mut state = self.lock_state();
            if !state.sessions.is_current(&session) {
                tracing::debug!(session = session.id, "load-new superseded before start");
                return;
            }
            state.list = Arc::new(GroupedList::loading());
            state.load_offset = 0;
            state.refreshing = false;
            state.publish_state();
            state.filter.clone()
        };

        let limit = self.settings.page_size;
        let result = self.fetch(&session, limit, 0, filter).await;
        let grouping = self.settings.grouping;
        self.finish_load(
            &session,
            result,
            |state, fetched| {
                let returned = fetched.records.len();
                state.list = Arc::new(GroupedList::from_page(
                    fetched.records,
                    grouping,
                    fetched.end_of_data,
                    fetched.total,
                ));
                state.load_offset = returned;
            },
            |state| {
                state.list = Arc::new(GroupedList::default());
                state.load_offset = 0;
            },
        );
    }

    async fn run_refresh(self: Arc<Self>, session: LoadSession) {
        let (previous, limit, filter) = {
            let mut state = self.lock_state();
            if !state.sessions.is_current(&session) {
                tracing::debug!(session = session.id, "refresh superseded before start");
                return;
            }
            let previous = Arc::new(state.list.settled());
            let limit = match previous.record_count() {
                0 => self.settings.page_size,
                visible => visible,
            };
            state.list = previous.clone();
            state.refreshing = true;
            state.publish_state();
            (previous, limit, state.filter.clone())
        };

        let result = self.fetch(&session, limit, 0, filter).await;
        let grouping = self.settings.grouping;
        self.finish_load(
            &session,
            result,
            |state, fetched| {
                let returned = fetched.records.len();
                state.list = Arc::new(GroupedList::from_page(
                    fetched.records,
                    grouping,
                    fetched.end_of_data,
                    fetched.total,
                ));
                state.load_offset = returned;
                state.refreshing = false;
            },
            |state| {
                state.list = previous;
                state.refreshing = false;
            },
        );
    }

    async fn run_load_more(self: Arc<Self>, session: LoadSession) {
        let (previous, offset, filter) = {
            let mut state = self.lock_state();
            if !state.sessions.is_current(&session) {
                tracing::debug!(session = session.id, "load-more superseded before start");
                return;
            }
            let previous = state.list.clone();
            state.list = Arc::new(previous.with_loading());
            state.publish_state();
            (previous, state.load_offset, state.filter.clone())
        };

        let limit = self.settings.page_size;
        let result = self.fetch(&session, limit, offset, filter).await;
        let grouping = self.settings.grouping;
        let base = previous.clone();
        self.finish_load(
            &session,
            result,
            |state, fetched| {
                let returned = fetched.records.len();
                state.list = Arc::new(base.merge_page(
                    fetched.records,
                    grouping,
                    fetched.end_of_data,
                    fetched.total,
                ));
                state.load_offset = offset + returned;
            },
            |state| {
                // Offset was never advanced, so the same page can be retried.
                state.list = previous;
            },
        );
    }

    async fn run_delete(self: Arc<Self>, key: RecordKey) {
        let grouping = self.settings.grouping;
        let located = self.lock_state().list.contains(&key, grouping);
        let result = if located {
            let store = self.store.clone();
            run_blocking(move || store.delete(&key)).await
        } else {
            Err(AppError::NotFoundLocally(format!("{key} is not in the loaded list")))
        };

        let mut state = self.lock_state();
        state.pending_deletes = state.pending_deletes.saturating_sub(1);
        match result {
            Ok(()) => {
                if let Some(next) = state.list.without_record(&key, grouping) {
                    state.list = Arc::new(next);
                }
                tracing::info!(key = %key, "entry deleted");
                state.publish_state();
            }
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "delete failed");
                state.publish_state();
                state.publish_error(Operation::Delete, &error);
            }
        }
    }

    async fn fetch(
        &self,
        session: &LoadSession,
        limit: usize,
        offset: usize,
        filter: RecordFilter,
    ) -> AppResult<Fetched> {
        let store = self.store.clone();
        let page_filter = filter.clone();
        let records = self
            .store_call(session, move || store.load_page(limit, offset, &page_filter))
            .await?;

        let store = self.store.clone();
        let total = self.store_call(session, move || store.count(&filter)).await?;

        Ok(Fetched {
            end_of_data: records.len() < limit,
            records,
            total,
        })
    }

    /// The only suspension point of a load. A session superseded before the
    /// call never reaches the store; one superseded during it gets `Cancelled`.
    async fn store_call<T, F>(&self, session: &LoadSession, call: F) -> AppResult<T>
    where
        F: FnOnce() -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.is_current(session) {
            return Err(AppError::Cancelled);
        }
        let result = run_blocking(call).await;
        if !self.is_current(session) {
            return Err(AppError::Cancelled);
        }
        result
    }

    fn finish_load(
        &self,
        session: &LoadSession,
        result: AppResult<Fetched>,
        apply: impl FnOnce(&mut LoaderState, Fetched),
        rollback: impl FnOnce(&mut LoaderState),
    ) {
        let mut state = self.lock_state();
        if !state.sessions.finish(session) {
            tracing::debug!(
                session = session.id,
                operation = session.operation.as_str(),
                "discarding result of superseded load"
            );
            return;
        }

        match result {
            Ok(fetched) => {
                let returned = fetched.records.len();
                apply(&mut state, fetched);
                tracing::info!(
                    session = session.id,
                    operation = session.operation.as_str(),
                    returned,
                    offset = state.load_offset,
                    "load applied"
                );
                state.publish_state();
            }
            Err(error) => {
                tracing::warn!(
                    session = session.id,
                    operation = session.operation.as_str(),
                    error = %error,
                    "load failed"
                );
                rollback(&mut state);
                state.publish_state();
                state.publish_error(session.operation, &error);
            }
        }
    }
}
