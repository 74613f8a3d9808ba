//! The synchronized environment store.
//!
//! [`SyncStore`] is the single in-process authority over the environment
//! collection. Writers go through [`SyncStore::dispatch`], which runs the
//! conflict filter and the reducer inside one async mutex; readers get
//! lock-free snapshots. Persistence is lazy: dispatches mark a flush as
//! pending and a background [`FlushScheduler`] writes the state out after a
//! quiet period, on a fixed interval, or when forced.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use envsync_common::{now_millis, EnvironmentRecord, Error, Result};
use envsync_storage::{PersistenceAdapter, SoftDeleteAdapter};

use crate::action::SyncAction;
use crate::conflict::{
    ConflictFilter, RecentAction, RecentActions, RecentActionsFilter, RecentActionsStore,
    DEFAULT_RECENT_ACTIONS,
};
use crate::events::{EventBus, StoreEvent, DEFAULT_EVENT_CAPACITY};
use crate::hash::{ActionHash, ActionHasher};
use crate::mutations::{JsonMutations, MutationLibrary};
use crate::reducer::reduce;
use crate::scheduler::{FlushOutcome, FlushScheduler, FlushTrigger};
use crate::state::StoreState;

/// Configuration for the sync store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Periodic flush period in milliseconds. 0 disables the timer.
    pub sync_interval_ms: u64,
    /// Quiet period in milliseconds between the last dispatch and the
    /// flush it requests.
    pub debounce_ms: u64,
    /// Bound of the recent-actions log kept per environment.
    pub recent_actions_per_environment: usize,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 30_000,
            debounce_ms: 1_000,
            recent_actions_per_environment: DEFAULT_RECENT_ACTIONS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl StoreConfig {
    pub fn with_sync_interval_ms(mut self, ms: u64) -> Self {
        self.sync_interval_ms = ms;
        self
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    pub fn with_recent_actions_per_environment(mut self, capacity: usize) -> Self {
        self.recent_actions_per_environment = capacity;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Periodic flush period.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Debounce window.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Everything the store mutex guards.
struct Critical {
    adapter: Option<Arc<dyn PersistenceAdapter>>,
    previous_action_hash: Option<ActionHash>,
    sync_pending: bool,
    recent_actions: RecentActionsStore,
}

type SchedulerTask = (FlushScheduler, JoinHandle<()>);

struct Inner {
    config: StoreConfig,
    mutations: Arc<dyn MutationLibrary>,
    conflict_filter: Arc<dyn ConflictFilter>,
    /// Current snapshot. Only replaced while `critical` is held.
    state: ArcSwap<StoreState>,
    critical: Mutex<Critical>,
    events: EventBus,
    scheduler: StdMutex<Option<SchedulerTask>>,
}

/// Shared handle to the store. Cloning is cheap and every clone refers to
/// the same state.
#[derive(Clone)]
pub struct SyncStore {
    inner: Arc<Inner>,
}

impl SyncStore {
    /// Create a store with the JSON mutation library and the default
    /// conflict filter.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_components(
            config,
            Arc::new(JsonMutations),
            Arc::new(RecentActionsFilter),
        )
    }

    /// Create a store with explicit collaborators.
    pub fn with_components(
        config: StoreConfig,
        mutations: Arc<dyn MutationLibrary>,
        conflict_filter: Arc<dyn ConflictFilter>,
    ) -> Self {
        let critical = Critical {
            adapter: None,
            previous_action_hash: None,
            sync_pending: false,
            recent_actions: RecentActionsStore::new(config.recent_actions_per_environment),
        };

        Self {
            inner: Arc::new(Inner {
                events: EventBus::new(config.event_capacity),
                config,
                mutations,
                conflict_filter,
                state: ArcSwap::from_pointee(StoreState::new()),
                critical: Mutex::new(critical),
                scheduler: StdMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Bind an adapter, load the persisted state and start flushing.
    ///
    /// Does nothing if the store is already initialized. A zero
    /// `sync_interval` disables the periodic flush; debounced flushes are
    /// always on.
    ///
    /// # Errors
    /// - The adapter failed to initialize or to load. The store stays
    ///   uninitialized and no timer is started.
    pub async fn initialize(
        &self,
        adapter: Arc<dyn PersistenceAdapter>,
        sync_interval: Duration,
    ) -> Result<()> {
        let mut critical = self.inner.critical.lock().await;
        if critical.adapter.is_some() {
            debug!("Store already initialized");
            return Ok(());
        }

        adapter.initialize().await.map_err(|e| {
            error!("Failed to initialize {} adapter: {}", adapter.name(), e);
            e
        })?;
        self.load_from_database(&mut critical, adapter.as_ref()).await?;

        critical.adapter = Some(adapter);
        critical.sync_pending = false;
        self.start_scheduler(sync_interval);
        drop(critical);

        info!(
            "Store initialized with {} environment(s)",
            self.inner.state.load().len()
        );
        self.inner.events.emit(StoreEvent::Initialized);
        Ok(())
    }

    /// Current snapshot. Never blocks on writers.
    pub fn get_state(&self) -> Arc<StoreState> {
        self.inner.state.load_full()
    }

    /// Look up one environment in the current snapshot.
    pub fn get_environment_by_uuid(&self, uuid: &str) -> Option<Arc<EnvironmentRecord>> {
        self.inner.state.load().get(uuid).cloned()
    }

    /// Apply an action.
    ///
    /// The action is applied unless the conflict filter drops it or it
    /// hashes the same as the action dispatched immediately before it.
    /// Returns the record of the environment the action names after the
    /// dispatch, or `None` for `ADD_CLOUD_ENVIRONMENT` and actions whose
    /// environment does not exist.
    ///
    /// # Errors
    /// - The action could not be serialized for hashing
    pub async fn dispatch(&self, action: SyncAction) -> Result<Option<Arc<EnvironmentRecord>>> {
        let hash = ActionHasher::hash(&action)?;
        let target = action.environment_uuid().map(str::to_string);
        let log_key = action.affected_environment();

        let mut guard = self.inner.critical.lock().await;
        let critical = &mut *guard;

        let empty = RecentActions::default();
        let recent = log_key
            .as_deref()
            .and_then(|uuid| critical.recent_actions.get(uuid))
            .unwrap_or(&empty);
        let kind = action.kind();
        let transformed = self.inner.conflict_filter.filter(action, &hash, recent);
        let adjacent_duplicate = critical.previous_action_hash.as_ref() == Some(&hash);

        match transformed {
            Some(applied) if !adjacent_duplicate => {
                let current = self.inner.state.load_full();
                let next = Arc::new(reduce(&current, &applied, self.inner.mutations.as_ref()));
                self.inner.state.store(next.clone());

                // Only live environments keep a log
                match applied.affected_environment() {
                    Some(uuid) if next.contains(&uuid) => {
                        self.inner
                            .conflict_filter
                            .record(&applied, &hash, &mut critical.recent_actions);
                    }
                    Some(uuid) => critical.recent_actions.forget(&uuid),
                    None => {}
                }

                critical.sync_pending = true;
                self.request_flush();
                self.inner.events.emit(StoreEvent::StateUpdated(next));
            }
            Some(_) => debug!("Skipping {} repeated back to back", kind),
            None => debug!("Conflict filter dropped {}", kind),
        }
        critical.previous_action_hash = Some(hash);

        Ok(target.and_then(|uuid| self.get_environment_by_uuid(&uuid)))
    }

    /// Flush now, bypassing the debounce window.
    ///
    /// Does nothing without a bound adapter.
    ///
    /// # Errors
    /// - Any adapter call failed; the flush stays pending
    pub async fn force_sync(&self) -> Result<()> {
        let mut critical = self.inner.critical.lock().await;
        critical.sync_pending = true;
        self.sync_to_database(&mut critical).await
    }

    /// Stop the timers, flush one last time and close the adapter.
    ///
    /// Safe to call with nothing pending and on a store that was never
    /// initialized.
    ///
    /// # Errors
    /// - The final flush or the adapter close failed. The adapter stays
    ///   bound so a later `force_sync` or `close` can retry.
    pub async fn close(&self) -> Result<()> {
        self.stop_scheduler().await;

        let mut critical = self.inner.critical.lock().await;
        let Some(adapter) = critical.adapter.clone() else {
            debug!("Close on uninitialized store");
            return Ok(());
        };

        self.sync_to_database(&mut critical).await?;
        adapter.close().await.map_err(|e| {
            error!("Failed to close {} adapter: {}", adapter.name(), e);
            e
        })?;

        critical.adapter = None;
        info!("Store closed");
        Ok(())
    }

    /// Bring a soft-deleted environment back.
    ///
    /// Restores the record in `adapter` (normally the bound adapter) and
    /// puts it back into the live state.
    ///
    /// # Errors
    /// - An environment with this uuid is already live
    /// - The adapter has no deleted record with this uuid, or failed
    pub async fn restore_environment(
        &self,
        adapter: &dyn SoftDeleteAdapter,
        uuid: &str,
    ) -> Result<Arc<EnvironmentRecord>> {
        let mut critical = self.inner.critical.lock().await;
        if self.inner.state.load().contains(uuid) {
            warn!("Refusing to restore {} over a live environment", uuid);
            return Err(Error::Conflict(format!("Environment {} is live", uuid)));
        }

        let restored = adapter.restore_environment(uuid).await?;
        let record = Arc::new(EnvironmentRecord {
            deleted_at: None,
            ..restored
        });

        let next = Arc::new(self.inner.state.load().upsert(record.clone()));
        self.inner.state.store(next.clone());
        critical.sync_pending = true;
        self.request_flush();
        drop(critical);

        info!("Restored environment {}", uuid);
        self.inner.events.emit(StoreEvent::StateUpdated(next));
        Ok(record)
    }

    /// Recently applied actions for an environment, oldest first.
    pub async fn recent_actions(&self, uuid: &str) -> Vec<RecentAction> {
        let critical = self.inner.critical.lock().await;
        critical
            .recent_actions
            .get(uuid)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscribe to store events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Whether an adapter is bound.
    pub async fn is_initialized(&self) -> bool {
        self.inner.critical.lock().await.adapter.is_some()
    }

    /// Whether changes are waiting to be flushed.
    pub async fn has_pending_sync(&self) -> bool {
        self.inner.critical.lock().await.sync_pending
    }

    /// Replace the state with the adapter's live records. Caller holds the
    /// store mutex.
    async fn load_from_database(
        &self,
        _critical: &mut Critical,
        adapter: &dyn PersistenceAdapter,
    ) -> Result<()> {
        let records = adapter.load_environments().await.map_err(|e| {
            error!("Failed to load environments from {}: {}", adapter.name(), e);
            e
        })?;

        let state = StoreState::from_records(records.into_iter().filter(|r| !r.is_deleted()));
        debug!("Loaded {} environment(s)", state.len());
        self.inner.state.store(Arc::new(state));
        Ok(())
    }

    /// Write the current state out. Caller holds the store mutex.
    async fn sync_to_database(&self, critical: &mut Critical) -> Result<()> {
        if !critical.sync_pending {
            return Ok(());
        }
        let Some(adapter) = critical.adapter.clone() else {
            return Ok(());
        };

        let state = self.inner.state.load_full();
        let result = async {
            let stored = adapter.get_all_environment_uuids().await?;
            for uuid in stored.iter().filter(|uuid| !state.contains(uuid)) {
                adapter.delete_environment(uuid).await?;
            }
            for record in &state.data {
                adapter.save_environment(record).await?;
            }
            adapter.update_last_sync(now_millis()).await
        }
        .await;

        match result {
            Ok(()) => {
                critical.sync_pending = false;
                debug!("Synced {} environment(s) to {}", state.len(), adapter.name());
                self.inner.events.emit(StoreEvent::Synced);
                Ok(())
            }
            Err(e) => {
                error!("Failed to sync to {}: {}", adapter.name(), e);
                Err(e)
            }
        }
    }

    /// Flush run by the scheduler. Failures are published, then returned
    /// for the scheduler to log.
    async fn background_flush(&self, trigger: FlushTrigger) -> Result<()> {
        let mut critical = self.inner.critical.lock().await;
        let result = self.sync_to_database(&mut critical).await;
        drop(critical);

        if let Err(e) = &result {
            debug!("{:?} flush failed, will retry on next trigger", trigger);
            self.inner.events.emit(StoreEvent::SyncFailed {
                error: e.to_string(),
            });
        }
        result
    }

    fn scheduler_slot(&self) -> MutexGuard<'_, Option<SchedulerTask>> {
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn request_flush(&self) {
        if let Some((scheduler, _)) = self.scheduler_slot().as_ref() {
            scheduler.request_flush();
        }
    }

    fn start_scheduler(&self, sync_interval: Duration) {
        let interval = (!sync_interval.is_zero()).then_some(sync_interval);
        let (scheduler, handle) = FlushScheduler::new(self.inner.config.debounce(), interval);

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(handle.run(move |trigger| {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => {
                        FlushOutcome::Done(SyncStore { inner }.background_flush(trigger).await)
                    }
                    None => FlushOutcome::Stop,
                }
            }
        }));

        if let Some((old, _)) = self.scheduler_slot().replace((scheduler, task)) {
            old.shutdown();
        }
    }

    async fn stop_scheduler(&self) {
        let task = self.scheduler_slot().take();
        if let Some((scheduler, task)) = task {
            scheduler.shutdown();
            if let Err(e) = task.await {
                warn!("Flush scheduler task failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for SyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStore")
            .field("config", &self.inner.config)
            .field("environments", &self.inner.state.load().len())
            .finish()
    }
}
