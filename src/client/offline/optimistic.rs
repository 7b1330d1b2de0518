//! # Optimistic Update Manager
//!
//! Tracks speculative mutations from the instant they are dispatched until
//! the real backend operation settles them.
//!
//! ## Features
//!
//! - **Immediate publication**: `create` publishes the speculative value before any I/O
//! - **Reconciliation**: `mark_success` replaces it with the authoritative value
//! - **Rollback**: failures, timeouts and cancellations republish the original
//! - **Retries**: exponential backoff for transient failures
//! - **Observability**: broadcast events, synchronous listeners and a bounded history
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mealsync::client::offline::{ManagerConfig, OptimisticManager};
//! use mealsync::shared::entity::{Entity, EntityFamily, EntityId};
//! use mealsync::shared::update::{NewUpdate, UpdateKind};
//!
//! # async fn demo() {
//! let manager = OptimisticManager::new(ManagerConfig::default());
//! let mut events = manager.subscribe();
//!
//! let update = manager
//!     .create(NewUpdate {
//!         kind: UpdateKind::Update,
//!         family: EntityFamily::Recipes,
//!         entity_id: EntityId::from_local(7),
//!         optimistic: Some(Entity::new()),
//!         original: Some(Entity::new()),
//!     })
//!     .await;
//!
//! manager.mark_success(update.id, None).await;
//! # }
//! ```

use crate::client::offline::history::UpdateHistory;
use crate::client::offline::retry::RetryPolicy;
use crate::shared::config::{
    AppConfig, DEFAULT_HISTORY_LIMIT, DEFAULT_ROLLBACK_TIMEOUT_MS, DEFAULT_SUCCESS_GRACE_MS,
};
use crate::shared::entity::{Entity, EntityFamily, EntityId};
use crate::shared::error::{DataError, RollbackReason};
use crate::shared::event::UpdateEvent;
use crate::shared::update::{
    NewUpdate, PendingUpdate, UpdateFailure, UpdateHistoryEntry, UpdateId, UpdateStatus,
};
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::AbortHandle;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Synchronous event listener
pub type Listener = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

/// Timing and retention settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Forced rollback deadline, armed at creation
    pub rollback_timeout: Duration,
    /// How long a successful update stays in the active set
    pub success_grace: Duration,
    pub history_limit: usize,
    pub retry: RetryPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            rollback_timeout: Duration::from_millis(DEFAULT_ROLLBACK_TIMEOUT_MS),
            success_grace: Duration::from_millis(DEFAULT_SUCCESS_GRACE_MS),
            history_limit: DEFAULT_HISTORY_LIMIT,
            retry: RetryPolicy::default(),
        }
    }
}

impl ManagerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            rollback_timeout: config.rollback_timeout(),
            success_grace: config.success_grace(),
            history_limit: config.history_limit,
            retry: RetryPolicy::from_config(config),
        }
    }
}

/// Handle to an update's rollback timer task
///
/// Consumed exactly once: [`disarm`](Self::disarm) on a terminal transition,
/// [`fired`](Self::fired) from inside the timer itself. Dropping an armed
/// timer aborts it.
#[derive(Debug)]
pub struct RollbackTimer {
    handle: Option<AbortHandle>,
}

impl RollbackTimer {
    pub fn new(handle: AbortHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Cancel the timer
    pub fn disarm(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Release the timer after it went off
    pub fn fired(mut self) {
        self.handle.take();
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for RollbackTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Result of [`OptimisticManager::retry`]
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// An attempt succeeded and the update was reconciled
    Succeeded,
    /// Retries ended in failure; the update was rolled back
    Failed(DataError),
    /// The caller's lifecycle ended; the update was rolled back
    Cancelled,
    /// The update was not in a state that allows another attempt
    NotPermitted,
    /// The update settled elsewhere (timeout, manual rollback) mid-retry
    Abandoned,
}

/// Counts of tracked updates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub pending: usize,
    pub retrying: usize,
    /// Successful updates waiting out the grace period
    pub settling: usize,
    pub history_len: usize,
}

#[derive(Debug)]
struct ActiveEntry {
    update: PendingUpdate,
    timer: Option<RollbackTimer>,
    /// Dispatch order, used to pick the visible overlay
    sequence: u64,
}

#[derive(Debug)]
struct ManagerState {
    active: HashMap<UpdateId, ActiveEntry>,
    history: UpdateHistory,
    next_sequence: u64,
}

impl ManagerState {
    /// Move an update to `rolled_back`, removing it from the active set
    fn roll_back(&mut self, id: &UpdateId, failure: Option<UpdateFailure>) -> Option<PendingUpdate> {
        let mut entry = self.active.remove(id)?;
        if let Some(timer) = entry.timer.take() {
            timer.disarm();
        }
        entry.update.status = UpdateStatus::RolledBack;
        if failure.is_some() {
            entry.update.failure = failure;
        }
        self.history.push(UpdateHistoryEntry::from(&entry.update));
        Some(entry.update)
    }
}

struct Inner {
    state: RwLock<ManagerState>,
    events: broadcast::Sender<UpdateEvent>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    config: ManagerConfig,
}

/// Optimistic update manager
///
/// Cheap to clone; clones share the same state. Construct one per
/// application session and pass it to whoever dispatches mutations.
#[derive(Clone)]
pub struct OptimisticManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for OptimisticManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Default for OptimisticManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl OptimisticManager {
    /// Create a new optimistic manager
    pub fn new(config: ManagerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(ManagerState {
                    active: HashMap::new(),
                    history: UpdateHistory::new(config.history_limit),
                    next_sequence: 0,
                }),
                events,
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                config,
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Receive every lifecycle event from now on
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.inner.events.subscribe()
    }

    /// Register a synchronous listener called on every transition
    ///
    /// Panics inside a listener are caught and logged. The listener stays
    /// registered until the returned [`Subscription`] is dropped.
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Start tracking a speculative mutation and publish it
    pub async fn create(&self, request: NewUpdate) -> PendingUpdate {
        let update = PendingUpdate::new(request);
        let id = update.id;
        {
            let mut state = self.inner.state.write().await;
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let timer = self.arm_timer(id);
            state.active.insert(
                id,
                ActiveEntry {
                    update: update.clone(),
                    timer: Some(timer),
                    sequence,
                },
            );
        }

        tracing::info!(
            "[Optimistic] Created {} {} update {} for {}",
            update.family,
            update.kind,
            id,
            update.entity_id
        );
        self.emit(UpdateEvent::Created(update.clone()));
        update
    }

    /// Reconcile an update with the authoritative value
    ///
    /// Returns `false` when the update is unknown or already settled.
    pub async fn mark_success(&self, id: UpdateId, actual: Option<Entity>) -> bool {
        let evict_now = self.inner.config.success_grace.is_zero();
        let snapshot = {
            let mut state = self.inner.state.write().await;
            let Some(entry) = state.active.get_mut(&id) else {
                tracing::debug!("[Optimistic] Ignoring success for settled update {}", id);
                return false;
            };
            if !entry.update.status.can_transition_to(UpdateStatus::Success) {
                tracing::debug!(
                    "[Optimistic] Ignoring success for update {} in state {}",
                    id,
                    entry.update.status
                );
                return false;
            }
            if let Some(timer) = entry.timer.take() {
                timer.disarm();
            }
            entry.update.status = UpdateStatus::Success;
            entry.update.actual = actual;
            let snapshot = entry.update.clone();

            state.history.push(UpdateHistoryEntry::from(&snapshot));
            if evict_now {
                state.active.remove(&id);
            }
            snapshot
        };

        if !evict_now {
            self.schedule_eviction(id);
        }
        tracing::info!(
            "[Optimistic] Update {} succeeded for {}",
            id,
            snapshot.resolved_entity_id()
        );
        self.emit(UpdateEvent::Success(snapshot));
        true
    }

    /// Record a failed real operation and roll the update back
    pub async fn mark_failed(&self, id: UpdateId, error: &DataError) -> bool {
        let (failed, rolled_back) = {
            let mut state = self.inner.state.write().await;
            let Some(entry) = state.active.get_mut(&id) else {
                tracing::debug!("[Optimistic] Ignoring failure for settled update {}", id);
                return false;
            };
            if !entry.update.status.can_transition_to(UpdateStatus::Failed) {
                tracing::debug!(
                    "[Optimistic] Ignoring failure for update {} in state {}",
                    id,
                    entry.update.status
                );
                return false;
            }
            if let Some(timer) = entry.timer.take() {
                timer.disarm();
            }
            entry.update.status = UpdateStatus::Failed;
            entry.update.failure = Some(UpdateFailure::from(error));
            let failed = entry.update.clone();

            state.history.push(UpdateHistoryEntry::from(&failed));
            let rolled_back = state.roll_back(&id, None);
            (failed, rolled_back)
        };

        tracing::warn!(
            "[Optimistic] Update {} failed ({}): {}",
            id,
            error.reason(),
            error
        );
        self.emit(UpdateEvent::Failed(failed));
        if let Some(rolled_back) = rolled_back {
            self.emit(UpdateEvent::RolledBack(rolled_back));
        }
        true
    }

    /// Restore the original value and stop tracking the update
    pub async fn rollback(&self, id: UpdateId, reason: RollbackReason) -> bool {
        let snapshot = {
            let mut state = self.inner.state.write().await;
            match state.active.get(&id) {
                Some(entry) if entry.update.status.can_transition_to(UpdateStatus::RolledBack) => {}
                _ => {
                    tracing::debug!("[Optimistic] Ignoring rollback for settled update {}", id);
                    return false;
                }
            }
            state.roll_back(
                &id,
                Some(UpdateFailure::new(reason, format!("rolled back: {}", reason))),
            )
        };

        match snapshot {
            Some(snapshot) => {
                tracing::info!("[Optimistic] Rolled back update {} ({})", id, reason);
                self.emit(UpdateEvent::RolledBack(snapshot));
                true
            }
            None => false,
        }
    }

    /// Re-run a failed operation with exponential backoff
    ///
    /// Each attempt increments the retry count and publishes a `retrying`
    /// event, waits `base_delay * 2^(attempt-1)` (capped), then calls
    /// `retry_fn` with the attempt number. Success reconciles the update;
    /// a non-retryable error or the last allowed attempt failing calls
    /// [`mark_failed`](Self::mark_failed).
    pub async fn retry<F, Fut>(&self, id: UpdateId, mut retry_fn: F) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<Entity>, DataError>>,
    {
        let policy = self.inner.config.retry;
        loop {
            let Some(attempt) = self.begin_retry(id).await else {
                return if self.is_live(id).await {
                    RetryOutcome::NotPermitted
                } else {
                    RetryOutcome::Abandoned
                };
            };

            let delay = policy.delay_for(attempt);
            tracing::debug!(
                "[Optimistic] Retry {}/{} for update {} in {:?}",
                attempt,
                policy.max_retries,
                id,
                delay
            );
            tokio::time::sleep(delay).await;
            if !self.is_live(id).await {
                return RetryOutcome::Abandoned;
            }

            match retry_fn(attempt).await {
                Ok(actual) => {
                    return if self.mark_success(id, actual).await {
                        RetryOutcome::Succeeded
                    } else {
                        RetryOutcome::Abandoned
                    };
                }
                Err(DataError::Cancelled) => {
                    self.rollback(id, RollbackReason::Cancelled).await;
                    return RetryOutcome::Cancelled;
                }
                Err(err) if err.is_retryable() && policy.can_retry(attempt) => {
                    tracing::warn!("[Optimistic] Attempt {} for update {} failed: {}", attempt, id, err);
                    if !self.resume_pending(id).await {
                        return RetryOutcome::Abandoned;
                    }
                }
                Err(err) => {
                    self.mark_failed(id, &err).await;
                    return RetryOutcome::Failed(err);
                }
            }
        }
    }

    /// `pending -> retrying`, returning the new retry count
    async fn begin_retry(&self, id: UpdateId) -> Option<u32> {
        let snapshot = {
            let mut state = self.inner.state.write().await;
            let entry = state.active.get_mut(&id)?;
            if !entry.update.status.can_transition_to(UpdateStatus::Retrying)
                || !self.inner.config.retry.can_retry(entry.update.retry_count)
            {
                return None;
            }
            entry.update.retry_count += 1;
            entry.update.status = UpdateStatus::Retrying;
            entry.update.clone()
        };

        let attempt = snapshot.retry_count;
        self.emit(UpdateEvent::Retrying(snapshot));
        Some(attempt)
    }

    /// `retrying -> pending` between attempts
    async fn resume_pending(&self, id: UpdateId) -> bool {
        let mut state = self.inner.state.write().await;
        match state.active.get_mut(&id) {
            Some(entry) if entry.update.status.can_transition_to(UpdateStatus::Pending) => {
                entry.update.status = UpdateStatus::Pending;
                true
            }
            _ => false,
        }
    }

    /// Timer expiry: roll back if still unsettled
    async fn expire(&self, id: UpdateId) {
        let timeout = self.inner.config.rollback_timeout;
        let snapshot = {
            let mut state = self.inner.state.write().await;
            let Some(entry) = state.active.get_mut(&id) else {
                return;
            };
            if !entry.update.status.is_live() {
                return;
            }
            if let Some(timer) = entry.timer.take() {
                timer.fired();
            }
            state.roll_back(
                &id,
                Some(UpdateFailure::new(
                    RollbackReason::Timeout,
                    format!("no result within {}ms", timeout.as_millis()),
                )),
            )
        };

        if let Some(snapshot) = snapshot {
            tracing::warn!(
                "[Optimistic] Update {} timed out after {:?}, rolled back",
                id,
                timeout
            );
            self.emit(UpdateEvent::RolledBack(snapshot));
        }
    }

    fn arm_timer(&self, id: UpdateId) -> RollbackTimer {
        let weak = Arc::downgrade(&self.inner);
        let timeout = self.inner.config.rollback_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                OptimisticManager { inner }.expire(id).await;
            }
        });
        RollbackTimer::new(task.abort_handle())
    }

    fn schedule_eviction(&self, id: UpdateId) {
        let weak = Arc::downgrade(&self.inner);
        let grace = self.inner.config.success_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.state.write().await;
                let settled = state
                    .active
                    .get(&id)
                    .is_some_and(|entry| entry.update.status == UpdateStatus::Success);
                if settled {
                    state.active.remove(&id);
                }
            }
        });
    }

    /// Deliver an event to listeners, then to broadcast subscribers
    fn emit(&self, event: UpdateEvent) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::error!(
                    "[Optimistic] Listener panicked while handling {} event for update {}",
                    event.event_type(),
                    event.update().id
                );
            }
        }

        if self.inner.events.send(event).is_err() {
            tracing::trace!("[Optimistic] No event subscribers");
        }
    }

    /// Whether the update is still pending or retrying
    pub async fn is_live(&self, id: UpdateId) -> bool {
        let state = self.inner.state.read().await;
        state
            .active
            .get(&id)
            .is_some_and(|entry| entry.update.status.is_live())
    }

    /// Snapshot of an active update
    pub async fn get(&self, id: UpdateId) -> Option<PendingUpdate> {
        let state = self.inner.state.read().await;
        state.active.get(&id).map(|entry| entry.update.clone())
    }

    /// Every active update, in dispatch order
    pub async fn pending_updates(&self) -> Vec<PendingUpdate> {
        let state = self.inner.state.read().await;
        let mut entries: Vec<&ActiveEntry> = state.active.values().collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries.into_iter().map(|entry| entry.update.clone()).collect()
    }

    /// The speculative value readers should see for one entity
    ///
    /// When several live updates target the same entity the most recently
    /// dispatched one wins.
    pub async fn overlay_for(&self, family: EntityFamily, id: &EntityId) -> Option<PendingUpdate> {
        let state = self.inner.state.read().await;
        state
            .active
            .values()
            .filter(|entry| {
                entry.update.family == family
                    && &entry.update.entity_id == id
                    && entry.update.status.is_live()
            })
            .max_by_key(|entry| entry.sequence)
            .map(|entry| entry.update.clone())
    }

    /// One overlay per entity of a family, in dispatch order
    pub async fn overlays(&self, family: EntityFamily) -> Vec<PendingUpdate> {
        let state = self.inner.state.read().await;
        let mut latest: HashMap<&EntityId, &ActiveEntry> = HashMap::new();
        for entry in state.active.values() {
            if entry.update.family != family || !entry.update.status.is_live() {
                continue;
            }
            match latest.get(&entry.update.entity_id) {
                Some(current) if current.sequence > entry.sequence => {}
                _ => {
                    latest.insert(&entry.update.entity_id, entry);
                }
            }
        }
        let mut entries: Vec<&ActiveEntry> = latest.into_values().collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries.into_iter().map(|entry| entry.update.clone()).collect()
    }

    /// Settled updates, oldest first
    pub async fn history(&self) -> Vec<UpdateHistoryEntry> {
        self.inner.state.read().await.history.entries()
    }

    pub async fn stats(&self) -> ManagerStats {
        let state = self.inner.state.read().await;
        let mut stats = ManagerStats {
            history_len: state.history.len(),
            ..ManagerStats::default()
        };
        for entry in state.active.values() {
            match entry.update.status {
                UpdateStatus::Pending => stats.pending += 1,
                UpdateStatus::Retrying => stats.retrying += 1,
                UpdateStatus::Success => stats.settling += 1,
                _ => {}
            }
        }
        stats
    }

    /// Drop every active update and its timer without publishing events
    pub async fn clear_all(&self) {
        let drained: Vec<ActiveEntry> = {
            let mut state = self.inner.state.write().await;
            state.active.drain().map(|(_, entry)| entry).collect()
        };
        for mut entry in drained.into_iter() {
            if let Some(timer) = entry.timer.take() {
                timer.disarm();
            }
        }
        tracing::info!("[Optimistic] Cleared all active updates");
    }
}

/// Keeps a listener registered; dropping it unregisters the listener
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    /// Unregister the listener now
    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}
