//! # Data Client
//!
//! Composition root of the data layer. A mutation is validated, the backend
//! is resolved, a pending update is published, and only then does the real
//! backend call start in the background:
//!
//! ```text
//! dispatch ─► normalize ─► resolve backend ─► manager.create (Created event)
//!                                                   │
//!                       lifecycle (cancel, timeout, dedup) ─► backend call
//!                                                   │
//!                 success ─► mark_success      failure ─► retry / mark_failed
//! ```
//!
//! Validation, authentication and duplicate-rejection errors are returned
//! synchronously and never create a pending update. Everything that happens
//! after the optimistic value is published is reported through the event
//! channel.

use crate::client::auth::AuthSession;
use crate::client::backend::{BackendKind, BackendSelector, RemoteBackend, ResolvedBackend};
use crate::client::config::Config;
use crate::client::local_db::LocalDatabase;
use crate::client::normalize::{normalize, normalize_patch};
use crate::client::offline::lifecycle::{LifecycleConfig, PreparedCall, RequestLifecycle};
use crate::client::offline::optimistic::{
    ManagerConfig, OptimisticManager, RetryOutcome, Subscription,
};
use crate::shared::config::DedupPolicy;
use crate::shared::entity::{Entity, EntityFamily, EntityId};
use crate::shared::error::{DataError, Result, RollbackReason};
use crate::shared::event::UpdateEvent;
use crate::shared::update::{NewUpdate, PendingUpdate, UpdateId, UpdateKind};
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A mutation requested by a caller
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Create an entity from a raw payload
    Create(Value),
    /// Apply a raw partial payload to an entity
    Update { id: EntityId, changes: Value },
    Delete { id: EntityId },
}

impl Mutation {
    pub fn kind(&self) -> UpdateKind {
        match self {
            Mutation::Create(_) => UpdateKind::Create,
            Mutation::Update { .. } => UpdateKind::Update,
            Mutation::Delete { .. } => UpdateKind::Delete,
        }
    }
}

/// Normalized backend write
#[derive(Debug, Clone)]
enum WriteOp {
    Create(Entity),
    Update(EntityId, Entity),
    Delete(EntityId),
}

/// How a dispatched mutation ended
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Reconciled with the authoritative value (`None` for deletes)
    Succeeded(Option<Entity>),
    /// Rolled back after the real operation failed
    Failed(DataError),
    /// Rolled back because the caller cancelled
    Cancelled,
    /// Settled by its rollback deadline or a manual rollback first
    Expired,
}

/// Result of a dispatch: the published update and a handle to its outcome
#[derive(Debug)]
pub struct Dispatch {
    pub update: PendingUpdate,
    /// Speculative value shown to readers; `None` for deletes
    pub entity: Option<Entity>,
    pub handle: DispatchHandle,
}

/// Cancels or awaits a dispatched mutation
#[derive(Debug)]
pub struct DispatchHandle {
    update_id: UpdateId,
    token: CancellationToken,
    task: JoinHandle<DispatchOutcome>,
}

impl DispatchHandle {
    pub fn update_id(&self) -> UpdateId {
        self.update_id
    }

    /// End the caller's interest; the update rolls back with reason `cancelled`
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the update to settle
    pub async fn settled(self) -> DispatchOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => DispatchOutcome::Cancelled,
            Err(err) => DispatchOutcome::Failed(DataError::backend(0, format!("dispatch task failed: {}", err))),
        }
    }
}

struct ClientInner {
    selector: BackendSelector,
    manager: OptimisticManager,
    writes: RequestLifecycle<Option<Entity>>,
    reads: RequestLifecycle<Vec<Entity>>,
    /// Last authoritative value per entity, used as the rollback original
    snapshots: Mutex<HashMap<(EntityFamily, EntityId), Entity>>,
    root: CancellationToken,
}

/// Application-facing data client
///
/// Cheap to clone; clones share the same manager, selector and caches.
#[derive(Clone)]
pub struct DataClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for DataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataClient")
            .field("selector", &self.inner.selector)
            .field("manager", &self.inner.manager)
            .finish_non_exhaustive()
    }
}

impl DataClient {
    /// Assemble a client from its parts
    pub fn new(selector: BackendSelector, manager: OptimisticManager, lifecycle: LifecycleConfig) -> Self {
        let reads = LifecycleConfig {
            dedup: DedupPolicy::Join,
            ..lifecycle
        };
        Self {
            inner: Arc::new(ClientInner {
                selector,
                manager,
                writes: RequestLifecycle::new(lifecycle),
                reads: RequestLifecycle::new(reads),
                snapshots: Mutex::new(HashMap::new()),
                root: CancellationToken::new(),
            }),
        }
    }

    /// Build the standard stack: SQLite local store plus the remote store
    /// when one is configured
    pub async fn open(config: &Config, session: AuthSession) -> Result<Self> {
        let app = config.app();
        let local = LocalDatabase::open(&config.local_db_path()).await?;

        let remote = match config.remote_url() {
            Some(url) => Some(Arc::new(RemoteBackend::new(
                url,
                config.api_key().map(str::to_string),
                session.clone(),
                app.request_timeout(),
            )?) as Arc<dyn crate::client::backend::Backend>),
            None => None,
        };

        let selector = BackendSelector::new(Arc::new(local), remote, session);
        selector.set_remote_enabled(app.remote_enabled);

        Ok(Self::new(
            selector,
            OptimisticManager::new(ManagerConfig::from_app_config(app)),
            LifecycleConfig::from_app_config(app),
        ))
    }

    pub fn manager(&self) -> &OptimisticManager {
        &self.inner.manager
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.inner.selector
    }

    /// Resolve the backend for one operation; do not keep the result
    pub fn resolve_backend(&self, family: EntityFamily) -> ResolvedBackend {
        self.inner.selector.resolve(family)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.inner.selector.current_kind()
    }

    /// Receive every lifecycle event
    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.inner.manager.subscribe()
    }

    /// Register a synchronous listener
    pub fn add_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        self.inner.manager.add_listener(listener)
    }

    fn snapshots(&self) -> MutexGuard<'_, HashMap<(EntityFamily, EntityId), Entity>> {
        self.inner.snapshots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remember(&self, family: EntityFamily, entities: &[Entity]) {
        let mut snapshots = self.snapshots();
        for entity in entities {
            if let Some(id) = &entity.id {
                snapshots.insert((family, id.clone()), entity.clone());
            }
        }
    }

    fn forget(&self, family: EntityFamily, id: &EntityId) {
        self.snapshots().remove(&(family, id.clone()));
    }

    /// Last authoritative value seen for an entity
    pub fn snapshot(&self, family: EntityFamily, id: &EntityId) -> Option<Entity> {
        self.snapshots().get(&(family, id.clone())).cloned()
    }

    /// Dispatch a mutation with optimistic feedback
    pub async fn dispatch_optimistic(&self, family: EntityFamily, mutation: Mutation) -> Result<Dispatch> {
        let root = self.inner.root.clone();
        self.dispatch_optimistic_scoped(family, mutation, &root).await
    }

    /// Dispatch a mutation whose lifetime is tied to `parent`
    ///
    /// Cancelling `parent` cancels the dispatch.
    pub async fn dispatch_optimistic_scoped(
        &self,
        family: EntityFamily,
        mutation: Mutation,
        parent: &CancellationToken,
    ) -> Result<Dispatch> {
        if parent.is_cancelled() {
            return Err(DataError::Cancelled);
        }

        let kind = mutation.kind();
        let (op, entity_id, optimistic, original, fingerprint) = self.prepare(family, mutation).await?;

        let backend = self.resolve_backend(family);
        backend.ensure_ready()?;

        let key = format!("{}:{}:{}:{}", family, kind, entity_id, fingerprint);
        let prepared = self
            .inner
            .writes
            .start(&key, backend_call(backend.clone(), op.clone()))?;

        let update = self
            .inner
            .manager
            .create(NewUpdate {
                kind,
                family,
                entity_id,
                optimistic: optimistic.clone(),
                original,
            })
            .await;

        let token = parent.child_token();
        let task = tokio::spawn(self.clone().settle(
            update.id,
            family,
            key,
            backend,
            op,
            prepared,
            token.clone(),
        ));

        Ok(Dispatch {
            handle: DispatchHandle {
                update_id: update.id,
                token,
                task,
            },
            update,
            entity: optimistic,
        })
    }

    /// Validate a mutation and derive its speculative and original values
    #[allow(clippy::type_complexity)]
    async fn prepare(
        &self,
        family: EntityFamily,
        mutation: Mutation,
    ) -> Result<(WriteOp, EntityId, Option<Entity>, Option<Entity>, String)> {
        match mutation {
            Mutation::Create(payload) => {
                let mut entity = normalize(family, &payload)?;
                entity.id = None;
                let now = Utc::now();
                entity.created_at.get_or_insert(now);
                entity.updated_at = Some(now);

                let temp_id = EntityId::temporary();
                let optimistic = entity.clone().with_id(temp_id.clone());
                Ok((WriteOp::Create(entity), temp_id, Some(optimistic), None, String::new()))
            }
            Mutation::Update { id, changes } => {
                let patch = normalize_patch(family, &changes)?;
                let original = self.snapshot(family, &id);
                let mut optimistic = self.speculative_base(family, &id, original.as_ref()).await;
                optimistic.apply_patch(&patch);
                optimistic.id = Some(id.clone());
                optimistic.updated_at = Some(Utc::now());

                let fingerprint = serde_json::to_string(&patch.fields)?;
                Ok((
                    WriteOp::Update(id.clone(), patch),
                    id,
                    Some(optimistic),
                    original,
                    fingerprint,
                ))
            }
            Mutation::Delete { id } => {
                let original = self.snapshot(family, &id);
                Ok((WriteOp::Delete(id.clone()), id, None, original, String::new()))
            }
        }
    }

    /// Snapshot of an entity with its newest live overlay layered on top
    ///
    /// Without a snapshot the result only carries the overlay's fields.
    async fn speculative_base(
        &self,
        family: EntityFamily,
        id: &EntityId,
        original: Option<&Entity>,
    ) -> Entity {
        let mut base = original.cloned().unwrap_or_default();
        let pending = self.inner.manager.overlay_for(family, id).await;
        if let Some(speculative) = pending.and_then(|overlay| overlay.optimistic) {
            base.apply_patch(&speculative);
        }
        base
    }

    /// Background half of a dispatch: await the call and settle the update
    #[allow(clippy::too_many_arguments)]
    async fn settle(
        self,
        update_id: UpdateId,
        family: EntityFamily,
        key: String,
        backend: ResolvedBackend,
        op: WriteOp,
        prepared: PreparedCall<Option<Entity>>,
        token: CancellationToken,
    ) -> DispatchOutcome {
        let manager = &self.inner.manager;
        let first = prepared.wait(&token).await;

        let result = match first {
            Err(err) if err.is_retryable() && manager.config().retry.can_retry(0) => {
                tracing::info!("[Optimistic] Update {} will be retried: {}", update_id, err);
                let reconciled: Arc<Mutex<Option<Entity>>> = Arc::new(Mutex::new(None));
                let retried = manager.retry(update_id, |_| {
                    let call = backend_call(backend.clone(), op.clone());
                    let key = key.clone();
                    let token = token.clone();
                    let client = self.clone();
                    let reconciled = Arc::clone(&reconciled);
                    async move {
                        let result = client.inner.writes.run(&key, &token, call).await;
                        if let Ok(actual) = &result {
                            *reconciled.lock().unwrap_or_else(|e| e.into_inner()) = actual.clone();
                        }
                        result
                    }
                });
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => RetryOutcome::Cancelled,
                    outcome = retried => outcome,
                };
                return match outcome {
                    RetryOutcome::Succeeded => {
                        let actual = reconciled.lock().unwrap_or_else(|e| e.into_inner()).take();
                        self.record_success(family, &op, actual.as_ref());
                        DispatchOutcome::Succeeded(actual)
                    }
                    RetryOutcome::Failed(err) => DispatchOutcome::Failed(err),
                    RetryOutcome::Cancelled => {
                        manager.rollback(update_id, RollbackReason::Cancelled).await;
                        DispatchOutcome::Cancelled
                    }
                    RetryOutcome::NotPermitted => {
                        manager.mark_failed(update_id, &err).await;
                        DispatchOutcome::Failed(err)
                    }
                    RetryOutcome::Abandoned => DispatchOutcome::Expired,
                };
            }
            other => other,
        };

        match result {
            Ok(actual) => {
                if manager.mark_success(update_id, actual.clone()).await {
                    self.record_success(family, &op, actual.as_ref());
                    DispatchOutcome::Succeeded(actual)
                } else {
                    DispatchOutcome::Expired
                }
            }
            Err(DataError::Cancelled) => {
                manager.rollback(update_id, RollbackReason::Cancelled).await;
                DispatchOutcome::Cancelled
            }
            Err(err) => {
                if manager.mark_failed(update_id, &err).await {
                    DispatchOutcome::Failed(err)
                } else {
                    DispatchOutcome::Expired
                }
            }
        }
    }

    fn record_success(&self, family: EntityFamily, op: &WriteOp, actual: Option<&Entity>) {
        match (op, actual) {
            (WriteOp::Delete(id), _) => self.forget(family, id),
            (_, Some(entity)) => self.remember(family, std::slice::from_ref(entity)),
            _ => {}
        }
    }

    /// Every entity of a family with pending overlays applied
    pub async fn get_all(&self, family: EntityFamily) -> Result<Vec<Entity>> {
        let backend = self.resolve_backend(family);
        backend.ensure_ready()?;

        let key = format!("{}:get_all", family);
        let reader = backend.clone();
        let mut entities = self
            .inner
            .reads
            .run(&key, &self.inner.root, async move { reader.get_all().await })
            .await?;
        self.remember(family, &entities);

        for overlay in self.inner.manager.overlays(family).await {
            apply_overlay(&mut entities, &overlay);
        }
        Ok(entities)
    }

    /// One entity with any pending overlay applied
    pub async fn get_by_id(&self, family: EntityFamily, id: &EntityId) -> Result<Option<Entity>> {
        let Some(overlay) = self.inner.manager.overlay_for(family, id).await else {
            return self.read_by_id(family, id).await;
        };
        match (overlay.kind, overlay.optimistic) {
            // A patch dispatched before any read holds only the changed fields.
            (UpdateKind::Update, Some(speculative)) if overlay.original.is_none() => {
                let stored = self.read_by_id(family, id).await?;
                Ok(stored.map(|mut entity| {
                    entity.apply_patch(&speculative);
                    entity
                }))
            }
            (_, speculative) => Ok(speculative),
        }
    }

    async fn read_by_id(&self, family: EntityFamily, id: &EntityId) -> Result<Option<Entity>> {
        let backend = self.resolve_backend(family);
        backend.ensure_ready()?;

        let key = format!("{}:get:{}", family, id);
        let reader = backend.clone();
        let lookup = id.clone();
        let found = self
            .inner
            .reads
            .run(&key, &self.inner.root, async move {
                Ok(reader.get_by_id(&lookup).await?.into_iter().collect())
            })
            .await?;
        self.remember(family, &found);
        Ok(found.into_iter().next())
    }

    /// Entities whose `field` equals `value`, with overlays applied
    pub async fn find_by(&self, family: EntityFamily, field: &str, value: &Value) -> Result<Vec<Entity>> {
        let backend = self.resolve_backend(family);
        backend.ensure_ready()?;

        let key = format!("{}:find:{}={}", family, field, value);
        let reader = backend.clone();
        let (lookup_field, lookup_value) = (field.to_string(), value.clone());
        let mut entities = self
            .inner
            .reads
            .run(&key, &self.inner.root, async move {
                reader.find_by(&lookup_field, &lookup_value).await
            })
            .await?;
        self.remember(family, &entities);

        for overlay in self.inner.manager.overlays(family).await {
            apply_overlay(&mut entities, &overlay);
        }
        entities.retain(|entity| entity.get(field) == Some(value));
        Ok(entities)
    }

    /// Validate and store many payloads at once, without optimistic feedback
    pub async fn bulk_add(&self, family: EntityFamily, payloads: &[Value]) -> Result<Vec<Entity>> {
        let mut entities = Vec::with_capacity(payloads.len());
        let mut errors = Vec::new();
        for (index, payload) in payloads.iter().enumerate() {
            match normalize(family, payload) {
                Ok(mut entity) => {
                    entity.id = None;
                    entities.push(entity);
                }
                Err(DataError::Validation { errors: item_errors, .. }) => {
                    errors.extend(item_errors.into_iter().map(|e| format!("item {}: {}", index, e)));
                }
                Err(err) => return Err(err),
            }
        }
        if !errors.is_empty() {
            return Err(DataError::Validation { family, errors });
        }

        let backend = self.resolve_backend(family);
        backend.ensure_ready()?;
        let stored = self.bounded(backend.bulk_add(&entities)).await?;
        self.remember(family, &stored);
        tracing::info!("[Optimistic] Bulk added {} {} via {}", stored.len(), family, backend.kind());
        Ok(stored)
    }

    /// Delete many entities without optimistic feedback
    pub async fn bulk_delete(&self, family: EntityFamily, ids: &[EntityId]) -> Result<usize> {
        let backend = self.resolve_backend(family);
        backend.ensure_ready()?;
        let deleted = self.bounded(backend.bulk_delete(ids)).await?;
        for id in ids {
            self.forget(family, id);
        }
        Ok(deleted)
    }

    /// Delete every entity of a family
    pub async fn clear_family(&self, family: EntityFamily) -> Result<usize> {
        let backend = self.resolve_backend(family);
        backend.ensure_ready()?;
        let cleared = self.bounded(backend.clear()).await?;
        self.snapshots().retain(|(f, _), _| *f != family);
        Ok(cleared)
    }

    async fn bounded<T>(&self, call: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let timeout: Duration = self.inner.writes.config().timeout;
        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or(Err(DataError::Timeout(timeout)))
    }

    /// Cancel every dispatch and drop all pending updates
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        self.inner.manager.clear_all().await;
    }
}

fn backend_call(backend: ResolvedBackend, op: WriteOp) -> BoxFuture<'static, Result<Option<Entity>>> {
    async move {
        match op {
            WriteOp::Create(entity) => backend.add(&entity).await.map(Some),
            WriteOp::Update(id, patch) => backend.update(&id, &patch).await.map(Some),
            WriteOp::Delete(id) => backend.delete(&id).await.map(|_| None),
        }
    }
    .boxed()
}

/// Merge one live overlay into a read result
fn apply_overlay(entities: &mut Vec<Entity>, overlay: &PendingUpdate) {
    let position = entities
        .iter()
        .position(|entity| entity.id.as_ref() == Some(&overlay.entity_id));
    match (overlay.kind, &overlay.optimistic, position) {
        (UpdateKind::Delete, _, Some(index)) => {
            entities.remove(index);
        }
        (UpdateKind::Delete, _, None) => {}
        (UpdateKind::Update, Some(optimistic), Some(index)) => {
            entities[index].apply_patch(optimistic);
        }
        (UpdateKind::Create, Some(optimistic), Some(index)) => entities[index] = optimistic.clone(),
        (UpdateKind::Create, Some(optimistic), None) => entities.push(optimistic.clone()),
        // Updates to entities outside the result set stay hidden.
        (UpdateKind::Update, Some(_), None) => {}
        (_, None, _) => {}
    }
}
