//! Backend selection
//!
//! The choice between the local and the remote store is a pure function of
//! two facts read at call time: whether remote storage is configured and
//! switched on, and whether a user is signed in. [`BackendSelector::resolve`]
//! re-reads both on every call; a [`ResolvedBackend`] must not be kept
//! beyond the operation it was resolved for.

use super::{Backend, BackendKind};
use crate::client::auth::AuthSession;
use crate::client::normalize::normalize_record;
use crate::shared::entity::{Entity, EntityFamily, EntityId};
use crate::shared::error::Result;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Decide which store serves a call
pub fn select_backend(remote_configured: bool, authenticated: bool) -> BackendKind {
    if remote_configured && authenticated {
        BackendKind::Remote
    } else {
        BackendKind::Local
    }
}

/// Chooses a backend per entity family from current auth and config state
#[derive(Debug)]
pub struct BackendSelector {
    local: Arc<dyn Backend>,
    remote: Option<Arc<dyn Backend>>,
    remote_enabled: AtomicBool,
    session: AuthSession,
}

impl BackendSelector {
    /// Selector with a local store and an optional remote store
    pub fn new(local: Arc<dyn Backend>, remote: Option<Arc<dyn Backend>>, session: AuthSession) -> Self {
        Self {
            local,
            remote,
            remote_enabled: AtomicBool::new(true),
            session,
        }
    }

    /// Selector that always resolves to the local store
    pub fn local_only(local: Arc<dyn Backend>) -> Self {
        Self::new(local, None, AuthSession::new())
    }

    /// Switch the remote store on or off at runtime
    pub fn set_remote_enabled(&self, enabled: bool) {
        tracing::info!("[Selector] Remote storage {}", if enabled { "enabled" } else { "disabled" });
        self.remote_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_remote_enabled(&self) -> bool {
        self.remote_enabled.load(Ordering::SeqCst)
    }

    /// Whether a remote store exists and is switched on
    pub fn remote_configured(&self) -> bool {
        self.remote.is_some() && self.is_remote_enabled()
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    /// Which store would serve a call right now
    pub fn current_kind(&self) -> BackendKind {
        select_backend(self.remote_configured(), self.session.is_authenticated())
    }

    /// Resolve the store for one operation on `family`
    pub fn resolve(&self, family: EntityFamily) -> ResolvedBackend {
        let kind = self.current_kind();
        let backend = match (kind, &self.remote) {
            (BackendKind::Remote, Some(remote)) => Arc::clone(remote),
            _ => Arc::clone(&self.local),
        };
        tracing::trace!("[Selector] {} -> {}", family, backend.kind());
        ResolvedBackend {
            family,
            kind: backend.kind(),
            backend,
        }
    }
}

/// A backend bound to one family for one operation
///
/// Every result is normalized before it is returned.
#[derive(Debug, Clone)]
pub struct ResolvedBackend {
    family: EntityFamily,
    kind: BackendKind,
    backend: Arc<dyn Backend>,
}

impl ResolvedBackend {
    pub fn family(&self) -> EntityFamily {
        self.family
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Run the backend's synchronous precondition check
    pub fn ensure_ready(&self) -> Result<()> {
        self.backend.ensure_ready()
    }

    pub async fn get_all(&self) -> Result<Vec<Entity>> {
        let records = self.backend.get_all(self.family).await?;
        Ok(records
            .into_iter()
            .map(|record| normalize_record(self.family, record))
            .collect())
    }

    pub async fn get_by_id(&self, id: &EntityId) -> Result<Option<Entity>> {
        let record = self.backend.get_by_id(self.family, id).await?;
        Ok(record.map(|record| normalize_record(self.family, record)))
    }

    pub async fn find_by(&self, field: &str, value: &Value) -> Result<Vec<Entity>> {
        let records = self.backend.find_by(self.family, field, value).await?;
        Ok(records
            .into_iter()
            .map(|record| normalize_record(self.family, record))
            .collect())
    }

    /// Store a normalized entity
    pub async fn add(&self, entity: &Entity) -> Result<Entity> {
        let record = self.backend.add(self.family, entity.to_record()).await?;
        Ok(normalize_record(self.family, record))
    }

    /// Apply a normalized partial entity
    pub async fn update(&self, id: &EntityId, changes: &Entity) -> Result<Entity> {
        let record = self
            .backend
            .update(self.family, id, changes.fields.clone())
            .await?;
        Ok(normalize_record(self.family, record))
    }

    pub async fn delete(&self, id: &EntityId) -> Result<()> {
        self.backend.delete(self.family, id).await
    }

    pub async fn bulk_add(&self, entities: &[Entity]) -> Result<Vec<Entity>> {
        let records = entities.iter().map(Entity::to_record).collect();
        let stored = self.backend.bulk_add(self.family, records).await?;
        Ok(stored
            .into_iter()
            .map(|record| normalize_record(self.family, record))
            .collect())
    }

    pub async fn bulk_delete(&self, ids: &[EntityId]) -> Result<usize> {
        self.backend.bulk_delete(self.family, ids).await
    }

    pub async fn clear(&self) -> Result<usize> {
        self.backend.clear(self.family).await
    }
}
