//! Pending Update Types
//!
//! The unit tracked by the optimistic update manager, its status state
//! machine and the immutable history record written when it settles.
//!
//! # Status transitions
//!
//! ```text
//! pending ──► success
//!    │  ▲
//!    │  └── retrying ──► success
//!    │         │
//!    ▼         ▼
//!  failed ──► rolled_back ◄── (timeout / cancel from pending or retrying)
//! ```

use crate::shared::entity::{Entity, EntityFamily, EntityId};
use crate::shared::error::{DataError, RollbackReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a pending update
pub type UpdateId = Uuid;

/// Kind of mutation an update speculates about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateKind::Create => f.write_str("create"),
            UpdateKind::Update => f.write_str("update"),
            UpdateKind::Delete => f.write_str("delete"),
        }
    }
}

/// Lifecycle status of a pending update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Speculative value is live, real operation in flight
    Pending,
    /// Real result replaced the speculative value
    Success,
    /// Real operation errored; rollback follows immediately
    Failed,
    /// Original value restored
    RolledBack,
    /// A failed attempt is being re-run
    Retrying,
}

impl UpdateStatus {
    /// Whether the update has settled
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateStatus::Success | UpdateStatus::RolledBack)
    }

    /// Whether the speculative value should still be shown to readers
    pub fn is_live(&self) -> bool {
        matches!(self, UpdateStatus::Pending | UpdateStatus::Retrying)
    }

    /// Allowed transitions; everything else is ignored by the manager
    pub fn can_transition_to(&self, next: UpdateStatus) -> bool {
        use UpdateStatus::*;
        matches!(
            (self, next),
            (Pending, Success)
                | (Pending, Failed)
                | (Pending, Retrying)
                | (Pending, RolledBack)
                | (Retrying, Pending)
                | (Retrying, Success)
                | (Retrying, Failed)
                | (Retrying, RolledBack)
                | (Failed, RolledBack)
        )
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpdateStatus::Pending => "pending",
            UpdateStatus::Success => "success",
            UpdateStatus::Failed => "failed",
            UpdateStatus::RolledBack => "rolled_back",
            UpdateStatus::Retrying => "retrying",
        };
        f.write_str(label)
    }
}

/// Failure details attached to an update that failed or rolled back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateFailure {
    pub reason: RollbackReason,
    pub message: String,
}

impl UpdateFailure {
    pub fn new(reason: RollbackReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl From<&DataError> for UpdateFailure {
    fn from(error: &DataError) -> Self {
        Self::new(error.reason(), error.to_string())
    }
}

/// Parameters for a new pending update
#[derive(Debug, Clone)]
pub struct NewUpdate {
    pub kind: UpdateKind,
    pub family: EntityFamily,
    pub entity_id: EntityId,
    /// Speculative value shown to readers; `None` for deletes
    pub optimistic: Option<Entity>,
    /// Pre-mutation value restored on rollback; `None` for creates
    pub original: Option<Entity>,
}

/// A speculative mutation tracked by the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub id: UpdateId,
    pub kind: UpdateKind,
    pub family: EntityFamily,
    /// Target entity; a temporary id for creates
    pub entity_id: EntityId,
    pub optimistic: Option<Entity>,
    pub original: Option<Entity>,
    /// Authoritative value once the real operation succeeded
    pub actual: Option<Entity>,
    pub created_at: DateTime<Utc>,
    pub status: UpdateStatus,
    pub retry_count: u32,
    pub failure: Option<UpdateFailure>,
}

impl PendingUpdate {
    pub fn new(request: NewUpdate) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: request.kind,
            family: request.family,
            entity_id: request.entity_id,
            optimistic: request.optimistic,
            original: request.original,
            actual: None,
            created_at: Utc::now(),
            status: UpdateStatus::Pending,
            retry_count: 0,
            failure: None,
        }
    }

    /// Identifier the authoritative value lives under once settled
    ///
    /// A successful create resolves its temporary id to the backend's id.
    pub fn resolved_entity_id(&self) -> &EntityId {
        self.actual
            .as_ref()
            .and_then(|entity| entity.id.as_ref())
            .unwrap_or(&self.entity_id)
    }
}

/// Immutable record of how an update settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateHistoryEntry {
    pub update_id: UpdateId,
    pub kind: UpdateKind,
    pub family: EntityFamily,
    pub entity_id: EntityId,
    pub status: UpdateStatus,
    pub retry_count: u32,
    pub failure: Option<UpdateFailure>,
    pub created_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl From<&PendingUpdate> for UpdateHistoryEntry {
    fn from(update: &PendingUpdate) -> Self {
        Self {
            update_id: update.id,
            kind: update.kind,
            family: update.family,
            entity_id: update.entity_id.clone(),
            status: update.status,
            retry_count: update.retry_count,
            failure: update.failure.clone(),
            created_at: update.created_at,
            recorded_at: Utc::now(),
        }
    }
}
