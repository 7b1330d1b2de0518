//! Update Event System
//!
//! Lifecycle events published by the optimistic update manager. Every
//! transition produces exactly one event carrying a snapshot of the
//! [`PendingUpdate`] as it looks after the transition.

use crate::shared::update::{PendingUpdate, UpdateStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Success,
    Failed,
    RolledBack,
    Retrying,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventType::Created => "created",
            EventType::Success => "success",
            EventType::Failed => "failed",
            EventType::RolledBack => "rolled_back",
            EventType::Retrying => "retrying",
        };
        f.write_str(label)
    }
}

/// Lifecycle event broadcast to every subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "update", rename_all = "snake_case")]
pub enum UpdateEvent {
    /// Speculative value published
    Created(PendingUpdate),
    /// Authoritative value replaced the speculative one
    Success(PendingUpdate),
    /// Real operation failed; a rollback event follows
    Failed(PendingUpdate),
    /// Original value restored
    RolledBack(PendingUpdate),
    /// Failed attempt being re-run
    Retrying(PendingUpdate),
}

impl UpdateEvent {
    /// Build the event matching the update's current status
    pub fn for_status(update: PendingUpdate) -> Self {
        match update.status {
            UpdateStatus::Pending => UpdateEvent::Created(update),
            UpdateStatus::Success => UpdateEvent::Success(update),
            UpdateStatus::Failed => UpdateEvent::Failed(update),
            UpdateStatus::RolledBack => UpdateEvent::RolledBack(update),
            UpdateStatus::Retrying => UpdateEvent::Retrying(update),
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            UpdateEvent::Created(_) => EventType::Created,
            UpdateEvent::Success(_) => EventType::Success,
            UpdateEvent::Failed(_) => EventType::Failed,
            UpdateEvent::RolledBack(_) => EventType::RolledBack,
            UpdateEvent::Retrying(_) => EventType::Retrying,
        }
    }

    /// Snapshot of the update after the transition
    pub fn update(&self) -> &PendingUpdate {
        match self {
            UpdateEvent::Created(update)
            | UpdateEvent::Success(update)
            | UpdateEvent::Failed(update)
            | UpdateEvent::RolledBack(update)
            | UpdateEvent::Retrying(update) => update,
        }
    }
}
