//! Shared Module
//!
//! Platform-agnostic types used by every part of the data layer: entity
//! containers, the error taxonomy, pending-update records, lifecycle events
//! and configuration. Nothing in here performs I/O.

/// Entity containers and identifiers
pub mod entity;

/// Data-layer error taxonomy
pub mod error;

/// Pending update records and their status machine
pub mod update;

/// Lifecycle events broadcast by the optimistic update manager
pub mod event;

/// Application configuration
pub mod config;

/// Tracing subscriber initialisation
pub mod logging;

/// Re-export commonly used types for convenience
pub use config::{AppConfig, AppConfigBuilder, ConfigError, DedupPolicy};
pub use entity::{Entity, EntityFamily, EntityId, Record};
pub use error::{DataError, RollbackReason};
pub use event::{EventType, UpdateEvent};
pub use update::{
    NewUpdate, PendingUpdate, UpdateFailure, UpdateHistoryEntry, UpdateId, UpdateKind,
    UpdateStatus,
};
