//! # Backend Contract
//!
//! The CRUD interface both concrete stores satisfy, and the selector that
//! picks one of them per entity family.
//!
//! Backends exchange raw [`Record`]s. Shapes are canonicalised by
//! [`ResolvedBackend`], which wraps the selected backend for one family and
//! runs every result through the normalizer.
//!
//! # Implementations
//!
//! - [`crate::client::local_db::LocalDatabase`] - embedded SQLite store
//! - [`RemoteBackend`] - per-user REST store
//! - [`MemoryBackend`] - in-process store for tests and ephemeral sessions

use crate::shared::entity::{EntityFamily, EntityId, Record};
use crate::shared::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub mod memory;
pub mod remote;
pub mod selector;

pub use memory::MemoryBackend;
pub use remote::RemoteBackend;
pub use selector::{select_backend, BackendSelector, ResolvedBackend};

/// Which concrete store a backend is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Remote => f.write_str("remote"),
        }
    }
}

/// CRUD contract shared by every store
///
/// Every method fails with a typed [`crate::shared::error::DataError`].
/// Returned records carry an `id` key.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Which store this is
    fn kind(&self) -> BackendKind;

    /// Synchronous precondition check run before any I/O
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn get_all(&self, family: EntityFamily) -> Result<Vec<Record>>;

    /// `None` when the entity does not exist
    async fn get_by_id(&self, family: EntityFamily, id: &EntityId) -> Result<Option<Record>>;

    /// Entities whose `field` equals `value`
    async fn find_by(&self, family: EntityFamily, field: &str, value: &Value) -> Result<Vec<Record>>;

    /// Insert a record, returning it with its assigned id
    async fn add(&self, family: EntityFamily, record: Record) -> Result<Record>;

    /// Merge `changes` into an existing record, returning the stored result
    async fn update(&self, family: EntityFamily, id: &EntityId, changes: Record) -> Result<Record>;

    async fn delete(&self, family: EntityFamily, id: &EntityId) -> Result<()>;

    /// Insert many records at once
    async fn bulk_add(&self, family: EntityFamily, records: Vec<Record>) -> Result<Vec<Record>>;

    /// Delete many records, returning how many existed
    async fn bulk_delete(&self, family: EntityFamily, ids: &[EntityId]) -> Result<usize>;

    /// Delete every record of a family, returning how many existed
    async fn clear(&self, family: EntityFamily) -> Result<usize>;
}
