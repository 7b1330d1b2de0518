//! In-process backend
//!
//! Rows live in a `HashMap` per family with auto-increment ids, mirroring the
//! embedded store's behaviour without touching disk. Failures and latency can
//! be injected so the optimistic layer can be exercised deterministically.

use super::{Backend, BackendKind};
use crate::shared::entity::{EntityFamily, EntityId, Record};
use crate::shared::error::{DataError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<EntityFamily, BTreeMap<i64, Record>>,
    next_id: i64,
    failures: VecDeque<DataError>,
    delay: Duration,
    calls: usize,
}

/// In-memory implementation of the backend contract
#[derive(Debug)]
pub struct MemoryBackend {
    kind: BackendKind,
    state: Mutex<MemoryState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty store reporting itself as a local backend
    pub fn new() -> Self {
        Self::with_kind(BackendKind::Local)
    }

    /// Empty store reporting the given kind
    pub fn with_kind(kind: BackendKind) -> Self {
        Self {
            kind,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next call fail with `error`; queued failures are consumed in order
    pub fn inject_failure(&self, error: DataError) {
        self.lock().failures.push_back(error);
    }

    /// Delay every subsequent call
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Number of contract calls made so far
    pub fn call_count(&self) -> usize {
        self.lock().calls
    }

    /// Number of stored rows in a family
    pub fn len(&self, family: EntityFamily) -> usize {
        self.lock().tables.get(&family).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, family: EntityFamily) -> bool {
        self.len(family) == 0
    }

    async fn before_call(&self) -> Result<()> {
        let (delay, failure) = {
            let mut state = self.lock();
            state.calls += 1;
            (state.delay, state.failures.pop_front())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn insert(state: &mut MemoryState, family: EntityFamily, mut record: Record) -> Record {
        state.next_id += 1;
        let id = state.next_id;
        let now = Value::String(Utc::now().to_rfc3339());
        record.insert("id".to_string(), Value::from(id));
        record.entry("created_at").or_insert_with(|| now.clone());
        record.insert("updated_at".to_string(), now);
        state
            .tables
            .entry(family)
            .or_default()
            .insert(id, record.clone());
        record
    }
}

fn not_found(family: EntityFamily, id: &EntityId) -> DataError {
    DataError::NotFound {
        family,
        id: id.clone(),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn get_all(&self, family: EntityFamily) -> Result<Vec<Record>> {
        self.before_call().await?;
        let state = self.lock();
        Ok(state
            .tables
            .get(&family)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_by_id(&self, family: EntityFamily, id: &EntityId) -> Result<Option<Record>> {
        self.before_call().await?;
        let Some(key) = id.as_local() else {
            return Ok(None);
        };
        let state = self.lock();
        Ok(state.tables.get(&family).and_then(|table| table.get(&key).cloned()))
    }

    async fn find_by(&self, family: EntityFamily, field: &str, value: &Value) -> Result<Vec<Record>> {
        self.before_call().await?;
        let state = self.lock();
        Ok(state
            .tables
            .get(&family)
            .map(|table| {
                table
                    .values()
                    .filter(|record| record.get(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add(&self, family: EntityFamily, record: Record) -> Result<Record> {
        self.before_call().await?;
        let mut state = self.lock();
        Ok(Self::insert(&mut state, family, record))
    }

    async fn update(&self, family: EntityFamily, id: &EntityId, changes: Record) -> Result<Record> {
        self.before_call().await?;
        let key = id.as_local().ok_or_else(|| not_found(family, id))?;
        let mut state = self.lock();
        let record = state
            .tables
            .get_mut(&family)
            .and_then(|table| table.get_mut(&key))
            .ok_or_else(|| not_found(family, id))?;

        for (field, value) in changes {
            if field != "id" && field != "created_at" {
                record.insert(field, value);
            }
        }
        record.insert(
            "updated_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        Ok(record.clone())
    }

    async fn delete(&self, family: EntityFamily, id: &EntityId) -> Result<()> {
        self.before_call().await?;
        let key = id.as_local().ok_or_else(|| not_found(family, id))?;
        let mut state = self.lock();
        state
            .tables
            .get_mut(&family)
            .and_then(|table| table.remove(&key))
            .map(|_| ())
            .ok_or_else(|| not_found(family, id))
    }

    async fn bulk_add(&self, family: EntityFamily, records: Vec<Record>) -> Result<Vec<Record>> {
        self.before_call().await?;
        let mut state = self.lock();
        Ok(records
            .into_iter()
            .map(|record| Self::insert(&mut state, family, record))
            .collect())
    }

    async fn bulk_delete(&self, family: EntityFamily, ids: &[EntityId]) -> Result<usize> {
        self.before_call().await?;
        let mut state = self.lock();
        let Some(table) = state.tables.get_mut(&family) else {
            return Ok(0);
        };
        Ok(ids
            .iter()
            .filter_map(EntityId::as_local)
            .filter(|key| table.remove(key).is_some())
            .count())
    }

    async fn clear(&self, family: EntityFamily) -> Result<usize> {
        self.before_call().await?;
        let mut state = self.lock();
        Ok(state.tables.remove(&family).map_or(0, |table| table.len()))
    }
}
