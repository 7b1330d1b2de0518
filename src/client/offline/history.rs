//! Bounded log of settled updates, oldest evicted first.

use crate::shared::entity::EntityId;
use crate::shared::update::{UpdateHistoryEntry, UpdateStatus};
use std::collections::VecDeque;

/// Append-only history with a fixed capacity
#[derive(Debug, Clone)]
pub struct UpdateHistory {
    entries: VecDeque<UpdateHistoryEntry>,
    limit: usize,
}

impl UpdateHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    /// Append an entry, evicting the oldest when full
    pub fn push(&mut self, entry: UpdateHistoryEntry) {
        if self.limit == 0 {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Entries oldest first
    pub fn entries(&self) -> Vec<UpdateHistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Entries recorded for one entity, oldest first
    pub fn for_entity(&self, id: &EntityId) -> Vec<UpdateHistoryEntry> {
        self.entries
            .iter()
            .filter(|entry| &entry.entity_id == id)
            .cloned()
            .collect()
    }

    /// Number of entries with the given status
    pub fn count_status(&self, status: UpdateStatus) -> usize {
        self.entries.iter().filter(|entry| entry.status == status).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
