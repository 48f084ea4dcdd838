use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{MemoryEntry, unit_importance};

/// Persistable form of working memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub capacity: usize,
    pub next_seq: u64,
    pub entries: Vec<MemoryEntry>,
}

/// Bounded, key-addressed context buffer.
/// Size never exceeds `capacity`; overflow evicts the minimum `(importance, inserted_at, seq)`.
#[derive(Debug)]
pub struct WorkingMemory {
    entries: HashMap<String, MemoryEntry>,
    capacity: usize,
    next_seq: u64,
}

impl WorkingMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.saturating_add(1)),
            capacity,
            next_seq: 0,
        }
    }

    /// Insert or overwrite by key, stamping `inserted_at` and `seq`. Evicts on overflow.
    pub fn put(&mut self, mut entry: MemoryEntry) {
        entry.inserted_at = Utc::now();
        entry.seq = self.next_seq;
        entry.importance = unit_importance(entry.importance);
        self.next_seq += 1;
        self.entries.insert(entry.key.clone(), entry);

        for evicted in self.evict_if_needed() {
            tracing::debug!(
                key = %evicted.key,
                importance = evicted.importance,
                "working memory evicted entry"
            );
        }
    }

    /// Up to `limit` entries ordered by `(importance desc, inserted_at desc)`.
    pub fn snapshot(&self, limit: usize) -> Vec<MemoryEntry> {
        let mut all: Vec<&MemoryEntry> = self.entries.values().collect();
        all.sort_by(|a, b| retention_order(b, a));
        all.into_iter().take(limit).cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<&MemoryEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Evict exactly one entry per excess insertion, least important then oldest first.
    pub(crate) fn evict_if_needed(&mut self) -> Vec<MemoryEntry> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .values()
                .min_by(|a, b| retention_order(a, b))
                .map(|e| e.key.clone());
            match victim.and_then(|k| self.entries.remove(&k)) {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    pub fn save(&self) -> MemorySnapshot {
        let mut entries: Vec<MemoryEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        MemorySnapshot {
            capacity: self.capacity,
            next_seq: self.next_seq,
            entries,
        }
    }

    /// Replace contents with a saved snapshot, keeping this memory's capacity.
    pub fn load(&mut self, snapshot: MemorySnapshot) {
        let max_seq = snapshot.entries.iter().map(|e| e.seq + 1).max().unwrap_or(0);
        self.next_seq = snapshot.next_seq.max(max_seq);
        self.entries = snapshot
            .entries
            .into_iter()
            .map(|mut e| {
                e.importance = unit_importance(e.importance);
                (e.key.clone(), e)
            })
            .collect();
        let dropped = self.evict_if_needed();
        if !dropped.is_empty() {
            tracing::info!(dropped = dropped.len(), "snapshot exceeded capacity, evicted on load");
        }
    }
}

/// Ascending retention order: `Less` means evicted first.
fn retention_order(a: &MemoryEntry, b: &MemoryEntry) -> Ordering {
    a.importance
        .total_cmp(&b.importance)
        .then(a.inserted_at.cmp(&b.inserted_at))
        .then(a.seq.cmp(&b.seq))
}
