//! Working memory: the bounded context buffer shared by the pipeline.

pub mod working;

use std::sync::Arc;

use tokio::sync::RwLock;

pub use working::{MemorySnapshot, WorkingMemory};

use crate::types::MemoryEntry;

/// Writer handle. Held only by the attention scheduler and the dispatcher.
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    inner: Arc<RwLock<WorkingMemory>>,
}

impl MemoryHandle {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(WorkingMemory::new(capacity))),
        }
    }

    pub async fn put(&self, entry: MemoryEntry) {
        self.inner.write().await.put(entry);
    }

    pub async fn snapshot(&self, limit: usize) -> Vec<MemoryEntry> {
        self.inner.read().await.snapshot(limit)
    }

    pub async fn get(&self, key: &str) -> Option<MemoryEntry> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn save(&self) -> MemorySnapshot {
        self.inner.read().await.save()
    }

    pub async fn load(&self, snapshot: MemorySnapshot) {
        self.inner.write().await.load(snapshot);
    }

    /// Read-only view for collaborators.
    pub fn reader(&self) -> MemoryReader {
        MemoryReader {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Read-only view of working memory. Readers always get owned snapshots.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    inner: Arc<RwLock<WorkingMemory>>,
}

impl MemoryReader {
    pub async fn snapshot(&self, limit: usize) -> Vec<MemoryEntry> {
        self.inner.read().await.snapshot(limit)
    }

    pub async fn get(&self, key: &str) -> Option<MemoryEntry> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
