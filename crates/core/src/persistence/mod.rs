//! Optional persistence collaborator for working memory and affect.

pub mod file;
pub mod pg;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use file::FileSnapshotStore;
pub use pg::PgSnapshotStore;

use crate::affect::{AffectHandle, AffectSnapshot};
use crate::error::CoreError;
use crate::memory::{MemoryHandle, MemorySnapshot};

/// Everything needed to resume the pipeline's shared state after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub memory: MemorySnapshot,
    pub affect: AffectSnapshot,
    pub saved_at: DateTime<Utc>,
}

impl PipelineSnapshot {
    pub async fn capture(memory: &MemoryHandle, affect: &AffectHandle) -> Self {
        Self {
            memory: memory.save().await,
            affect: affect.save().await,
            saved_at: Utc::now(),
        }
    }

    pub async fn restore(self, memory: &MemoryHandle, affect: &AffectHandle) {
        memory.load(self.memory).await;
        affect.load(self.affect).await;
    }
}

#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<PipelineSnapshot>, CoreError>;
    async fn save(&self, snapshot: &PipelineSnapshot) -> Result<(), CoreError>;
}
