//! Attention scheduler: turns raw events into prioritized focus items.

pub mod priority;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::affect::AffectWatch;
use crate::config::CogitoCfg;
use crate::error::CoreError;
use crate::memory::MemoryHandle;
use crate::types::{Event, FocusItem, MemoryEntry};

/// Key of the context entry written for an event.
pub fn context_key(event: &Event) -> String {
    format!("event:{}", event.id)
}

/// Assigns priorities and records event context. Reads affect, never mutates it.
#[derive(Debug)]
pub struct AttentionScheduler {
    cfg: Arc<CogitoCfg>,
    affect: AffectWatch,
    memory: MemoryHandle,
    seq: AtomicU64,
}

impl AttentionScheduler {
    pub fn new(cfg: Arc<CogitoCfg>, affect: AffectWatch, memory: MemoryHandle) -> Self {
        Self {
            cfg,
            affect,
            memory,
            seq: AtomicU64::new(0),
        }
    }

    /// Prioritize a well-formed event. Unknown kinds get the least urgent band.
    pub async fn submit(&self, event: Event) -> FocusItem {
        let reading = self.affect.borrow().clone();
        let priority = priority::priority_for(&self.cfg, event.kind, &reading);
        let importance = priority::context_importance(&self.cfg, event.kind);

        self.memory
            .put(MemoryEntry::new(
                context_key(&event),
                serde_json::json!({
                    "kind": event.kind.as_str(),
                    "payload": event.payload,
                    "priority": priority,
                }),
                importance,
            ))
            .await;

        tracing::debug!(
            event_id = %event.id,
            kind = %event.kind,
            priority,
            stress = reading.stress(),
            "event focused"
        );

        FocusItem {
            priority,
            event,
            created_at: Utc::now(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Validate raw input at the boundary, then submit.
    /// A rejected event leaves working memory untouched.
    pub async fn submit_raw(&self, raw: &serde_json::Value) -> Result<FocusItem, CoreError> {
        let event = Event::from_json(raw).inspect_err(|e| {
            tracing::warn!(error = %e, "rejected malformed event");
        })?;
        Ok(self.submit(event).await)
    }
}
