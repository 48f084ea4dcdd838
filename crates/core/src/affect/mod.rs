//! Affective state: a decaying emotion vector that biases scheduling and
//! is updated by reasoning outcomes.

pub mod feedback;
pub mod state;
pub mod ticker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};

pub use state::{AffectEngine, AffectSnapshot};

use crate::types::{AffectReading, Emotion};

/// Read-only subscription to affect readings.
pub type AffectWatch = watch::Receiver<AffectReading>;

/// Shared handle passed into every component that touches affect.
/// Mutation goes through the engine's own `trigger`/`tick`; readers use the watch snapshot.
#[derive(Debug, Clone)]
pub struct AffectHandle {
    engine: Arc<Mutex<AffectEngine>>,
    rx: AffectWatch,
}

impl AffectHandle {
    pub fn new(decay_rate: f32, window_size: usize) -> Self {
        let (engine, rx) = AffectEngine::new(decay_rate, window_size);
        Self {
            engine: Arc::new(Mutex::new(engine)),
            rx,
        }
    }

    pub async fn trigger(&self, label: Emotion, magnitude: f32) {
        self.engine.lock().await.trigger(label, magnitude);
    }

    pub async fn tick(&self, elapsed: Duration) {
        self.engine.lock().await.tick(elapsed);
    }

    pub async fn dominant(&self) -> Emotion {
        self.engine.lock().await.dominant()
    }

    pub async fn stability(&self) -> f32 {
        self.engine.lock().await.stability()
    }

    /// Latest published reading without taking the lock.
    pub fn reading(&self) -> AffectReading {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> AffectWatch {
        self.rx.clone()
    }

    pub async fn save(&self) -> AffectSnapshot {
        self.engine.lock().await.save()
    }

    pub async fn load(&self, snapshot: AffectSnapshot) {
        self.engine.lock().await.load(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_clones_share_state() {
        let a = AffectHandle::new(0.1, 10);
        let b = a.clone();
        a.trigger(Emotion::Surprise, 0.6).await;
        assert_eq!(b.dominant().await, Emotion::Surprise);
        assert!((b.reading().intensity(Emotion::Surprise) - 0.6).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn subscriber_sees_tick() {
        let handle = AffectHandle::new(1.0, 10);
        let mut rx = handle.subscribe();
        handle.trigger(Emotion::Fear, 0.5).await;
        rx.mark_unchanged();
        handle.tick(Duration::from_secs(1)).await;
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().intensity(Emotion::Fear) < 0.5);
    }
}
