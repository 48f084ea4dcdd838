use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::types::{AffectReading, Emotion};

/// Intensities below this snap to zero after decay.
const DECAY_FLOOR: f32 = 1e-4;
/// Intensities this close count as equal when picking the dominant emotion.
const TIE_EPSILON: f32 = 1e-6;

/// Persistable form of the affective state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectSnapshot {
    pub intensities: BTreeMap<Emotion, f32>,
    /// Trigger sequence number of the latest trigger per emotion.
    pub last_trigger: BTreeMap<Emotion, u64>,
    /// Past dominant observations, oldest first.
    pub window: Vec<Emotion>,
    pub next_seq: u64,
}

/// Decaying emotion vector. Sole mutator of its own state; every mutation
/// is published on a watch channel as an [`AffectReading`].
#[derive(Debug)]
pub struct AffectEngine {
    intensities: [f32; 8],
    last_trigger: [Option<u64>; 8],
    next_seq: u64,
    window: VecDeque<Emotion>,
    window_size: usize,
    decay_rate: f32,
    tx: watch::Sender<AffectReading>,
}

impl AffectEngine {
    /// Create a zeroed state. Returns the engine and a receiver for readers.
    pub fn new(decay_rate: f32, window_size: usize) -> (Self, watch::Receiver<AffectReading>) {
        let (tx, rx) = watch::channel(AffectReading::default());
        let engine = Self {
            intensities: [0.0; 8],
            last_trigger: [None; 8],
            next_seq: 0,
            window: VecDeque::with_capacity(window_size),
            window_size,
            decay_rate: if decay_rate.is_finite() { decay_rate.max(0.0) } else { 0.0 },
            tx,
        };
        (engine, rx)
    }

    fn broadcast(&self) {
        // Only fails when every receiver is gone.
        let _ = self.tx.send(self.reading());
    }

    /// Additive update clamped to `[0, 1]`. `Neutral` is not a stored label and is ignored.
    pub fn trigger(&mut self, label: Emotion, magnitude: f32) {
        let Some(i) = label.index() else {
            tracing::debug!("ignoring trigger on neutral sentinel");
            return;
        };
        if !magnitude.is_finite() {
            tracing::warn!(emotion = %label, "ignoring non-finite trigger magnitude");
            return;
        }
        self.intensities[i] = (self.intensities[i] + magnitude).clamp(0.0, 1.0);
        self.last_trigger[i] = Some(self.next_seq);
        self.next_seq += 1;

        self.observe(self.dominant());
        self.broadcast();
    }

    /// Multiplicative decay by `exp(-decay_rate * elapsed)`. Zero elapsed is a no-op.
    pub fn tick(&mut self, elapsed: Duration) {
        if elapsed.is_zero() {
            return;
        }
        let factor = (-self.decay_rate * elapsed.as_secs_f32()).exp();
        for v in &mut self.intensities {
            *v *= factor;
            if *v < DECAY_FLOOR {
                *v = 0.0;
            }
        }
        self.broadcast();
    }

    /// Emotion with maximum intensity; ties go to the most recently triggered.
    pub fn dominant(&self) -> Emotion {
        let max = self.intensities.iter().copied().fold(0.0_f32, f32::max);
        if max <= 0.0 {
            return Emotion::Neutral;
        }
        let mut best: Option<(usize, Option<u64>)> = None;
        for (i, &v) in self.intensities.iter().enumerate() {
            if max - v > TIE_EPSILON {
                continue;
            }
            let recency = self.last_trigger[i];
            match best {
                Some((_, r)) if r >= recency => {}
                _ => best = Some((i, recency)),
            }
        }
        best.map(|(i, _)| Emotion::TRACKED[i]).unwrap_or(Emotion::Neutral)
    }

    /// `1 - distinct / total` over the observation window; 0 when empty.
    pub fn stability(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        let distinct = self.window.iter().collect::<HashSet<_>>().len();
        1.0 - distinct as f32 / self.window.len() as f32
    }

    pub fn intensity(&self, label: Emotion) -> f32 {
        label.index().map(|i| self.intensities[i]).unwrap_or(0.0)
    }

    pub fn reading(&self) -> AffectReading {
        AffectReading {
            intensities: Emotion::TRACKED
                .iter()
                .zip(self.intensities)
                .map(|(e, v)| (*e, v))
                .collect(),
            dominant: self.dominant(),
            stability: self.stability(),
        }
    }

    fn observe(&mut self, dominant: Emotion) {
        if self.window_size == 0 {
            return;
        }
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(dominant);
    }

    pub fn save(&self) -> AffectSnapshot {
        let mut intensities = BTreeMap::new();
        let mut last_trigger = BTreeMap::new();
        for (i, e) in Emotion::TRACKED.iter().enumerate() {
            intensities.insert(*e, self.intensities[i]);
            if let Some(seq) = self.last_trigger[i] {
                last_trigger.insert(*e, seq);
            }
        }
        AffectSnapshot {
            intensities,
            last_trigger,
            window: self.window.iter().copied().collect(),
            next_seq: self.next_seq,
        }
    }

    /// Replace state with a snapshot. Unknown or out-of-range values are sanitized.
    pub fn load(&mut self, snapshot: AffectSnapshot) {
        self.intensities = [0.0; 8];
        self.last_trigger = [None; 8];
        for (e, v) in &snapshot.intensities {
            if let Some(i) = e.index() {
                self.intensities[i] = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
            }
        }
        let mut max_seq = 0;
        for (e, seq) in &snapshot.last_trigger {
            if let Some(i) = e.index() {
                self.last_trigger[i] = Some(*seq);
                max_seq = max_seq.max(seq + 1);
            }
        }
        self.next_seq = snapshot.next_seq.max(max_seq);

        let skip = snapshot.window.len().saturating_sub(self.window_size);
        self.window = snapshot.window.into_iter().skip(skip).collect();
        self.broadcast();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (AffectEngine, watch::Receiver<AffectReading>) {
        AffectEngine::new(0.1, 10)
    }

    #[test]
    fn trigger_is_additive_and_clamped() {
        let (mut a, _rx) = engine();
        a.trigger(Emotion::Fear, 0.6);
        a.trigger(Emotion::Fear, 0.6);
        assert!((a.intensity(Emotion::Fear) - 1.0).abs() < f32::EPSILON);
        a.trigger(Emotion::Fear, -2.0);
        assert_eq!(a.intensity(Emotion::Fear), 0.0);
    }

    #[test]
    fn trigger_broadcasts_reading() {
        let (mut a, rx) = engine();
        a.trigger(Emotion::Joy, 0.4);
        let reading = rx.borrow().clone();
        assert!((reading.intensity(Emotion::Joy) - 0.4).abs() < f32::EPSILON);
        assert_eq!(reading.dominant, Emotion::Joy);
    }

    #[test]
    fn tick_zero_elapsed_is_noop() {
        let (mut a, _rx) = engine();
        a.trigger(Emotion::Surprise, 0.7);
        let before = a.save();
        a.tick(Duration::ZERO);
        assert_eq!(a.save(), before);
    }

    #[test]
    fn tick_decays_exponentially() {
        let (mut a, _rx) = engine();
        a.trigger(Emotion::Trust, 0.8);
        a.tick(Duration::from_secs(1));
        let expected = 0.8 * (-0.1_f32).exp();
        assert!((a.intensity(Emotion::Trust) - expected).abs() < 1e-5);
    }

    #[test]
    fn tick_is_monotonically_non_increasing() {
        let (mut a, _rx) = engine();
        a.trigger(Emotion::Anger, 0.9);
        a.trigger(Emotion::Joy, 0.2);
        let mut prev = a.reading();
        for ms in [0, 10, 500, 1000, 3000, 60_000] {
            a.tick(Duration::from_millis(ms));
            let now = a.reading();
            for e in Emotion::TRACKED {
                assert!(now.intensity(e) <= prev.intensity(e));
            }
            prev = now;
        }
    }

    #[test]
    fn long_decay_snaps_to_neutral() {
        let (mut a, _rx) = engine();
        a.trigger(Emotion::Fear, 1.0);
        a.tick(Duration::from_secs(600));
        assert_eq!(a.intensity(Emotion::Fear), 0.0);
        assert_eq!(a.dominant(), Emotion::Neutral);
    }

    #[test]
    fn dominant_is_neutral_when_all_zero() {
        let (a, _rx) = engine();
        assert_eq!(a.dominant(), Emotion::Neutral);
    }

    #[test]
    fn dominant_tie_goes_to_most_recent_trigger() {
        let (mut a, _rx) = engine();
        a.trigger(Emotion::Joy, 0.5);
        a.trigger(Emotion::Fear, 0.5);
        assert_eq!(a.dominant(), Emotion::Fear);
        a.trigger(Emotion::Joy, 0.0);
        assert_eq!(a.dominant(), Emotion::Joy);
    }

    #[test]
    fn neutral_trigger_is_ignored() {
        let (mut a, _rx) = engine();
        a.trigger(Emotion::Neutral, 0.5);
        assert_eq!(a.dominant(), Emotion::Neutral);
        assert_eq!(a.stability(), 0.0);
    }

    #[test]
    fn stability_over_window() {
        let (mut a, _rx) = AffectEngine::new(0.1, 4);
        assert_eq!(a.stability(), 0.0);
        for _ in 0..4 {
            a.trigger(Emotion::Trust, 0.1);
        }
        // four observations, one distinct
        assert!((a.stability() - 0.75).abs() < 1e-6);

        a.trigger(Emotion::Fear, 0.9);
        // window now trust, trust, trust, fear
        assert!((a.stability() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn single_observation_has_zero_stability() {
        let (mut a, _rx) = engine();
        a.trigger(Emotion::Joy, 0.3);
        assert_eq!(a.stability(), 0.0);
    }

    #[test]
    fn save_load_roundtrip() {
        let (mut a, _rx) = AffectEngine::new(0.1, 3);
        a.trigger(Emotion::Joy, 0.5);
        a.trigger(Emotion::Fear, 0.5);
        a.trigger(Emotion::Sadness, 0.2);
        let saved = a.save();
        let json = serde_json::to_string(&saved).unwrap();

        let (mut b, rx) = AffectEngine::new(0.1, 3);
        b.load(serde_json::from_str(&json).unwrap());
        assert_eq!(b.save(), saved);
        assert_eq!(b.dominant(), Emotion::Fear);
        assert_eq!(rx.borrow().dominant, Emotion::Fear);

        // recency continues past the restored sequence
        b.trigger(Emotion::Joy, 0.0);
        assert_eq!(b.dominant(), Emotion::Joy);
    }

    #[test]
    fn load_trims_window_to_size() {
        let (mut a, _rx) = AffectEngine::new(0.1, 2);
        a.load(AffectSnapshot {
            intensities: BTreeMap::new(),
            last_trigger: BTreeMap::new(),
            window: vec![Emotion::Joy, Emotion::Fear, Emotion::Fear],
            next_seq: 0,
        });
        assert_eq!(a.save().window, vec![Emotion::Fear, Emotion::Fear]);
    }
}
