use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::types::EventKind;

/// Prefix of per-kind priority band keys in `cogito_config`.
const BAND_KEY_PREFIX: &str = "priority_band.";

/// All pipeline parameters. Loaded from the `cogito_config` table at startup.
/// First boot writes defaults; subsequent boots read existing values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CogitoCfg {
    // working memory
    pub memory_capacity: usize,
    pub context_limit: usize,

    // affective state
    pub emotional_decay_rate: f32,
    pub stability_window: usize,
    pub tick_ms: u64,

    // attention
    pub priority_bands: BTreeMap<EventKind, u32>,
    pub stress_threshold: f32,

    // workers & consensus
    pub worker_timeout_ms: u64,
    pub confidence_floor: f32,
    pub tie_tolerance: f32,
    pub tie_break_worker: String,
    pub equivalence: String,

    // dispatcher
    pub max_active_tasks: usize,
    pub archive_capacity: usize,
    pub followup_below: f32,

    // channels
    pub event_channel_capacity: usize,
    pub result_channel_capacity: usize,

    // shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for CogitoCfg {
    fn default() -> Self {
        Self {
            memory_capacity: 32,
            context_limit: 16,
            emotional_decay_rate: 0.1,
            stability_window: 10,
            tick_ms: 1000,
            priority_bands: default_bands(),
            stress_threshold: 0.5,
            worker_timeout_ms: 5000,
            confidence_floor: 0.2,
            tie_tolerance: 0.05,
            tie_break_worker: "meta_observer".into(),
            equivalence: "exact".into(),
            max_active_tasks: 1,
            archive_capacity: 64,
            followup_below: 0.0,
            event_channel_capacity: 256,
            result_channel_capacity: 64,
            shutdown_timeout_secs: 5,
        }
    }
}

fn default_bands() -> BTreeMap<EventKind, u32> {
    BTreeMap::from([
        (EventKind::HardwareAlert, 0),
        (EventKind::UserMessage, 1),
        (EventKind::SystemUpdate, 2),
        (EventKind::Timer, 3),
    ])
}

impl CogitoCfg {
    /// Load config from `cogito_config` table. If table is empty, seed with defaults.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM cogito_config")
            .fetch_all(pool)
            .await?;

        if rows.is_empty() {
            let cfg = Self::default();
            cfg.seed(pool).await?;
            return Ok(cfg);
        }

        let map: HashMap<String, String> = rows.into_iter().collect();
        Ok(Self::from_map(&map))
    }

    /// Write all default values into `cogito_config` table.
    async fn seed(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        for (key, value, desc) in &self.to_entries() {
            sqlx::query(
                "INSERT INTO cogito_config (key, value, description) VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .bind(desc)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    /// Build from a key/value map. Missing or unparsable values fall back to defaults.
    pub fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();

        let mut priority_bands = d.priority_bands.clone();
        for kind in EventKind::KNOWN {
            let key = format!("{BAND_KEY_PREFIX}{}", kind.as_str());
            if let Some(band) = m.get(&key).and_then(|v| v.parse().ok()) {
                priority_bands.insert(kind, band);
            }
        }

        Self {
            memory_capacity: get_or(m, "memory_capacity", d.memory_capacity),
            context_limit: get_or(m, "context_limit", d.context_limit),
            emotional_decay_rate: get_finite_or(m, "emotional_decay_rate", d.emotional_decay_rate),
            stability_window: get_or(m, "stability_window", d.stability_window),
            tick_ms: get_or(m, "tick_ms", d.tick_ms),
            priority_bands,
            stress_threshold: get_finite_or(m, "stress_threshold", d.stress_threshold),
            worker_timeout_ms: get_or(m, "worker_timeout_ms", d.worker_timeout_ms),
            confidence_floor: get_finite_or(m, "confidence_floor", d.confidence_floor),
            tie_tolerance: get_finite_or(m, "tie_tolerance", d.tie_tolerance),
            tie_break_worker: get_or(m, "tie_break_worker", d.tie_break_worker),
            equivalence: get_or(m, "equivalence", d.equivalence),
            max_active_tasks: get_or(m, "max_active_tasks", d.max_active_tasks),
            archive_capacity: get_or(m, "archive_capacity", d.archive_capacity),
            followup_below: get_finite_or(m, "followup_below", d.followup_below),
            event_channel_capacity: get_or(m, "event_channel_capacity", d.event_channel_capacity),
            result_channel_capacity: get_or(m, "result_channel_capacity", d.result_channel_capacity),
            shutdown_timeout_secs: get_or(m, "shutdown_timeout_secs", d.shutdown_timeout_secs),
        }
    }

    fn to_entries(&self) -> Vec<(String, String, &'static str)> {
        let mut entries = vec![
            ("memory_capacity".to_string(), self.memory_capacity.to_string(), "Working memory max entries"),
            ("context_limit".to_string(), self.context_limit.to_string(), "Memory entries copied into each task context"),
            ("emotional_decay_rate".to_string(), self.emotional_decay_rate.to_string(), "Affect decay rate per second"),
            ("stability_window".to_string(), self.stability_window.to_string(), "Dominant-emotion observations in the stability window"),
            ("tick_ms".to_string(), self.tick_ms.to_string(), "Affect tick cadence ms"),
            ("stress_threshold".to_string(), self.stress_threshold.to_string(), "Fear/surprise level above which priority is boosted"),
            ("worker_timeout_ms".to_string(), self.worker_timeout_ms.to_string(), "Per-worker proposal timeout ms"),
            ("confidence_floor".to_string(), self.confidence_floor.to_string(), "Proposals below this confidence are discarded"),
            ("tie_tolerance".to_string(), self.tie_tolerance.to_string(), "Share difference that counts as a tie"),
            ("tie_break_worker".to_string(), self.tie_break_worker.clone(), "Worker whose proposal decides a tie"),
            ("equivalence".to_string(), self.equivalence.clone(), "Decision equivalence: exact | normalized"),
            ("max_active_tasks".to_string(), self.max_active_tasks.to_string(), "Concurrent reasoning cycles"),
            ("archive_capacity".to_string(), self.archive_capacity.to_string(), "Completed tasks kept for inspection"),
            ("followup_below".to_string(), self.followup_below.to_string(), "Schedule a review below this confidence (0 = off)"),
            ("event_channel_capacity".to_string(), self.event_channel_capacity.to_string(), "Inbound event channel capacity"),
            ("result_channel_capacity".to_string(), self.result_channel_capacity.to_string(), "Result sink channel capacity"),
            ("shutdown_timeout_secs".to_string(), self.shutdown_timeout_secs.to_string(), "Graceful shutdown timeout seconds"),
        ];
        for (kind, band) in &self.priority_bands {
            entries.push((
                format!("{BAND_KEY_PREFIX}{}", kind.as_str()),
                band.to_string(),
                "Priority band for event kind",
            ));
        }
        entries
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Least urgent configured band; used for unknown kinds.
    pub fn lowest_band(&self) -> u32 {
        self.priority_bands.values().copied().max().unwrap_or(0)
    }

    /// Band for a kind, failing open to the least urgent band.
    pub fn band_for(&self, kind: EventKind) -> u32 {
        self.priority_bands
            .get(&kind)
            .copied()
            .unwrap_or_else(|| self.lowest_band())
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Like `get_or`, but `NaN` and infinities also fall back.
fn get_finite_or(map: &HashMap<String, String>, key: &str, default: f32) -> f32 {
    map.get(key)
        .and_then(|v| v.parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}
