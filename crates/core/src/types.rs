use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Unique id of a reasoning task.
pub type TaskId = Uuid;

// ── Event types ─────────────────────────────────────────────────

/// Kind of an incoming event. Unrecognized kinds parse to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserMessage,
    HardwareAlert,
    SystemUpdate,
    Timer,
    #[serde(other)]
    Unknown,
}

impl EventKind {
    pub const KNOWN: [EventKind; 4] = [
        Self::HardwareAlert,
        Self::UserMessage,
        Self::SystemUpdate,
        Self::Timer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::HardwareAlert => "hardware_alert",
            Self::SystemUpdate => "system_update",
            Self::Timer => "timer",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "user_message" => Self::UserMessage,
            "hardware_alert" => Self::HardwareAlert,
            "system_update" => Self::SystemUpdate,
            "timer" => Self::Timer,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable input record handed to the attention scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub arrival_time: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            arrival_time: Utc::now(),
        }
    }

    pub fn user_message(text: impl Into<String>) -> Self {
        Self::new(EventKind::UserMessage, serde_json::json!({ "text": text.into() }))
    }

    pub fn hardware_alert(payload: serde_json::Value) -> Self {
        Self::new(EventKind::HardwareAlert, payload)
    }

    pub fn system_update(payload: serde_json::Value) -> Self {
        Self::new(EventKind::SystemUpdate, payload)
    }

    pub fn timer(label: impl Into<String>) -> Self {
        Self::new(EventKind::Timer, serde_json::json!({ "timer": label.into() }))
    }

    /// Validate raw collaborator input.
    /// Requires an object with a string `kind` and a `payload`; `arrival_time` is optional RFC 3339.
    pub fn from_json(raw: &serde_json::Value) -> Result<Self, CoreError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| CoreError::InvalidEvent("event must be a JSON object".into()))?;

        let kind = obj
            .get("kind")
            .ok_or_else(|| CoreError::InvalidEvent("missing field `kind`".into()))?
            .as_str()
            .ok_or_else(|| CoreError::InvalidEvent("`kind` must be a string".into()))?;

        let payload = obj
            .get("payload")
            .cloned()
            .ok_or_else(|| CoreError::InvalidEvent("missing field `payload`".into()))?;

        let arrival_time = match obj.get("arrival_time") {
            None | Some(serde_json::Value::Null) => Utc::now(),
            Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map_err(|e| CoreError::InvalidEvent(format!("bad `arrival_time`: {e}")))?
                .with_timezone(&Utc),
            Some(_) => {
                return Err(CoreError::InvalidEvent("`arrival_time` must be an RFC 3339 string".into()));
            }
        };

        Ok(Self {
            id: Uuid::new_v4(),
            kind: EventKind::parse(kind),
            payload,
            arrival_time,
        })
    }
}

/// A prioritized, queued representation of an event.
/// Ordering key `(priority, created_at, seq)` ascending: lower priority value wins, FIFO within a priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusItem {
    pub priority: u32,
    pub event: Event,
    pub created_at: DateTime<Utc>,
    /// Monotonic creation counter; breaks ties between equal timestamps.
    pub seq: u64,
}

impl FocusItem {
    pub fn ordering_key(&self) -> (u32, DateTime<Utc>, u64) {
        (self.priority, self.created_at, self.seq)
    }
}

// ── Memory types ───────────────────────────────────────────────

/// Working memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub inserted_at: DateTime<Utc>,
    /// In `[0, 1]`.
    pub importance: f32,
    /// Insertion counter assigned by working memory.
    pub seq: u64,
}

impl MemoryEntry {
    /// Build an entry to `put`; `inserted_at` and `seq` are stamped on insertion.
    pub fn new(key: impl Into<String>, value: serde_json::Value, importance: f32) -> Self {
        Self {
            key: key.into(),
            value,
            inserted_at: Utc::now(),
            importance: unit_importance(importance),
            seq: 0,
        }
    }
}

/// Clamp to `[0, 1]`; `NaN` and infinities count as unimportant.
pub(crate) fn unit_importance(importance: f32) -> f32 {
    if importance.is_finite() { importance.clamp(0.0, 1.0) } else { 0.0 }
}

// ── Affect types ───────────────────────────────────────────────

/// Closed set of emotion labels. `Neutral` is the sentinel for an all-zero state and is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Joy,
    Trust,
    Fear,
    Surprise,
    Sadness,
    Disgust,
    Anger,
    Anticipation,
    Neutral,
}

impl Emotion {
    /// Labels that carry an intensity.
    pub const TRACKED: [Emotion; 8] = [
        Self::Joy,
        Self::Trust,
        Self::Fear,
        Self::Surprise,
        Self::Sadness,
        Self::Disgust,
        Self::Anger,
        Self::Anticipation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Joy => "joy",
            Self::Trust => "trust",
            Self::Fear => "fear",
            Self::Surprise => "surprise",
            Self::Sadness => "sadness",
            Self::Disgust => "disgust",
            Self::Anger => "anger",
            Self::Anticipation => "anticipation",
            Self::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "joy" => Some(Self::Joy),
            "trust" => Some(Self::Trust),
            "fear" => Some(Self::Fear),
            "surprise" => Some(Self::Surprise),
            "sadness" => Some(Self::Sadness),
            "disgust" => Some(Self::Disgust),
            "anger" => Some(Self::Anger),
            "anticipation" => Some(Self::Anticipation),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }

    /// Position in `TRACKED`, `None` for `Neutral`.
    pub fn index(&self) -> Option<usize> {
        Self::TRACKED.iter().position(|e| e == self)
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the affective state, published after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectReading {
    pub intensities: BTreeMap<Emotion, f32>,
    pub dominant: Emotion,
    pub stability: f32,
}

impl AffectReading {
    pub fn intensity(&self, emotion: Emotion) -> f32 {
        self.intensities.get(&emotion).copied().unwrap_or(0.0)
    }

    /// max(fear, surprise): the stress signal used for scheduling.
    pub fn stress(&self) -> f32 {
        self.intensity(Emotion::Fear).max(self.intensity(Emotion::Surprise))
    }
}

impl Default for AffectReading {
    fn default() -> Self {
        Self {
            intensities: Emotion::TRACKED.iter().map(|e| (*e, 0.0)).collect(),
            dominant: Emotion::Neutral,
            stability: 0.0,
        }
    }
}

// ── Worker types ───────────────────────────────────────────────

/// Identifier of a reasoning worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Rationale length bounds for a proposal.
pub const RATIONALE_MIN: usize = 3;
pub const RATIONALE_MAX: usize = 7;

/// One worker's candidate decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub worker_id: WorkerId,
    pub decision: serde_json::Value,
    /// In `[0, 1]`.
    pub confidence: f32,
    /// 3 to 7 explanation lines.
    pub rationale: Vec<String>,
}

impl Proposal {
    /// Build a proposal, clamping confidence. Rejects a rationale outside 3..=7 lines.
    pub fn new(
        worker_id: WorkerId,
        decision: serde_json::Value,
        confidence: f32,
        rationale: Vec<String>,
    ) -> Result<Self, crate::error::WorkerError> {
        if !(RATIONALE_MIN..=RATIONALE_MAX).contains(&rationale.len()) {
            return Err(crate::error::WorkerError::Malformed(format!(
                "rationale has {} lines, expected {RATIONALE_MIN}..={RATIONALE_MAX}",
                rationale.len()
            )));
        }
        let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
        Ok(Self {
            worker_id,
            decision,
            confidence,
            rationale,
        })
    }
}

// ── Consensus types ────────────────────────────────────────────

/// How an arbitration concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Unanimous,
    Majority,
    Escalated,
    NoConsensus,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unanimous => "unanimous",
            Self::Majority => "majority",
            Self::Escalated => "escalated",
            Self::NoConsensus => "no_consensus",
        }
    }
}

/// Summary of one decision group during arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub decision: serde_json::Value,
    pub mass: f32,
    pub members: Vec<WorkerId>,
}

/// One intermediate step of arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ConsensusStep {
    Filtered { kept: Vec<WorkerId>, dropped: Vec<WorkerId> },
    Grouped { groups: Vec<GroupSummary> },
    Majority { decision: serde_json::Value, mass: f32 },
    Escalated { worker: WorkerId, decision: serde_json::Value },
    EscalationUnavailable { worker: WorkerId },
    NoConsensus,
}

/// Output of the consensus engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitratedDecision {
    pub task_id: TaskId,
    pub final_decision: serde_json::Value,
    /// Agreement ratio in `[0, 1]`.
    pub confidence_score: f32,
    pub dissent: BTreeSet<WorkerId>,
    pub consensus_path: Vec<ConsensusStep>,
    pub outcome: Outcome,
}

impl ArbitratedDecision {
    pub fn no_consensus(task_id: TaskId, consensus_path: Vec<ConsensusStep>) -> Self {
        Self {
            task_id,
            final_decision: serde_json::Value::Null,
            confidence_score: 0.0,
            dissent: BTreeSet::new(),
            consensus_path,
            outcome: Outcome::NoConsensus,
        }
    }

    pub fn is_no_consensus(&self) -> bool {
        self.outcome == Outcome::NoConsensus
    }
}

/// Observable record emitted to the result sink once per completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub task_id: TaskId,
    pub final_decision: serde_json::Value,
    pub confidence_score: f32,
    pub dissent: BTreeSet<WorkerId>,
    pub consensus_path: Vec<ConsensusStep>,
    pub outcome: Outcome,
}

impl From<&ArbitratedDecision> for DecisionRecord {
    fn from(d: &ArbitratedDecision) -> Self {
        Self {
            task_id: d.task_id,
            final_decision: d.final_decision.clone(),
            confidence_score: d.confidence_score,
            dissent: d.dissent.clone(),
            consensus_path: d.consensus_path.clone(),
            outcome: d.outcome,
        }
    }
}

// ── Task types ─────────────────────────────────────────────────

/// Immutable context shared by every worker of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub focus: FocusItem,
    /// Working memory snapshot, `(importance desc, inserted_at desc)`.
    pub memory: Vec<MemoryEntry>,
    pub affect: AffectReading,
}

/// Lifecycle: queued → active → completed. No transitions back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Active,
    Completed,
}

/// The unit the dispatcher schedules.
#[derive(Debug, Clone)]
pub struct ReasoningTask {
    pub task_id: TaskId,
    pub priority: u32,
    pub created_at: DateTime<Utc>,
    pub seq: u64,
    pub context: Arc<TaskContext>,
}

/// A task that reached `completed`, kept in the dispatcher archive.
#[derive(Debug, Clone)]
pub struct CompletedTask {
    pub task_id: TaskId,
    pub priority: u32,
    pub event_kind: EventKind,
    pub decision: ArbitratedDecision,
    pub completed_at: DateTime<Utc>,
}

/// Dispatcher snapshot, broadcast after every transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStatus {
    pub queue_depth: usize,
    pub active_task: Option<TaskId>,
    pub active_count: usize,
    pub completed_count: u64,
}

/// Availability of one worker across all fan-outs so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub specialization: crate::workers::Specialization,
    pub answered: u64,
    pub timed_out: u64,
    pub failed: u64,
}

impl WorkerStatus {
    pub fn absent(&self) -> u64 {
        self.timed_out + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_roundtrip() {
        for kind in EventKind::KNOWN {
            assert_eq!(EventKind::parse(kind.as_str()), kind);
        }
        assert_eq!(EventKind::parse("telepathy"), EventKind::Unknown);
    }

    #[test]
    fn event_kind_serde_fails_open() {
        let k: EventKind = serde_json::from_str("\"solar_flare\"").unwrap();
        assert_eq!(k, EventKind::Unknown);
        let k: EventKind = serde_json::from_str("\"hardware_alert\"").unwrap();
        assert_eq!(k, EventKind::HardwareAlert);
    }

    #[test]
    fn event_from_json_valid() {
        let raw = serde_json::json!({
            "kind": "hardware_alert",
            "payload": {"sensor": "cpu_temp", "value": 97},
            "arrival_time": "2026-01-02T03:04:05Z"
        });
        let event = Event::from_json(&raw).unwrap();
        assert_eq!(event.kind, EventKind::HardwareAlert);
        assert_eq!(event.payload["sensor"], "cpu_temp");
        assert_eq!(event.arrival_time.to_rfc3339(), "2026-01-02T03:04:05+00:00");
    }

    #[test]
    fn event_from_json_unknown_kind_accepted() {
        let raw = serde_json::json!({"kind": "solar_flare", "payload": null});
        let event = Event::from_json(&raw).unwrap();
        assert_eq!(event.kind, EventKind::Unknown);
    }

    #[test]
    fn event_from_json_rejects_malformed() {
        let cases = [
            serde_json::json!("not an object"),
            serde_json::json!({"payload": {}}),
            serde_json::json!({"kind": 7, "payload": {}}),
            serde_json::json!({"kind": "timer"}),
            serde_json::json!({"kind": "timer", "payload": {}, "arrival_time": "yesterday"}),
            serde_json::json!({"kind": "timer", "payload": {}, "arrival_time": 12}),
        ];
        for raw in &cases {
            assert!(
                matches!(Event::from_json(raw), Err(CoreError::InvalidEvent(_))),
                "accepted malformed event {raw}"
            );
        }
    }

    #[test]
    fn proposal_rejects_bad_rationale_length() {
        let short = Proposal::new("a".into(), "x".into(), 0.5, vec!["one".into(), "two".into()]);
        assert!(short.is_err());
        let long = Proposal::new("a".into(), "x".into(), 0.5, vec!["l".into(); 8]);
        assert!(long.is_err());
        let ok = Proposal::new("a".into(), "x".into(), 0.5, vec!["l".into(); 3]);
        assert!(ok.is_ok());
    }

    #[test]
    fn proposal_clamps_confidence() {
        let p = Proposal::new("a".into(), "x".into(), 1.7, vec!["l".into(); 3]).unwrap();
        assert!((p.confidence - 1.0).abs() < f32::EPSILON);
        let p = Proposal::new("a".into(), "x".into(), f32::NAN, vec!["l".into(); 3]).unwrap();
        assert_eq!(p.confidence, 0.0);
    }

    #[test]
    fn affect_reading_stress_is_max_of_fear_and_surprise() {
        let mut reading = AffectReading::default();
        reading.intensities.insert(Emotion::Fear, 0.3);
        reading.intensities.insert(Emotion::Surprise, 0.6);
        assert!((reading.stress() - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn emotion_index_excludes_neutral() {
        assert_eq!(Emotion::Joy.index(), Some(0));
        assert_eq!(Emotion::Anticipation.index(), Some(7));
        assert_eq!(Emotion::Neutral.index(), None);
        assert_eq!(Emotion::parse("fear"), Some(Emotion::Fear));
        assert_eq!(Emotion::parse("boredom"), None);
    }

    #[test]
    fn consensus_step_serializes_tagged() {
        let step = ConsensusStep::Escalated { worker: "meta_observer".into(), decision: "x".into() };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["step"], "escalated");
        assert_eq!(json["worker"], "meta_observer");
    }
}
