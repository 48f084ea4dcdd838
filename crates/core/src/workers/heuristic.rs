use crate::error::WorkerError;
use crate::types::{EventKind, Proposal, TaskContext, WorkerId};

use super::{ReasoningWorker, Specialization};

/// Stress above which the critic argues for deferring non-critical work.
const CRITIC_DEFER_STRESS: f32 = 0.6;

/// Rule-based offline worker. Deterministic for a given context.
#[derive(Debug)]
pub struct HeuristicWorker {
    id: WorkerId,
    spec: Specialization,
}

impl HeuristicWorker {
    pub fn new(spec: Specialization) -> Self {
        Self {
            id: WorkerId::new(spec.as_str()),
            spec,
        }
    }
}

/// Default course of action per event kind.
pub fn base_decision(ctx: &TaskContext) -> &'static str {
    let event = &ctx.focus.event;
    if event.payload.get("review_of").is_some() {
        return "review";
    }
    match event.kind {
        EventKind::HardwareAlert => "mitigate",
        EventKind::UserMessage => "respond",
        EventKind::SystemUpdate => "integrate",
        EventKind::Timer => "reflect",
        EventKind::Unknown => "observe",
    }
}

/// Most important earlier decision recorded for the same event kind.
fn precedent(ctx: &TaskContext) -> Option<(String, f32)> {
    let kind = ctx.focus.event.kind.as_str();
    ctx.memory.iter().find_map(|entry| {
        let v = &entry.value;
        if v.get("event_kind").and_then(|k| k.as_str()) != Some(kind) {
            return None;
        }
        let decision = v.get("decision")?.as_str()?.to_owned();
        let confidence = v.get("confidence").and_then(|c| c.as_f64()).unwrap_or(0.0) as f32;
        Some((decision, confidence))
    })
}

#[async_trait::async_trait]
impl ReasoningWorker for HeuristicWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    fn specialization(&self) -> Specialization {
        self.spec
    }

    async fn propose(&self, ctx: &TaskContext) -> Result<Proposal, WorkerError> {
        let kind = ctx.focus.event.kind;
        let base = base_decision(ctx);
        let stress = ctx.affect.stress();

        let (decision, confidence, rationale): (String, f32, Vec<String>) = match self.spec {
            Specialization::Strategist => {
                let confidence = if kind == EventKind::HardwareAlert { 0.8 } else { 0.7 };
                (
                    base.into(),
                    confidence,
                    vec![
                        format!("event kind is {kind}"),
                        format!("priority {} places it in the current plan", ctx.focus.priority),
                        format!("'{base}' keeps long-term goals on track"),
                    ],
                )
            }
            Specialization::Engineer => {
                let confidence = match kind {
                    EventKind::HardwareAlert => 0.85,
                    EventKind::Unknown => 0.4,
                    _ => 0.75,
                };
                (
                    base.into(),
                    confidence,
                    vec![
                        format!("'{base}' is directly executable"),
                        format!("payload has {} top-level fields", payload_width(ctx)),
                        "no extra resources are required".into(),
                    ],
                )
            }
            Specialization::Critic => {
                if stress > CRITIC_DEFER_STRESS && kind != EventKind::HardwareAlert {
                    (
                        "defer".into(),
                        0.6,
                        vec![
                            format!("stress is elevated at {stress:.2}"),
                            format!("{kind} is not safety critical"),
                            "acting under stress risks a poor decision".into(),
                        ],
                    )
                } else {
                    (
                        base.into(),
                        0.55,
                        vec![
                            format!("stress is manageable at {stress:.2}"),
                            "no blocking risk identified".into(),
                            format!("'{base}' is acceptable"),
                        ],
                    )
                }
            }
            Specialization::Historian => match precedent(ctx) {
                Some((prior, prior_confidence)) => (
                    prior.clone(),
                    (0.5 + 0.3 * prior_confidence).min(0.8),
                    vec![
                        format!("a previous {kind} was answered with '{prior}'"),
                        format!("that decision carried confidence {prior_confidence:.2}"),
                        "continuity favors the same answer".into(),
                    ],
                ),
                None => (
                    base.into(),
                    0.35,
                    vec![
                        format!("no precedent for {kind} in working memory"),
                        format!("{} entries were consulted", ctx.memory.len()),
                        format!("falling back to '{base}'"),
                    ],
                ),
            },
            Specialization::Explainer => (
                base.into(),
                0.6,
                vec![
                    format!("the event is a {kind}"),
                    format!("'{base}' is the expected reaction to it"),
                    "the choice is easy to justify".into(),
                ],
            ),
            Specialization::MetaObserver => {
                let stability = ctx.affect.stability;
                (
                    base.into(),
                    0.5 + 0.3 * stability,
                    vec![
                        format!("dominant emotion is {}", ctx.affect.dominant),
                        format!("affective stability is {stability:.2}"),
                        format!("reasoning state supports '{base}'"),
                    ],
                )
            }
        };

        Proposal::new(self.id.clone(), decision.into(), confidence, rationale)
    }
}

fn payload_width(ctx: &TaskContext) -> usize {
    ctx.focus.event.payload.as_object().map(|o| o.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AffectReading, Emotion, Event, FocusItem, MemoryEntry};
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    fn ctx(event: Event, affect: AffectReading, memory: Vec<MemoryEntry>) -> Arc<TaskContext> {
        Arc::new(TaskContext {
            task_id: Uuid::new_v4(),
            focus: FocusItem { priority: 50, event, created_at: Utc::now(), seq: 0 },
            memory,
            affect,
        })
    }

    #[tokio::test]
    async fn base_decisions_per_kind() {
        let w = HeuristicWorker::new(Specialization::Strategist);
        let cases = [
            (Event::hardware_alert(serde_json::json!({})), "mitigate"),
            (Event::user_message("hi"), "respond"),
            (Event::system_update(serde_json::json!({})), "integrate"),
            (Event::timer("t"), "reflect"),
        ];
        for (event, expected) in cases {
            let p = w.propose(&ctx(event, AffectReading::default(), vec![])).await.unwrap();
            assert_eq!(p.decision, serde_json::json!(expected));
            assert_eq!(p.rationale.len(), 3);
        }
    }

    #[tokio::test]
    async fn critic_defers_under_stress() {
        let mut stressed = AffectReading::default();
        stressed.intensities.insert(Emotion::Fear, 0.8);
        let w = HeuristicWorker::new(Specialization::Critic);

        let p = w.propose(&ctx(Event::user_message("hi"), stressed.clone(), vec![])).await.unwrap();
        assert_eq!(p.decision, serde_json::json!("defer"));

        let alert = Event::hardware_alert(serde_json::json!({}));
        let p = w.propose(&ctx(alert, stressed, vec![])).await.unwrap();
        assert_eq!(p.decision, serde_json::json!("mitigate"));
    }

    #[tokio::test]
    async fn historian_follows_precedent() {
        let prior = MemoryEntry::new(
            "t1",
            serde_json::json!({"decision": "escalate", "confidence": 1.0, "event_kind": "user_message"}),
            1.0,
        );
        let w = HeuristicWorker::new(Specialization::Historian);
        let p = w.propose(&ctx(Event::user_message("hi"), AffectReading::default(), vec![prior])).await.unwrap();
        assert_eq!(p.decision, serde_json::json!("escalate"));
        assert!((p.confidence - 0.8).abs() < 1e-6);

        let p = w.propose(&ctx(Event::timer("t"), AffectReading::default(), vec![])).await.unwrap();
        assert_eq!(p.decision, serde_json::json!("reflect"));
        assert!((p.confidence - 0.35).abs() < 1e-6);
    }

    #[tokio::test]
    async fn meta_observer_confidence_tracks_stability() {
        let mut steady = AffectReading::default();
        steady.stability = 1.0;
        let w = HeuristicWorker::new(Specialization::MetaObserver);
        let p = w.propose(&ctx(Event::timer("t"), steady, vec![])).await.unwrap();
        assert!((p.confidence - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn review_events_get_review_decision() {
        let review = Event::system_update(serde_json::json!({"review_of": Uuid::new_v4()}));
        let w = HeuristicWorker::new(Specialization::Explainer);
        let p = w.propose(&ctx(review, AffectReading::default(), vec![])).await.unwrap();
        assert_eq!(p.decision, serde_json::json!("review"));
    }
}
