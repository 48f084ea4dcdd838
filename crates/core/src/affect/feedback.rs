use crate::types::{ArbitratedDecision, Emotion, Outcome};

/// Below this score a cycle counts as low confidence.
const LOW_CONFIDENCE: f32 = 0.4;
/// At or above this score (with a clear majority) a cycle counts as high confidence.
const HIGH_CONFIDENCE: f32 = 0.7;

const SURPRISE_GAIN: f32 = 0.25;
const FEAR_GAIN: f32 = 0.15;
const TRUST_GAIN: f32 = 0.20;
const JOY_GAIN: f32 = 0.10;
const ANTICIPATION_NUDGE: f32 = 0.05;

/// Map a finished arbitration to the affect triggers the dispatcher emits.
pub fn triggers_for(decision: &ArbitratedDecision) -> Vec<(Emotion, f32)> {
    let score = decision.confidence_score.clamp(0.0, 1.0);
    let clear_majority = matches!(decision.outcome, Outcome::Unanimous | Outcome::Majority);

    if decision.is_no_consensus() || score < LOW_CONFIDENCE {
        let miss = 1.0 - score;
        vec![
            (Emotion::Surprise, SURPRISE_GAIN * miss),
            (Emotion::Fear, FEAR_GAIN * miss),
        ]
    } else if score >= HIGH_CONFIDENCE && clear_majority {
        vec![
            (Emotion::Trust, TRUST_GAIN * score),
            (Emotion::Joy, JOY_GAIN * score),
        ]
    } else {
        vec![(Emotion::Anticipation, ANTICIPATION_NUDGE)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn decision(score: f32, outcome: Outcome) -> ArbitratedDecision {
        ArbitratedDecision {
            task_id: Uuid::new_v4(),
            final_decision: "x".into(),
            confidence_score: score,
            dissent: BTreeSet::new(),
            consensus_path: vec![],
            outcome,
        }
    }

    #[test]
    fn no_consensus_raises_surprise_and_fear() {
        let d = ArbitratedDecision::no_consensus(Uuid::new_v4(), vec![]);
        let t = triggers_for(&d);
        assert_eq!(t[0].0, Emotion::Surprise);
        assert!((t[0].1 - 0.25).abs() < 1e-6);
        assert_eq!(t[1].0, Emotion::Fear);
        assert!((t[1].1 - 0.15).abs() < 1e-6);
    }

    #[test]
    fn confident_majority_raises_trust_and_joy() {
        let t = triggers_for(&decision(1.0, Outcome::Unanimous));
        assert_eq!(t, vec![(Emotion::Trust, 0.2), (Emotion::Joy, 0.1)]);
    }

    #[test]
    fn confident_escalation_is_only_anticipation() {
        let t = triggers_for(&decision(0.8, Outcome::Escalated));
        assert_eq!(t, vec![(Emotion::Anticipation, 0.05)]);
    }

    #[test]
    fn middling_score_is_anticipation() {
        let t = triggers_for(&decision(0.55, Outcome::Majority));
        assert_eq!(t, vec![(Emotion::Anticipation, 0.05)]);
    }

    #[test]
    fn low_score_majority_is_alarming() {
        let t = triggers_for(&decision(0.3, Outcome::Majority));
        assert_eq!(t[0].0, Emotion::Surprise);
        assert!((t[0].1 - 0.175).abs() < 1e-6);
    }
}
