//! Consensus engine: reconciles worker proposals into one arbitrated decision.
//!
//! Disagreement is a value, not an error: dissent and a lower score describe it.
//! The only hard error is arbitrating a task that was never opened.

pub mod equivalence;

use std::collections::{BTreeSet, HashSet};

pub use equivalence::Equivalence;

use crate::config::CogitoCfg;
use crate::error::CoreError;
use crate::types::{
    ArbitratedDecision, ConsensusStep, GroupSummary, Outcome, Proposal, TaskId, WorkerId,
};

#[derive(Debug)]
struct Group {
    decision: serde_json::Value,
    mass: f32,
    members: Vec<WorkerId>,
}

#[derive(Debug)]
pub struct ConsensusEngine {
    confidence_floor: f32,
    tie_tolerance: f32,
    tie_break_worker: WorkerId,
    equivalence: Equivalence,
    open: HashSet<TaskId>,
}

impl ConsensusEngine {
    pub fn new(cfg: &CogitoCfg) -> Self {
        Self {
            confidence_floor: if cfg.confidence_floor.is_finite() { cfg.confidence_floor } else { 0.0 },
            tie_tolerance: cfg.tie_tolerance.max(0.0),
            tie_break_worker: WorkerId::new(cfg.tie_break_worker.clone()),
            equivalence: Equivalence::from_name(&cfg.equivalence),
            open: HashSet::new(),
        }
    }

    pub fn with_equivalence(mut self, equivalence: Equivalence) -> Self {
        self.equivalence = equivalence;
        self
    }

    /// Register a task as awaiting arbitration.
    pub fn open(&mut self, task_id: TaskId) {
        self.open.insert(task_id);
    }

    pub fn is_open(&self, task_id: &TaskId) -> bool {
        self.open.contains(task_id)
    }

    /// Arbitrate an opened task. Consumes the task id; proposals are grouped in the order given.
    pub fn arbitrate(
        &mut self,
        task_id: TaskId,
        proposals: Vec<Proposal>,
    ) -> Result<ArbitratedDecision, CoreError> {
        if !self.open.remove(&task_id) {
            return Err(CoreError::UnknownTask(task_id));
        }

        let mut path = Vec::new();

        let (kept, dropped): (Vec<Proposal>, Vec<Proposal>) = proposals
            .into_iter()
            .partition(|p| p.confidence >= self.confidence_floor);
        path.push(ConsensusStep::Filtered {
            kept: kept.iter().map(|p| p.worker_id.clone()).collect(),
            dropped: dropped.iter().map(|p| p.worker_id.clone()).collect(),
        });

        if kept.is_empty() {
            path.push(ConsensusStep::NoConsensus);
            tracing::info!(%task_id, dropped = dropped.len(), "no proposal cleared the confidence floor");
            return Ok(ArbitratedDecision::no_consensus(task_id, path));
        }

        // All-zero confidence (floor of 0) counts each proposal once.
        let total_conf: f32 = kept.iter().map(|p| p.confidence).sum();
        let weight = |p: &Proposal| if total_conf > 0.0 { p.confidence } else { 1.0 };

        let mut groups: Vec<Group> = Vec::new();
        for p in &kept {
            let w = weight(p);
            match groups
                .iter_mut()
                .find(|g| self.equivalence.equivalent(&g.decision, &p.decision))
            {
                Some(g) => {
                    g.mass += w;
                    g.members.push(p.worker_id.clone());
                }
                None => groups.push(Group {
                    decision: p.decision.clone(),
                    mass: w,
                    members: vec![p.worker_id.clone()],
                }),
            }
        }
        // Stable: equal masses keep formation order.
        groups.sort_by(|a, b| b.mass.total_cmp(&a.mass));

        path.push(ConsensusStep::Grouped {
            groups: groups
                .iter()
                .map(|g| GroupSummary {
                    decision: g.decision.clone(),
                    mass: g.mass,
                    members: g.members.clone(),
                })
                .collect(),
        });

        let total: f32 = groups.iter().map(|g| g.mass).sum();
        let share = |g: &Group| g.mass / total;

        let tied = groups.len() >= 2 && (share(&groups[0]) - share(&groups[1])).abs() <= self.tie_tolerance;

        let (winner, outcome) = if tied {
            let top = share(&groups[0]);
            let contender = groups
                .iter()
                .position(|g| top - share(g) <= self.tie_tolerance && g.members.contains(&self.tie_break_worker));
            match contender {
                Some(i) => {
                    path.push(ConsensusStep::Escalated {
                        worker: self.tie_break_worker.clone(),
                        decision: groups[i].decision.clone(),
                    });
                    tracing::info!(%task_id, worker = %self.tie_break_worker, "tie escalated");
                    (i, Outcome::Escalated)
                }
                None => {
                    path.push(ConsensusStep::EscalationUnavailable {
                        worker: self.tie_break_worker.clone(),
                    });
                    path.push(ConsensusStep::Majority {
                        decision: groups[0].decision.clone(),
                        mass: groups[0].mass,
                    });
                    tracing::info!(%task_id, worker = %self.tie_break_worker, "tie-break worker absent, using first group");
                    (0, Outcome::Majority)
                }
            }
        } else {
            path.push(ConsensusStep::Majority {
                decision: groups[0].decision.clone(),
                mass: groups[0].mass,
            });
            let outcome = if groups.len() == 1 { Outcome::Unanimous } else { Outcome::Majority };
            (0, outcome)
        };

        let chosen = &groups[winner];
        let confidence_score = (chosen.mass / total).clamp(0.0, 1.0);
        let dissent: BTreeSet<WorkerId> = groups
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != winner)
            .flat_map(|(_, g)| g.members.iter().cloned())
            .collect();

        Ok(ArbitratedDecision {
            task_id,
            final_decision: chosen.decision.clone(),
            confidence_score,
            dissent,
            consensus_path: path,
            outcome,
        })
    }
}
