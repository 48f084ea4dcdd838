pub mod heuristic;
pub mod llm;

use std::fmt;
use std::sync::Arc;

use cogito_llm::provider::LlmProvider;
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;
use crate::types::{Proposal, TaskContext, WorkerId};

/// Deliberation role of a worker. Dispatch is by registry, not by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialization {
    Strategist,
    Engineer,
    Critic,
    Historian,
    Explainer,
    MetaObserver,
}

impl Specialization {
    pub const ALL: [Specialization; 6] = [
        Self::Strategist,
        Self::Engineer,
        Self::Critic,
        Self::Historian,
        Self::Explainer,
        Self::MetaObserver,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strategist => "strategist",
            Self::Engineer => "engineer",
            Self::Critic => "critic",
            Self::Historian => "historian",
            Self::Explainer => "explainer",
            Self::MetaObserver => "meta_observer",
        }
    }

    /// Default role brief handed to backend-driven workers.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Strategist => "Strategic synthesis: weigh long-term goals and choose the course of action.",
            Self::Engineer => "Implementation focus: choose the most concrete, executable response.",
            Self::Critic => "Critical review: look for risks and reasons not to act yet.",
            Self::Historian => "Continuity: prefer what was decided before in similar situations.",
            Self::Explainer => "Explanation: choose the response that is easiest to justify to a user.",
            Self::MetaObserver => "Meta-analysis: judge the reasoning state itself and arbitrate ties.",
        }
    }
}

impl fmt::Display for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One specialized deliberation unit. Sees only the shared task context.
#[async_trait::async_trait]
pub trait ReasoningWorker: Send + Sync {
    fn id(&self) -> &WorkerId;
    fn specialization(&self) -> Specialization;
    async fn propose(&self, ctx: &TaskContext) -> Result<Proposal, WorkerError>;
}

/// Ordered set of workers with unique ids. Order is grouping order during arbitration.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: Vec<Arc<dyn ReasoningWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One deterministic heuristic worker per specialization.
    pub fn heuristic() -> Self {
        let mut reg = Self::new();
        for spec in Specialization::ALL {
            reg.register(Arc::new(heuristic::HeuristicWorker::new(spec)));
        }
        reg
    }

    /// One backend-driven worker per specialization, all sharing `provider`.
    pub fn llm(provider: Arc<dyn LlmProvider>) -> Self {
        let mut reg = Self::new();
        for spec in Specialization::ALL {
            reg.register(Arc::new(llm::LlmWorker::new(spec, Arc::clone(&provider))));
        }
        reg
    }

    /// Add a worker. Returns false (and keeps the existing one) on a duplicate id.
    pub fn register(&mut self, worker: Arc<dyn ReasoningWorker>) -> bool {
        if self.workers.iter().any(|w| w.id() == worker.id()) {
            tracing::warn!(worker = %worker.id(), "duplicate worker id, ignoring");
            return false;
        }
        self.workers.push(worker);
        true
    }

    pub fn get(&self, id: &WorkerId) -> Option<&Arc<dyn ReasoningWorker>> {
        self.workers.iter().find(|w| w.id() == id)
    }

    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.id().clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ReasoningWorker>> {
        self.workers.iter()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_registry_has_all_specializations() {
        let reg = WorkerRegistry::heuristic();
        assert_eq!(reg.len(), 6);
        assert!(reg.get(&WorkerId::from("meta_observer")).is_some());
        assert_eq!(reg.ids()[0], WorkerId::from("strategist"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut reg = WorkerRegistry::heuristic();
        let dup = Arc::new(heuristic::HeuristicWorker::new(Specialization::Critic));
        assert!(!reg.register(dup));
        assert_eq!(reg.len(), 6);
    }

    #[test]
    fn llm_registry_uses_provider() {
        let provider: Arc<dyn LlmProvider> =
            Arc::new(cogito_llm::provider::MockProvider::new("DECISION: respond"));
        let reg = WorkerRegistry::llm(provider);
        assert_eq!(reg.len(), 6);
        let w = reg.get(&WorkerId::from("historian")).unwrap();
        assert_eq!(w.specialization(), Specialization::Historian);
    }
}
