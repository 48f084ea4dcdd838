use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::error::WorkerError;
use crate::types::{Proposal, TaskContext, WorkerId};
use crate::workers::WorkerRegistry;

/// Result of one fan-out. Every registered worker lands in exactly one of
/// `answered`, `timed_out` or `failed`.
#[derive(Debug, Default)]
pub struct FanOut {
    /// Proposals in registry order.
    pub proposals: Vec<Proposal>,
    pub answered: Vec<WorkerId>,
    pub timed_out: Vec<WorkerId>,
    /// Backend errors, malformed proposals and crashed worker tasks.
    pub failed: Vec<WorkerId>,
}

/// Run every worker concurrently on the same context and wait for all of them.
/// Each worker is bounded by `timeout`; any failure is an absent proposal.
pub async fn collect_proposals(
    registry: &WorkerRegistry,
    ctx: Arc<TaskContext>,
    timeout: Duration,
) -> FanOut {
    let mut set = JoinSet::new();
    for (slot, worker) in registry.iter().enumerate() {
        let worker = Arc::clone(worker);
        let ctx = Arc::clone(&ctx);
        set.spawn(async move {
            let result = match tokio::time::timeout(timeout, worker.propose(&ctx)).await {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Timeout(timeout)),
            };
            (slot, result)
        });
    }

    let ids = registry.ids();
    let mut slots: Vec<Option<Result<Proposal, WorkerError>>> = (0..ids.len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((slot, result)) => slots[slot] = Some(result),
            // The slot stays empty and is reported as crashed below.
            Err(e) => tracing::warn!(error = %e, "worker task failed"),
        }
    }

    let mut out = FanOut::default();
    for (id, slot) in ids.into_iter().zip(slots) {
        match slot.unwrap_or_else(|| Err(WorkerError::Crashed("task did not complete".into()))) {
            Ok(mut proposal) => {
                if proposal.worker_id != id {
                    tracing::debug!(worker = %id, claimed = %proposal.worker_id, "relabeling proposal");
                    proposal.worker_id = id.clone();
                }
                out.proposals.push(proposal);
                out.answered.push(id);
            }
            Err(e @ WorkerError::Timeout(_)) => {
                tracing::warn!(worker = %id, error = %e, "proposal absent");
                out.timed_out.push(id);
            }
            Err(e) => {
                tracing::warn!(worker = %id, error = %e, "proposal absent");
                out.failed.push(id);
            }
        }
    }

    tracing::debug!(
        answered = out.answered.len(),
        timed_out = out.timed_out.len(),
        failed = out.failed.len(),
        "fan-out complete"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AffectReading, Event, FocusItem};
    use crate::workers::{ReasoningWorker, Specialization};
    use chrono::Utc;
    use uuid::Uuid;

    struct Scripted {
        id: WorkerId,
        delay: Duration,
        outcome: Result<&'static str, &'static str>,
    }

    #[async_trait::async_trait]
    impl ReasoningWorker for Scripted {
        fn id(&self) -> &WorkerId {
            &self.id
        }

        fn specialization(&self) -> Specialization {
            Specialization::Engineer
        }

        async fn propose(&self, _ctx: &TaskContext) -> Result<Proposal, WorkerError> {
            tokio::time::sleep(self.delay).await;
            match self.outcome {
                Ok(d) => Proposal::new(self.id.clone(), d.into(), 0.9, vec!["r".into(); 3]),
                Err("panic") => panic!("scripted worker crash"),
                Err(msg) => Err(WorkerError::Malformed(msg.into())),
            }
        }
    }

    fn scripted(id: &str, delay_ms: u64, outcome: Result<&'static str, &'static str>) -> Arc<dyn ReasoningWorker> {
        Arc::new(Scripted { id: id.into(), delay: Duration::from_millis(delay_ms), outcome })
    }

    fn ctx() -> Arc<TaskContext> {
        Arc::new(TaskContext {
            task_id: Uuid::new_v4(),
            focus: FocusItem { priority: 50, event: Event::timer("t"), created_at: Utc::now(), seq: 0 },
            memory: vec![],
            affect: AffectReading::default(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_registry_order() {
        let mut reg = WorkerRegistry::new();
        reg.register(scripted("slow", 300, Ok("a")));
        reg.register(scripted("fast", 10, Ok("b")));
        let got = collect_proposals(&reg, ctx(), Duration::from_secs(1)).await.proposals;
        let ids: Vec<&str> = got.iter().map(|p| p.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["slow", "fast"]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_and_failures_are_absent() {
        let mut reg = WorkerRegistry::new();
        reg.register(scripted("ok", 10, Ok("a")));
        reg.register(scripted("late", 5_000, Ok("a")));
        reg.register(scripted("broken", 10, Err("bad reply")));
        reg.register(scripted("crash", 10, Err("panic")));
        let got = collect_proposals(&reg, ctx(), Duration::from_millis(500)).await;
        assert_eq!(got.proposals.len(), 1);
        assert_eq!(got.proposals[0].worker_id.as_str(), "ok");
        assert_eq!(got.answered, vec![WorkerId::from("ok")]);
        assert_eq!(got.timed_out, vec![WorkerId::from("late")]);
        assert_eq!(got.failed, vec![WorkerId::from("broken"), WorkerId::from("crash")]);
    }

    #[tokio::test(start_paused = true)]
    async fn workers_run_concurrently() {
        let mut reg = WorkerRegistry::new();
        for i in 0..4 {
            reg.register(scripted(&format!("w{i}"), 400, Ok("a")));
        }
        let start = tokio::time::Instant::now();
        let got = collect_proposals(&reg, ctx(), Duration::from_secs(1)).await;
        assert_eq!(got.proposals.len(), 4);
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn empty_registry_yields_nothing() {
        let got = collect_proposals(&WorkerRegistry::new(), ctx(), Duration::from_secs(1)).await;
        assert!(got.proposals.is_empty());
        assert!(got.answered.is_empty());
    }
}
