use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::{Semaphore, watch};
use tracing::Instrument;

use super::fanout::{self, FanOut};
use super::queue::TaskQueue;
use crate::affect::{AffectHandle, feedback};
use crate::attention::priority;
use crate::config::CogitoCfg;
use crate::consensus::ConsensusEngine;
use crate::error::CoreError;
use crate::io::output::ResultSink;
use crate::memory::MemoryHandle;
use crate::types::{
    ArbitratedDecision, CompletedTask, ConsensusStep, DecisionRecord, DispatcherStatus, Event,
    EventKind, FocusItem, MemoryEntry, ReasoningTask, TaskContext, TaskId, TaskState, WorkerId,
    WorkerStatus,
};
use crate::workers::WorkerRegistry;

/// Floor for the importance of a written-back decision.
const MIN_RESULT_IMPORTANCE: f32 = 0.1;

#[derive(Debug, Default, Clone, Copy)]
struct WorkerCounters {
    answered: u64,
    timed_out: u64,
    failed: u64,
}

#[derive(Debug)]
struct DispatchState {
    queue: TaskQueue,
    /// Queued and active tasks. Completed tasks live in `archive`.
    live: HashMap<TaskId, TaskState>,
    /// Activation order of currently active tasks.
    active: Vec<TaskId>,
    archive: VecDeque<CompletedTask>,
    completed_count: u64,
    consensus: ConsensusEngine,
    workers: HashMap<WorkerId, WorkerCounters>,
}

impl DispatchState {
    fn status(&self) -> DispatcherStatus {
        DispatcherStatus {
            queue_depth: self.queue.len(),
            active_task: self.active.first().copied(),
            active_count: self.active.len(),
            completed_count: self.completed_count,
        }
    }

    fn record_fanout(&mut self, out: &FanOut) {
        for id in &out.answered {
            self.workers.entry(id.clone()).or_default().answered += 1;
        }
        for id in &out.timed_out {
            self.workers.entry(id.clone()).or_default().timed_out += 1;
        }
        for id in &out.failed {
            self.workers.entry(id.clone()).or_default().failed += 1;
        }
    }
}

/// Identity of an activated task, enough to complete it without its context.
#[derive(Debug, Clone, Copy)]
struct Activated {
    task_id: TaskId,
    priority: u32,
    event_kind: EventKind,
}

/// Held across a cycle. If the cycle is dropped before its result is archived,
/// the task still completes, with a no-consensus result.
struct ActiveGuard<'a> {
    dispatcher: &'a Dispatcher,
    task: Option<Activated>,
}

impl ActiveGuard<'_> {
    fn disarm(&mut self) {
        self.task = None;
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.dispatcher.abandon(task);
        }
    }
}

/// Top-level scheduler. Owns the task queue and runs reasoning cycles:
/// `queued -> active -> completed`, never backwards.
pub struct Dispatcher {
    cfg: Arc<CogitoCfg>,
    registry: WorkerRegistry,
    memory: MemoryHandle,
    affect: AffectHandle,
    // Never held across an await, so a dropped cycle can clean up synchronously.
    state: Mutex<DispatchState>,
    permits: Semaphore,
    status_tx: watch::Sender<DispatcherStatus>,
    sink: Option<Arc<dyn ResultSink>>,
    seq: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        cfg: Arc<CogitoCfg>,
        registry: WorkerRegistry,
        memory: MemoryHandle,
        affect: AffectHandle,
    ) -> Self {
        let (status_tx, _) = watch::channel(DispatcherStatus::default());
        let state = DispatchState {
            queue: TaskQueue::new(),
            live: HashMap::new(),
            active: Vec::new(),
            archive: VecDeque::with_capacity(cfg.archive_capacity),
            completed_count: 0,
            consensus: ConsensusEngine::new(&cfg),
            workers: HashMap::new(),
        };
        Self {
            permits: Semaphore::new(cfg.max_active_tasks.max(1)),
            cfg,
            registry,
            memory,
            affect,
            state: Mutex::new(state),
            status_tx,
            sink: None,
            seq: AtomicU64::new(0),
        }
    }

    /// Deliver a record per completed task to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the consensus engine, e.g. to install a custom equivalence.
    pub fn with_consensus(mut self, consensus: ConsensusEngine) -> Self {
        match self.state.get_mut() {
            Ok(state) => state.consensus = consensus,
            Err(poisoned) => poisoned.into_inner().consensus = consensus,
        }
        self
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Build a task from `focus`, snapshotting working memory and affect, and queue it.
    pub async fn enqueue(&self, focus: FocusItem) -> TaskId {
        let task_id = TaskId::new_v4();
        let context = TaskContext {
            task_id,
            memory: self.memory.snapshot(self.cfg.context_limit).await,
            affect: self.affect.reading(),
            focus,
        };
        let task = ReasoningTask {
            task_id,
            priority: context.focus.priority,
            created_at: context.focus.created_at,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            context: Arc::new(context),
        };
        let priority = task.priority;

        {
            let mut state = self.lock();
            state.queue.push(task);
            state.live.insert(task_id, TaskState::Queued);
            self.publish(&state);
        }

        tracing::debug!(%task_id, priority, "task queued");
        task_id
    }

    /// Run the most urgent queued task to completion. `Ok(None)` when the queue is empty.
    ///
    /// Dropping the returned future mid-cycle still completes the task, without consensus.
    pub async fn run_once(&self) -> Result<Option<ArbitratedDecision>, CoreError> {
        let Ok(_permit) = self.permits.acquire().await else {
            return Ok(None);
        };

        let task = {
            let mut state = self.lock();
            let Some(task) = state.queue.pop() else {
                return Ok(None);
            };
            state.live.insert(task.task_id, TaskState::Active);
            state.active.push(task.task_id);
            state.consensus.open(task.task_id);
            self.publish(&state);
            task
        };
        let guard = ActiveGuard {
            dispatcher: self,
            task: Some(Activated {
                task_id: task.task_id,
                priority: task.priority,
                event_kind: task.context.focus.event.kind,
            }),
        };

        let span = tracing::info_span!("cycle", task_id = %task.task_id, priority = task.priority);
        self.cycle(task, guard).instrument(span).await.map(Some)
    }

    async fn cycle(&self, task: ReasoningTask, mut guard: ActiveGuard<'_>) -> Result<ArbitratedDecision, CoreError> {
        let task_id = task.task_id;
        let event = &task.context.focus.event;
        let event_kind = event.kind;
        let is_review = event.payload.get("review_of").is_some();

        let out = fanout::collect_proposals(
            &self.registry,
            Arc::clone(&task.context),
            self.cfg.worker_timeout(),
        )
        .await;

        let decision = {
            let mut state = self.lock();
            state.record_fanout(&out);
            let arbitrated = state.consensus.arbitrate(task_id, out.proposals);
            state.live.remove(&task_id);
            state.active.retain(|id| *id != task_id);
            guard.disarm();
            match arbitrated {
                Ok(decision) => {
                    self.archive(&mut state, task.task_id, task.priority, event_kind, &decision);
                    self.publish(&state);
                    decision
                }
                Err(e) => {
                    self.publish(&state);
                    return Err(e);
                }
            }
        };

        tracing::info!(
            outcome = decision.outcome.as_str(),
            confidence = decision.confidence_score,
            dissent = decision.dissent.len(),
            "task completed"
        );

        self.deliver(&decision);
        self.write_back(&decision, event_kind).await;
        for (emotion, magnitude) in feedback::triggers_for(&decision) {
            self.affect.trigger(emotion, magnitude).await;
        }
        if !is_review {
            self.schedule_review(&decision).await;
        }

        Ok(decision)
    }

    /// Complete an activated task whose cycle was dropped.
    fn abandon(&self, task: Activated) {
        let decision = {
            let mut state = self.lock();
            state.live.remove(&task.task_id);
            state.active.retain(|id| *id != task.task_id);
            let decision = state
                .consensus
                .arbitrate(task.task_id, Vec::new())
                .unwrap_or_else(|_| ArbitratedDecision::no_consensus(task.task_id, vec![ConsensusStep::NoConsensus]));
            self.archive(&mut state, task.task_id, task.priority, task.event_kind, &decision);
            self.publish(&state);
            decision
        };
        tracing::warn!(task_id = %task.task_id, "reasoning cycle cancelled, completed without consensus");
        self.deliver(&decision);
    }

    fn deliver(&self, decision: &ArbitratedDecision) {
        if let Some(sink) = &self.sink {
            sink.deliver(DecisionRecord::from(decision));
        }
    }

    fn archive(
        &self,
        state: &mut DispatchState,
        task_id: TaskId,
        priority: u32,
        event_kind: EventKind,
        decision: &ArbitratedDecision,
    ) {
        state.completed_count += 1;
        if self.cfg.archive_capacity == 0 {
            return;
        }
        if state.archive.len() == self.cfg.archive_capacity {
            state.archive.pop_front();
        }
        state.archive.push_back(CompletedTask {
            task_id,
            priority,
            event_kind,
            decision: decision.clone(),
            completed_at: Utc::now(),
        });
    }

    async fn write_back(&self, decision: &ArbitratedDecision, event_kind: EventKind) {
        let value = serde_json::json!({
            "decision": decision.final_decision,
            "confidence": decision.confidence_score,
            "outcome": decision.outcome.as_str(),
            "event_kind": event_kind.as_str(),
            "dissent": decision.dissent,
        });
        let importance = decision.confidence_score.max(MIN_RESULT_IMPORTANCE);
        self.memory
            .put(MemoryEntry::new(decision.task_id.to_string(), value, importance))
            .await;
    }

    /// Queue a review of a low-confidence decision when follow-ups are enabled.
    async fn schedule_review(&self, decision: &ArbitratedDecision) {
        let threshold = self.cfg.followup_below;
        if threshold <= 0.0 || decision.confidence_score >= threshold {
            return;
        }
        let event = Event::system_update(serde_json::json!({
            "review_of": decision.task_id,
            "decision": decision.final_decision,
            "confidence": decision.confidence_score,
        }));
        let focus = FocusItem {
            priority: priority::priority_for(&self.cfg, event.kind, &self.affect.reading()),
            event,
            created_at: Utc::now(),
            seq: 0,
        };
        let review_id = self.enqueue(focus).await;
        tracing::info!(review_of = %decision.task_id, %review_id, "follow-up review scheduled");
    }

    /// Answered/absent counts per worker, in registry order.
    pub fn worker_status(&self) -> Vec<WorkerStatus> {
        let state = self.lock();
        self.registry
            .iter()
            .map(|w| {
                let c = state.workers.get(w.id()).copied().unwrap_or_default();
                WorkerStatus {
                    worker_id: w.id().clone(),
                    specialization: w.specialization(),
                    answered: c.answered,
                    timed_out: c.timed_out,
                    failed: c.failed,
                }
            })
            .collect()
    }

    fn publish(&self, state: &DispatchState) {
        self.status_tx.send_replace(state.status());
    }

    pub fn status(&self) -> DispatcherStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<DispatcherStatus> {
        self.status_tx.subscribe()
    }

    /// Lifecycle state of a live or archived task. `None` once it has left the archive.
    pub async fn task_state(&self, task_id: &TaskId) -> Option<TaskState> {
        let state = self.lock();
        if let Some(s) = state.live.get(task_id) {
            return Some(*s);
        }
        state
            .archive
            .iter()
            .any(|t| t.task_id == *task_id)
            .then_some(TaskState::Completed)
    }

    /// Most recently completed tasks first.
    pub async fn completed(&self, limit: usize) -> Vec<CompletedTask> {
        let state = self.lock();
        state.archive.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::output;
    use crate::types::{Emotion, Outcome};

    fn dispatcher(cfg: CogitoCfg) -> (Dispatcher, MemoryHandle, AffectHandle) {
        let cfg = Arc::new(cfg);
        let memory = MemoryHandle::new(cfg.memory_capacity);
        let affect = AffectHandle::new(cfg.emotional_decay_rate, cfg.stability_window);
        let d = Dispatcher::new(cfg, WorkerRegistry::heuristic(), memory.clone(), affect.clone());
        (d, memory, affect)
    }

    fn focus(event: Event, priority: u32, seq: u64) -> FocusItem {
        FocusItem { priority, event, created_at: Utc::now(), seq }
    }

    #[tokio::test]
    async fn enqueue_updates_status() {
        let (d, _, _) = dispatcher(CogitoCfg::default());
        let id = d.enqueue(focus(Event::user_message("hi"), 150, 0)).await;
        assert_eq!(d.status().queue_depth, 1);
        assert_eq!(d.status().active_task, None);
        assert_eq!(d.task_state(&id).await, Some(TaskState::Queued));
    }

    #[tokio::test]
    async fn run_once_on_empty_queue() {
        let (d, _, _) = dispatcher(CogitoCfg::default());
        assert!(d.run_once().await.unwrap().is_none());
        assert_eq!(d.status().completed_count, 0);
    }

    #[tokio::test]
    async fn cycle_writes_back_and_triggers_affect() {
        let (d, memory, affect) = dispatcher(CogitoCfg::default());
        let id = d.enqueue(focus(Event::user_message("hi"), 150, 0)).await;
        let decision = d.run_once().await.unwrap().unwrap();

        assert_eq!(decision.task_id, id);
        assert_eq!(decision.outcome, Outcome::Unanimous);
        assert_eq!(decision.final_decision, serde_json::json!("respond"));
        assert_eq!(d.task_state(&id).await, Some(TaskState::Completed));

        let entry = memory.get(&id.to_string()).await.unwrap();
        assert_eq!(entry.value["event_kind"], "user_message");
        assert_eq!(entry.value["outcome"], "unanimous");
        assert!((entry.importance - 1.0).abs() < 1e-6);

        let reading = affect.reading();
        assert!((reading.intensity(Emotion::Trust) - 0.2).abs() < 1e-6);
        assert!((reading.intensity(Emotion::Joy) - 0.1).abs() < 1e-6);

        let status = d.status();
        assert_eq!(status.completed_count, 1);
        assert_eq!(status.queue_depth, 0);
        assert_eq!(status.active_task, None);
    }

    #[tokio::test]
    async fn most_urgent_task_runs_first() {
        let (d, _, _) = dispatcher(CogitoCfg::default());
        let timer = d.enqueue(focus(Event::timer("t"), 350, 0)).await;
        let alert = d.enqueue(focus(Event::hardware_alert(serde_json::json!({})), 50, 1)).await;
        assert_eq!(d.run_once().await.unwrap().unwrap().task_id, alert);
        assert_eq!(d.run_once().await.unwrap().unwrap().task_id, timer);
    }

    #[tokio::test]
    async fn sink_receives_one_record_per_task() {
        let (sink_tx, mut sink_rx) = output::channel(4);
        let (d, _, _) = dispatcher(CogitoCfg::default());
        let d = d.with_sink(Arc::new(sink_tx));
        let id = d.enqueue(focus(Event::timer("t"), 350, 0)).await;
        d.run_once().await.unwrap();
        let record = sink_rx.recv().await.unwrap();
        assert_eq!(record.task_id, id);
        assert!(sink_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn low_confidence_schedules_a_single_review() {
        let mut cfg = CogitoCfg::default();
        cfg.followup_below = 0.9;
        let (d, _, affect) = dispatcher(cfg);
        affect.trigger(Emotion::Fear, 0.7).await;

        let original = d.enqueue(focus(Event::user_message("hi"), 150, 0)).await;
        let first = d.run_once().await.unwrap().unwrap();
        assert!(first.confidence_score < 0.9);
        assert_eq!(d.status().queue_depth, 1);

        let review = d.run_once().await.unwrap().unwrap();
        assert_ne!(review.task_id, original);
        assert_eq!(d.status().queue_depth, 0);
        assert_eq!(d.status().completed_count, 2);
    }

    #[tokio::test]
    async fn archive_is_bounded() {
        let mut cfg = CogitoCfg::default();
        cfg.archive_capacity = 2;
        let (d, _, _) = dispatcher(cfg);
        let first = d.enqueue(focus(Event::timer("a"), 350, 0)).await;
        d.enqueue(focus(Event::timer("b"), 350, 1)).await;
        let last = d.enqueue(focus(Event::timer("c"), 350, 2)).await;
        for _ in 0..3 {
            d.run_once().await.unwrap();
        }
        let done = d.completed(10).await;
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].task_id, last);
        assert_eq!(d.task_state(&first).await, None);
        assert_eq!(d.status().completed_count, 3);
    }

    #[tokio::test]
    async fn empty_registry_still_completes_with_no_consensus() {
        let cfg = Arc::new(CogitoCfg::default());
        let memory = MemoryHandle::new(cfg.memory_capacity);
        let affect = AffectHandle::new(cfg.emotional_decay_rate, cfg.stability_window);
        let d = Dispatcher::new(cfg, WorkerRegistry::new(), memory, affect.clone());
        let id = d.enqueue(focus(Event::timer("t"), 350, 0)).await;
        let decision = d.run_once().await.unwrap().unwrap();
        assert!(decision.is_no_consensus());
        assert_eq!(d.task_state(&id).await, Some(TaskState::Completed));
        assert!(affect.reading().intensity(Emotion::Surprise) > 0.0);
    }

    struct Stalled;

    #[async_trait::async_trait]
    impl crate::workers::ReasoningWorker for Stalled {
        fn id(&self) -> &WorkerId {
            static ID: std::sync::OnceLock<WorkerId> = std::sync::OnceLock::new();
            ID.get_or_init(|| WorkerId::from("stalled"))
        }

        fn specialization(&self) -> crate::workers::Specialization {
            crate::workers::Specialization::Historian
        }

        async fn propose(&self, _ctx: &TaskContext) -> Result<crate::types::Proposal, crate::error::WorkerError> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Err(crate::error::WorkerError::Malformed("never answers in time".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_cycle_still_completes_the_task() {
        let cfg = Arc::new(CogitoCfg::default());
        let memory = MemoryHandle::new(cfg.memory_capacity);
        let affect = AffectHandle::new(cfg.emotional_decay_rate, cfg.stability_window);
        let mut registry = WorkerRegistry::new();
        registry.register(Arc::new(Stalled));
        let (sink_tx, mut sink_rx) = output::channel(4);
        let d = Dispatcher::new(cfg, registry, memory, affect).with_sink(Arc::new(sink_tx));

        let id = d.enqueue(focus(Event::user_message("hi"), 150, 0)).await;
        let cut_short = tokio::time::timeout(std::time::Duration::from_secs(1), d.run_once()).await;
        assert!(cut_short.is_err());

        assert_eq!(d.task_state(&id).await, Some(TaskState::Completed));
        let status = d.status();
        assert_eq!(status.active_task, None);
        assert_eq!(status.active_count, 0);
        assert_eq!(status.completed_count, 1);

        let record = sink_rx.recv().await.unwrap();
        assert_eq!(record.task_id, id);
        assert_eq!(record.outcome, Outcome::NoConsensus);
        assert!(!d.lock().consensus.is_open(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn worker_status_counts_answers_and_absences() {
        let mut cfg = CogitoCfg::default();
        cfg.worker_timeout_ms = 100;
        let cfg = Arc::new(cfg);
        let memory = MemoryHandle::new(cfg.memory_capacity);
        let affect = AffectHandle::new(cfg.emotional_decay_rate, cfg.stability_window);
        let mut registry = WorkerRegistry::new();
        registry.register(Arc::new(crate::workers::heuristic::HeuristicWorker::new(
            crate::workers::Specialization::Engineer,
        )));
        registry.register(Arc::new(Stalled));
        let d = Dispatcher::new(cfg, registry, memory, affect);

        for i in 0..2 {
            d.enqueue(focus(Event::timer("t"), 350, i)).await;
            d.run_once().await.unwrap();
        }

        let workers = d.worker_status();
        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0].worker_id.as_str(), "engineer");
        assert_eq!((workers[0].answered, workers[0].absent()), (2, 0));
        assert_eq!(workers[1].worker_id.as_str(), "stalled");
        assert_eq!((workers[1].answered, workers[1].timed_out, workers[1].failed), (0, 2, 0));
    }
}
