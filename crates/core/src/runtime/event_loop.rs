use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::dispatcher::Dispatcher;
use super::shutdown::ShutdownGuard;
use crate::affect::AffectHandle;
use crate::attention::AttentionScheduler;
use crate::config::CogitoCfg;
use crate::error::CoreError;
use crate::io::input::{self, EventReceiver, EventSender};
use crate::io::output::{self, DecisionReceiver};
use crate::memory::{MemoryHandle, MemoryReader};
use crate::persistence::{PipelineSnapshot, SnapshotStore};
use crate::types::{ArbitratedDecision, DispatcherStatus, Event};
use crate::workers::WorkerRegistry;

type CycleResult = Result<Option<ArbitratedDecision>, CoreError>;

/// Owns the event channel, the attention scheduler and the dispatcher,
/// and drives reasoning cycles until cancelled.
pub struct Runtime {
    cfg: Arc<CogitoCfg>,
    shutdown: ShutdownGuard,
    event_rx: EventReceiver,
    attention: AttentionScheduler,
    dispatcher: Arc<Dispatcher>,
    memory: MemoryHandle,
    affect: AffectHandle,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl Runtime {
    /// Create a runtime. Returns (runtime, event sender, decision receiver, status receiver).
    /// Send `Event`s into the sender; consume one `DecisionRecord` per completed task.
    pub fn new(
        cfg: Arc<CogitoCfg>,
        registry: WorkerRegistry,
    ) -> (
        Self,
        EventSender,
        DecisionReceiver,
        watch::Receiver<DispatcherStatus>,
    ) {
        let (event_tx, event_rx) = input::channel(cfg.event_channel_capacity);
        let (decision_tx, decision_rx) = output::channel(cfg.result_channel_capacity);
        let memory = MemoryHandle::new(cfg.memory_capacity);
        let affect = AffectHandle::new(cfg.emotional_decay_rate, cfg.stability_window);
        let attention = AttentionScheduler::new(Arc::clone(&cfg), affect.subscribe(), memory.clone());
        let dispatcher = Dispatcher::new(Arc::clone(&cfg), registry, memory.clone(), affect.clone())
            .with_sink(Arc::new(decision_tx));
        let status_rx = dispatcher.subscribe_status();

        let runtime = Self {
            cfg,
            shutdown: ShutdownGuard::new(),
            event_rx,
            attention,
            dispatcher: Arc::new(dispatcher),
            memory,
            affect,
            store: None,
        };
        (runtime, event_tx, decision_rx, status_rx)
    }

    /// Restore from `store` at startup and save to it on shutdown.
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    /// Affect handle for the periodic tick source.
    pub fn affect(&self) -> AffectHandle {
        self.affect.clone()
    }

    pub fn memory(&self) -> MemoryReader {
        self.memory.reader()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Load the stored snapshot, if any. Returns whether state was restored.
    pub async fn restore(&self) -> Result<bool, CoreError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        match store.load().await? {
            Some(snapshot) => {
                let saved_at = snapshot.saved_at;
                snapshot.restore(&self.memory, &self.affect).await;
                tracing::info!(%saved_at, "pipeline state restored");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn persist(&self) -> Result<(), CoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.save(&PipelineSnapshot::capture(&self.memory, &self.affect).await).await
    }

    async fn admit(&self, event: Event) {
        let focus = self.attention.submit(event).await;
        self.dispatcher.enqueue(focus).await;
    }

    /// Start the signal listener and drive the pipeline until cancellation,
    /// or until the event channel closes and all queued work is done.
    pub async fn run(&mut self) {
        self.shutdown.spawn_signal_listener();
        let token = self.shutdown.token();

        if let Err(e) = self.restore().await {
            tracing::warn!(error = %e, "failed to restore pipeline state, starting fresh");
        }
        tracing::info!(workers = self.dispatcher.registry().len(), "cogito runtime started");

        let max_active = self.cfg.max_active_tasks.max(1);
        let mut cycles: JoinSet<CycleResult> = JoinSet::new();
        let mut inputs_open = true;

        loop {
            while let Ok(event) = self.event_rx.try_recv() {
                self.admit(event).await;
            }

            let queued = self.dispatcher.status().queue_depth;
            let launch = queued.min(max_active.saturating_sub(cycles.len()));
            for _ in 0..launch {
                let dispatcher = Arc::clone(&self.dispatcher);
                cycles.spawn(async move { dispatcher.run_once().await });
            }

            if !inputs_open && cycles.is_empty() && self.dispatcher.status().queue_depth == 0 {
                tracing::info!("event source closed and queue drained");
                break;
            }

            tokio::select! {
                _ = token.cancelled() => break,
                maybe = self.event_rx.recv(), if inputs_open => match maybe {
                    Some(event) => self.admit(event).await,
                    None => inputs_open = false,
                },
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    log_cycle(joined);
                }
            }
        }

        self.drain(cycles).await;
        if let Err(e) = self.persist().await {
            tracing::warn!(error = %e, "failed to persist pipeline state");
        }
        token.cancel();
        tracing::info!(completed = self.dispatcher.status().completed_count, "cogito runtime stopped");
    }

    /// Let in-flight cycles finish within the shutdown timeout; active tasks are never preempted earlier.
    async fn drain(&self, mut cycles: JoinSet<CycleResult>) {
        if cycles.is_empty() {
            return;
        }
        let timeout = Duration::from_secs(self.cfg.shutdown_timeout_secs);
        let finished = tokio::time::timeout(timeout, async {
            while let Some(joined) = cycles.join_next().await {
                log_cycle(joined);
            }
        })
        .await;
        if finished.is_err() {
            tracing::warn!(in_flight = cycles.len(), "shutdown timeout, aborting active cycles");
            cycles.abort_all();
            // Aborted cycles complete their tasks without consensus as they drop.
            while cycles.join_next().await.is_some() {}
        }
    }
}

fn log_cycle(joined: Result<CycleResult, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "reasoning cycle failed"),
        Err(e) => tracing::warn!(error = %e, "reasoning cycle task aborted"),
    }
}
