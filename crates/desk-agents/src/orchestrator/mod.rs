//! Orchestrator: drives one run from entry to `Terminal`.
//!
//! ```text
//!            ┌──────────────────────────────────────────────────────────┐
//!            ▼                                                          │
//! router.entry ─► Pending(s) ─► Running(s) ─► Committed(s) ─► graph edge │
//!                    │              │  ▲                        Fixed ───┤
//!                    │              │  └─ retry (backoff)       Dynamic ─► router
//!                    │              ▼                           Terminal ─► memory append
//!                 cancelled      Failed(s) ─► RunFailure
//! ```
//!
//! Analysts may fan out concurrently (`FanOutMode::Concurrent`): every
//! pending analyst is spawned on a `JoinSet`, the join waits under a single
//! budget, and results are committed in configured order before routing
//! continues. Every other stage runs strictly one at a time.
//!
//! The orchestrator is the only caller of `SharedState::set`. Capability
//! errors are retried up to `retry_limit` times; invariant violations,
//! join timeouts and cancellation end the run immediately.
//!
//! Each transition and stage metric is also published on the orchestrator's
//! `EventBus` as it is recorded (see `Orchestrator::subscribe`).

pub mod events;
pub mod outcome;
pub mod phase;

pub use events::{EventBus, RunEvent};
pub use outcome::{FailureKind, RunFailure, RunOutcome, RunReport};
pub use phase::{IllegalTransition, PhaseRecord, PhaseTracker, RunPhase};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use desk_coordination::{
    ConditionalRouter, FieldValue, MemoryRecord, MemoryScope, NextStage, RunContext, SharedState, StageDescriptor,
    StageGraph, StageId, StateError, StateField, StateSnapshot, Transition,
};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::capability::{CapabilityInvoker, DataProvider, Invocation, ReasoningCapability};
use crate::config::{FanOutMode, PipelineConfig};
use crate::context::ContextBuilder;
use crate::errors::{CapabilityError, StageError};
use crate::memory::MemoryRegistry;
use crate::telemetry::{RunMetrics, StageStatus};

/// Every attempt of one stage execution.
struct StageAttempt {
    stage: StageId,
    result: Result<Invocation, StageError>,
    attempts: u32,
    elapsed: Duration,
}

/// Stage that stopped the run and why.
struct StageFault {
    stage: StageId,
    cause: StageError,
}

/// Read-only machinery shared by all runs.
struct Engine {
    config: PipelineConfig,
    graph: StageGraph,
    router: ConditionalRouter,
    invoker: CapabilityInvoker,
    contexts: ContextBuilder,
    memory: MemoryRegistry,
    events: EventBus,
}

impl Engine {
    async fn attempt_once(
        &self,
        descriptor: &StageDescriptor,
        snapshot: &StateSnapshot,
    ) -> Result<Invocation, StageError> {
        let context = self.contexts.build(descriptor, snapshot).await?;
        Ok(self.invoker.invoke(descriptor, &context).await?)
    }

    async fn execute_with_retry(
        &self,
        stage: StageId,
        snapshot: &StateSnapshot,
        cancel: &CancellationToken,
    ) -> StageAttempt {
        let started = Instant::now();
        let max_attempts = self.config.retry_limit.saturating_add(1);
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            let outcome = match self.graph.descriptor(stage) {
                Ok(descriptor) => self.attempt_once(descriptor, snapshot).await,
                Err(e) => Err(e.into()),
            };
            match outcome {
                Ok(invocation) => break Ok(invocation),
                Err(cause) if cause.is_retriable() && attempts < max_attempts => {
                    let delay = self.config.backoff_for(attempts);
                    warn!(
                        stage = %stage,
                        attempt = attempts,
                        category = %cause.retry_category(),
                        error = %cause,
                        delay_ms = delay.as_millis() as u64,
                        "stage attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break Err(StageError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(cause) => break Err(cause),
            }
        };

        StageAttempt {
            stage,
            result,
            attempts,
            elapsed: started.elapsed(),
        }
    }

    /// Fixed edge from the graph, or the router's decision.
    fn next_stage(&self, from: StageId, snapshot: &StateSnapshot) -> Result<NextStage, StageError> {
        Ok(match self.graph.transition(from)? {
            Transition::Fixed(to) => NextStage::Fixed(to),
            Transition::Terminal => NextStage::Terminal,
            Transition::Dynamic => self.router.resolve(from, snapshot)?,
        })
    }

    /// Single terminal append of the run's outcome.
    async fn remember(&self, snapshot: &StateSnapshot) -> Option<u64> {
        let record = match terminal_record(snapshot) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "terminal state incomplete, skipping memory append");
                return None;
            }
        };
        let budget = self.config.stage_timeout();
        let append = self.memory.get(MemoryScope::RiskManager).append(record);
        match tokio::time::timeout(budget, append).await {
            Ok(Ok(seq)) => Some(seq),
            Ok(Err(e)) => {
                warn!(error = %e, action = e.suggested_action(), "terminal memory append failed");
                None
            }
            Err(_) => {
                warn!(budget_ms = budget.as_millis() as u64, "terminal memory append timed out");
                None
            }
        }
    }
}

fn terminal_record(snapshot: &StateSnapshot) -> Result<MemoryRecord, StateError> {
    Ok(MemoryRecord::new(
        snapshot.situation_summary()?,
        snapshot.get(StateField::FinalSignal)?.to_string(),
        snapshot.text(StateField::FinalDecision)?,
    ))
}

/// Mutable bookkeeping of one run.
struct RunProgress {
    state: SharedState,
    phases: PhaseTracker,
    metrics: RunMetrics,
    events: EventBus,
}

impl RunProgress {
    fn new(context: Arc<RunContext>, events: EventBus) -> Self {
        Self {
            state: SharedState::new(context),
            phases: PhaseTracker::new(),
            metrics: RunMetrics::default(),
            events,
        }
    }

    fn run_id(&self) -> Uuid {
        self.state.context().run_id()
    }

    /// Advance the tracker and publish the new record.
    fn advance(&mut self, to: RunPhase) -> Result<(), IllegalTransition> {
        self.phases.advance(to)?;
        if let Some(record) = self.phases.log().last() {
            self.events.publish(RunEvent::Phase {
                run_id: self.run_id(),
                record: record.clone(),
            });
        }
        Ok(())
    }

    fn record(&mut self, stage: StageId, attempts: u32, elapsed: Duration, chars: usize, status: StageStatus) {
        self.metrics.record(stage, attempts, elapsed, chars, status);
        if let Some(metric) = self.metrics.stages.last() {
            self.events.publish(RunEvent::Stage {
                run_id: self.run_id(),
                metric: metric.clone(),
            });
        }
    }

    fn start(&mut self, stage: StageId) -> Result<(), StageFault> {
        self.advance(RunPhase::Pending(stage))
            .and_then(|()| self.advance(RunPhase::Running(stage)))
            .map_err(|e| StageFault {
                stage,
                cause: e.into(),
            })
    }

    fn mark_failed(&mut self, stage: StageId) {
        if matches!(
            self.phases.phase_of(stage),
            Some(RunPhase::Pending(_) | RunPhase::Running(_))
        ) {
            // Pending/Running → Failed is always legal.
            let _ = self.advance(RunPhase::Failed(stage));
        }
    }

    /// Apply an invocation to the shared state. Debaters append a turn;
    /// every other stage sets its write-once fields.
    fn commit(&mut self, descriptor: &StageDescriptor, invocation: Invocation) -> Result<(), StageError> {
        if let StageId::Debater(role) = descriptor.id {
            let round = self.state.append_turn(role, invocation.text)?;
            debug!(stage = %descriptor.id, round, "debate turn recorded");
            return Ok(());
        }

        // Resolve every value before the first write so a stage commits all
        // of its fields or none.
        let mut values = Vec::with_capacity(descriptor.writes.len());
        for field in &descriptor.writes {
            let value = match field {
                StateField::FinalSignal => FieldValue::Signal(invocation.signal.ok_or_else(|| {
                    CapabilityError::MalformedOutput(format!("{} produced no signal", descriptor.id))
                })?),
                _ => FieldValue::Text(invocation.text.clone()),
            };
            values.push((*field, value));
        }
        for (field, value) in values {
            self.state.set(field, value)?;
        }
        if let Some(signal) = invocation.signal {
            debug!(stage = %descriptor.id, %signal, "signal extracted");
        }
        Ok(())
    }

    fn settle(&mut self, graph: &StageGraph, attempt: StageAttempt) -> Result<(), StageFault> {
        let StageAttempt {
            stage,
            result,
            attempts,
            elapsed,
        } = attempt;

        let committed = result.and_then(|invocation| {
            let chars = invocation.text.len();
            let descriptor = graph.descriptor(stage)?;
            self.commit(descriptor, invocation)?;
            self.advance(RunPhase::Committed(stage))?;
            Ok(chars)
        });

        match committed {
            Ok(chars) => {
                self.record(stage, attempts, elapsed, chars, StageStatus::Committed);
                info!(
                    stage = %stage,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "stage committed"
                );
                Ok(())
            }
            Err(cause) => {
                self.mark_failed(stage);
                self.record(stage, attempts, elapsed, 0, StageStatus::Failed);
                error!(stage = %stage, attempts, error = %cause, "stage failed");
                Err(StageFault { stage, cause })
            }
        }
    }

    fn fail(mut self, stage: Option<StageId>, cause: StageError) -> RunOutcome {
        if let Some(stage) = stage {
            self.mark_failed(stage);
        }
        let kind = FailureKind::of(&cause);
        match kind {
            FailureKind::Cancelled => info!(next = ?stage, "run cancelled"),
            _ => error!(kind = %kind, stage = ?stage, error = %cause, "run failed"),
        }
        RunOutcome::Failed(RunFailure {
            run_id: self.state.context().run_id(),
            kind,
            stage,
            cause,
            partial: self.state.snapshot(),
            phases: self.phases.into_log(),
            metrics: self.metrics,
        })
    }
}

/// Entry point for pipeline runs. Cheap to clone; clones share the graph,
/// capabilities and memory, so many runs may be awaited concurrently.
#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<Engine>,
}

impl Orchestrator {
    /// Orchestrator over the standard pipeline.
    pub fn new(
        config: PipelineConfig,
        capability: Arc<dyn ReasoningCapability>,
        data: Arc<dyn DataProvider>,
        memory: MemoryRegistry,
    ) -> Result<Self, StageError> {
        Self::with_graph(config, StageGraph::standard()?, capability, data, memory)
    }

    /// Orchestrator over an already validated graph.
    pub fn with_graph(
        config: PipelineConfig,
        graph: StageGraph,
        capability: Arc<dyn ReasoningCapability>,
        data: Arc<dyn DataProvider>,
        memory: MemoryRegistry,
    ) -> Result<Self, StageError> {
        config.validate().map_err(StageError::Configuration)?;
        let invoker = CapabilityInvoker::new(capability, config.stage_timeout());
        let contexts = ContextBuilder::new(
            memory.clone(),
            data,
            config.memory_top_k,
            config.lookback_days,
            config.stage_timeout(),
        );
        Ok(Self {
            engine: Arc::new(Engine {
                config,
                graph,
                router: ConditionalRouter::new(),
                invoker,
                contexts,
                memory,
                events: EventBus::new(),
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.engine.config
    }

    pub fn graph(&self) -> &StageGraph {
        &self.engine.graph
    }

    pub fn memory(&self) -> &MemoryRegistry {
        &self.engine.memory
    }

    /// Live phase and stage events of every run driven from now on.
    /// Clones of this orchestrator publish on the same channel.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.engine.events.subscribe()
    }

    /// Run to completion.
    pub async fn run(&self, context: RunContext) -> RunOutcome {
        self.run_with_cancel(context, CancellationToken::new()).await
    }

    /// Run until completion, failure, or cancellation. Cancellation is
    /// honoured between stages and between retry attempts; committed state
    /// is kept in the returned failure.
    pub async fn run_with_cancel(&self, context: RunContext, cancel: CancellationToken) -> RunOutcome {
        let span = tracing::info_span!(
            "run",
            run_id = %context.run_id(),
            subject = %context.subject(),
            date = %context.analysis_date()
        );
        self.drive(Arc::new(context), cancel).instrument(span).await
    }

    async fn drive(&self, context: Arc<RunContext>, cancel: CancellationToken) -> RunOutcome {
        let engine = &self.engine;
        let settings = context.settings();
        info!(
            analysts = ?settings.analysts,
            debate_rounds = settings.max_debate_rounds,
            risk_rounds = settings.max_risk_rounds,
            data_mode = %settings.data_mode,
            "run starting"
        );

        let mut run = RunProgress::new(Arc::clone(&context), engine.events.clone());
        if let Err(e) = settings.validate() {
            return run.fail(None, StageError::Configuration(e));
        }

        let mut next = match engine.router.entry(run.state.view()) {
            Ok(next) => next,
            Err(e) => return run.fail(None, e.into()),
        };

        while let Some(stage) = next.stage() {
            if cancel.is_cancelled() {
                return run.fail(Some(stage), StageError::Cancelled);
            }

            let step = if stage.is_analyst() && engine.config.fan_out == FanOutMode::Concurrent {
                self.fan_out(&mut run, &cancel).await
            } else {
                self.step(&mut run, stage, &cancel).await
            };
            if let Err(StageFault { stage, cause }) = step {
                return run.fail(Some(stage), cause);
            }

            next = match engine.next_stage(stage, run.state.view()) {
                Ok(next) => next,
                Err(e) => return run.fail(Some(stage), e),
            };
            debug!(from = %stage, next = ?next, "routed");
        }

        if let Err(e) = run.advance(RunPhase::Terminal) {
            return run.fail(None, e.into());
        }
        let memory_seq = engine.remember(run.state.view()).await;
        let signal = run.state.view().final_signal();
        info!(signal = ?signal, metrics = %run.metrics.summary(), "run complete");

        RunOutcome::Completed(RunReport {
            run_id: context.run_id(),
            state: run.state.snapshot(),
            signal,
            phases: run.phases.into_log(),
            metrics: run.metrics,
            memory_seq,
        })
    }

    /// Execute one stage with retries and commit it.
    async fn step(&self, run: &mut RunProgress, stage: StageId, cancel: &CancellationToken) -> Result<(), StageFault> {
        run.start(stage)?;
        let snapshot = run.state.snapshot();
        let attempt = self.engine.execute_with_retry(stage, &snapshot, cancel).await;
        run.settle(&self.engine.graph, attempt)
    }

    /// Run every pending analyst concurrently and join under one budget.
    ///
    /// Successful analysts are committed in configured order even when a
    /// sibling fails, so the partial state keeps their reports.
    async fn fan_out(&self, run: &mut RunProgress, cancel: &CancellationToken) -> Result<(), StageFault> {
        let pending: Vec<StageId> = run
            .state
            .view()
            .pending_analysts()
            .into_iter()
            .map(StageId::Analyst)
            .collect();
        let snapshot = Arc::new(run.state.snapshot());

        let mut tasks: JoinSet<StageAttempt> = JoinSet::new();
        for stage in &pending {
            run.start(*stage)?;
            let engine = Arc::clone(&self.engine);
            let snapshot = Arc::clone(&snapshot);
            let cancel = cancel.clone();
            let stage = *stage;
            tasks.spawn(
                async move { engine.execute_with_retry(stage, &snapshot, &cancel).await }.in_current_span(),
            );
        }
        info!(analysts = pending.len(), "analyst fan-out started");

        let budget = self.engine.config.join_timeout();
        let mut finished: BTreeMap<StageId, StageAttempt> = BTreeMap::new();
        let joined = tokio::time::timeout(budget, async {
            while let Some(res) = tasks.join_next().await {
                match res {
                    Ok(attempt) => {
                        finished.insert(attempt.stage, attempt);
                    }
                    Err(e) => warn!(error = %e, "analyst task aborted"),
                }
            }
        })
        .await;
        tasks.abort_all();

        let mut first_fault = None;
        for stage in &pending {
            if let Some(attempt) = finished.remove(stage) {
                if let Err(fault) = run.settle(&self.engine.graph, attempt) {
                    first_fault.get_or_insert(fault);
                }
            }
        }

        let unfinished: Vec<StageId> = pending
            .iter()
            .copied()
            .filter(|s| matches!(run.phases.phase_of(*s), Some(RunPhase::Running(_))))
            .collect();
        for stage in &unfinished {
            run.mark_failed(*stage);
        }

        if let Some(stage) = unfinished.first().copied() {
            let cause = if joined.is_err() {
                error!(pending = ?unfinished, budget_ms = budget.as_millis() as u64, "analyst fan-in timed out");
                StageError::JoinTimeout {
                    pending: unfinished.clone(),
                    budget,
                }
            } else {
                StageError::TaskAborted(format!("{stage} ended without a result"))
            };
            return Err(StageFault { stage, cause });
        }
        if let Some(fault) = first_fault {
            return Err(fault);
        }

        info!(analysts = pending.len(), "analyst fan-in complete");
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.engine.config)
            .field("stages", &self.engine.graph.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use desk_coordination::{AnalystKind, RunSettings, TradeSignal};

    use super::*;

    fn state() -> SharedState {
        let settings = RunSettings {
            analysts: vec![AnalystKind::Market],
            ..RunSettings::default()
        };
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        SharedState::new(Arc::new(RunContext::new("INTC", date, settings)))
    }

    #[test]
    fn terminal_record_needs_a_final_decision() {
        let mut s = state();
        s.set(
            StateField::AnalystReport(AnalystKind::Market),
            FieldValue::Text("foundry losses widen".into()),
        )
        .unwrap();
        assert!(terminal_record(s.view()).is_err());

        s.set(StateField::FinalDecision, FieldValue::Text("exit".into()))
            .unwrap();
        s.set(StateField::FinalSignal, FieldValue::Signal(TradeSignal::Sell))
            .unwrap();
        let record = terminal_record(s.view()).unwrap();
        assert_eq!(record.outcome, "SELL");
        assert_eq!(record.lesson, "exit");
        assert!(record.situation.contains("foundry losses widen"));
    }

    #[test]
    fn failed_commit_leaves_the_stage_failed() {
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let mut run = RunProgress::new(
            Arc::new(RunContext::new(
                "INTC",
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                RunSettings::default(),
            )),
            bus,
        );
        let graph = StageGraph::standard().unwrap();
        run.start(StageId::RiskManager).map_err(|f| f.cause).unwrap();

        let attempt = StageAttempt {
            stage: StageId::RiskManager,
            result: Ok(Invocation {
                text: "no call".into(),
                signal: None,
                elapsed_ms: 1,
            }),
            attempts: 1,
            elapsed: Duration::from_millis(1),
        };
        let fault = run.settle(&graph, attempt).err().unwrap();

        assert!(matches!(fault.cause, StageError::Capability(CapabilityError::MalformedOutput(_))));
        assert_eq!(
            run.phases.phase_of(StageId::RiskManager),
            Some(RunPhase::Failed(StageId::RiskManager))
        );
        assert_eq!(run.metrics.stages[0].status, StageStatus::Failed);
        assert!(!run.state.is_set(StateField::FinalDecision));

        let mut published = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.run_id(), run.run_id());
            published.push(event);
        }
        let phases: Vec<RunPhase> = published
            .iter()
            .filter_map(|e| match e {
                RunEvent::Phase { record, .. } => Some(record.to),
                RunEvent::Stage { .. } => None,
            })
            .collect();
        assert_eq!(phases, run.phases.trail());
        assert!(matches!(
            published.last(),
            Some(RunEvent::Stage { metric, .. }) if metric.status == StageStatus::Failed
        ));
    }
}
