//! Shared fixtures for the desk-agents integration tests.
//!
//! `ScriptedCapability` answers every role deterministically and can be told
//! to fail, hang, answer badly, or cancel a run when a given role is called.
//! `FlakyData` and `StalledEmbedder` misbehave on the data and memory side.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use desk_agents::{
    CancellationToken, CapabilityError, DataProvider, DataRequest, Embedder, FanOutMode, HashingEmbedder,
    MemoryRegistry, Orchestrator, PipelineConfig, ReasoningCapability, StageContext,
};
use desk_coordination::{AnalystKind, MemoryError, TradeSignal};

pub const SUBJECT: &str = "NVDA";

pub fn analysis_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
}

#[derive(Default)]
pub struct ScriptedCapability {
    calls: Mutex<Vec<String>>,
    contexts: Mutex<Vec<(String, StageContext)>>,
    failures: Mutex<HashMap<String, u32>>,
    undecided: Mutex<HashMap<String, u32>>,
    blank: Mutex<HashMap<String, u32>>,
    hanging: HashSet<String>,
    cancel_on: Option<(String, CancellationToken)>,
    decision: Option<TradeSignal>,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// `role` fails with `Unavailable` on its first `times` calls.
    pub fn failing(self, role: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(role.to_string(), times);
        self
    }

    /// `role` answers without a trade proposal on its first `times` calls.
    pub fn undecided(self, role: &str, times: u32) -> Self {
        self.undecided.lock().unwrap().insert(role.to_string(), times);
        self
    }

    /// `role` answers with whitespace on its first `times` calls.
    pub fn blank(self, role: &str, times: u32) -> Self {
        self.blank.lock().unwrap().insert(role.to_string(), times);
        self
    }

    /// `role` never answers.
    pub fn hanging(mut self, role: &str) -> Self {
        self.hanging.insert(role.to_string());
        self
    }

    /// Cancel `token` while `role` is being answered.
    pub fn cancel_on(mut self, role: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((role.to_string(), token));
        self
    }

    /// Signal carried by trader and risk-manager answers. Defaults to BUY.
    pub fn deciding(mut self, signal: TradeSignal) -> Self {
        self.decision = Some(signal);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, role: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.as_str() == role).count()
    }

    /// Contexts passed to `role`, oldest first.
    pub fn contexts_for(&self, role: &str) -> Vec<StageContext> {
        self.contexts
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| r == role)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl ReasoningCapability for ScriptedCapability {
    async fn respond(&self, role: &str, context: &StageContext) -> Result<String, CapabilityError> {
        self.calls.lock().unwrap().push(role.to_string());
        self.contexts
            .lock()
            .unwrap()
            .push((role.to_string(), context.clone()));

        if let Some((target, token)) = &self.cancel_on {
            if target == role {
                token.cancel();
            }
        }

        if self.hanging.contains(role) {
            tokio::time::sleep(Duration::from_secs(86_400)).await;
        }

        if take_one(&self.failures, role) {
            return Err(CapabilityError::Unavailable(format!("{role} overloaded")));
        }
        if take_one(&self.blank, role) {
            return Ok("  \n ".to_string());
        }
        if take_one(&self.undecided, role) {
            return Ok(format!("{role} reviewed {} and is still undecided.", context.subject));
        }

        let signal = self.decision.unwrap_or(TradeSignal::Buy);
        Ok(match role {
            "trader" | "risk_manager" => format!(
                "{role} reviewed {}.\nFINAL TRANSACTION PROPOSAL: **{signal}**",
                context.subject
            ),
            _ => format!("{role} view on {}", context.subject),
        })
    }
}

/// Consume one scripted misbehaviour for `role`, if any are left.
fn take_one(budget: &Mutex<HashMap<String, u32>>, role: &str) -> bool {
    let mut budget = budget.lock().unwrap();
    match budget.get_mut(role) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

/// Echoes the request window so tests can see what was asked for.
pub struct StaticData;

#[async_trait]
impl DataProvider for StaticData {
    async fn fetch(&self, request: &DataRequest) -> Result<String, CapabilityError> {
        Ok(format!(
            "{} data for {} {}..{} ({})",
            request.analyst, request.subject, request.start, request.end, request.mode
        ))
    }
}

/// Fails or stalls its first `times` fetches, then behaves like `StaticData`.
pub struct FlakyData {
    remaining: AtomicU32,
    stall: bool,
    calls: AtomicU32,
}

impl FlakyData {
    pub fn failing(times: u32) -> Self {
        Self {
            remaining: AtomicU32::new(times),
            stall: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn stalling(times: u32) -> Self {
        Self {
            stall: true,
            ..Self::failing(times)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataProvider for FlakyData {
    async fn fetch(&self, request: &DataRequest) -> Result<String, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let misbehave = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if misbehave {
            if self.stall {
                std::future::pending::<()>().await;
            }
            return Err(CapabilityError::Unavailable("vendor feed down".into()));
        }
        StaticData.fetch(request).await
    }
}

/// Embedder that never answers.
pub struct StalledEmbedder;

#[async_trait]
impl Embedder for StalledEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, MemoryError> {
        std::future::pending().await
    }
}

/// Defaults with a tiny backoff so retry tests stay fast.
pub fn config() -> PipelineConfig {
    PipelineConfig {
        retry_backoff_ms: 1,
        ..PipelineConfig::default()
    }
}

pub fn config_with(analysts: Vec<AnalystKind>, debate: u32, risk: u32) -> PipelineConfig {
    PipelineConfig {
        analysts,
        max_debate_rounds: debate,
        max_risk_rounds: risk,
        ..config()
    }
}

pub fn sequential(mut config: PipelineConfig) -> PipelineConfig {
    config.fan_out = FanOutMode::Sequential;
    config
}

pub fn memory() -> MemoryRegistry {
    MemoryRegistry::in_memory(Arc::new(HashingEmbedder::default()))
}

pub fn orchestrator(
    config: PipelineConfig,
    capability: Arc<ScriptedCapability>,
    memory: MemoryRegistry,
) -> Orchestrator {
    orchestrator_with_data(config, capability, Arc::new(StaticData), memory)
}

pub fn orchestrator_with_data(
    config: PipelineConfig,
    capability: Arc<ScriptedCapability>,
    data: Arc<dyn DataProvider>,
    memory: MemoryRegistry,
) -> Orchestrator {
    Orchestrator::new(config, capability, data, memory).unwrap()
}
