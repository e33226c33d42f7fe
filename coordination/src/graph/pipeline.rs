//! The standard analysis pipeline.
//!
//! ```text
//! analysts (fan-out) ──join──► bull ⇄ bear ──► research_manager ──► trader
//!                                                                     │
//!       risk_manager ◄── aggressive → conservative → neutral ◄───────┘
//!            │
//!         Terminal
//! ```
//!
//! Every analyst stage is registered; runs that disable an analyst simply
//! never schedule it and never require its report.

use super::{Extraction, GraphError, StageDescriptor, StageGraph, StageId, Transition};
use crate::debate::{DebateKind, DebateRole};
use crate::memory::MemoryScope;
use crate::state::{AnalystKind, StateField};

fn analyst_reports() -> Vec<StateField> {
    AnalystKind::ALL
        .iter()
        .map(|kind| StateField::AnalystReport(*kind))
        .collect()
}

fn with_reports(extra: &[StateField]) -> Vec<StateField> {
    let mut reads = analyst_reports();
    reads.extend_from_slice(extra);
    reads
}

fn analyst(kind: AnalystKind) -> StageDescriptor {
    let id = StageId::Analyst(kind);
    StageDescriptor {
        id,
        reads: Vec::new(),
        writes: vec![StateField::AnalystReport(kind)],
        capability: id.to_string(),
        memory: None,
        extraction: Extraction::None,
        transition: Transition::Dynamic,
    }
}

fn debater(role: DebateRole) -> StageDescriptor {
    let id = StageId::Debater(role);
    let transcript = StateField::Transcript(role.debate());
    let (reads, memory) = match role.debate() {
        DebateKind::Research => (
            with_reports(&[transcript]),
            match role {
                DebateRole::Bull => Some(MemoryScope::Bull),
                _ => Some(MemoryScope::Bear),
            },
        ),
        DebateKind::Risk => (with_reports(&[StateField::TraderPlan, transcript]), None),
    };
    StageDescriptor {
        id,
        reads,
        writes: vec![transcript],
        capability: id.to_string(),
        memory,
        extraction: Extraction::None,
        transition: Transition::Dynamic,
    }
}

/// Descriptors of the standard pipeline, unvalidated.
pub fn standard_stages() -> Vec<StageDescriptor> {
    let mut stages: Vec<StageDescriptor> = AnalystKind::ALL.iter().map(|k| analyst(*k)).collect();
    stages.extend(
        DebateKind::Research
            .roster()
            .iter()
            .chain(DebateKind::Risk.roster())
            .map(|role| debater(*role)),
    );

    stages.push(StageDescriptor {
        id: StageId::ResearchManager,
        reads: with_reports(&[StateField::Transcript(DebateKind::Research)]),
        writes: vec![StateField::InvestmentPlan],
        capability: StageId::ResearchManager.to_string(),
        memory: Some(MemoryScope::ResearchManager),
        extraction: Extraction::None,
        transition: Transition::Fixed(StageId::Trader),
    });
    stages.push(StageDescriptor {
        id: StageId::Trader,
        reads: with_reports(&[StateField::InvestmentPlan]),
        writes: vec![StateField::TraderPlan],
        capability: StageId::Trader.to_string(),
        memory: Some(MemoryScope::Trader),
        extraction: Extraction::TradeSignal,
        transition: Transition::Dynamic,
    });
    stages.push(StageDescriptor {
        id: StageId::RiskManager,
        reads: with_reports(&[
            StateField::InvestmentPlan,
            StateField::TraderPlan,
            StateField::Transcript(DebateKind::Risk),
        ]),
        writes: vec![StateField::FinalDecision, StateField::FinalSignal],
        capability: StageId::RiskManager.to_string(),
        memory: Some(MemoryScope::RiskManager),
        extraction: Extraction::TradeSignal,
        transition: Transition::Terminal,
    });
    stages
}

impl StageGraph {
    /// Validated standard pipeline.
    pub fn standard() -> Result<Self, GraphError> {
        Self::new(standard_stages())
    }
}
