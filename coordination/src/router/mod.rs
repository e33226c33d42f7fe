//! Conditional router: pure functions of the state snapshot that pick the
//! next stage wherever the graph defers.
//!
//! ```text
//! analyst committed ─► next pending analyst │ all reports set ─► research debate entry
//! debate turn       ─► rounds < max ? next roster speaker : convergence stage
//! trader committed  ─► risk debate entry
//! ```
//!
//! Debate entry and continuation share one rule, so `max_*_rounds == 0`
//! skips the debate and goes straight to convergence.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::debate::DebateKind;
use crate::graph::StageId;
use crate::state::StateSnapshot;

/// Resolved successor of a committed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStage {
    /// Successor taken from the graph's fixed edge.
    Fixed(StageId),
    /// Successor chosen by the router.
    Resolved(StageId),
    Terminal,
}

impl NextStage {
    pub fn stage(self) -> Option<StageId> {
        match self {
            Self::Fixed(id) | Self::Resolved(id) => Some(id),
            Self::Terminal => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("stage `{0}` has no dynamic routing rule")]
    NotDynamic(StageId),

    #[error("{kind} debate ran {rounds} turns, limit is {max}")]
    RoundsOverrun { kind: DebateKind, rounds: u32, max: u32 },

    #[error("run has no enabled analysts")]
    NoAnalysts,
}

/// Stateless; safe to share across concurrent runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionalRouter;

impl ConditionalRouter {
    pub fn new() -> Self {
        Self
    }

    /// First stage of a run.
    pub fn entry(&self, snapshot: &StateSnapshot) -> Result<NextStage, RouteError> {
        if snapshot.context().settings().analysts.is_empty() {
            return Err(RouteError::NoAnalysts);
        }
        self.after_analyst(snapshot)
    }

    /// Successor of a stage whose transition is dynamic.
    pub fn resolve(&self, from: StageId, snapshot: &StateSnapshot) -> Result<NextStage, RouteError> {
        match from {
            StageId::Analyst(_) => self.after_analyst(snapshot),
            StageId::Debater(role) => self.debate_step(role.debate(), snapshot),
            StageId::Trader => self.debate_step(DebateKind::Risk, snapshot),
            StageId::ResearchManager | StageId::RiskManager => Err(RouteError::NotDynamic(from)),
        }
    }

    /// Fan-in: schedule the next missing analyst, or open the research
    /// debate once every enabled report is present.
    fn after_analyst(&self, snapshot: &StateSnapshot) -> Result<NextStage, RouteError> {
        match snapshot.pending_analysts().first() {
            Some(kind) => Ok(NextStage::Resolved(StageId::Analyst(*kind))),
            None => self.debate_step(DebateKind::Research, snapshot),
        }
    }

    /// Continue or close a debate.
    pub fn debate_step(&self, kind: DebateKind, snapshot: &StateSnapshot) -> Result<NextStage, RouteError> {
        let ledger = snapshot.ledger(kind);
        let max = snapshot.context().settings().round_limit(kind);
        let rounds = ledger.rounds();

        if rounds > max {
            return Err(RouteError::RoundsOverrun { kind, rounds, max });
        }
        if rounds < max {
            return Ok(NextStage::Resolved(StageId::Debater(ledger.next_speaker())));
        }
        Ok(NextStage::Resolved(StageId::convergence(kind)))
    }
}
