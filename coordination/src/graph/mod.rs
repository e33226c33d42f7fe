//! Stage graph: static stage descriptors plus the transition table.
//!
//! Each stage either has a fixed successor, ends the run, or defers to the
//! conditional router. The graph is built once at startup, validated, and
//! then shared read-only by every run.

pub mod pipeline;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::debate::{DebateKind, DebateRole};
use crate::memory::MemoryScope;
use crate::state::{AnalystKind, StateField};

/// Name of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Analyst(AnalystKind),
    Debater(DebateRole),
    ResearchManager,
    Trader,
    RiskManager,
}

impl StageId {
    /// Convergence stage closing the given debate.
    pub fn convergence(kind: DebateKind) -> Self {
        match kind {
            DebateKind::Research => Self::ResearchManager,
            DebateKind::Risk => Self::RiskManager,
        }
    }

    pub fn is_analyst(self) -> bool {
        matches!(self, Self::Analyst(_))
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyst(kind) => write!(f, "{kind}_analyst"),
            Self::Debater(role @ (DebateRole::Bull | DebateRole::Bear)) => {
                write!(f, "{role}_researcher")
            }
            Self::Debater(role) => write!(f, "{role}_debater"),
            Self::ResearchManager => write!(f, "research_manager"),
            Self::Trader => write!(f, "trader"),
            Self::RiskManager => write!(f, "risk_manager"),
        }
    }
}

/// Successor rule for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Fixed(StageId),
    /// Successor is decided by the conditional router.
    Dynamic,
    Terminal,
}

/// Structured data the invoker must pull out of a stage's text output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extraction {
    #[default]
    None,
    TradeSignal,
}

/// Static description of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub id: StageId,
    /// Fields the stage's context is built from.
    pub reads: Vec<StateField>,
    /// Fields the stage commits.
    pub writes: Vec<StateField>,
    /// Role identifier handed to the reasoning capability.
    pub capability: String,
    /// Memory consulted while building context, if any.
    pub memory: Option<MemoryScope>,
    pub extraction: Extraction,
    pub transition: Transition,
}

impl StageDescriptor {
    pub fn is_memory_aware(&self) -> bool {
        self.memory.is_some()
    }
}

/// Startup validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("stage `{0}` registered twice")]
    DuplicateStage(StageId),

    #[error("stage `{0}` is not registered")]
    UnknownStage(StageId),

    #[error("field `{field}` has two writers: `{first}` and `{second}`")]
    ConflictingWriters {
        field: StateField,
        first: StageId,
        second: StageId,
    },

    #[error("stage `{reader}` reads `{field}` but no stage writes it")]
    UnwrittenRead { reader: StageId, field: StateField },

    #[error("stage `{stage}` appends to `{field}` but is not on that debate's roster")]
    ForeignTranscriptWriter { stage: StageId, field: StateField },

    #[error("stage `{from}` transitions to unregistered stage `{to}`")]
    DanglingTransition { from: StageId, to: StageId },

    #[error("stage `{0}` writes a signal field without signal extraction")]
    SignalWithoutExtraction(StageId),

    #[error("pipeline has no terminal stage")]
    NoTerminal,
}

/// Registry of stage descriptors.
#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: BTreeMap<StageId, StageDescriptor>,
}

impl StageGraph {
    /// Build and validate a graph.
    ///
    /// Checks that every write-once field has exactly one writer, every read
    /// field has some writer and transcript writers are roster members.
    /// Fixed transitions must point at registered stages and at least one
    /// stage must be terminal.
    pub fn new(descriptors: Vec<StageDescriptor>) -> Result<Self, GraphError> {
        let mut stages = BTreeMap::new();
        for descriptor in descriptors {
            let id = descriptor.id;
            if stages.insert(id, descriptor).is_some() {
                return Err(GraphError::DuplicateStage(id));
            }
        }

        let mut writers: BTreeMap<StateField, StageId> = BTreeMap::new();
        let mut written: BTreeSet<StateField> = BTreeSet::new();
        for stage in stages.values() {
            for field in &stage.writes {
                written.insert(*field);
                if let StateField::Transcript(kind) = field {
                    let on_roster = matches!(stage.id, StageId::Debater(role) if role.debate() == *kind);
                    if !on_roster {
                        return Err(GraphError::ForeignTranscriptWriter {
                            stage: stage.id,
                            field: *field,
                        });
                    }
                    continue;
                }
                if let Some(first) = writers.insert(*field, stage.id) {
                    return Err(GraphError::ConflictingWriters {
                        field: *field,
                        first,
                        second: stage.id,
                    });
                }
            }
        }

        for stage in stages.values() {
            if let Some(field) = stage.reads.iter().find(|f| !written.contains(*f)) {
                return Err(GraphError::UnwrittenRead {
                    reader: stage.id,
                    field: *field,
                });
            }
            if stage.writes.contains(&StateField::FinalSignal)
                && stage.extraction != Extraction::TradeSignal
            {
                return Err(GraphError::SignalWithoutExtraction(stage.id));
            }
            if let Transition::Fixed(to) = stage.transition {
                if !stages.contains_key(&to) {
                    return Err(GraphError::DanglingTransition { from: stage.id, to });
                }
            }
        }

        if !stages
            .values()
            .any(|s| s.transition == Transition::Terminal)
        {
            return Err(GraphError::NoTerminal);
        }

        Ok(Self { stages })
    }

    pub fn descriptor(&self, id: StageId) -> Result<&StageDescriptor, GraphError> {
        self.stages.get(&id).ok_or(GraphError::UnknownStage(id))
    }

    pub fn transition(&self, id: StageId) -> Result<Transition, GraphError> {
        self.descriptor(id).map(|d| d.transition)
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.stages.contains_key(&id)
    }

    pub fn stages(&self) -> impl Iterator<Item = &StageDescriptor> {
        self.stages.values()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
