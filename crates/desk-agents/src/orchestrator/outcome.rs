//! Run results handed back across the entry point.

use std::fmt;

use desk_coordination::{StageId, StateField, StateSnapshot, TradeSignal};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use super::phase::PhaseRecord;
use crate::errors::{RetryCategory, StageError};
use crate::telemetry::RunMetrics;

/// Why a run stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A stage exhausted its retries on capability failures.
    StageFailed,
    /// Analyst fan-in did not complete within its budget.
    JoinTimeout,
    /// Wiring bug: unset read, duplicate write, bad route or transition.
    InvariantViolation,
    Cancelled,
}

impl FailureKind {
    pub fn of(error: &StageError) -> Self {
        match error.retry_category() {
            RetryCategory::Transient | RetryCategory::Timeout | RetryCategory::MalformedOutput => {
                Self::StageFailed
            }
            RetryCategory::JoinTimeout => Self::JoinTimeout,
            RetryCategory::Cancelled => Self::Cancelled,
            RetryCategory::Invariant => Self::InvariantViolation,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StageFailed => write!(f, "stage_failed"),
            Self::JoinTimeout => write!(f, "join_timeout"),
            Self::InvariantViolation => write!(f, "invariant_violation"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A run that reached `Terminal`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub state: StateSnapshot,
    pub signal: Option<TradeSignal>,
    pub phases: Vec<PhaseRecord>,
    pub metrics: RunMetrics,
    /// Sequence number of the terminal memory append, if it succeeded.
    pub memory_seq: Option<u64>,
}

impl RunReport {
    pub fn final_decision(&self) -> Option<&str> {
        self.state.text(StateField::FinalDecision).ok()
    }
}

fn serialize_display<S: Serializer, T: fmt::Display>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// A run that stopped before `Terminal`, with everything committed so far.
#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    pub run_id: Uuid,
    pub kind: FailureKind,
    /// Stage that failed, or that was about to start when the run stopped.
    pub stage: Option<StageId>,
    #[serde(serialize_with = "serialize_display")]
    pub cause: StageError,
    pub partial: StateSnapshot,
    pub phases: Vec<PhaseRecord>,
    pub metrics: RunMetrics,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{} at {stage}: {}", self.kind, self.cause),
            None => write!(f, "{}: {}", self.kind, self.cause),
        }
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Result of one run. Never a panic, never a bare error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunReport),
    Failed(RunFailure),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Final state on success, partial state on failure.
    pub fn state(&self) -> &StateSnapshot {
        match self {
            Self::Completed(report) => &report.state,
            Self::Failed(failure) => &failure.partial,
        }
    }

    pub fn metrics(&self) -> &RunMetrics {
        match self {
            Self::Completed(report) => &report.metrics,
            Self::Failed(failure) => &failure.metrics,
        }
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match self {
            Self::Completed(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }

    pub fn into_result(self) -> Result<RunReport, RunFailure> {
        match self {
            Self::Completed(report) => Ok(report),
            Self::Failed(failure) => Err(failure),
        }
    }
}
