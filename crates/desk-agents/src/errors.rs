//! Run-level error taxonomy with retry classification.
//!
//! Callers query `is_retriable()` / `retry_category()` instead of matching
//! on message strings.
//!
//! ## Retry categories
//!
//! | Category        | Retriable | Source                              |
//! |-----------------|-----------|-------------------------------------|
//! | Transient       | yes       | capability or data source unavailable |
//! | Timeout         | yes       | stage exceeded its time budget      |
//! | MalformedOutput | yes       | empty output or missing signal      |
//! | Invariant       | no        | state, graph or routing violation   |
//! | JoinTimeout     | no        | analyst fan-in exceeded its budget  |
//! | Cancelled       | no        | caller cancelled the run            |

use std::fmt;
use std::time::Duration;

use desk_coordination::{GraphError, MemoryError, RouteError, StageId, StateError};
use thiserror::Error;

use crate::orchestrator::IllegalTransition;

/// Classification used by the orchestrator to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    Transient,
    Timeout,
    MalformedOutput,
    Invariant,
    JoinTimeout,
    Cancelled,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::Timeout | Self::MalformedOutput)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Timeout => write!(f, "timeout"),
            Self::MalformedOutput => write!(f, "malformed_output"),
            Self::Invariant => write!(f, "invariant"),
            Self::JoinTimeout => write!(f, "join_timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Failure of an external capability or data source call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("capability exceeded its {0:?} budget")]
    Timeout(Duration),

    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("malformed output: {0}")]
    MalformedOutput(String),
}

/// Everything that can stop a stage from committing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    Phase(#[from] IllegalTransition),

    #[error("memory: {0}")]
    Memory(#[from] MemoryError),

    #[error("fan-in still waiting on {pending:?} after {budget:?}")]
    JoinTimeout { pending: Vec<StageId>, budget: Duration },

    #[error("stage task aborted: {0}")]
    TaskAborted(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("run cancelled")]
    Cancelled,
}

impl StageError {
    /// Classify this error for retry logic.
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Capability(CapabilityError::Timeout(_)) => RetryCategory::Timeout,
            Self::Capability(CapabilityError::Unavailable(_)) => RetryCategory::Transient,
            Self::Capability(CapabilityError::MalformedOutput(_)) => RetryCategory::MalformedOutput,
            Self::Memory(e) if e.is_retryable() => RetryCategory::Transient,
            Self::JoinTimeout { .. } => RetryCategory::JoinTimeout,
            Self::Cancelled => RetryCategory::Cancelled,
            Self::State(_)
            | Self::Route(_)
            | Self::Graph(_)
            | Self::Phase(_)
            | Self::Memory(_)
            | Self::TaskAborted(_)
            | Self::Configuration(_) => RetryCategory::Invariant,
        }
    }

    /// Returns `true` if the orchestrator may retry the stage.
    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }
}
