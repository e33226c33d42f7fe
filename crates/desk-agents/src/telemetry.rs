//! Structured telemetry for pipeline runs.
//!
//! Two concerns live here:
//! - `init_tracing()`: installs the `tracing` subscriber (env-filtered)
//! - `RunMetrics`: per-stage attempt counts and timings collected by the
//!   orchestrator and returned with every run result

use std::time::Duration;

use desk_coordination::StageId;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber honouring `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}

/// Final status of a stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Committed,
    Failed,
}

/// One stage execution (all of its attempts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetric {
    pub stage: StageId,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub output_chars: usize,
    pub status: StageStatus,
}

/// Metrics for a whole run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub stages: Vec<StageMetric>,
}

impl RunMetrics {
    pub fn record(
        &mut self,
        stage: StageId,
        attempts: u32,
        elapsed: Duration,
        output_chars: usize,
        status: StageStatus,
    ) {
        self.stages.push(StageMetric {
            stage,
            attempts,
            elapsed_ms: elapsed.as_millis() as u64,
            output_chars,
            status,
        });
    }

    /// Attempts beyond the first, summed over all stages.
    pub fn retries(&self) -> u32 {
        self.stages.iter().map(|s| s.attempts.saturating_sub(1)).sum()
    }

    pub fn committed(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Committed)
            .count()
    }

    pub fn total_elapsed_ms(&self) -> u64 {
        self.stages.iter().map(|s| s.elapsed_ms).sum()
    }

    /// Metrics of every execution of `stage`.
    pub fn for_stage(&self, stage: StageId) -> impl Iterator<Item = &StageMetric> {
        self.stages.iter().filter(move |s| s.stage == stage)
    }

    /// Compact one-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} stages | {} committed | {} retries | {}ms",
            self.stages.len(),
            self.committed(),
            self.retries(),
            self.total_elapsed_ms()
        )
    }
}
