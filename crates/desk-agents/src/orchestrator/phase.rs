//! Stage lifecycle state machine with legal transition guards.
//!
//! ```text
//! Pending(s) → Running(s) → Committed(s) → Pending(next) … → Terminal
//!      └───────────┴──→ Failed(s)
//! ```
//!
//! Phases are tracked per stage so concurrently running analysts each get
//! their own `Pending → Running → Committed` trail. Debaters may re-enter
//! `Pending` after committing because they speak more than once. Every
//! accepted transition is appended to a log for replay and diagnostics.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use desk_coordination::StageId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending(StageId),
    Running(StageId),
    Committed(StageId),
    Failed(StageId),
    Terminal,
}

impl RunPhase {
    pub fn stage(self) -> Option<StageId> {
        match self {
            Self::Pending(s) | Self::Running(s) | Self::Committed(s) | Self::Failed(s) => Some(s),
            Self::Terminal => None,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(s) => write!(f, "Pending({s})"),
            Self::Running(s) => write!(f, "Running({s})"),
            Self::Committed(s) => write!(f, "Committed({s})"),
            Self::Failed(s) => write!(f, "Failed({s})"),
            Self::Terminal => write!(f, "Terminal"),
        }
    }
}

/// A single recorded transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Previous phase of the same stage, if it had one.
    pub from: Option<RunPhase>,
    pub to: RunPhase,
    /// Milliseconds since the run started.
    pub elapsed_ms: u64,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: Option<RunPhase>,
    pub to: RunPhase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.from {
            Some(from) => write!(f, "illegal phase transition: {from} → {}", self.to),
            None => write!(f, "illegal phase transition: (none) → {}", self.to),
        }
    }
}

impl std::error::Error for IllegalTransition {}

fn is_legal(from: Option<RunPhase>, to: RunPhase) -> bool {
    use RunPhase::*;

    match (from, to) {
        (None, Pending(_)) => true,
        (Some(Committed(StageId::Debater(a))), Pending(StageId::Debater(b))) => a == b,
        (Some(Pending(a)), Running(b)) | (Some(Running(a)), Committed(b)) => a == b,
        (Some(Pending(a) | Running(a)), Failed(b)) => a == b,
        _ => false,
    }
}

/// Per-run phase tracker.
#[derive(Debug)]
pub struct PhaseTracker {
    current: BTreeMap<StageId, RunPhase>,
    terminal: bool,
    started: Instant,
    log: Vec<PhaseRecord>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: BTreeMap::new(),
            terminal: false,
            started: Instant::now(),
            log: Vec::new(),
        }
    }

    /// Current phase of a stage, if it has been scheduled.
    pub fn phase_of(&self, stage: StageId) -> Option<RunPhase> {
        self.current.get(&stage).copied()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn advance(&mut self, to: RunPhase) -> Result<(), IllegalTransition> {
        let from = match to.stage() {
            Some(stage) => self.phase_of(stage),
            None => None,
        };
        let legal = !self.terminal
            && match to {
                RunPhase::Terminal => self.can_terminate(),
                _ => is_legal(from, to),
            };
        if !legal {
            return Err(IllegalTransition { from, to });
        }

        tracing::debug!(from = ?from, to = %to, "phase transition");
        self.log.push(PhaseRecord {
            from,
            to,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
        match to.stage() {
            Some(stage) => {
                self.current.insert(stage, to);
            }
            None => self.terminal = true,
        }
        Ok(())
    }

    /// Terminal is reachable once something committed and nothing is
    /// pending, running or failed.
    fn can_terminate(&self) -> bool {
        !self.current.is_empty()
            && self
                .current
                .values()
                .all(|p| matches!(p, RunPhase::Committed(_)))
    }

    pub fn log(&self) -> &[PhaseRecord] {
        &self.log
    }

    pub fn into_log(self) -> Vec<PhaseRecord> {
        self.log
    }

    /// Transition targets in order, e.g. for replay comparison.
    pub fn trail(&self) -> Vec<RunPhase> {
        self.log.iter().map(|r| r.to).collect()
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use desk_coordination::{AnalystKind, DebateRole};

    use super::*;

    fn run_through(tracker: &mut PhaseTracker, stage: StageId) {
        tracker.advance(RunPhase::Pending(stage)).unwrap();
        tracker.advance(RunPhase::Running(stage)).unwrap();
        tracker.advance(RunPhase::Committed(stage)).unwrap();
    }

    #[test]
    fn happy_path_reaches_terminal() {
        let mut tracker = PhaseTracker::new();
        run_through(&mut tracker, StageId::Analyst(AnalystKind::Market));
        run_through(&mut tracker, StageId::RiskManager);
        tracker.advance(RunPhase::Terminal).unwrap();
        assert!(tracker.is_terminal());
        assert_eq!(tracker.log().len(), 7);
        assert_eq!(tracker.trail().last(), Some(&RunPhase::Terminal));
    }

    #[test]
    fn cannot_skip_running() {
        let mut tracker = PhaseTracker::new();
        tracker.advance(RunPhase::Pending(StageId::Trader)).unwrap();
        let err = tracker.advance(RunPhase::Committed(StageId::Trader)).unwrap_err();
        assert_eq!(err.from, Some(RunPhase::Pending(StageId::Trader)));
        assert!(err.to_string().contains("Committed(trader)"));
    }

    #[test]
    fn only_debaters_are_rescheduled() {
        let mut tracker = PhaseTracker::new();
        let bull = StageId::Debater(DebateRole::Bull);
        run_through(&mut tracker, bull);
        run_through(&mut tracker, bull);

        run_through(&mut tracker, StageId::Trader);
        assert!(tracker.advance(RunPhase::Pending(StageId::Trader)).is_err());
    }

    #[test]
    fn terminal_requires_everything_committed() {
        let mut tracker = PhaseTracker::new();
        assert!(tracker.advance(RunPhase::Terminal).is_err());

        run_through(&mut tracker, StageId::Trader);
        tracker.advance(RunPhase::Pending(StageId::RiskManager)).unwrap();
        assert!(tracker.advance(RunPhase::Terminal).is_err());
    }

    #[test]
    fn failure_from_running_and_nothing_after_terminal() {
        let mut tracker = PhaseTracker::new();
        let news = StageId::Analyst(AnalystKind::News);
        tracker.advance(RunPhase::Pending(news)).unwrap();
        tracker.advance(RunPhase::Running(news)).unwrap();
        tracker.advance(RunPhase::Failed(news)).unwrap();
        assert!(tracker.advance(RunPhase::Terminal).is_err());

        let mut done = PhaseTracker::new();
        run_through(&mut done, StageId::Trader);
        done.advance(RunPhase::Terminal).unwrap();
        assert!(done.advance(RunPhase::Pending(StageId::RiskManager)).is_err());
    }
}
