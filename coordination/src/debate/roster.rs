//! Debate kinds and their fixed speaking rosters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which of the two debates a turn belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateKind {
    /// Bull vs. bear investment debate.
    Research,
    /// Three-way risk discussion over the trader's plan.
    Risk,
}

impl DebateKind {
    /// Speaking order. Turn `n` (0-indexed) belongs to `roster()[n % len]`.
    pub fn roster(self) -> &'static [DebateRole] {
        match self {
            Self::Research => &[DebateRole::Bull, DebateRole::Bear],
            Self::Risk => &[
                DebateRole::Aggressive,
                DebateRole::Conservative,
                DebateRole::Neutral,
            ],
        }
    }

    /// Role scheduled to speak on the 0-indexed turn.
    pub fn speaker_for_turn(self, turn: u32) -> DebateRole {
        let roster = self.roster();
        roster[turn as usize % roster.len()]
    }
}

impl fmt::Display for DebateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Research => write!(f, "research"),
            Self::Risk => write!(f, "risk"),
        }
    }
}

/// A debating participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateRole {
    Bull,
    Bear,
    /// Argues for the high-reward reading of the trader's plan.
    Aggressive,
    /// Argues for capital preservation.
    Conservative,
    Neutral,
}

impl DebateRole {
    pub fn debate(self) -> DebateKind {
        match self {
            Self::Bull | Self::Bear => DebateKind::Research,
            Self::Aggressive | Self::Conservative | Self::Neutral => DebateKind::Risk,
        }
    }
}

impl fmt::Display for DebateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bull => write!(f, "bull"),
            Self::Bear => write!(f, "bear"),
            Self::Aggressive => write!(f, "aggressive"),
            Self::Conservative => write!(f, "conservative"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}
