//! Append-only debate transcript with its turn counter.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::roster::{DebateKind, DebateRole};

/// One turn by one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateTurn {
    /// Turn number (1-indexed).
    pub round: u32,
    pub role: DebateRole,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// Rejected append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The role is not on this debate's roster.
    ForeignRole { kind: DebateKind, role: DebateRole },
    /// The role is on the roster but it is somebody else's turn.
    OutOfTurn {
        kind: DebateKind,
        expected: DebateRole,
        got: DebateRole,
    },
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForeignRole { kind, role } => {
                write!(f, "role {role} does not take part in the {kind} debate")
            }
            Self::OutOfTurn {
                kind,
                expected,
                got,
            } => write!(f, "{kind} debate expected {expected} to speak, got {got}"),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Ordered transcript plus round counter for one debate.
///
/// The counter is incremented by exactly one per appended turn, so
/// `rounds() == transcript().len()` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateLedger {
    kind: DebateKind,
    rounds: u32,
    transcript: Vec<DebateTurn>,
}

impl DebateLedger {
    pub fn new(kind: DebateKind) -> Self {
        Self {
            kind,
            rounds: 0,
            transcript: Vec::new(),
        }
    }

    pub fn kind(&self) -> DebateKind {
        self.kind
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }

    pub fn transcript(&self) -> &[DebateTurn] {
        &self.transcript
    }

    /// Role due to speak next.
    pub fn next_speaker(&self) -> DebateRole {
        self.kind.speaker_for_turn(self.rounds)
    }

    /// Append a turn. Returns the new round count.
    pub fn append(&mut self, role: DebateRole, message: impl Into<String>) -> Result<u32, LedgerError> {
        if role.debate() != self.kind {
            return Err(LedgerError::ForeignRole {
                kind: self.kind,
                role,
            });
        }
        let expected = self.next_speaker();
        if role != expected {
            return Err(LedgerError::OutOfTurn {
                kind: self.kind,
                expected,
                got: role,
            });
        }

        self.rounds += 1;
        self.transcript.push(DebateTurn {
            round: self.rounds,
            role,
            message: message.into(),
            recorded_at: Utc::now(),
        });
        Ok(self.rounds)
    }

    /// Speaking order so far.
    pub fn roles(&self) -> Vec<DebateRole> {
        self.transcript.iter().map(|t| t.role).collect()
    }

    /// Everything one role has said, oldest first.
    pub fn history(&self, role: DebateRole) -> Vec<&str> {
        self.transcript
            .iter()
            .filter(|t| t.role == role)
            .map(|t| t.message.as_str())
            .collect()
    }

    /// Most recent turn.
    pub fn latest(&self) -> Option<&DebateTurn> {
        self.transcript.last()
    }

    /// Transcript rendered as `role: message` lines for prompt context.
    pub fn render(&self) -> String {
        self.transcript
            .iter()
            .map(|t| format!("{}: {}", t.role, t.message))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] {} turns | next={}",
            self.kind,
            self.rounds,
            self.next_speaker()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_increments_counter_and_keeps_order() {
        let mut ledger = DebateLedger::new(DebateKind::Research);
        assert_eq!(ledger.append(DebateRole::Bull, "upside").unwrap(), 1);
        assert_eq!(ledger.append(DebateRole::Bear, "downside").unwrap(), 2);
        assert_eq!(ledger.rounds(), 2);
        assert_eq!(ledger.transcript().len(), 2);
        assert_eq!(ledger.roles(), vec![DebateRole::Bull, DebateRole::Bear]);
        assert_eq!(ledger.latest().unwrap().message, "downside");
        assert_eq!(ledger.latest().unwrap().round, 2);
    }

    #[test]
    fn out_of_turn_append_is_rejected() {
        let mut ledger = DebateLedger::new(DebateKind::Research);
        let err = ledger.append(DebateRole::Bear, "me first").unwrap_err();
        assert_eq!(
            err,
            LedgerError::OutOfTurn {
                kind: DebateKind::Research,
                expected: DebateRole::Bull,
                got: DebateRole::Bear,
            }
        );
        assert!(ledger.is_empty());
        assert_eq!(ledger.rounds(), 0);
    }

    #[test]
    fn foreign_role_is_rejected() {
        let mut ledger = DebateLedger::new(DebateKind::Risk);
        let err = ledger.append(DebateRole::Bull, "wrong room").unwrap_err();
        assert!(matches!(err, LedgerError::ForeignRole { .. }));
    }

    #[test]
    fn history_filters_by_role() {
        let mut ledger = DebateLedger::new(DebateKind::Risk);
        ledger.append(DebateRole::Aggressive, "a1").unwrap();
        ledger.append(DebateRole::Conservative, "c1").unwrap();
        ledger.append(DebateRole::Neutral, "n1").unwrap();
        ledger.append(DebateRole::Aggressive, "a2").unwrap();
        assert_eq!(ledger.history(DebateRole::Aggressive), vec!["a1", "a2"]);
        assert_eq!(ledger.next_speaker(), DebateRole::Conservative);
        assert!(ledger.render().starts_with("aggressive: a1\nconservative: c1"));
    }

    #[test]
    fn status_line_mentions_next_speaker() {
        let ledger = DebateLedger::new(DebateKind::Research);
        assert_eq!(ledger.status_line(), "[research] 0 turns | next=bull");
    }
}
