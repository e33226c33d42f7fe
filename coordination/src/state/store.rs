//! Write-once state store and its read-only snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::types::{AnalystKind, FieldValue, RunContext, StateField};
use crate::debate::{DebateKind, DebateLedger, DebateRole, LedgerError};
use crate::signal::TradeSignal;

/// Shared-state invariant violations. All of them indicate stage wiring
/// mistakes and are never recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("field `{0}` read before it was written")]
    UnsetField(StateField),

    #[error("field `{0}` already holds a value")]
    DuplicateWrite(StateField),

    #[error("field `{0}` is an append-only transcript, not a write-once slot")]
    NotWriteOnce(StateField),

    #[error("field `{0}` holds a signal, not text")]
    NotText(StateField),

    #[error("analyst `{0}` is not enabled for this run")]
    AnalystDisabled(AnalystKind),

    #[error("transcript append rejected: {0}")]
    Ledger(#[from] LedgerError),
}

/// Read-only view of a run's state.
///
/// Handed to routing and context construction; there is no way to mutate
/// the owning [`SharedState`] through it.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    context: Arc<RunContext>,
    fields: BTreeMap<StateField, FieldValue>,
    research: DebateLedger,
    risk: DebateLedger,
}

impl StateSnapshot {
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Value of a write-once field.
    pub fn get(&self, field: StateField) -> Result<&FieldValue, StateError> {
        if !field.is_write_once() {
            return Err(StateError::NotWriteOnce(field));
        }
        self.fields.get(&field).ok_or(StateError::UnsetField(field))
    }

    /// Text of a write-once field.
    pub fn text(&self, field: StateField) -> Result<&str, StateError> {
        self.get(field)?
            .as_text()
            .ok_or(StateError::NotText(field))
    }

    pub fn is_set(&self, field: StateField) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn ledger(&self, kind: DebateKind) -> &DebateLedger {
        match kind {
            DebateKind::Research => &self.research,
            DebateKind::Risk => &self.risk,
        }
    }

    /// Enabled analysts whose report is still missing, in configured order.
    pub fn pending_analysts(&self) -> Vec<AnalystKind> {
        self.context
            .settings()
            .analysts
            .iter()
            .copied()
            .filter(|kind| !self.is_set(StateField::AnalystReport(*kind)))
            .collect()
    }

    /// Enabled analyst reports, in configured order. Fails on the first
    /// missing one, so callers never see a partial fan-in.
    pub fn analyst_reports(&self) -> Result<Vec<(AnalystKind, &str)>, StateError> {
        self.context
            .settings()
            .analysts
            .iter()
            .map(|kind| Ok((*kind, self.text(StateField::AnalystReport(*kind))?)))
            .collect()
    }

    /// Situation summary used as the memory lookup key: all enabled
    /// analyst reports joined in configured order.
    pub fn situation_summary(&self) -> Result<String, StateError> {
        Ok(self
            .analyst_reports()?
            .into_iter()
            .map(|(_, report)| report)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    pub fn final_signal(&self) -> Option<TradeSignal> {
        self.fields
            .get(&StateField::FinalSignal)
            .and_then(FieldValue::as_signal)
    }

    /// Whether the terminal stage has committed.
    pub fn is_complete(&self) -> bool {
        self.is_set(StateField::FinalDecision)
    }

    /// Write-once fields currently set.
    pub fn set_fields(&self) -> impl Iterator<Item = StateField> + '_ {
        self.fields.keys().copied()
    }
}

/// Mutable state for one run. Owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct SharedState {
    current: StateSnapshot,
}

impl SharedState {
    pub fn new(context: Arc<RunContext>) -> Self {
        Self {
            current: StateSnapshot {
                context,
                fields: BTreeMap::new(),
                research: DebateLedger::new(DebateKind::Research),
                risk: DebateLedger::new(DebateKind::Risk),
            },
        }
    }

    pub fn context(&self) -> &RunContext {
        self.current.context()
    }

    pub fn get(&self, field: StateField) -> Result<&FieldValue, StateError> {
        self.current.get(field)
    }

    pub fn is_set(&self, field: StateField) -> bool {
        self.current.is_set(field)
    }

    /// Write a field exactly once.
    pub fn set(&mut self, field: StateField, value: FieldValue) -> Result<(), StateError> {
        if !field.is_write_once() {
            return Err(StateError::NotWriteOnce(field));
        }
        if let StateField::AnalystReport(kind) = field {
            if !self.current.context.is_enabled(kind) {
                return Err(StateError::AnalystDisabled(kind));
            }
        }
        if self.current.fields.contains_key(&field) {
            return Err(StateError::DuplicateWrite(field));
        }
        self.current.fields.insert(field, value);
        Ok(())
    }

    /// Append a debate turn. Returns the debate's new round count.
    pub fn append_turn(&mut self, role: DebateRole, message: impl Into<String>) -> Result<u32, StateError> {
        let ledger = match role.debate() {
            DebateKind::Research => &mut self.current.research,
            DebateKind::Risk => &mut self.current.risk,
        };
        Ok(ledger.append(role, message)?)
    }

    pub fn ledger(&self, kind: DebateKind) -> &DebateLedger {
        self.current.ledger(kind)
    }

    /// Borrowed read-only view.
    pub fn view(&self) -> &StateSnapshot {
        &self.current
    }

    /// Owned read-only copy.
    pub fn snapshot(&self) -> StateSnapshot {
        self.current.clone()
    }
}
