//! Post-run reflection.
//!
//! Once the realised return of a decision is known, each memory-owning role
//! is asked to reflect on its own contribution, and the lesson is appended
//! to that role's store. Runs outside the orchestrated run and never
//! touches its state.
//!
//! Scopes are written one at a time and nothing is rolled back: if a later
//! scope fails, the lessons already stored stay stored and are reported in
//! `ReflectionError::appended`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use desk_coordination::{
    DebateKind, DebateRole, MemoryError, MemoryRecord, MemoryScope, StageId, StateField, StateSnapshot,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::capability::{ReasoningCapability, StageContext};
use crate::errors::{CapabilityError, StageError};
use crate::memory::MemoryRegistry;
use crate::orchestrator::RunReport;

/// Stage whose output a scope reflects on.
fn reflected_stage(scope: MemoryScope) -> StageId {
    match scope {
        MemoryScope::Bull => StageId::Debater(DebateRole::Bull),
        MemoryScope::Bear => StageId::Debater(DebateRole::Bear),
        MemoryScope::Trader => StageId::Trader,
        MemoryScope::ResearchManager => StageId::ResearchManager,
        MemoryScope::RiskManager => StageId::RiskManager,
    }
}

/// Human label for a realised return, e.g. `gain (+0.0420)`.
pub fn outcome_label(returns: f64) -> String {
    let direction = if returns > 0.0 {
        "gain"
    } else if returns < 0.0 {
        "loss"
    } else {
        "flat"
    };
    format!("{direction} ({returns:+.4})")
}

/// Reflection stopped before every scope was written.
#[derive(Debug, Error)]
#[error("reflection stopped after {} stored lesson(s): {cause}", .appended.len())]
pub struct ReflectionError {
    /// Scope being reflected when the error hit, if any had started.
    pub scope: Option<MemoryScope>,
    /// Lessons stored before the failure.
    pub appended: Vec<(MemoryScope, u64)>,
    #[source]
    pub cause: StageError,
}

pub struct Reflector {
    capability: Arc<dyn ReasoningCapability>,
    memory: MemoryRegistry,
    timeout: Duration,
}

impl Reflector {
    pub fn new(capability: Arc<dyn ReasoningCapability>, memory: MemoryRegistry, timeout: Duration) -> Self {
        Self {
            capability,
            memory,
            timeout,
        }
    }

    /// Reflect once per scope and append the lessons. Returns the sequence
    /// number assigned in each scope's store.
    pub async fn reflect_and_remember(
        &self,
        report: &RunReport,
        returns: f64,
    ) -> Result<Vec<(MemoryScope, u64)>, ReflectionError> {
        let situation = report.state.situation_summary().map_err(|e| ReflectionError {
            scope: None,
            appended: Vec::new(),
            cause: e.into(),
        })?;
        let outcome = outcome_label(returns);
        let mut appended = Vec::with_capacity(MemoryScope::ALL.len());

        for scope in MemoryScope::ALL {
            match self.reflect_scope(scope, report, returns, &situation, &outcome).await {
                Ok(Some(seq)) => appended.push((scope, seq)),
                Ok(None) => {}
                Err(cause) => {
                    warn!(
                        run_id = %report.run_id,
                        scope = %scope,
                        stored = appended.len(),
                        error = %cause,
                        "reflection stopped"
                    );
                    return Err(ReflectionError {
                        scope: Some(scope),
                        appended,
                        cause,
                    });
                }
            }
        }

        info!(
            run_id = %report.run_id,
            outcome = %outcome,
            scopes = appended.len(),
            "reflections stored"
        );
        Ok(appended)
    }

    /// One scope's reflection; `None` when the lesson came back empty.
    async fn reflect_scope(
        &self,
        scope: MemoryScope,
        report: &RunReport,
        returns: f64,
        situation: &str,
        outcome: &str,
    ) -> Result<Option<u64>, StageError> {
        let context = self.context_for(scope, report, returns)?;
        let role = format!("{}_reflection", context.stage);
        let lesson = tokio::time::timeout(self.timeout, self.capability.respond(&role, &context))
            .await
            .map_err(|_| CapabilityError::Timeout(self.timeout))??;
        if lesson.trim().is_empty() {
            warn!(run_id = %report.run_id, scope = %scope, "empty reflection, nothing stored");
            return Ok(None);
        }

        let record = MemoryRecord::new(situation, outcome, lesson);
        let append = self.memory.get(scope).append(record);
        let seq = tokio::time::timeout(self.timeout, append)
            .await
            .map_err(|_| MemoryError::Embedder(format!("{scope} append exceeded {:?}", self.timeout)))??;
        Ok(Some(seq))
    }

    fn context_for(&self, scope: MemoryScope, report: &RunReport, returns: f64) -> Result<StageContext, StageError> {
        let state = &report.state;
        let stage = reflected_stage(scope);
        let mut fields = BTreeMap::new();
        let mut notes = BTreeMap::new();
        notes.insert("returns".to_string(), format!("{returns}"));

        match stage {
            StageId::Debater(role) => {
                let history = state.ledger(DebateKind::Research).history(role).join("\n");
                notes.insert("history".to_string(), history);
                fields.insert(
                    StateField::Transcript(DebateKind::Research),
                    state.ledger(DebateKind::Research).render(),
                );
            }
            StageId::ResearchManager => {
                insert_text(&mut fields, state, StateField::InvestmentPlan)?;
            }
            StageId::Trader => {
                insert_text(&mut fields, state, StateField::TraderPlan)?;
            }
            _ => {
                insert_text(&mut fields, state, StateField::FinalDecision)?;
                fields.insert(
                    StateField::Transcript(DebateKind::Risk),
                    state.ledger(DebateKind::Risk).render(),
                );
            }
        }
        for (kind, text) in state.analyst_reports()? {
            fields.insert(StateField::AnalystReport(kind), text.to_string());
        }

        let run = state.context();
        Ok(StageContext {
            run_id: report.run_id,
            stage,
            subject: run.subject().to_string(),
            analysis_date: run.analysis_date(),
            fields,
            memories: Vec::new(),
            market_data: None,
            notes,
        })
    }
}

fn insert_text(
    fields: &mut BTreeMap<StateField, String>,
    state: &StateSnapshot,
    field: StateField,
) -> Result<(), StageError> {
    fields.insert(field, state.text(field)?.to_string());
    Ok(())
}

impl std::fmt::Debug for Reflector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reflector")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
