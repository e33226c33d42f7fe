//! Capability Invoker: uniform adapter over external reasoning capabilities.
//!
//! ```text
//! StageDescriptor + StageContext ─► ReasoningCapability::respond (timeout)
//!                                        │
//!                                        ▼
//!                           text ─► validation ─► optional signal extraction
//! ```
//!
//! The invoker never retries. It only turns whatever happened into either an
//! [`Invocation`] or a typed [`CapabilityError`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use desk_coordination::{
    extract_signal, AnalystKind, DataMode, Extraction, MemoryMatch, StageDescriptor, StageId, StateField,
    TradeSignal,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::CapabilityError;

/// Everything a capability sees for one stage.
///
/// Built from the stage's declared read-set only; fields outside it never
/// appear here.
#[derive(Debug, Clone, Serialize)]
pub struct StageContext {
    pub run_id: Uuid,
    pub stage: StageId,
    pub subject: String,
    pub analysis_date: NaiveDate,
    /// Read-set fields as text. Transcripts are rendered `role: message` lines.
    pub fields: BTreeMap<StateField, String>,
    /// Recalled lessons for memory-aware stages, most similar first.
    pub memories: Vec<MemoryMatch>,
    /// Raw data fetched for analyst stages.
    pub market_data: Option<String>,
    /// Free-form extra inputs, e.g. realised returns during reflection.
    pub notes: BTreeMap<String, String>,
}

impl StageContext {
    pub fn field(&self, field: StateField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }
}

/// An external reasoning capability: role identifier plus context in, text out.
#[async_trait]
pub trait ReasoningCapability: Send + Sync {
    async fn respond(&self, role: &str, context: &StageContext) -> Result<String, CapabilityError>;
}

/// Read-only data fetch for analyst stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataRequest {
    pub analyst: AnalystKind,
    pub subject: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub mode: DataMode,
}

#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn fetch(&self, request: &DataRequest) -> Result<String, CapabilityError>;
}

/// Result of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub text: String,
    /// Present when the stage declares signal extraction.
    pub signal: Option<TradeSignal>,
    pub elapsed_ms: u64,
}

/// Calls one capability with a time budget.
#[derive(Clone)]
pub struct CapabilityInvoker {
    capability: Arc<dyn ReasoningCapability>,
    timeout: Duration,
}

impl CapabilityInvoker {
    pub fn new(capability: Arc<dyn ReasoningCapability>, timeout: Duration) -> Self {
        Self { capability, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn invoke(
        &self,
        descriptor: &StageDescriptor,
        context: &StageContext,
    ) -> Result<Invocation, CapabilityError> {
        let started = Instant::now();
        tracing::debug!(
            stage = %descriptor.id,
            role = %descriptor.capability,
            fields = context.fields.len(),
            memories = context.memories.len(),
            "invoking capability"
        );

        let text = tokio::time::timeout(self.timeout, self.capability.respond(&descriptor.capability, context))
            .await
            .map_err(|_| CapabilityError::Timeout(self.timeout))??;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if text.trim().is_empty() {
            return Err(CapabilityError::MalformedOutput(format!(
                "{} returned an empty response",
                descriptor.id
            )));
        }

        let signal = match descriptor.extraction {
            Extraction::None => None,
            Extraction::TradeSignal => Some(extract_signal(&text).ok_or_else(|| {
                CapabilityError::MalformedOutput(format!(
                    "{} response carries no BUY/SELL/HOLD signal",
                    descriptor.id
                ))
            })?),
        };

        tracing::debug!(
            stage = %descriptor.id,
            elapsed_ms,
            output_chars = text.len(),
            signal = ?signal,
            "capability responded"
        );
        Ok(Invocation {
            text,
            signal,
            elapsed_ms,
        })
    }
}

impl std::fmt::Debug for CapabilityInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityInvoker")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
