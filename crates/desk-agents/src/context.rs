//! Stage context construction.
//!
//! Reads only the stage's declared fields from the snapshot, recalls
//! memories for memory-aware stages, and fetches data for analyst stages.
//! Recall and fetch each run under the stage timeout; a stalled embedder
//! surfaces as a retriable `MemoryError::Embedder`.
//! Reading a required field that is still unset fails with
//! `StateError::UnsetField`, which is how the debate's join condition is
//! enforced at the last possible moment.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use desk_coordination::{MemoryError, StageDescriptor, StageId, StateField, StateSnapshot};

use crate::capability::{DataProvider, DataRequest, StageContext};
use crate::errors::{CapabilityError, StageError};
use crate::memory::MemoryRegistry;

#[derive(Clone)]
pub struct ContextBuilder {
    memory: MemoryRegistry,
    data: Arc<dyn DataProvider>,
    memory_top_k: usize,
    lookback_days: u32,
    /// Budget for each data fetch and each memory recall.
    timeout: Duration,
}

impl ContextBuilder {
    pub fn new(
        memory: MemoryRegistry,
        data: Arc<dyn DataProvider>,
        memory_top_k: usize,
        lookback_days: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            memory,
            data,
            memory_top_k,
            lookback_days,
            timeout,
        }
    }

    pub async fn build(
        &self,
        descriptor: &StageDescriptor,
        snapshot: &StateSnapshot,
    ) -> Result<StageContext, StageError> {
        let run = snapshot.context();

        let mut fields = BTreeMap::new();
        for field in descriptor.reads.iter().filter(|f| f.is_required(run)) {
            let text = match field {
                StateField::Transcript(kind) => snapshot.ledger(*kind).render(),
                other => snapshot.get(*other)?.to_string(),
            };
            fields.insert(*field, text);
        }

        let memories = match descriptor.memory {
            Some(scope) => {
                let situation = snapshot.situation_summary()?;
                let recall = self.memory.get(scope).query(&situation, self.memory_top_k);
                tokio::time::timeout(self.timeout, recall).await.map_err(|_| {
                    MemoryError::Embedder(format!("{scope} recall exceeded {:?}", self.timeout))
                })??
            }
            None => Vec::new(),
        };

        let market_data = match descriptor.id {
            StageId::Analyst(analyst) => {
                let end = run.analysis_date();
                let start = end
                    .checked_sub_signed(ChronoDuration::days(i64::from(self.lookback_days)))
                    .ok_or_else(|| {
                        StageError::Configuration(format!(
                            "{} day lookback from {end} is out of range",
                            self.lookback_days
                        ))
                    })?;
                let request = DataRequest {
                    analyst,
                    subject: run.subject().to_string(),
                    start,
                    end,
                    mode: run.settings().data_mode,
                };
                let data = tokio::time::timeout(self.timeout, self.data.fetch(&request))
                    .await
                    .map_err(|_| CapabilityError::Timeout(self.timeout))??;
                Some(data)
            }
            _ => None,
        };

        Ok(StageContext {
            run_id: run.run_id(),
            stage: descriptor.id,
            subject: run.subject().to_string(),
            analysis_date: run.analysis_date(),
            fields,
            memories,
            market_data,
            notes: BTreeMap::new(),
        })
    }
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("memory_top_k", &self.memory_top_k)
            .field("lookback_days", &self.lookback_days)
            .finish_non_exhaustive()
    }
}
