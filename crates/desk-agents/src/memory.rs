//! Per-role situation memories.
//!
//! A [`SituationMemory`] pairs an [`Embedder`] with a vector
//! [`MemoryBackend`]. The [`MemoryRegistry`] holds one per [`MemoryScope`]
//! and is shared by every run.

use std::sync::Arc;

use async_trait::async_trait;
use desk_coordination::{InMemoryBackend, MemoryBackend, MemoryError, MemoryMatch, MemoryRecord, MemoryScope};

/// Turns a situation summary into a vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
}

/// Offline embedder using signed feature hashing over lower-cased words.
///
/// Deterministic across processes, so stores built in one run can be
/// queried from another without a remote model.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = blake3::hash(token.to_lowercase().as_bytes());
            let bytes = digest.as_bytes();
            let mut index_bytes = [0u8; 8];
            index_bytes.copy_from_slice(&bytes[..8]);
            let index = (u64::from_le_bytes(index_bytes) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        Ok(self.embed_sync(text))
    }
}

/// One role's memory.
pub struct SituationMemory {
    scope: MemoryScope,
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn MemoryBackend>,
}

impl SituationMemory {
    pub fn new(scope: MemoryScope, embedder: Arc<dyn Embedder>, backend: Arc<dyn MemoryBackend>) -> Self {
        Self {
            scope,
            embedder,
            backend,
        }
    }

    pub fn scope(&self) -> MemoryScope {
        self.scope
    }

    /// Up to `k` lessons from situations most similar to `situation`.
    pub async fn query(&self, situation: &str, k: usize) -> Result<Vec<MemoryMatch>, MemoryError> {
        if self.backend.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(situation).await?;
        self.backend.query(&embedding, k)
    }

    /// Store a record keyed on the embedding of its situation.
    pub async fn append(&self, record: MemoryRecord) -> Result<u64, MemoryError> {
        let embedding = self.embedder.embed(&record.situation).await?;
        let seq = self.backend.append(record, embedding)?;
        tracing::debug!(scope = %self.scope, seq, "memory appended");
        Ok(seq)
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }
}

impl std::fmt::Debug for SituationMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SituationMemory")
            .field("scope", &self.scope)
            .field("records", &self.backend.len())
            .finish()
    }
}

/// One memory per scope. Cheap to clone; clones share storage.
#[derive(Debug, Clone)]
pub struct MemoryRegistry {
    stores: Arc<[Arc<SituationMemory>; 5]>,
}

impl MemoryRegistry {
    /// Build with a backend per scope from `backend_for`.
    pub fn with_backends(
        embedder: Arc<dyn Embedder>,
        backend_for: impl Fn(MemoryScope) -> Arc<dyn MemoryBackend>,
    ) -> Self {
        let stores = MemoryScope::ALL.map(|scope| {
            Arc::new(SituationMemory::new(scope, Arc::clone(&embedder), backend_for(scope)))
        });
        Self {
            stores: Arc::new(stores),
        }
    }

    /// In-process arenas for every scope.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_backends(embedder, |_| Arc::new(InMemoryBackend::new()))
    }

    pub fn get(&self, scope: MemoryScope) -> &SituationMemory {
        &self.stores[scope as usize]
    }
}
