//! Arena-backed memory store with brute-force cosine search.

use std::cmp::Ordering;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::errors::MemoryError;

/// A stored lesson. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Summary of the situation the lesson applies to.
    pub situation: String,
    /// Outcome label, e.g. the signal taken or the realised result.
    pub outcome: String,
    pub lesson: String,
}

impl MemoryRecord {
    pub fn new(situation: impl Into<String>, outcome: impl Into<String>, lesson: impl Into<String>) -> Self {
        Self {
            situation: situation.into(),
            outcome: outcome.into(),
            lesson: lesson.into(),
        }
    }
}

/// One query hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMatch {
    /// Insertion sequence number (1-based, monotonic).
    pub seq: u64,
    pub similarity: f32,
    pub record: MemoryRecord,
}

/// Vector-similarity memory backend.
///
/// Implementations must tolerate concurrent `append` calls from independent
/// runs; each append is an independent insert.
pub trait MemoryBackend: Send + Sync {
    /// Up to `k` records, most similar first, ties broken most-recent-first.
    fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<MemoryMatch>, MemoryError>;

    /// Insert a record, returning its sequence number.
    fn append(&self, record: MemoryRecord, embedding: Vec<f32>) -> Result<u64, MemoryError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct StoredRecord {
    seq: u64,
    record: MemoryRecord,
    embedding: Vec<f32>,
}

#[derive(Debug, Default)]
struct Arena {
    dimension: Option<usize>,
    records: Vec<StoredRecord>,
}

/// In-process [`MemoryBackend`].
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    arena: RwLock<Arena>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_dimension(dimension: Option<usize>, embedding: &[f32]) -> Result<(), MemoryError> {
        if embedding.is_empty() {
            return Err(MemoryError::EmptyEmbedding);
        }
        match dimension {
            Some(expected) if expected != embedding.len() => Err(MemoryError::DimensionMismatch {
                expected,
                got: embedding.len(),
            }),
            _ => Ok(()),
        }
    }
}

impl MemoryBackend for InMemoryBackend {
    fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<MemoryMatch>, MemoryError> {
        let arena = self.arena.read().map_err(|_| MemoryError::Poisoned)?;
        if k == 0 || arena.records.is_empty() {
            return Ok(Vec::new());
        }
        Self::check_dimension(arena.dimension, embedding)?;

        let mut scored: Vec<(f32, &StoredRecord)> = arena
            .records
            .iter()
            .map(|stored| (cosine_similarity(embedding, &stored.embedding), stored))
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.seq.cmp(&a.seq))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(similarity, stored)| MemoryMatch {
                seq: stored.seq,
                similarity,
                record: stored.record.clone(),
            })
            .collect())
    }

    fn append(&self, record: MemoryRecord, embedding: Vec<f32>) -> Result<u64, MemoryError> {
        let mut arena = self.arena.write().map_err(|_| MemoryError::Poisoned)?;
        Self::check_dimension(arena.dimension, &embedding)?;
        if arena.dimension.is_none() {
            arena.dimension = Some(embedding.len());
        }

        let seq = arena.records.len() as u64 + 1;
        arena.records.push(StoredRecord {
            seq,
            record,
            embedding,
        });
        tracing::debug!(seq, "memory record appended");
        Ok(seq)
    }

    fn len(&self) -> usize {
        self.arena.read().map(|a| a.records.len()).unwrap_or(0)
    }
}

/// Cosine similarity of two equal-length vectors. Zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
