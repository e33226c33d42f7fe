//! Memory error taxonomy.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("embedding dimension mismatch: store holds {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embedding is empty")]
    EmptyEmbedding,

    #[error("embedder failed: {0}")]
    Embedder(String),

    #[error("memory store lock poisoned")]
    Poisoned,
}

impl MemoryError {
    /// Whether the operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Embedder(_))
    }

    /// Suggested action for operators.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "use the same embedder for every append and query",
            Self::EmptyEmbedding => "check the embedder returns non-empty vectors",
            Self::Embedder(_) => "retry or fall back to running without memory",
            Self::Poisoned => "restart the process; a writer panicked mid-append",
        }
    }
}
