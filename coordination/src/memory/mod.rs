//! Situation memory: append-only (situation, outcome, lesson) records with
//! nearest-neighbour recall.
//!
//! Embeddings are computed outside this crate and handed in as vectors; the
//! backend only stores them and ranks by cosine similarity. Each role that
//! learns from past runs owns its own store, identified by [`MemoryScope`].

pub mod errors;
pub mod store;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use errors::MemoryError;
pub use store::{cosine_similarity, InMemoryBackend, MemoryBackend, MemoryMatch, MemoryRecord};

/// Owner of a memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    Bull,
    Bear,
    Trader,
    ResearchManager,
    RiskManager,
}

impl MemoryScope {
    pub const ALL: [MemoryScope; 5] = [
        MemoryScope::Bull,
        MemoryScope::Bear,
        MemoryScope::Trader,
        MemoryScope::ResearchManager,
        MemoryScope::RiskManager,
    ];
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bull => write!(f, "bull_memory"),
            Self::Bear => write!(f, "bear_memory"),
            Self::Trader => write!(f, "trader_memory"),
            Self::ResearchManager => write!(f, "research_manager_memory"),
            Self::RiskManager => write!(f, "risk_manager_memory"),
        }
    }
}
