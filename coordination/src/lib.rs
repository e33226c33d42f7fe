//! Analysis Desk Coordination Library
//!
//! Synchronous, I/O-free core of the analysis desk:
//! - Write-once shared run state with append-only debate ledgers
//! - Static stage graph with startup validation
//! - Conditional router for fan-in and bounded debates
//! - Situation memory with cosine nearest-neighbour recall
//! - Trade signal extraction
//!
//! # Flow
//!
//! ```text
//! RunContext ─► SharedState ─snapshot─► ConditionalRouter ─► NextStage
//!                    ▲                                          │
//!                    └────────── orchestrator commits ◄─────────┘
//! ```
//!
//! The async execution layer lives in the `desk-agents` crate.

pub mod debate;
pub mod graph;
pub mod memory;
pub mod router;
pub mod signal;
pub mod state;

pub use debate::{DebateKind, DebateLedger, DebateRole, DebateTurn};
pub use graph::{Extraction, GraphError, StageDescriptor, StageGraph, StageId, Transition};
pub use memory::{InMemoryBackend, MemoryBackend, MemoryError, MemoryMatch, MemoryRecord, MemoryScope};
pub use router::{ConditionalRouter, NextStage, RouteError};
pub use signal::{extract_signal, TradeSignal};
pub use state::{
    AnalystKind, DataMode, FieldValue, RunContext, RunSettings, SharedState, StateError, StateField,
    StateSnapshot,
};
