//! Per-run shared state.
//!
//! ```text
//! RunContext (immutable) ──► SharedState ──snapshot()──► StateSnapshot (read-only)
//!                               ▲
//!                               └── set() / append_turn(): orchestrator only
//! ```
//!
//! Write-once fields reject a second write with [`StateError::DuplicateWrite`];
//! reading an unwritten field fails with [`StateError::UnsetField`].

pub mod store;
pub mod types;

pub use store::{SharedState, StateError, StateSnapshot};
pub use types::{AnalystKind, DataMode, FieldValue, RunContext, RunSettings, StateField};
