//! Bounded adversarial debates.
//!
//! Two debates run per analysis, each with its own roster, transcript and
//! turn counter:
//!
//! ```text
//! Research:  Bull → Bear → Bull → …            (max_debate_rounds turns)
//!                                      └─→ ResearchManager
//! Risk:      Aggressive → Conservative → Neutral → Aggressive → …
//!                                      └─→ RiskManager (max_risk_rounds turns)
//! ```
//!
//! A "round" is a single turn by a single role. Speaking order is the
//! roster's declaration order and never changes within a configuration.

pub mod ledger;
pub mod roster;

pub use ledger::{DebateLedger, DebateTurn, LedgerError};
pub use roster::{DebateKind, DebateRole};
