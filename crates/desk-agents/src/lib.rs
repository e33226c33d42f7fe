//! Async execution layer of the analysis desk.
//!
//! ```text
//! PipelineConfig ─► Orchestrator::run(RunContext)
//!                        │
//!                        ├─ ContextBuilder (read-set, memories, data fetch)
//!                        ├─ CapabilityInvoker (timeout, output validation, signal)
//!                        └─ ConditionalRouter / StageGraph (desk-coordination)
//!                        ▼
//!                   RunOutcome ─► Reflector::reflect_and_remember (optional)
//! ```

pub mod capability;
pub mod config;
pub mod context;
pub mod errors;
pub mod memory;
pub mod orchestrator;
pub mod reflection;
pub mod telemetry;

pub use capability::{
    CapabilityInvoker, DataProvider, DataRequest, Invocation, ReasoningCapability, StageContext,
};
pub use config::{FanOutMode, PipelineConfig};
pub use errors::{CapabilityError, RetryCategory, StageError};
pub use memory::{Embedder, HashingEmbedder, MemoryRegistry, SituationMemory};
pub use orchestrator::{
    EventBus, FailureKind, Orchestrator, PhaseRecord, RunEvent, RunFailure, RunOutcome, RunPhase, RunReport,
};
pub use reflection::{ReflectionError, Reflector};
pub use telemetry::{init_tracing, RunMetrics, StageMetric, StageStatus};
pub use tokio_util::sync::CancellationToken;
