//! Image Generation Dispatch
//!
//! ## Modules
//!
//! - `backend`: Provider adapters behind the [`GenerationBackend`] trait
//! - `registry`: Configured backends and their try-order
//! - `dispatch`: Single-request fallback and bounded-concurrency batches
//! - `cost`: Spend ledger and budget checks
//! - `stats`: Per-backend counters
//! - `progress`: Batch progress events and console rendering
//! - `timeout`: Deadline wrapper for backend calls

pub mod backend;
pub mod cost;
pub mod dispatch;
pub mod progress;
pub mod registry;
pub mod stats;
pub mod timeout;

pub use backend::{
    BackendConfig, BackendKind, BackendOutput, ComfyUiBackend, GenerationBackend, ModelFamily,
    ReplicateBackend, ReplicateModel, SharedBackend,
};
pub use cost::{BudgetCheck, CostEntry, CostHistoryExport, CostSummary, CostTracker};
pub use dispatch::{AutoApprove, BackendStatus, BudgetApproval, Decline, DispatchEngine};
pub use progress::{ConsoleRenderer, ProgressEvent, ProgressState, ProgressTracker};
pub use registry::{BackendRegistry, BackendRegistryBuilder};
pub use stats::{BackendStats, StatsCollector};
pub use timeout::with_timeout;
