//! DesignForge - Multi-Backend Image Generation Dispatch
//!
//! Routes image-generation requests across a local ComfyUI server and the
//! hosted Replicate API, with ordered fallback, bounded-concurrency batches
//! and a spend ledger checked against a budget before each batch.
//!
//! ## Quick Start
//!
//! ```ignore
//! use designforge::{ConfigLoader, DispatchEngine, GenerationParams};
//!
//! let config = ConfigLoader::load()?;
//! let engine = DispatchEngine::from_config(&config)?;
//! let result = engine
//!     .generate("a minimalist fox logo", None, &GenerationParams::new())
//!     .await;
//! if result.success {
//!     result.save_image("fox.png".as_ref())?;
//! }
//! engine.close().await;
//! ```
//!
//! ## Modules
//!
//! - [`generation`]: Backends, registry, dispatch engine, cost and stats
//! - [`config`]: Layered configuration
//! - [`types`]: Requests, results and errors
//! - [`cli`]: Command handlers for the `designforge` binary

pub mod cli;
pub mod config;
pub mod constants;
pub mod generation;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader};

// Error Types
pub use types::error::{BackendError, FailureKind, ForgeError, Result};

// Data Model
pub use types::{
    GenerationParams, GenerationRequest, GenerationResult, GenerationStats, ModelFormat, PromptId,
};

// =============================================================================
// Dispatch Re-exports
// =============================================================================

pub use generation::{
    AutoApprove,
    // Backends
    BackendRegistry,
    BudgetApproval,
    // Cost
    BudgetCheck,
    ComfyUiBackend,
    CostSummary,
    CostTracker,
    Decline,
    // Engine
    DispatchEngine,
    GenerationBackend,
    // Progress
    ProgressEvent,
    ProgressTracker,
    ReplicateBackend,
    // Stats
    StatsCollector,
};
