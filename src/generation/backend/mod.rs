//! Image Generation Backend Abstraction
//!
//! Defines the [`GenerationBackend`] trait implemented once per provider.
//! The dispatch engine only ever talks to backends through this trait and
//! never branches on provider names.
//!
//! ## Modules
//!
//! - `comfyui`: Local ComfyUI compute endpoint
//! - `replicate`: Hosted Replicate predictions API
//! - `workflow`: ComfyUI workflow graphs per model family

mod comfyui;
mod replicate;
mod workflow;

#[cfg(test)]
pub(crate) mod stub;

pub use comfyui::ComfyUiBackend;
pub use replicate::{ReplicateBackend, ReplicateModel};
pub use workflow::ModelFamily;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::backend as backend_constants;
use crate::types::{GenerationParams, Result};

// =============================================================================
// Backend Output
// =============================================================================

/// Raw output of one successful generation call
#[derive(Debug, Clone)]
pub struct BackendOutput {
    /// Encoded image as returned by the provider
    pub image: Vec<u8>,
    /// Time spent inside the backend call
    pub elapsed: Duration,
    /// Remote location of the image, when the provider hosts it
    pub image_url: Option<String>,
}

impl BackendOutput {
    pub fn new(image: Vec<u8>, elapsed: Duration) -> Self {
        Self {
            image,
            elapsed,
            image_url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// Where a backend runs; drives `prefer_local` ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Static per-backend settings, fixed at startup
#[derive(Debug, Clone, Serialize)]
pub struct BackendConfig {
    /// Unique registry key
    pub name: String,
    pub enabled: bool,
    /// Cost charged per successful image (USD)
    pub cost_per_image: f64,
    /// Upper bound on a single generation call
    pub timeout: Duration,
    /// Informational; the dispatch engine never retries a backend
    pub max_retries: u32,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>, cost_per_image: f64, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            cost_per_image,
            timeout,
            max_retries: backend_constants::DEFAULT_MAX_RETRIES,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(
            "backend",
            0.0,
            Duration::from_secs(backend_constants::DEFAULT_TIMEOUT_SECS),
        )
    }
}

// =============================================================================
// Backend Trait
// =============================================================================

/// Uniform capability wrapper around one image-generation provider
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate one image
    ///
    /// Implementations enforce their own timeout and return a typed
    /// [`crate::types::BackendError`] rather than hanging.
    async fn generate(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
        params: &GenerationParams,
    ) -> Result<BackendOutput>;

    /// Whether the backend can accept work right now. Never errors.
    async fn is_available(&self) -> bool;

    /// Release network resources. Safe to call more than once.
    async fn close(&self);

    fn config(&self) -> &BackendConfig;

    fn kind(&self) -> BackendKind;

    /// Model identifier in use
    fn model(&self) -> &str;

    /// Registry key and log label
    fn name(&self) -> &str {
        &self.config().name
    }

    /// Cost per successful image (USD)
    fn cost(&self) -> f64 {
        self.config().cost_per_image
    }
}

/// Shared backend handle for concurrent dispatch
pub type SharedBackend = Arc<dyn GenerationBackend>;
