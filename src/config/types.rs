//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/designforge/) and project (.designforge/) level
//! configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{budget, dispatch, local, replicate};
use crate::types::{ForgeError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local ComfyUI backend
    pub local: LocalConfig,

    /// Hosted Replicate backend
    pub replicate: ReplicateConfig,

    /// Backend ordering and batch concurrency
    pub dispatch: DispatchConfig,

    /// Spend limits
    pub budget: BudgetConfig,

    /// Where images and cost reports go
    pub output: OutputConfig,
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `ForgeError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.local.enabled {
            if self.local.timeout_secs == 0 {
                return Err(ForgeError::Config(
                    "local.timeout_secs must be greater than 0".to_string(),
                ));
            }
            if self.local.cost_per_image < 0.0 {
                return Err(ForgeError::Config(format!(
                    "local.cost_per_image must not be negative, got {}",
                    self.local.cost_per_image
                )));
            }
            url::Url::parse(&self.local.url).map_err(|e| {
                ForgeError::Config(format!("local.url '{}' is invalid: {}", self.local.url, e))
            })?;
        }

        if self.replicate.enabled && self.replicate.timeout_secs == 0 {
            return Err(ForgeError::Config(
                "replicate.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.max_concurrent == 0 {
            return Err(ForgeError::Config(
                "dispatch.max_concurrent must be greater than 0".to_string(),
            ));
        }

        if self.budget.limit_usd.is_nan() || self.budget.limit_usd <= 0.0 {
            return Err(ForgeError::Config(format!(
                "budget.limit_usd must be positive, got {}",
                self.budget.limit_usd
            )));
        }

        if !(0.0..=1.0).contains(&self.budget.alert_threshold) || self.budget.alert_threshold == 0.0 {
            return Err(ForgeError::Config(format!(
                "budget.alert_threshold must be in (0, 1], got {}",
                self.budget.alert_threshold
            )));
        }

        Ok(())
    }
}

// =============================================================================
// Backend Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub enabled: bool,
    /// ComfyUI API endpoint
    pub url: String,
    /// flux-schnell, flux-dev or sd35
    pub model: String,
    /// Electricity estimate per image (USD)
    pub cost_per_image: f64,
    pub timeout_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: local::DEFAULT_URL.to_string(),
            model: local::DEFAULT_MODEL.to_string(),
            cost_per_image: local::COST_PER_IMAGE,
            timeout_secs: local::TIMEOUT_SECS,
        }
    }
}

/// Replicate settings
///
/// The API token is never serialized and is redacted in debug output.
/// The backend converts it to `SecretString` at construction.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicateConfig {
    pub enabled: bool,
    /// Falls back to `REPLICATE_API_TOKEN` when unset
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ReplicateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicateConfig")
            .field("enabled", &self.enabled)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_token: None,
            model: replicate::DEFAULT_MODEL.to_string(),
            timeout_secs: replicate::TIMEOUT_SECS,
        }
    }
}

impl ReplicateConfig {
    /// Token from config, else from the environment
    pub fn resolve_token(&self) -> Option<String> {
        self.api_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| {
                std::env::var(replicate::TOKEN_ENV)
                    .ok()
                    .filter(|t| !t.is_empty())
            })
    }
}

// =============================================================================
// Dispatch / Budget / Output
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Try local backends before remote ones
    pub prefer_local: bool,
    /// Most batch requests in flight at once
    pub max_concurrent: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            prefer_local: true,
            max_concurrent: dispatch::DEFAULT_MAX_CONCURRENT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub limit_usd: f64,
    /// Fraction of the budget that triggers an alert after a batch
    pub alert_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            limit_usd: budget::DEFAULT_LIMIT_USD,
            alert_threshold: budget::ALERT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for generated images
    pub directory: PathBuf,
    /// Cost history export written after each run
    pub cost_history: PathBuf,
    /// Carry spend over from an existing cost history
    pub resume_spend: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("generated"),
            cost_history: PathBuf::from("generated/cost_history.json"),
            resume_spend: false,
        }
    }
}
