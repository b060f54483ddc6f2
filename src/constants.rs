//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Dispatch engine constants
pub mod dispatch {
    /// Default maximum in-flight requests in a batch
    pub const DEFAULT_MAX_CONCURRENT: usize = 50;

    /// Default image width when the request does not specify one
    pub const DEFAULT_WIDTH: u32 = 1024;

    /// Default image height when the request does not specify one
    pub const DEFAULT_HEIGHT: u32 = 1024;

    /// Hex characters kept from the prompt digest when deriving a prompt id
    pub const PROMPT_ID_LEN: usize = 16;
}

/// Cost and budget constants
pub mod budget {
    /// Default budget limit (USD)
    pub const DEFAULT_LIMIT_USD: f64 = 60.0;

    /// Fraction of the budget at which an alert is raised
    pub const ALERT_THRESHOLD: f64 = 0.8;
}

/// Local ComfyUI backend constants
pub mod local {
    /// Default ComfyUI API endpoint
    pub const DEFAULT_URL: &str = "http://localhost:8188";

    /// Default local model
    pub const DEFAULT_MODEL: &str = "flux-schnell";

    /// Electricity cost estimate per image (USD)
    pub const COST_PER_IMAGE: f64 = 0.0002;

    /// Local generation can be slow on first model load (seconds)
    pub const TIMEOUT_SECS: u64 = 60;

    /// Interval between history polls (milliseconds)
    pub const POLL_INTERVAL_MS: u64 = 500;
}

/// Replicate backend constants
pub mod replicate {
    /// Replicate HTTP API base
    pub const API_BASE: &str = "https://api.replicate.com/v1";

    /// Default hosted model
    pub const DEFAULT_MODEL: &str = "flux-schnell";

    /// Environment variable holding the API token
    pub const TOKEN_ENV: &str = "REPLICATE_API_TOKEN";

    /// Request timeout (seconds)
    pub const TIMEOUT_SECS: u64 = 30;

    /// Interval between prediction status polls (milliseconds)
    pub const POLL_INTERVAL_MS: u64 = 1000;
}

/// Backend defaults shared by all adapters
pub mod backend {
    /// Default retries recorded in backend configuration
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
}
