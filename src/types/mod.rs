pub mod error;
pub mod generation;

pub use error::{BackendError, ErrorClassifier, FailureKind, ForgeError, Result};
pub use generation::{
    GenerationParams, GenerationRequest, GenerationResult, GenerationStats, ModelFormat,
};

// =============================================================================
// Domain Newtypes
// =============================================================================

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::dispatch::PROMPT_ID_LEN;

/// Type-safe wrapper for prompt IDs
///
/// Results in a batch complete out of order; this is the correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptId(String);

impl PromptId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Deterministic id from prompt content (truncated SHA-256 hex)
    pub fn derive(prompt_text: &str) -> Self {
        let digest = Sha256::digest(prompt_text.as_bytes());
        let hex = format!("{:x}", digest);
        Self(hex[..PROMPT_ID_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Name usable as a single file stem
    ///
    /// Caller-supplied ids may contain path separators or dot segments; any
    /// id that is not a plain `[A-Za-z0-9._-]` stem is replaced by its own
    /// derived hash.
    pub fn file_stem(&self) -> String {
        let plain = !self.0.is_empty()
            && !self.0.starts_with('.')
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

        if plain {
            self.0.clone()
        } else {
            Self::derive(&self.0).into_inner()
        }
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PromptId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PromptId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for PromptId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
