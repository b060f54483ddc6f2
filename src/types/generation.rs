//! Generation request/result data model
//!
//! Requests are immutable once built; results carry either the success
//! payload (image bytes, optional remote URL, cost) or an error, never both.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::PromptId;
use crate::constants::dispatch::{DEFAULT_HEIGHT, DEFAULT_WIDTH};
use crate::types::error::{ForgeError, Result};

// =============================================================================
// Model Format
// =============================================================================

/// Prompt dialect a request was authored for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    #[default]
    Flux,
    Sd35,
    Dalle,
}

impl std::fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flux => write!(f, "flux"),
            Self::Sd35 => write!(f, "sd35"),
            Self::Dalle => write!(f, "dalle"),
        }
    }
}

impl FromStr for ModelFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flux" => Ok(Self::Flux),
            "sd35" | "sd3.5" => Ok(Self::Sd35),
            "dalle" | "dall-e" => Ok(Self::Dalle),
            _ => Err(format!(
                "Invalid model format: {}. Expected: flux, sd35, dalle",
                s
            )),
        }
    }
}

// =============================================================================
// Parameters
// =============================================================================

/// Open key-value parameter bag
///
/// Recognized keys: `width`, `height`, `steps`, `seed`, `guidance_scale`,
/// `negative_prompt`. Anything else is passed through to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationParams(Map<String, Value>);

impl GenerationParams {
    pub const RECOGNIZED: [&'static str; 6] = [
        "width",
        "height",
        "steps",
        "seed",
        "guidance_scale",
        "negative_prompt",
    ];

    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn width(&self) -> u32 {
        self.u32_param("width").unwrap_or(DEFAULT_WIDTH)
    }

    pub fn height(&self) -> u32 {
        self.u32_param("height").unwrap_or(DEFAULT_HEIGHT)
    }

    pub fn steps(&self) -> Option<u32> {
        self.u32_param("steps")
    }

    /// Seed as given; `-1` means "pick one at random"
    pub fn seed(&self) -> Option<i64> {
        self.0.get("seed").and_then(Value::as_i64)
    }

    pub fn guidance_scale(&self) -> Option<f64> {
        self.0.get("guidance_scale").and_then(Value::as_f64)
    }

    pub fn negative_prompt(&self) -> Option<&str> {
        self.0.get("negative_prompt").and_then(Value::as_str)
    }

    /// Keys outside the recognized set, in insertion order
    pub fn passthrough(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0
            .iter()
            .filter(|(k, _)| !Self::RECOGNIZED.contains(&k.as_str()))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn u32_param(&self, key: &str) -> Option<u32> {
        self.0
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }
}

impl From<Map<String, Value>> for GenerationParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// =============================================================================
// Request
// =============================================================================

/// A prompt to generate, as submitted by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub prompt_id: Option<PromptId>,
    #[serde(alias = "prompt")]
    pub prompt_text: String,
    #[serde(default)]
    pub parameters: GenerationParams,
    #[serde(default)]
    pub model_format: ModelFormat,
}

impl GenerationRequest {
    pub fn new(prompt_text: impl Into<String>) -> Self {
        Self {
            prompt_id: None,
            prompt_text: prompt_text.into(),
            parameters: GenerationParams::default(),
            model_format: ModelFormat::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<PromptId>) -> Self {
        self.prompt_id = Some(id.into());
        self
    }

    pub fn with_params(mut self, parameters: GenerationParams) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_format(mut self, format: ModelFormat) -> Self {
        self.model_format = format;
        self
    }

    /// Caller-supplied id, or one derived from the prompt text
    pub fn resolved_id(&self) -> PromptId {
        self.prompt_id
            .clone()
            .unwrap_or_else(|| PromptId::derive(&self.prompt_text))
    }
}

// =============================================================================
// Result
// =============================================================================

/// Outcome of dispatching one request
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub prompt_id: PromptId,
    pub prompt_text: String,
    pub success: bool,
    #[serde(skip)]
    pub image_bytes: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Seconds from request start to completion
    pub generation_time: f64,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Backend that produced the image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl GenerationResult {
    pub fn succeeded(
        prompt_id: PromptId,
        prompt_text: impl Into<String>,
        image_bytes: Vec<u8>,
        image_url: Option<String>,
        elapsed: Duration,
        cost: f64,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            prompt_id,
            prompt_text: prompt_text.into(),
            success: true,
            image_bytes: Some(image_bytes),
            image_url,
            generation_time: elapsed.as_secs_f64(),
            cost,
            created_at: Utc::now(),
            error: None,
            backend: Some(backend.into()),
        }
    }

    pub fn failed(
        prompt_id: PromptId,
        prompt_text: impl Into<String>,
        error: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = "unknown error".to_string();
        }
        Self {
            prompt_id,
            prompt_text: prompt_text.into(),
            success: false,
            image_bytes: None,
            image_url: None,
            generation_time: elapsed.as_secs_f64(),
            cost: 0.0,
            created_at: Utc::now(),
            error: Some(error),
            backend: None,
        }
    }

    /// Write the raw image bytes to `path`, creating parent directories
    pub fn save_image(&self, path: &Path) -> Result<()> {
        let bytes = match (&self.image_bytes, self.success) {
            (Some(bytes), true) => bytes,
            _ => {
                return Err(ForgeError::Generation {
                    prompt_id: self.prompt_id.to_string(),
                    reason: self
                        .error
                        .clone()
                        .unwrap_or_else(|| "no image data".to_string()),
                });
            }
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

// =============================================================================
// Batch Statistics
// =============================================================================

/// Aggregate statistics for one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationStats {
    pub total_requests: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_cost: f64,
    /// Wall-clock span of the batch (seconds)
    pub total_time: f64,
    pub avg_generation_time: f64,
}

impl GenerationStats {
    /// Summarize results collected over a batch spanning `span`
    pub fn from_results(results: &[GenerationResult], span: Duration) -> Self {
        let total_requests = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        let total_cost = results.iter().filter(|r| r.success).map(|r| r.cost).sum();
        let total_time = span.as_secs_f64();
        let avg_generation_time = if total_requests > 0 {
            total_time / total_requests as f64
        } else {
            0.0
        };

        Self {
            total_requests,
            successful,
            failed: total_requests - successful,
            total_cost,
            total_time,
            avg_generation_time,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_requests as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn ok(id: &str, cost: f64) -> GenerationResult {
        GenerationResult::succeeded(
            PromptId::new(id),
            "p",
            vec![1, 2, 3],
            None,
            Duration::from_millis(10),
            cost,
            "local",
        )
    }

    fn err(id: &str) -> GenerationResult {
        GenerationResult::failed(PromptId::new(id), "p", "boom", Duration::ZERO)
    }

    #[test]
    fn test_params_defaults_and_accessors() {
        let params = GenerationParams::new()
            .with("steps", 8)
            .with("seed", -1)
            .with("guidance_scale", 3.5)
            .with("negative_prompt", "blurry")
            .with("lora", "brand-v2");

        assert_eq!(params.width(), 1024);
        assert_eq!(params.height(), 1024);
        assert_eq!(params.steps(), Some(8));
        assert_eq!(params.seed(), Some(-1));
        assert_eq!(params.guidance_scale(), Some(3.5));
        assert_eq!(params.negative_prompt(), Some("blurry"));

        let extra: Vec<_> = params.passthrough().map(|(k, _)| k.as_str()).collect();
        assert_eq!(extra, vec!["lora"]);
    }

    #[test]
    fn test_request_deserialize_batch_entry() {
        let req: GenerationRequest = serde_json::from_value(json!({
            "prompt": "a minimalist logo",
            "parameters": {"width": 512, "height": 768},
            "model_format": "sd35"
        }))
        .unwrap();

        assert!(req.prompt_id.is_none());
        assert_eq!(req.prompt_text, "a minimalist logo");
        assert_eq!(req.parameters.width(), 512);
        assert_eq!(req.parameters.height(), 768);
        assert_eq!(req.model_format, ModelFormat::Sd35);
        assert_eq!(req.resolved_id(), PromptId::derive("a minimalist logo"));
    }

    #[test]
    fn test_request_keeps_caller_id() {
        let req = GenerationRequest::new("hero banner").with_id("hero-01");
        assert_eq!(req.resolved_id().as_str(), "hero-01");
    }

    #[test]
    fn test_request_format_builder() {
        let req = GenerationRequest::new("poster");
        assert_eq!(req.model_format, ModelFormat::Flux);

        let req = req.with_format(ModelFormat::Sd35);
        assert_eq!(req.model_format, ModelFormat::Sd35);
        assert_eq!(req.resolved_id(), PromptId::derive("poster"));
    }

    #[test]
    fn test_failed_result_invariants() {
        let result = err("x");
        assert!(!result.success);
        assert_eq!(result.cost, 0.0);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.image_bytes.is_none());

        let empty = GenerationResult::failed(PromptId::new("y"), "p", "", Duration::ZERO);
        assert!(!empty.error.unwrap().is_empty());
    }

    #[test]
    fn test_stats_from_results() {
        let results = vec![ok("a", 0.003), err("b"), ok("c", 0.003)];
        let stats = GenerationStats::from_results(&results, Duration::from_secs(3));

        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.total_cost - 0.006).abs() < 1e-12);
        assert!((stats.avg_generation_time - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_stats_empty_batch() {
        let stats = GenerationStats::from_results(&[], Duration::ZERO);
        assert_eq!(stats, GenerationStats::default());
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn test_save_image_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("a.png");

        ok("a", 0.0002).save_image(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_save_failed_result_errors() {
        let dir = TempDir::new().unwrap();
        let result = err("b").save_image(&dir.path().join("b.png"));
        assert!(matches!(result, Err(ForgeError::Generation { .. })));
    }

    #[test]
    fn test_model_format_parse() {
        assert_eq!("SD35".parse::<ModelFormat>().unwrap(), ModelFormat::Sd35);
        assert_eq!(ModelFormat::Dalle.to_string(), "dalle");
        assert!("midjourney".parse::<ModelFormat>().is_err());
    }
}
