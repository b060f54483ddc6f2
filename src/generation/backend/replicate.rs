//! Replicate Hosted Backend
//!
//! Runs a prediction against Replicate's HTTP API. The prediction call is a
//! blocking request/poll sequence executed on a blocking worker so sibling
//! requests keep making progress; the resulting image is downloaded async.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{BackendConfig, BackendKind, BackendOutput, GenerationBackend};
use crate::constants::replicate as replicate_constants;
use crate::generation::timeout::with_timeout;
use crate::types::{ErrorClassifier, FailureKind, ForgeError, GenerationParams, Result};

// =============================================================================
// Model Catalog
// =============================================================================

/// Hosted model known to this backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplicateModel {
    /// Short name used in configuration
    pub key: &'static str,
    /// `owner/name` on Replicate
    pub slug: &'static str,
    /// Price per image (USD)
    pub cost: f64,
}

impl ReplicateModel {
    pub const CATALOG: [ReplicateModel; 3] = [
        ReplicateModel {
            key: "flux-schnell",
            slug: "black-forest-labs/flux-schnell",
            cost: 0.003,
        },
        ReplicateModel {
            key: "flux-dev",
            slug: "black-forest-labs/flux-dev",
            cost: 0.003,
        },
        ReplicateModel {
            key: "sd35",
            slug: "stability-ai/stable-diffusion-3.5-large",
            cost: 0.035,
        },
    ];

    pub fn lookup(key: &str) -> Result<Self> {
        Self::CATALOG
            .iter()
            .find(|m| m.key == key)
            .copied()
            .ok_or_else(|| {
                let available: Vec<_> = Self::CATALOG.iter().map(|m| m.key).collect();
                ForgeError::Config(format!(
                    "Unknown Replicate model: {}. Available: {}",
                    key,
                    available.join(", ")
                ))
            })
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: String,
    status: PredictionStatus,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
}

/// Everything the blocking worker needs, owned
struct PredictionJob {
    backend: String,
    endpoint: String,
    token: SecretString,
    input: Map<String, Value>,
    timeout: Duration,
    poll_interval: Duration,
}

// =============================================================================
// Backend
// =============================================================================

/// Replicate predictions API backend
pub struct ReplicateBackend {
    config: BackendConfig,
    /// Never exposed in logs or debug output
    api_token: SecretString,
    api_base: String,
    model: ReplicateModel,
    poll_interval: Duration,
    /// Async client for image download; `None` once closed
    client: RwLock<Option<reqwest::Client>>,
}

impl std::fmt::Debug for ReplicateBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicateBackend")
            .field("name", &self.config.name)
            .field("api_token", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model.slug)
            .finish()
    }
}

impl ReplicateBackend {
    /// Create a backend; the token falls back to `REPLICATE_API_TOKEN`
    pub fn new(api_token: Option<SecretString>, model: &str) -> Result<Self> {
        let model_info = ReplicateModel::lookup(model)?;
        let config = BackendConfig::new(
            "replicate",
            model_info.cost,
            Duration::from_secs(replicate_constants::TIMEOUT_SECS),
        );
        Self::with_config(api_token, model, config)
    }

    pub fn with_config(
        api_token: Option<SecretString>,
        model: &str,
        config: BackendConfig,
    ) -> Result<Self> {
        let api_token = api_token
            .filter(|t| !t.expose_secret().is_empty())
            .or_else(|| {
                std::env::var(replicate_constants::TOKEN_ENV)
                    .ok()
                    .filter(|t| !t.is_empty())
                    .map(SecretString::from)
            })
            .ok_or_else(|| {
                ForgeError::Config(format!(
                    "Replicate API token not found. Set {} env var or provide in config",
                    replicate_constants::TOKEN_ENV
                ))
            })?;

        let model = ReplicateModel::lookup(model)?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            config,
            api_token,
            api_base: replicate_constants::API_BASE.to_string(),
            model,
            poll_interval: Duration::from_millis(replicate_constants::POLL_INTERVAL_MS),
            client: RwLock::new(Some(client)),
        })
    }

    /// Point at a different API host (proxies, tests)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        let mut base = api_base.into();
        while base.ends_with('/') {
            base.pop();
        }
        self.api_base = base;
        self
    }

    /// Override the prediction poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn model_info(&self) -> ReplicateModel {
        self.model
    }

    fn client(&self) -> Option<reqwest::Client> {
        self.client
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Prediction input: prompt and size, then caller params verbatim
    fn build_input(
        prompt: &str,
        width: u32,
        height: u32,
        params: &GenerationParams,
    ) -> Map<String, Value> {
        let mut input = Map::new();
        input.insert("prompt".into(), prompt.into());
        input.insert("width".into(), width.into());
        input.insert("height".into(), height.into());

        for (key, value) in params.as_map() {
            match key.as_str() {
                "width" | "height" => {}
                // Negative seed means random; let the provider choose
                "seed" if value.as_i64().is_some_and(|s| s < 0) => {}
                _ => {
                    input.insert(key.clone(), value.clone());
                }
            }
        }
        input
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let client = self.client().ok_or_else(|| {
            ForgeError::backend(FailureKind::Network, "backend is closed", &self.config.name)
        })?;

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_request(&e, &self.config.name))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(
                ErrorClassifier::classify_http_status(status.as_u16(), &body, &self.config.name)
                    .into(),
            );
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ErrorClassifier::classify_request(&e, &self.config.name))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl GenerationBackend for ReplicateBackend {
    async fn generate(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
        params: &GenerationParams,
    ) -> Result<BackendOutput> {
        if self.client().is_none() {
            return Err(ForgeError::backend(
                FailureKind::Network,
                "backend is closed",
                &self.config.name,
            ));
        }

        info!(
            "Generating with Replicate (model: {}, {}x{})",
            self.model.slug, width, height
        );

        let start = Instant::now();
        let job = PredictionJob {
            backend: self.config.name.clone(),
            endpoint: format!("{}/models/{}/predictions", self.api_base, self.model.slug),
            token: SecretString::from(self.api_token.expose_secret().to_owned()),
            input: Self::build_input(prompt, width, height, params),
            timeout: self.config.timeout,
            poll_interval: self.poll_interval,
        };

        // One deadline covers the prediction and the image download
        let (image_url, image) = with_timeout(
            self.config.timeout,
            async {
                let image_url = tokio::task::spawn_blocking(move || run_prediction(job))
                    .await
                    .map_err(|e| ForgeError::Io(std::io::Error::other(e.to_string())))??;
                debug!(backend = %self.config.name, url = %image_url, "Prediction succeeded");

                let image = self.download(&image_url).await?;
                Ok::<_, ForgeError>((image_url, image))
            },
            "Replicate generation",
        )
        .await?;

        Ok(BackendOutput::new(image, start.elapsed()).with_url(image_url))
    }

    async fn is_available(&self) -> bool {
        self.client().is_some() && !self.api_token.expose_secret().is_empty()
    }

    async fn close(&self) {
        self.client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn model(&self) -> &str {
        self.model.key
    }
}

// =============================================================================
// Blocking Prediction
// =============================================================================

/// Create a prediction and wait for a terminal status; returns the image URL
///
/// Runs on a blocking worker. The blocking client is created and dropped
/// inside this function so it never touches the async runtime.
fn run_prediction(job: PredictionJob) -> Result<String> {
    let deadline = Instant::now() + job.timeout;
    let client = reqwest::blocking::Client::builder()
        .timeout(job.timeout)
        .build()?;

    let auth = format!("Bearer {}", job.token.expose_secret());
    let response = client
        .post(&job.endpoint)
        .header("Authorization", &auth)
        .header("Prefer", "wait")
        .json(&serde_json::json!({ "input": job.input }))
        .send()
        .map_err(|e| ErrorClassifier::classify_request(&e, &job.backend))?;

    let mut prediction = read_prediction(response, &job.backend)?;

    while !prediction.status.is_terminal() {
        if Instant::now() >= deadline {
            return Err(ForgeError::timeout(
                format!("Replicate prediction {}", prediction.id),
                job.timeout,
            ));
        }
        let Some(poll_url) = prediction.urls.as_ref().and_then(|u| u.get.clone()) else {
            return Err(ForgeError::backend(
                FailureKind::BadResponse,
                "Prediction pending without a status URL",
                &job.backend,
            ));
        };

        std::thread::sleep(job.poll_interval);
        let response = client
            .get(&poll_url)
            .header("Authorization", &auth)
            .send()
            .map_err(|e| ErrorClassifier::classify_request(&e, &job.backend))?;
        prediction = read_prediction(response, &job.backend)?;
    }

    match prediction.status {
        PredictionStatus::Succeeded => prediction
            .output
            .as_ref()
            .and_then(first_output_url)
            .ok_or_else(|| {
                ForgeError::backend(
                    FailureKind::BadResponse,
                    "No output from Replicate",
                    &job.backend,
                )
            }),
        status => {
            let reason = prediction
                .error
                .map(|e| match e {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| format!("{:?}", status).to_lowercase());
            Err(ForgeError::backend(
                FailureKind::Provider,
                format!("Prediction {} {}", prediction.id, reason),
                &job.backend,
            ))
        }
    }
}

fn read_prediction(response: reqwest::blocking::Response, backend: &str) -> Result<Prediction> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(ErrorClassifier::classify_http_status(status.as_u16(), &body, backend).into());
    }
    response.json::<Prediction>().map_err(|e| {
        ForgeError::backend(
            FailureKind::BadResponse,
            format!("Failed to parse prediction: {}", e),
            backend,
        )
    })
}

/// Output is either a list of URLs or a single URL
fn first_output_url(output: &Value) -> Option<String> {
    match output {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(String::from),
        _ => None,
    }
}
