//! Local ComfyUI Backend
//!
//! Queues an API-format workflow on a ComfyUI server, polls its history
//! until an image output appears, then downloads the image bytes.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::workflow::ModelFamily;
use super::{BackendConfig, BackendKind, BackendOutput, GenerationBackend};
use crate::constants::local as local_constants;
use crate::generation::timeout::with_timeout;
use crate::types::{ErrorClassifier, FailureKind, ForgeError, GenerationParams, Result};

/// Response of `POST /prompt`
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    prompt_id: String,
}

/// One entry of `GET /history/{prompt_id}`
#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    outputs: BTreeMap<String, NodeOutput>,
    #[serde(default)]
    status: Option<HistoryStatus>,
}

#[derive(Debug, Deserialize)]
struct HistoryStatus {
    #[serde(default)]
    status_str: Option<String>,
    #[serde(default)]
    completed: bool,
}

#[derive(Debug, Deserialize)]
struct NodeOutput {
    #[serde(default)]
    images: Vec<ImageRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct ImageRef {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(rename = "type", default = "default_image_type")]
    image_type: String,
}

fn default_image_type() -> String {
    "output".to_string()
}

/// ComfyUI compute endpoint backend
pub struct ComfyUiBackend {
    config: BackendConfig,
    api_url: String,
    model: String,
    family: ModelFamily,
    client_id: String,
    poll_interval: Duration,
    /// `None` once closed
    client: RwLock<Option<reqwest::Client>>,
}

impl std::fmt::Debug for ComfyUiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComfyUiBackend")
            .field("name", &self.config.name)
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

impl ComfyUiBackend {
    /// Create a backend with the default local config
    pub fn new(api_url: &str, model: &str) -> Result<Self> {
        let config = BackendConfig::new(
            "local",
            local_constants::COST_PER_IMAGE,
            Duration::from_secs(local_constants::TIMEOUT_SECS),
        );
        Self::with_config(api_url, model, config)
    }

    pub fn with_config(api_url: &str, model: &str, config: BackendConfig) -> Result<Self> {
        let family = ModelFamily::from_model(model)?;
        let api_url = Self::validate_endpoint(api_url)?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            config,
            api_url,
            model: model.to_string(),
            family,
            client_id: uuid::Uuid::new_v4().to_string(),
            poll_interval: Duration::from_millis(local_constants::POLL_INTERVAL_MS),
            client: RwLock::new(Some(client)),
        })
    }

    /// Override the history poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Only http/https; warns for non-local hosts
    fn validate_endpoint(endpoint: &str) -> Result<String> {
        let url = url::Url::parse(endpoint).map_err(|e| {
            ForgeError::Config(format!("Invalid ComfyUI endpoint URL '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ForgeError::Config(format!(
                "ComfyUI endpoint must use http or https scheme, got: {}",
                url.scheme()
            )));
        }

        if let Some(host) = url.host_str()
            && !matches!(host, "localhost" | "127.0.0.1" | "[::1]")
        {
            warn!("ComfyUI endpoint {} is not a local host", host);
        }

        let mut result = url.to_string();
        while result.ends_with('/') {
            result.pop();
        }
        Ok(result)
    }

    fn client(&self) -> Result<reqwest::Client> {
        self.client
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| {
                ForgeError::backend(FailureKind::Network, "backend is closed", &self.config.name)
            })
    }

    fn request_error(&self, err: reqwest::Error) -> ForgeError {
        ErrorClassifier::classify_request(&err, &self.config.name).into()
    }

    async fn ensure_success(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(ErrorClassifier::classify_http_status(status.as_u16(), &body, &self.config.name).into())
    }

    async fn submit(&self, client: &reqwest::Client, workflow: &Value) -> Result<String> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": self.client_id,
        });

        let response = client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = self.ensure_success(response).await?;

        let submitted: SubmitResponse = response.json().await.map_err(|e| {
            ForgeError::backend(
                FailureKind::BadResponse,
                format!("Failed to parse /prompt response: {}", e),
                &self.config.name,
            )
        })?;
        Ok(submitted.prompt_id)
    }

    /// Poll history until the first image output shows up
    async fn wait_for_image(&self, client: &reqwest::Client, prompt_id: &str) -> Result<ImageRef> {
        let url = format!("{}/history/{}", self.api_url, prompt_id);

        loop {
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| self.request_error(e))?;

            if response.status().is_success() {
                let mut history: Value = response.json().await.map_err(|e| {
                    ForgeError::backend(
                        FailureKind::BadResponse,
                        format!("Failed to parse history: {}", e),
                        &self.config.name,
                    )
                })?;

                if let Some(raw) = history.get_mut(prompt_id).map(Value::take) {
                    let entry: HistoryEntry = serde_json::from_value(raw)?;

                    if let Some(image) = entry
                        .outputs
                        .values()
                        .find_map(|output| output.images.first().cloned())
                    {
                        return Ok(image);
                    }

                    if let Some(status) = &entry.status
                        && status.status_str.as_deref() == Some("error")
                    {
                        return Err(ForgeError::backend(
                            FailureKind::Provider,
                            format!("ComfyUI execution failed for prompt {}", prompt_id),
                            &self.config.name,
                        ));
                    }

                    if entry.status.as_ref().is_some_and(|s| s.completed) {
                        return Err(ForgeError::backend(
                            FailureKind::BadResponse,
                            format!("Prompt {} completed without image output", prompt_id),
                            &self.config.name,
                        ));
                    }
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn download(&self, client: &reqwest::Client, image: &ImageRef) -> Result<Vec<u8>> {
        let url = url::Url::parse_with_params(
            &format!("{}/view", self.api_url),
            &[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.image_type.as_str()),
            ],
        )
        .map_err(|e| {
            ForgeError::backend(
                FailureKind::BadResponse,
                format!("Invalid image location: {}", e),
                &self.config.name,
            )
        })?;

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = self.ensure_success(response).await?;
        let bytes = response.bytes().await.map_err(|e| self.request_error(e))?;
        Ok(bytes.to_vec())
    }

    async fn run(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
        params: &GenerationParams,
    ) -> Result<Vec<u8>> {
        let client = self.client()?;
        let workflow = self.family.build(&self.model, prompt, width, height, params);

        let prompt_id = self.submit(&client, &workflow).await?;
        debug!(backend = %self.config.name, comfy_prompt_id = %prompt_id, "Workflow queued");

        let image = self.wait_for_image(&client, &prompt_id).await?;
        self.download(&client, &image).await
    }
}

#[async_trait]
impl GenerationBackend for ComfyUiBackend {
    async fn generate(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
        params: &GenerationParams,
    ) -> Result<BackendOutput> {
        info!(
            "Generating with ComfyUI (model: {}, {}x{})",
            self.model, width, height
        );

        let start = Instant::now();
        let image = with_timeout(
            self.config.timeout,
            self.run(prompt, width, height, params),
            "ComfyUI generation",
        )
        .await?;

        Ok(BackendOutput::new(image, start.elapsed()))
    }

    async fn is_available(&self) -> bool {
        let Ok(client) = self.client() else {
            return false;
        };

        match client
            .get(format!("{}/system_stats", self.api_url))
            .send()
            .await
        {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(backend = %self.config.name, error = %e, "ComfyUI probe failed");
                false
            }
        }
    }

    async fn close(&self) {
        let previous = self
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if previous.is_some() {
            debug!(backend = %self.config.name, "ComfyUI client closed");
        }
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::backend::stub::{StubResponse, StubServer};
    use std::sync::atomic::{AtomicU32, Ordering};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

    fn stub_backend(base_url: &str) -> ComfyUiBackend {
        ComfyUiBackend::new(base_url, "flux-schnell")
            .unwrap()
            .with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_defaults() {
        let backend = ComfyUiBackend::new("http://localhost:8188/", "flux-schnell").unwrap();
        assert_eq!(backend.name(), "local");
        assert_eq!(backend.api_url(), "http://localhost:8188");
        assert_eq!(backend.cost(), 0.0002);
        assert_eq!(backend.config().timeout, Duration::from_secs(60));
        assert_eq!(backend.kind(), BackendKind::Local);
    }

    #[test]
    fn test_unknown_model_is_config_error() {
        let result = ComfyUiBackend::new("http://localhost:8188", "midjourney");
        assert!(matches!(result, Err(ForgeError::Config(_))));
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let result = ComfyUiBackend::new("ftp://gpu-box:8188", "sd35");
        assert!(matches!(result, Err(ForgeError::Config(_))));
    }

    #[test]
    fn test_history_entry_parsing() {
        let raw = serde_json::json!({
            "outputs": {
                "6": {},
                "7": {"images": [{"filename": "flux_00001_.png", "subfolder": ""}]}
            },
            "status": {"status_str": "success", "completed": true}
        });
        let entry: HistoryEntry = serde_json::from_value(raw).unwrap();
        let image = entry
            .outputs
            .values()
            .find_map(|o| o.images.first().cloned())
            .unwrap();
        assert_eq!(image.filename, "flux_00001_.png");
        assert_eq!(image.image_type, "output");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_unavailable() {
        // Port 9 (discard) is not expected to run ComfyUI
        let backend = ComfyUiBackend::new("http://127.0.0.1:9", "flux-schnell").unwrap();
        assert!(!backend.is_available().await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = ComfyUiBackend::new("http://localhost:8188", "flux-dev").unwrap();
        backend.close().await;
        backend.close().await;

        assert!(!backend.is_available().await);
        let err = backend
            .generate("p", 64, 64, &GenerationParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Backend(_)));
    }

    #[tokio::test]
    async fn test_submit_poll_download() {
        let polls = AtomicU32::new(0);
        let server = StubServer::start(|_| {
            move |method: &str, path: &str| match (method, path) {
                ("POST", "/prompt") => StubResponse::json(serde_json::json!({"prompt_id": "job-1"})),
                ("GET", "/history/job-1") => {
                    // Not in history until the second poll
                    if polls.fetch_add(1, Ordering::SeqCst) == 0 {
                        StubResponse::json(serde_json::json!({}))
                    } else {
                        StubResponse::json(serde_json::json!({
                            "job-1": {
                                "outputs": {"7": {"images": [
                                    {"filename": "flux_00001_.png", "subfolder": "", "type": "output"}
                                ]}},
                                "status": {"status_str": "success", "completed": true}
                            }
                        }))
                    }
                }
                ("GET", p) if p.starts_with("/view?") => StubResponse::bytes(PNG),
                _ => StubResponse::status(404),
            }
        })
        .await;

        let output = stub_backend(&server.base_url)
            .generate("a teal logo", 64, 64, &GenerationParams::new())
            .await
            .unwrap();

        assert_eq!(output.image, PNG);
        assert!(output.image_url.is_none());

        let requests = server.requests();
        assert_eq!(requests[0], "POST /prompt");
        assert_eq!(
            requests.iter().filter(|r| *r == "GET /history/job-1").count(),
            2
        );
        let view = requests.last().unwrap();
        assert!(view.starts_with("GET /view?"));
        assert!(view.contains("filename=flux_00001_.png"));
        assert!(view.contains("type=output"));
    }

    #[tokio::test]
    async fn test_history_error_status_is_provider_failure() {
        let server = StubServer::start(|_| {
            |method: &str, path: &str| match (method, path) {
                ("POST", "/prompt") => StubResponse::json(serde_json::json!({"prompt_id": "job-2"})),
                ("GET", "/history/job-2") => StubResponse::json(serde_json::json!({
                    "job-2": {
                        "outputs": {},
                        "status": {"status_str": "error", "completed": false}
                    }
                })),
                _ => StubResponse::status(404),
            }
        })
        .await;

        let err = stub_backend(&server.base_url)
            .generate("p", 64, 64, &GenerationParams::new())
            .await
            .unwrap_err();

        match err {
            ForgeError::Backend(e) => {
                assert_eq!(e.kind, FailureKind::Provider);
                assert!(e.message.contains("job-2"));
            }
            other => panic!("expected provider failure, got {other:?}"),
        }
        assert!(!server.requests().iter().any(|r| r.starts_with("GET /view")));
    }

    #[tokio::test]
    async fn test_rejected_submit_is_classified() {
        let server = StubServer::start(|_| |_: &str, _: &str| StubResponse::status(503)).await;

        let err = stub_backend(&server.base_url)
            .generate("p", 64, 64, &GenerationParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Backend(ref e) if e.kind == FailureKind::Provider));
    }

    #[tokio::test]
    async fn test_stalled_queue_times_out() {
        let server = StubServer::start(|_| {
            |method: &str, path: &str| match (method, path) {
                ("POST", "/prompt") => StubResponse::json(serde_json::json!({"prompt_id": "job-3"})),
                _ => StubResponse::json(serde_json::json!({})),
            }
        })
        .await;

        let config = BackendConfig::new("local", 0.0002, Duration::from_millis(200));
        let backend = ComfyUiBackend::with_config(&server.base_url, "sd35", config)
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));

        let err = backend
            .generate("p", 64, 64, &GenerationParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_system_stats_marks_available() {
        let server = StubServer::start(|_| {
            |_: &str, path: &str| match path {
                "/system_stats" => StubResponse::json(serde_json::json!({"system": {}})),
                _ => StubResponse::status(404),
            }
        })
        .await;

        assert!(stub_backend(&server.base_url).is_available().await);
        assert_eq!(server.requests(), vec!["GET /system_stats".to_string()]);
    }
}
