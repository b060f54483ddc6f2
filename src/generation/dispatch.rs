//! Dispatch Engine
//!
//! Routes generation requests across the registered backends.
//!
//! ## Single request
//!
//! Backends are tried strictly in registry order, one attempt each:
//! unavailable backends are skipped without an attempt, the first success
//! wins, and when every attempted backend fails the result carries the last
//! error.
//!
//! ## Batch
//!
//! A pre-flight budget check gates the batch. Requests are admitted in
//! submission order with at most `max_concurrent` in flight, and results are
//! collected in completion order; one request failing never aborts its
//! siblings.

use futures::stream::StreamExt;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::backend::{BackendKind, SharedBackend};
use super::cost::{BudgetCheck, CostSummary, CostTracker, SharedCostTracker};
use super::progress::{ConsoleRenderer, ProgressTracker};
use super::registry::BackendRegistry;
use super::stats::{BackendStats, SharedStats, StatsCollector};
use crate::config::Config;
use crate::constants::{budget as budget_constants, dispatch as dispatch_constants};
use crate::types::{
    GenerationParams, GenerationRequest, GenerationResult, GenerationStats, PromptId, Result,
};

// =============================================================================
// Budget Approval
// =============================================================================

/// Decides whether an over-budget batch may proceed
pub trait BudgetApproval: Send + Sync {
    fn approve(&self, check: &BudgetCheck) -> bool;
}

/// Always proceed
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl BudgetApproval for AutoApprove {
    fn approve(&self, _check: &BudgetCheck) -> bool {
        true
    }
}

/// Never proceed past the budget
#[derive(Debug, Clone, Copy, Default)]
pub struct Decline;

impl BudgetApproval for Decline {
    fn approve(&self, _check: &BudgetCheck) -> bool {
        false
    }
}

// =============================================================================
// Backend Status
// =============================================================================

/// Point-in-time availability of one backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub kind: BackendKind,
    pub model: String,
    pub cost_per_image: f64,
    pub available: bool,
}

// =============================================================================
// Dispatch Engine
// =============================================================================

pub struct DispatchEngine {
    registry: BackendRegistry,
    cost: SharedCostTracker,
    stats: SharedStats,
    max_concurrent: usize,
    alert_threshold: f64,
    approval: Arc<dyn BudgetApproval>,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("registry", &self.registry)
            .field("max_concurrent", &self.max_concurrent)
            .field("alert_threshold", &self.alert_threshold)
            .finish_non_exhaustive()
    }
}

impl DispatchEngine {
    /// Engine with a fresh ledger at the default budget
    ///
    /// Over-budget batches are declined unless another policy is set with
    /// [`DispatchEngine::with_approval`].
    pub fn new(registry: BackendRegistry) -> Self {
        let stats = Arc::new(StatsCollector::new(
            registry.backends().iter().map(|b| b.name().to_string()),
        ));
        Self {
            registry,
            cost: Arc::new(CostTracker::default()),
            stats,
            max_concurrent: dispatch_constants::DEFAULT_MAX_CONCURRENT,
            alert_threshold: budget_constants::ALERT_THRESHOLD,
            approval: Arc::new(Decline),
        }
    }

    /// Build backends and ledger from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let registry = BackendRegistry::from_config(config)?;

        let limit = config.budget.limit_usd;
        let tracker = if config.output.resume_spend && config.output.cost_history.exists() {
            match CostTracker::load_export(&config.output.cost_history) {
                Ok(prior) => {
                    info!(
                        prior_total = prior.summary.total_cost,
                        prior_entries = prior.history.len(),
                        "Resuming spend from cost history"
                    );
                    CostTracker::resume(limit, prior)
                }
                Err(e) => {
                    warn!(
                        path = %config.output.cost_history.display(),
                        error = %e,
                        "Could not read cost history, starting from zero"
                    );
                    CostTracker::new(limit)
                }
            }
        } else {
            CostTracker::new(limit)
        };

        Ok(Self::new(registry)
            .with_cost_tracker(Arc::new(tracker))
            .with_max_concurrent(config.dispatch.max_concurrent)
            .with_alert_threshold(config.budget.alert_threshold))
    }

    pub fn with_cost_tracker(mut self, cost: SharedCostTracker) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_alert_threshold(mut self, threshold: f64) -> Self {
        self.alert_threshold = threshold;
        self
    }

    pub fn with_approval(mut self, approval: Arc<dyn BudgetApproval>) -> Self {
        self.approval = approval;
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn cost_tracker(&self) -> &SharedCostTracker {
        &self.cost
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    // -------------------------------------------------------------------------
    // Single request
    // -------------------------------------------------------------------------

    /// Generate one image, falling back across backends
    ///
    /// Never returns an error: failures are reported in the result.
    #[instrument(skip(self, prompt, params), fields(prompt_id = tracing::field::Empty))]
    pub async fn generate(
        &self,
        prompt: &str,
        prompt_id: Option<PromptId>,
        params: &GenerationParams,
    ) -> GenerationResult {
        let start = Instant::now();
        let prompt_id = prompt_id.unwrap_or_else(|| PromptId::derive(prompt));
        tracing::Span::current().record("prompt_id", prompt_id.as_str());

        let (width, height) = (params.width(), params.height());
        let mut last_error: Option<String> = None;

        for backend in self.registry.backend_order() {
            let name = backend.name();

            if !backend.is_available().await {
                debug!(backend = %name, "Backend unavailable, skipping");
                continue;
            }

            debug!(backend = %name, width, height, "Attempting generation");
            match backend.generate(prompt, width, height, params).await {
                Ok(output) => {
                    let cost = backend.cost();
                    self.cost.add_generation(cost, true);
                    self.stats.record_success(name, cost, output.elapsed);

                    let elapsed = start.elapsed();
                    info!(
                        backend = %name,
                        cost,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Generation succeeded"
                    );
                    return GenerationResult::succeeded(
                        prompt_id,
                        prompt,
                        output.image,
                        output.image_url,
                        elapsed,
                        cost,
                        name,
                    );
                }
                Err(e) => {
                    warn!(backend = %name, error = %e, "Generation failed, trying next backend");
                    self.stats.record_failure(name);
                    self.cost.add_generation(0.0, false);
                    last_error = Some(e.to_string());
                }
            }
        }

        let error = match last_error {
            Some(e) => format!("All backends failed. Last error: {}", e),
            None => "No backend available".to_string(),
        };
        warn!(error = %error, "Generation failed on every backend");
        GenerationResult::failed(prompt_id, prompt, error, start.elapsed())
    }

    /// [`DispatchEngine::generate`] for a prepared request
    pub async fn generate_request(&self, request: &GenerationRequest) -> GenerationResult {
        self.generate(
            &request.prompt_text,
            request.prompt_id.clone(),
            &request.parameters,
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Batch
    // -------------------------------------------------------------------------

    /// Budget check for `count` images at the primary backend's cost
    pub fn check_batch_budget(&self, count: usize) -> BudgetCheck {
        self.cost.check_budget(count, self.registry.primary().cost())
    }

    /// Generate a batch, optionally rendering progress on the console
    pub async fn generate_batch(
        &self,
        requests: Vec<GenerationRequest>,
        show_progress: bool,
    ) -> (Vec<GenerationResult>, GenerationStats) {
        let tracker = show_progress.then(ProgressTracker::new);
        self.generate_batch_with_progress(requests, tracker.as_ref())
            .await
    }

    /// Generate a batch, reporting to `progress` when given
    ///
    /// Returns no results and default stats when the batch is over budget
    /// and the approval policy declines it.
    #[instrument(skip(self, requests, progress), fields(requests = requests.len()))]
    pub async fn generate_batch_with_progress(
        &self,
        requests: Vec<GenerationRequest>,
        progress: Option<&ProgressTracker>,
    ) -> (Vec<GenerationResult>, GenerationStats) {
        let check = self.check_batch_budget(requests.len());
        if !check.within_budget {
            warn!(
                planned_cost = check.planned_cost,
                remaining_budget = check.remaining_budget,
                utilization_pct = check.budget_utilization,
                "Batch exceeds remaining budget"
            );
            if !self.approval.approve(&check) {
                info!("Batch declined");
                return (Vec::new(), GenerationStats::default());
            }
            info!("Over-budget batch approved");
        }

        let total = requests.len();
        let render = progress.map(|tracker| {
            tracker.start(total, "Generating");
            ConsoleRenderer::new(tracker.clone()).start_render_loop()
        });

        info!(total, max_concurrent = self.max_concurrent, "Starting batch");
        let start = Instant::now();

        // Requests are admitted in submission order, at most max_concurrent in flight
        let mut pending = futures::stream::iter(&requests)
            .map(|request| self.generate_request(request))
            .buffer_unordered(self.max_concurrent);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = pending.next().await {
            if let Some(tracker) = progress {
                tracker.record(
                    result.prompt_id.as_str(),
                    result.success,
                    result.error.as_deref(),
                );
            }
            results.push(result);
        }
        drop(pending);

        let stats = GenerationStats::from_results(&results, start.elapsed());

        if let Some(tracker) = progress {
            tracker.finish();
        }
        if let Some(handle) = render {
            let _ = handle.await;
        }

        info!(
            successful = stats.successful,
            failed = stats.failed,
            total_cost = stats.total_cost,
            total_time = stats.total_time,
            "Batch complete"
        );

        if self.cost.should_alert(self.alert_threshold) {
            let summary = self.cost.summary();
            warn!(
                utilization_pct = summary.budget_utilization_pct,
                total_cost = summary.total_cost,
                budget_limit = summary.budget_limit,
                "Budget alert: spend has crossed the alert threshold"
            );
        }

        for entry in self.stats.snapshot() {
            info!(backend = %entry.name, "{}", entry.display());
        }

        (results, stats)
    }

    // -------------------------------------------------------------------------
    // Reporting
    // -------------------------------------------------------------------------

    pub fn cost_summary(&self) -> CostSummary {
        self.cost.summary()
    }

    pub fn export_cost_history(&self, path: &Path) -> Result<()> {
        self.cost.export_history(path)?;
        info!(path = %path.display(), "Cost history exported");
        Ok(())
    }

    /// Per-backend counters in registration order
    pub fn backend_stats(&self) -> Vec<BackendStats> {
        self.stats.snapshot()
    }

    /// Probe every backend, in try-order
    pub async fn backend_status(&self) -> Vec<BackendStatus> {
        let probes = self
            .registry
            .backend_order()
            .iter()
            .map(|backend| async move { status_of(backend).await });
        futures::future::join_all(probes).await
    }

    /// Release every backend's network resources
    pub async fn close(&self) {
        for backend in self.registry.backends() {
            backend.close().await;
        }
        debug!("Dispatch engine closed");
    }
}

async fn status_of(backend: &SharedBackend) -> BackendStatus {
    BackendStatus {
        name: backend.name().to_string(),
        kind: backend.kind(),
        model: backend.model().to_string(),
        cost_per_image: backend.cost(),
        available: backend.is_available().await,
    }
}

// =============================================================================
// Tests
// =============================================================================
