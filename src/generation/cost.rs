//! Generation Cost Tracking
//!
//! Thread-safe running ledger of spend against a fixed budget. Every attempt
//! appends one history entry; only successes move the totals.
//!
//! `total_cost` is cumulative across sessions when the tracker is resumed
//! from a previous export, `session_cost` covers this process only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::constants::budget as budget_constants;
use crate::types::{ForgeError, Result};

// =============================================================================
// Ledger Types
// =============================================================================

/// One recorded attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub timestamp: DateTime<Utc>,
    pub cost: f64,
    pub success: bool,
    pub session_total: f64,
    pub cumulative_total: f64,
}

/// Result of a pre-flight budget check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetCheck {
    pub within_budget: bool,
    pub planned_cost: f64,
    pub remaining_budget: f64,
    /// Percent of the budget already spent
    pub budget_utilization: f64,
    pub budget_limit: f64,
    pub current_total: f64,
}

impl BudgetCheck {
    /// Amount by which the plan would overshoot the remaining budget
    pub fn overage(&self) -> f64 {
        (self.planned_cost - self.remaining_budget).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub session_cost: f64,
    pub generation_count: u64,
    pub avg_cost_per_image: f64,
    pub budget_limit: f64,
    pub budget_remaining: f64,
    pub budget_utilization_pct: f64,
}

impl CostSummary {
    pub fn display(&self) -> String {
        format!(
            "Spent ${:.4} of ${:.2} ({:.1}%) | {} images @ ${:.4} | Remaining ${:.4}",
            self.total_cost,
            self.budget_limit,
            self.budget_utilization_pct,
            self.generation_count,
            self.avg_cost_per_image,
            self.budget_remaining
        )
    }
}

/// Persisted export shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostHistoryExport {
    pub summary: CostSummary,
    pub history: Vec<CostEntry>,
}

// =============================================================================
// Cost Tracker
// =============================================================================

#[derive(Debug, Default)]
struct CostState {
    session_cost: f64,
    total_cost: f64,
    generation_count: u64,
    history: Vec<CostEntry>,
}

/// Running cost ledger; every state transition happens under one lock
#[derive(Debug)]
pub struct CostTracker {
    budget_limit: f64,
    state: Mutex<CostState>,
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new(budget_constants::DEFAULT_LIMIT_USD)
    }
}

impl CostTracker {
    pub fn new(budget_limit: f64) -> Self {
        Self {
            budget_limit,
            state: Mutex::new(CostState::default()),
        }
    }

    /// Continue the ledger of an earlier export
    ///
    /// Totals, image count and history carry over so the next export still
    /// holds every attempt; `session_cost` starts at zero.
    pub fn resume(budget_limit: f64, prior: CostHistoryExport) -> Self {
        let tracker = Self::new(budget_limit);
        {
            let mut state = tracker.lock();
            state.total_cost = prior.summary.total_cost.max(0.0);
            state.generation_count = prior.summary.generation_count;
            state.history = prior.history;
        }
        tracker
    }

    /// Read a previous `export_history` file
    pub fn load_export(path: &Path) -> Result<CostHistoryExport> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CostState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn budget_limit(&self) -> f64 {
        self.budget_limit
    }

    /// Record one attempt; failures are logged with zero cost
    pub fn add_generation(&self, cost: f64, success: bool) {
        let mut state = self.lock();
        let cost = if success { cost } else { 0.0 };

        if success {
            state.session_cost += cost;
            state.total_cost += cost;
            state.generation_count += 1;
        }

        let entry = CostEntry {
            timestamp: Utc::now(),
            cost,
            success,
            session_total: state.session_cost,
            cumulative_total: state.total_cost,
        };
        state.history.push(entry);
    }

    /// Would `planned_count` images at `cost_per_unit` fit? Pure read.
    pub fn check_budget(&self, planned_count: usize, cost_per_unit: f64) -> BudgetCheck {
        let total = self.lock().total_cost;
        let planned_cost = planned_count as f64 * cost_per_unit;
        let remaining_budget = self.budget_limit - total;

        BudgetCheck {
            within_budget: planned_cost <= remaining_budget,
            planned_cost,
            remaining_budget,
            budget_utilization: self.utilization(total) * 100.0,
            budget_limit: self.budget_limit,
            current_total: total,
        }
    }

    pub fn should_alert(&self, threshold: f64) -> bool {
        self.utilization(self.lock().total_cost) >= threshold
    }

    fn utilization(&self, total: f64) -> f64 {
        if self.budget_limit > 0.0 {
            total / self.budget_limit
        } else {
            // A zero budget is exhausted by definition
            1.0
        }
    }

    pub fn summary(&self) -> CostSummary {
        let state = self.lock();
        let avg_cost_per_image = if state.generation_count > 0 {
            state.total_cost / state.generation_count as f64
        } else {
            0.0
        };

        CostSummary {
            total_cost: state.total_cost,
            session_cost: state.session_cost,
            generation_count: state.generation_count,
            avg_cost_per_image,
            budget_limit: self.budget_limit,
            budget_remaining: self.budget_limit - state.total_cost,
            budget_utilization_pct: self.utilization(state.total_cost) * 100.0,
        }
    }

    /// Snapshot of the attempt history in append order
    pub fn history(&self) -> Vec<CostEntry> {
        self.lock().history.clone()
    }

    /// Write `{summary, history}` as pretty JSON
    pub fn export_history(&self, path: &Path) -> Result<()> {
        let export = CostHistoryExport {
            summary: self.summary(),
            history: self.history(),
        };
        let json = serde_json::to_string_pretty(&export)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json).map_err(|e| {
            ForgeError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write cost history {}: {}", path.display(), e),
            ))
        })
    }

    /// Reset all counters and history (tests)
    pub fn clear(&self) {
        *self.lock() = CostState::default();
    }
}

pub type SharedCostTracker = Arc<CostTracker>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_success_and_failure_accounting() {
        let tracker = CostTracker::new(60.0);
        tracker.add_generation(0.003, true);
        tracker.add_generation(0.003, false);
        tracker.add_generation(0.003, true);

        let summary = tracker.summary();
        assert_eq!(summary.generation_count, 2);
        assert!((summary.total_cost - 0.006).abs() < EPS);
        assert!((summary.avg_cost_per_image - 0.003).abs() < EPS);

        let history = tracker.history();
        assert_eq!(history.len(), 3);
        assert!(!history[1].success);
        assert_eq!(history[1].cost, 0.0);
        assert!((history[1].cumulative_total - 0.003).abs() < EPS);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_budget_check_over_budget() {
        let tracker = CostTracker::new(0.01);
        tracker.add_generation(0.008, true);

        let check = tracker.check_budget(5, 0.003);
        assert!(!check.within_budget);
        assert!((check.planned_cost - 0.015).abs() < EPS);
        assert!((check.remaining_budget - 0.002).abs() < EPS);
        assert!((check.budget_utilization - 80.0).abs() < 1e-6);
        assert!((check.overage() - 0.013).abs() < EPS);
    }

    #[test]
    fn test_check_budget_is_pure() {
        let tracker = CostTracker::new(1.0);
        tracker.add_generation(0.25, true);
        let before = tracker.summary();
        let history_len = tracker.history().len();

        let _ = tracker.check_budget(100, 0.5);
        let _ = tracker.check_budget(0, 0.0);

        assert_eq!(tracker.summary(), before);
        assert_eq!(tracker.history().len(), history_len);
    }

    #[test]
    fn test_should_alert_threshold() {
        let tracker = CostTracker::new(1.0);
        tracker.add_generation(0.79, true);
        assert!(!tracker.should_alert(0.8));
        tracker.add_generation(0.01, true);
        assert!(tracker.should_alert(0.8));
    }

    #[test]
    fn test_local_summary() {
        let tracker = CostTracker::default();
        tracker.add_generation(0.0002, true);

        let summary = tracker.summary();
        assert_eq!(summary.total_cost, 0.0002);
        assert_eq!(summary.generation_count, 1);
        assert_eq!(summary.budget_limit, 60.0);
    }

    #[test]
    fn test_resume_separates_session() {
        let first = CostTracker::new(10.0);
        first.add_generation(4.0, true);

        let tracker = CostTracker::resume(
            10.0,
            CostHistoryExport {
                summary: first.summary(),
                history: first.history(),
            },
        );
        tracker.add_generation(0.5, true);

        let summary = tracker.summary();
        assert!((summary.total_cost - 4.5).abs() < EPS);
        assert!((summary.session_cost - 0.5).abs() < EPS);
        assert!(!tracker.check_budget(2, 3.0).within_budget);
    }

    #[test]
    fn test_export_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("costs.json");

        let tracker = CostTracker::new(5.0);
        tracker.add_generation(0.035, true);
        tracker.add_generation(0.0, false);
        tracker.export_history(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["history"].as_array().unwrap().len(), 2);
        assert_eq!(raw["summary"]["generation_count"], 1);
        assert!(raw["history"][0]["session_total"].is_number());

        let export = CostTracker::load_export(&path).unwrap();
        assert!((export.summary.total_cost - 0.035).abs() < EPS);
        assert_eq!(export.history.len(), 2);
    }

    #[test]
    fn test_resume_keeps_history_across_sessions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("costs.json");

        let first = CostTracker::new(5.0);
        first.add_generation(0.04, true);
        first.add_generation(0.02, true);
        first.export_history(&path).unwrap();

        let second = CostTracker::resume(5.0, CostTracker::load_export(&path).unwrap());
        second.add_generation(0.03, true);
        second.export_history(&path).unwrap();

        let export = CostTracker::load_export(&path).unwrap();
        assert_eq!(export.history.len(), 3);
        assert_eq!(export.summary.generation_count, 3);
        assert!((export.summary.total_cost - 0.09).abs() < EPS);
        assert!((export.summary.session_cost - 0.03).abs() < EPS);
        assert!((export.summary.avg_cost_per_image - 0.03).abs() < EPS);
        assert!((export.history[2].cumulative_total - 0.09).abs() < EPS);
        assert!((export.history[2].session_total - 0.03).abs() < EPS);
    }

    #[test]
    fn test_clear() {
        let tracker = CostTracker::new(1.0);
        tracker.add_generation(0.5, true);
        tracker.clear();
        assert_eq!(tracker.summary().total_cost, 0.0);
        assert!(tracker.history().is_empty());
    }

    #[test]
    fn test_concurrent_updates() {
        let tracker = Arc::new(CostTracker::new(100.0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        t.add_generation(0.01, true);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let summary = tracker.summary();
        assert_eq!(summary.generation_count, 800);
        assert!((summary.total_cost - 8.0).abs() < 1e-6);
        assert_eq!(tracker.history().len(), 800);
    }

    proptest! {
        #[test]
        fn total_is_count_times_cost(n in 0usize..200, cents in 1u32..500) {
            let cost = f64::from(cents) / 10_000.0;
            let tracker = CostTracker::new(1_000.0);
            for _ in 0..n {
                tracker.add_generation(cost, true);
            }
            let summary = tracker.summary();
            prop_assert_eq!(summary.generation_count, n as u64);
            prop_assert!((summary.total_cost - n as f64 * cost).abs() < 1e-9);
        }

        #[test]
        fn alert_matches_utilization(spent in 0u32..2000, threshold in 0.05f64..1.0) {
            let tracker = CostTracker::new(10.0);
            let spent = f64::from(spent) / 100.0;
            tracker.add_generation(spent, true);
            prop_assert_eq!(tracker.should_alert(threshold), spent / 10.0 >= threshold);
        }
    }
}
