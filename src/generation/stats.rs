//! Per-Backend Statistics
//!
//! Counters for every configured backend, keyed by backend name. Each entry
//! is updated under its own map shard lock so concurrent requests hitting
//! different backends never contend.
//!
//! ## Usage
//!
//! ```ignore
//! let stats = StatsCollector::new(["local", "replicate"]);
//! stats.record_success("local", 0.0002, elapsed);
//! for entry in stats.snapshot() {
//!     println!("{}", entry.display());
//! }
//! ```

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Counters for one backend
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendStats {
    pub name: String,
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_cost: f64,
    /// Seconds spent in successful generations
    pub total_time: f64,
}

impl BackendStats {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Percent of attempts that succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_requests as f64 * 100.0
        }
    }

    /// Mean seconds per successful generation
    pub fn avg_time(&self) -> f64 {
        if self.successful == 0 {
            0.0
        } else {
            self.total_time / self.successful as f64
        }
    }

    pub fn display(&self) -> String {
        format!(
            "{}: {}/{} ({:.1}% success) | cost ${:.4} | avg {:.2}s",
            self.name.to_uppercase(),
            self.successful,
            self.total_requests,
            self.success_rate(),
            self.total_cost,
            self.avg_time()
        )
    }
}

/// Thread-safe per-backend statistics
#[derive(Debug)]
pub struct StatsCollector {
    /// Registration order for stable reporting
    order: Vec<String>,
    entries: DashMap<String, BackendStats>,
}

impl StatsCollector {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let order: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        let entries = order
            .iter()
            .map(|n| (n.clone(), BackendStats::new(n)))
            .collect();
        Self { order, entries }
    }

    pub fn record_success(&self, name: &str, cost: f64, elapsed: Duration) {
        let mut entry = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| BackendStats::new(name));
        entry.total_requests += 1;
        entry.successful += 1;
        entry.total_cost += cost;
        entry.total_time += elapsed.as_secs_f64();
    }

    pub fn record_failure(&self, name: &str) {
        let mut entry = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| BackendStats::new(name));
        entry.total_requests += 1;
        entry.failed += 1;
    }

    pub fn get(&self, name: &str) -> Option<BackendStats> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    /// All entries in registration order
    pub fn snapshot(&self) -> Vec<BackendStats> {
        self.order.iter().filter_map(|n| self.get(n)).collect()
    }

    /// Reset every counter (tests)
    pub fn clear(&self) {
        for mut entry in self.entries.iter_mut() {
            let name = entry.key().clone();
            *entry.value_mut() = BackendStats::new(&name);
        }
    }
}

pub type SharedStats = Arc<StatsCollector>;
