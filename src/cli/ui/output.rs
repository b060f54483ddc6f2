use console::style;

use crate::generation::{BackendStats, CostSummary};
use crate::types::{GenerationResult, GenerationStats};

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    /// One line per finished request
    pub fn result(&self, result: &GenerationResult) {
        if result.success {
            self.success(&format!(
                "{} via {} in {:.2}s (${:.4})",
                style(&result.prompt_id).cyan(),
                result.backend.as_deref().unwrap_or("?"),
                result.generation_time,
                result.cost
            ));
        } else {
            self.error(&format!(
                "{}: {}",
                style(&result.prompt_id).cyan(),
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    pub fn batch_stats(&self, stats: &GenerationStats) {
        self.section("Batch");
        println!(
            "  Requests:   {} ({} ok, {} failed, {:.1}%)",
            stats.total_requests,
            stats.successful,
            stats.failed,
            stats.success_rate()
        );
        println!("  Cost:       ${:.4}", stats.total_cost);
        println!(
            "  Time:       {:.2}s ({:.2}s per image)",
            stats.total_time, stats.avg_generation_time
        );
    }

    pub fn cost_summary(&self, summary: &CostSummary) {
        self.section("Budget");
        println!("  {}", summary.display());
    }

    pub fn backend_stats(&self, stats: &[BackendStats]) {
        self.section("Backends");
        for entry in stats {
            println!("  {}", entry.display());
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
