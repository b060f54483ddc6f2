//! Batch Command
//!
//! Generate every request in a JSON file concurrently.
//!
//! Usage:
//!   designforge batch prompts.json [--output-dir out] [--yes] [--no-progress]
//!
//! The file holds an array of requests:
//!
//! ```json
//! [{"prompt_id": "hero", "prompt": "…", "parameters": {"width": 1536}}]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, ConsoleApproval, SharedApproval};
use crate::generation::AutoApprove;
use crate::types::{ForgeError, GenerationRequest, Result};

#[derive(Debug, Default)]
pub struct BatchOptions {
    pub file: PathBuf,
    pub output_dir: Option<PathBuf>,
    /// Approve an over-budget batch without prompting
    pub yes: bool,
    pub no_progress: bool,
    /// Extra copy of the cost history
    pub cost_report: Option<PathBuf>,
}

/// Read a JSON array of requests
pub fn load_requests(path: &Path) -> Result<Vec<GenerationRequest>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ForgeError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read {}: {}", path.display(), e),
        ))
    })?;
    Ok(serde_json::from_str(&content)?)
}

pub async fn run(options: BatchOptions, config_path: Option<&Path>) -> Result<()> {
    let out = Output::new();
    let requests = load_requests(&options.file)?;
    if requests.is_empty() {
        out.warning("No requests in batch file");
        return Ok(());
    }

    let approval: SharedApproval = if options.yes {
        Arc::new(AutoApprove)
    } else {
        Arc::new(ConsoleApproval)
    };
    let mut ctx = CommandContext::load(config_path)?;
    ctx.engine = ctx.engine.with_approval(approval);

    let count = requests.len();
    out.info(&format!(
        "Dispatching {} requests over {}",
        count,
        ctx.engine.registry().names().join(" → ")
    ));

    let (results, stats) = ctx
        .engine
        .generate_batch(requests, !options.no_progress)
        .await;

    if results.is_empty() {
        let check = ctx.engine.check_batch_budget(count);
        ctx.engine.close().await;
        return Err(ForgeError::BudgetDeclined {
            planned_cost: check.planned_cost,
            remaining_budget: check.remaining_budget,
        });
    }

    let dir = ctx.output_dir(options.output_dir);
    for result in &results {
        out.result(result);
        if result.success {
            let path = CommandContext::image_path(&dir, &result.prompt_id);
            if let Err(e) = result.save_image(&path) {
                out.error(&format!("Could not save {}: {}", path.display(), e));
            }
        }
    }

    out.batch_stats(&stats);
    out.backend_stats(&ctx.engine.backend_stats());
    out.cost_summary(&ctx.engine.cost_summary());

    ctx.save_cost_history()?;
    if let Some(report) = &options.cost_report {
        ctx.engine.export_cost_history(report)?;
        out.info(&format!("Cost report written to {}", report.display()));
    }
    ctx.engine.close().await;

    if stats.failed > 0 {
        out.warning(&format!("{} of {} requests failed", stats.failed, count));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PromptId;
    use tempfile::TempDir;

    #[test]
    fn test_load_requests() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(
            &path,
            r#"[
                {"prompt_id": "hero", "prompt": "hero banner", "parameters": {"width": 1536}},
                {"prompt_text": "app icon", "model_format": "sd35"}
            ]"#,
        )
        .unwrap();

        let requests = load_requests(&path).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].resolved_id(), PromptId::new("hero"));
        assert_eq!(requests[0].parameters.width(), 1536);
        assert_eq!(requests[1].resolved_id(), PromptId::derive("app icon"));
    }

    #[test]
    fn test_load_requests_rejects_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, r#"{"prompt": "x"}"#).unwrap();
        assert!(matches!(load_requests(&path), Err(ForgeError::Json(_))));
    }

    #[test]
    fn test_load_requests_missing_file() {
        assert!(matches!(
            load_requests(Path::new("/nonexistent/batch.json")),
            Err(ForgeError::Io(_))
        ));
    }
}
