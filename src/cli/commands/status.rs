//! Status Command
//!
//! Probe every configured backend and show the budget.

use console::style;
use std::path::Path;

use crate::cli::util::CommandContext;
use crate::types::Result;

pub async fn run(format: &str, config_path: Option<&Path>) -> Result<()> {
    let json_output = format == "json";
    let ctx = CommandContext::load(config_path)?;
    let backends = ctx.engine.backend_status().await;
    let summary = ctx.engine.cost_summary();

    if json_output {
        let status = serde_json::json!({
            "backends": backends,
            "prefer_local": ctx.engine.registry().prefers_local(),
            "max_concurrent": ctx.engine.max_concurrent(),
            "budget": summary,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("DesignForge Status");
        println!("══════════════════════════════════════");

        println!("Backends (try-order):");
        for backend in &backends {
            let mark = if backend.available {
                style("●").green()
            } else {
                style("○").red()
            };
            println!(
                "  {} {:<10} {:<7} {:<14} ${:.4}/image",
                mark,
                backend.name,
                backend.kind.to_string(),
                backend.model,
                backend.cost_per_image
            );
        }
        println!();

        println!("Dispatch:");
        println!("  Max concurrent: {}", ctx.engine.max_concurrent());
        println!(
            "  Prefer local:   {}",
            if ctx.engine.registry().prefers_local() {
                "yes"
            } else {
                "no"
            }
        );
        println!();

        println!("Budget:");
        println!("  {}", summary.display());
        println!("  History: {}", ctx.config.output.cost_history.display());
    }

    ctx.engine.close().await;
    Ok(())
}
