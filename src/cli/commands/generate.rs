//! Generate Command
//!
//! Generate a single image.
//!
//! Usage:
//!   designforge generate "a minimalist fox logo" [--width 512] [--param k=v] [--output fox.png]

use std::path::{Path, PathBuf};

use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, parse_params};
use crate::types::{ForgeError, PromptId, Result};

/// Options for a single generation
#[derive(Debug, Default)]
pub struct GenerateOptions {
    pub prompt: String,
    pub id: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub steps: Option<u32>,
    pub seed: Option<i64>,
    pub guidance: Option<f64>,
    pub negative: Option<String>,
    /// Extra `key=value` parameters passed to the backend
    pub params: Vec<String>,
    pub output: Option<PathBuf>,
}

pub async fn run(options: GenerateOptions, config_path: Option<&Path>) -> Result<()> {
    let out = Output::new();
    let ctx = CommandContext::load(config_path)?;

    let mut params = parse_params(&options.params)?;
    if let Some(width) = options.width {
        params.insert("width", width);
    }
    if let Some(height) = options.height {
        params.insert("height", height);
    }
    if let Some(steps) = options.steps {
        params.insert("steps", steps);
    }
    if let Some(seed) = options.seed {
        params.insert("seed", seed);
    }
    if let Some(guidance) = options.guidance {
        params.insert("guidance_scale", guidance);
    }
    if let Some(negative) = options.negative {
        params.insert("negative_prompt", negative);
    }

    let result = ctx
        .engine
        .generate(&options.prompt, options.id.map(PromptId::new), &params)
        .await;

    let outcome = if result.success {
        let path = options.output.unwrap_or_else(|| {
            CommandContext::image_path(&ctx.output_dir(None), &result.prompt_id)
        });
        result.save_image(&path)?;
        out.result(&result);
        out.info(&format!("Saved {}", path.display()));
        if let Some(url) = &result.image_url {
            out.info(&format!("Remote: {}", url));
        }
        Ok(())
    } else {
        out.result(&result);
        Err(ForgeError::Generation {
            prompt_id: result.prompt_id.to_string(),
            reason: result.error.clone().unwrap_or_default(),
        })
    };

    ctx.save_cost_history()?;
    out.cost_summary(&ctx.engine.cost_summary());
    ctx.engine.close().await;

    outcome
}
