//! CLI Common Utilities
//!
//! Shared initialization and context management for CLI commands.

use console::{Term, style};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, ConfigLoader};
use crate::generation::{BudgetApproval, BudgetCheck, DispatchEngine};
use crate::types::{ForgeError, GenerationParams, PromptId, Result};

/// Command execution context
///
/// Loaded configuration plus a dispatch engine built from it.
pub struct CommandContext {
    pub config: Config,
    pub engine: DispatchEngine,
}

impl CommandContext {
    /// Load configuration (from `config_path` when given) and build the engine
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let engine = DispatchEngine::from_config(&config)?;
        Ok(Self { config, engine })
    }

    /// Output directory for generated images
    pub fn output_dir(&self, override_dir: Option<PathBuf>) -> PathBuf {
        override_dir.unwrap_or_else(|| self.config.output.directory.clone())
    }

    /// Where a prompt's image is written; always directly inside `dir`
    pub fn image_path(dir: &Path, prompt_id: &PromptId) -> PathBuf {
        dir.join(format!("{}.png", prompt_id.file_stem()))
    }

    /// Persist the ledger so the next run can resume its spend
    pub fn save_cost_history(&self) -> Result<()> {
        self.engine
            .export_cost_history(&self.config.output.cost_history)
    }
}

pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Parse `key=value`; the value is read as JSON when it parses, else a string
pub fn parse_param(raw: &str) -> Result<(String, serde_json::Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ForgeError::Config(format!("Invalid parameter '{}': expected key=value", raw)))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(ForgeError::Config(format!(
            "Invalid parameter '{}': empty key",
            raw
        )));
    }

    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Fold `key=value` pairs into a parameter bag
pub fn parse_params(raw: &[String]) -> Result<GenerationParams> {
    let mut params = GenerationParams::new();
    for item in raw {
        let (key, value) = parse_param(item)?;
        params.insert(key, value);
    }
    Ok(params)
}

/// Interactive `[y/N]` prompt for over-budget batches
///
/// Declines when stderr is not attended by a user.
#[derive(Debug, Default)]
pub struct ConsoleApproval;

impl BudgetApproval for ConsoleApproval {
    fn approve(&self, check: &BudgetCheck) -> bool {
        let term = Term::stderr();
        if !term.is_term() {
            return false;
        }

        let _ = term.write_line(&format!(
            "{} Batch would cost ${:.4} but only ${:.4} of ${:.2} remains ({:.1}% used).",
            style("⚠").yellow(),
            check.planned_cost,
            check.remaining_budget,
            check.budget_limit,
            check.budget_utilization
        ));
        let _ = term.write_str("Proceed anyway? [y/N] ");

        match term.read_line() {
            Ok(answer) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

pub type SharedApproval = Arc<dyn BudgetApproval>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_param_json_and_string() {
        assert_eq!(parse_param("steps=8").unwrap(), ("steps".into(), json!(8)));
        assert_eq!(
            parse_param("guidance_scale=3.5").unwrap(),
            ("guidance_scale".into(), json!(3.5))
        );
        assert_eq!(
            parse_param("lora=brand-v2").unwrap(),
            ("lora".into(), json!("brand-v2"))
        );
        assert_eq!(
            parse_param("negative_prompt=a=b").unwrap(),
            ("negative_prompt".into(), json!("a=b"))
        );
    }

    #[test]
    fn test_parse_param_rejects_malformed() {
        assert!(parse_param("steps").is_err());
        assert!(parse_param("=8").is_err());
    }

    #[test]
    fn test_parse_params_bag() {
        let params = parse_params(&["width=512".into(), "seed=-1".into()]).unwrap();
        assert_eq!(params.width(), 512);
        assert_eq!(params.seed(), Some(-1));
    }

    #[test]
    fn test_image_path() {
        let path = CommandContext::image_path(Path::new("out"), &PromptId::new("hero"));
        assert_eq!(path, Path::new("out").join("hero.png"));
    }

    #[test]
    fn test_image_path_stays_in_output_dir() {
        let dir = Path::new("out");
        for id in ["../../tmp/evil", "a/b", "/etc/passwd"] {
            let path = CommandContext::image_path(dir, &PromptId::new(id));
            assert_eq!(path.parent(), Some(dir), "id {:?}", id);
            assert_eq!(
                path.file_name().unwrap().to_str().unwrap(),
                format!("{}.png", PromptId::derive(id))
            );
        }
    }
}
