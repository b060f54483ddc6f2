//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/designforge/config.toml)
//! 3. Project config (.designforge/config.toml)
//! 4. Environment variables (DESIGNFORGE_* prefix, `__` between keys)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{ForgeError, Result};

const ENV_PREFIX: &str = "DESIGNFORGE_";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // DESIGNFORGE_BUDGET__LIMIT_USD -> budget.limit_usd
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment
            .extract()
            .map_err(|e| ForgeError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| ForgeError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/designforge/)
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .map(|p| p.join("designforge"))
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
    }

    pub fn project_dir() -> PathBuf {
        PathBuf::from(".designforge")
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file paths
    pub fn show_path() {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:  {} {}", exists, global.display());
        } else {
            println!("  Global:  (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project: {} {}", exists, project.display());
        println!("  Env:     {}<SECTION>__<KEY>", ENV_PREFIX);
    }

    /// Show current effective configuration
    pub fn show_config(as_json: bool) -> Result<()> {
        let config = Self::load()?;
        println!("{}", Self::render(&config, as_json)?);
        Ok(())
    }

    /// Render a config as TOML (default) or JSON; secrets are never included
    pub fn render(config: &Config, as_json: bool) -> Result<String> {
        if as_json {
            Ok(serde_json::to_string_pretty(config)?)
        } else {
            toml::to_string_pretty(config).map_err(|e| ForgeError::Config(e.to_string()))
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Initialize global configuration
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let global_dir = Self::global_dir().ok_or_else(|| {
            ForgeError::Config("Cannot determine global config directory".to_string())
        })?;
        fs::create_dir_all(&global_dir)?;

        let config_path = global_dir.join("config.toml");
        Self::write_default(&config_path, force)?;
        Ok(config_path)
    }

    /// Initialize project configuration
    pub fn init_project(force: bool) -> Result<PathBuf> {
        let project_dir = Self::project_dir();
        fs::create_dir_all(&project_dir)?;

        let config_path = Self::project_config_path();
        Self::write_default(&config_path, force)?;
        Ok(config_path)
    }

    fn write_default(path: &Path, force: bool) -> Result<()> {
        if !path.exists() || force {
            fs::write(path, Self::default_config())?;
            info!("Created config: {}", path.display());
        } else {
            info!("Config exists: {}", path.display());
        }
        Ok(())
    }

    // =========================================================================
    // Internal
    // =========================================================================

    /// Default config file content (TOML)
    fn default_config() -> String {
        r#"# DesignForge Configuration
# Project settings in .designforge/config.toml override the global file.
# Environment variables override both, e.g. DESIGNFORGE_BUDGET__LIMIT_USD=25

# Local ComfyUI server
[local]
enabled = true
url = "http://localhost:8188"
model = "flux-schnell"      # flux-schnell, flux-dev, sd35
cost_per_image = 0.0002     # electricity estimate (USD)
timeout_secs = 60

# Replicate hosted API
# Token is read from REPLICATE_API_TOKEN unless api_token is set here.
[replicate]
enabled = true
model = "flux-schnell"      # flux-schnell, flux-dev, sd35
timeout_secs = 30

[dispatch]
prefer_local = true
max_concurrent = 50

[budget]
limit_usd = 60.0
alert_threshold = 0.8

[output]
directory = "generated"
cost_history = "generated/cost_history.json"
resume_spend = false
"#
        .to_string()
    }
}
