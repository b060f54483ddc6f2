//! Config Command
//!
//! Manage DesignForge configuration.
//!
//! Usage:
//!   designforge config show [-g] [-f json]
//!   designforge config path
//!   designforge config init [-g] [--force]

use std::path::Path;

use crate::config::ConfigLoader;
use crate::types::Result;

/// Show configuration
pub fn show(global: bool, format: &str, config_path: Option<&Path>) -> Result<()> {
    let as_json = format == "json";

    if global {
        match ConfigLoader::global_config_path() {
            Some(global_path) if global_path.exists() => {
                let config = ConfigLoader::load_from_file(&global_path)?;
                println!("# Global Config: {}\n", global_path.display());
                println!("{}", ConfigLoader::render(&config, as_json)?);
            }
            Some(_) => {
                println!("No global config found.");
                println!("Run 'designforge config init --global' to create one.");
            }
            None => println!("Cannot determine global config directory."),
        }
    } else if let Some(path) = config_path {
        let config = ConfigLoader::load_from_file(path)?;
        println!("{}", ConfigLoader::render(&config, as_json)?);
    } else {
        // Merged effective config
        ConfigLoader::show_config(as_json)?;
    }
    Ok(())
}

/// Show configuration paths
pub fn path() -> Result<()> {
    ConfigLoader::show_path();
    Ok(())
}

/// Initialize global configuration
pub fn init_global(force: bool) -> Result<()> {
    let config_path = ConfigLoader::init_global(force)?;
    println!("✓ Initialized global configuration");
    println!("  Config: {}", config_path.display());
    Ok(())
}

/// Initialize project configuration
pub fn init_project(force: bool) -> Result<()> {
    let config_path = ConfigLoader::init_project(force)?;
    println!("✓ Initialized project configuration");
    println!("  Config: {}", config_path.display());
    Ok(())
}
