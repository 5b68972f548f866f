//! Config Command
//!
//! Manage rankrelay configuration.
//!
//! Usage:
//!   rankrelay config show [-f json]
//!   rankrelay config path
//!   rankrelay config init [-g] [--force]

use crate::cli::util::CommandContext;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Show the effective configuration (API key omitted)
pub fn show(ctx: &CommandContext, format: &str) -> Result<()> {
    ConfigLoader::show_config(&ctx.config, format == "json")
}

/// Show configuration paths
pub fn path() -> Result<()> {
    ConfigLoader::show_path();
    Ok(())
}

/// Initialize global or project configuration
pub fn init(global: bool, force: bool) -> Result<()> {
    let config_path = if global {
        ConfigLoader::init_global(force)?
    } else {
        ConfigLoader::init_project(force)?
    };
    let scope = if global { "global" } else { "project" };
    println!("✓ Initialized {} configuration", scope);
    println!("  Config: {}", config_path.display());
    Ok(())
}
