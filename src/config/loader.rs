//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/rankrelay/config.toml)
//! 3. Project config (.rankrelay/config.toml)
//! 4. Environment variables (RANKRELAY_* prefix, `__` separates sections)
//!
//! The credential additionally falls back to `OPENAI_API_KEY`.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{RelayError, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "RANKRELAY_";

/// Conventional credential variable used when the config has none
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let global = Self::global_config_path();
        let project = Self::project_config_path();
        Self::load_layers(global.as_deref(), Some(&project))
    }

    /// Load configuration from a specific file (plus env overrides)
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(RelayError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        Self::load_layers(None, Some(path))
    }

    fn load_layers(global: Option<&Path>, project: Option<&Path>) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        for path in [global, project].into_iter().flatten() {
            if path.exists() {
                debug!("Loading config from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        // e.g. RANKRELAY_LLM__MODEL -> llm.model
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true));

        let mut config: Config = figment
            .extract()
            .map_err(|e| RelayError::config(e.to_string()))?;

        if config.llm.api_key.is_none() {
            config.llm.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        }

        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Global config directory (~/.config/rankrelay/ on Linux)
    pub fn global_dir() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("rankrelay"))
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_dir() -> PathBuf {
        PathBuf::from(".rankrelay")
    }

    pub fn project_config_path() -> PathBuf {
        Self::project_dir().join("config.toml")
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
    }

    /// Show current effective configuration
    pub fn show_config(config: &Config, as_json: bool) -> Result<()> {
        if as_json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(config).map_err(|e| RelayError::config(e.to_string()))?
            );
        }
        Ok(())
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Write a default config file into `dir`, returning its path
    pub fn init_in(dir: &Path, force: bool) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;

        let config_path = dir.join("config.toml");
        if !config_path.exists() || force {
            fs::write(&config_path, Self::default_config_file())?;
            info!("Created config: {}", config_path.display());
        } else {
            info!("Config exists: {}", config_path.display());
        }

        Ok(config_path)
    }

    /// Initialize global configuration
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let dir = Self::global_dir().ok_or_else(|| {
            RelayError::config("Cannot determine global config directory")
        })?;
        Self::init_in(&dir, force)
    }

    /// Initialize project configuration
    pub fn init_project(force: bool) -> Result<PathBuf> {
        Self::init_in(&Self::project_dir(), force)
    }

    /// Default config content (TOML)
    fn default_config_file() -> String {
        r#"# rankrelay configuration
# Project settings in .rankrelay/config.toml override ~/.config/rankrelay/config.toml.
# The API key is read from OPENAI_API_KEY (or RANKRELAY_LLM__API_KEY) when unset here.

version = "1.0"

[llm]
api_base = "https://api.openai.com/v1"
model = "gpt-4o-mini"
max_tokens = 4096
temperature = 0.7
timeout_secs = 120
# Per-request input ceiling of the model; chunks use budget_ratio of it
max_input_tokens = 32000

[rate_limit]
requests_per_minute = 10
window_secs = 60
min_interval_ms = 1000

[cache]
enabled = true
ttl_secs = 3600

[chunking]
budget_ratio = 0.7
"#
        .to_string()
    }
}
