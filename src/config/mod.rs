//! Configuration Management
//!
//! Unified configuration system with hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/rankrelay/config.toml)
//! 3. Project config (.rankrelay/config.toml)
//! 4. Environment variables (RANKRELAY_*, highest priority)
//!
//! `--config FILE` on the command line replaces layers 2 and 3.

mod loader;
mod types;

pub use loader::{API_KEY_ENV, ConfigLoader, ENV_PREFIX};
pub use types::*;
