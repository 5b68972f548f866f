//! CLI Common Utilities
//!
//! Shared configuration loading and input handling for command handlers.

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::{Config, ConfigLoader};
use crate::types::{RelayError, Result};

/// Path argument meaning "read standard input"
pub const STDIN_ARG: &str = "-";

/// Command execution context
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: Config,
}

impl CommandContext {
    /// Load layered configuration, or exactly `config_path` when given
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        Ok(Self { config })
    }
}

pub fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == STDIN_ARG
}

/// Read a file argument, `-` meaning stdin
pub fn read_input(path: &Path) -> Result<String> {
    if is_stdin(path) {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        return Ok(buffer);
    }

    std::fs::read_to_string(path).map_err(|e| {
        RelayError::config(format!("Cannot read {}: {}", path.display(), e))
    })
}

/// Read several file arguments, allowing stdin for at most one of them
pub fn read_inputs(paths: &[&PathBuf]) -> Result<Vec<String>> {
    if paths.iter().filter(|p| is_stdin(p)).count() > 1 {
        return Err(RelayError::config(
            "Only one input can be read from stdin ('-')",
        ));
    }
    paths.iter().map(|p| read_input(p)).collect()
}
