//! Command implementations for tandem-cmd

use anyhow::{Context, Result};
use tandem_common::Configuration;

pub mod limit;
pub mod pool;
pub mod state;

/// Loads the configuration file if one was given, falling back to the defaults.
pub fn load_config(path: Option<&str>) -> Result<Configuration> {
    match path {
        Some(path) => Configuration::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {path}")),
        None => Ok(Configuration::default()),
    }
}
