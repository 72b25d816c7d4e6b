//! Command handlers.

pub mod config;
pub mod models;
pub mod query;
pub mod tag;

use std::path::Path;

use taglens_core::{Config, ConfigError};

/// Load from an explicit path, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}
