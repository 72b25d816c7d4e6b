//! Configuration management for Taglens.
//!
//! Persistent settings are loaded from a TOML file in the platform config
//! directory with defaults for everything. A [`RunConfig`] is then derived
//! from them for each tagging run.

mod run;
mod types;
mod validate;

pub use run::RunConfig;
pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for Taglens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Discovery and worker settings
    pub processing: ProcessingConfig,

    /// Pipeline settings
    pub pipeline: PipelineConfig,

    /// Resource limits
    pub limits: LimitsConfig,

    /// Classifier model settings
    pub model: ModelConfig,

    /// Tagging settings
    pub tagging: TaggingConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// - macOS: ~/Library/Application Support/com.taglens.taglens/config.toml
    /// - Linux: ~/.config/taglens/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\taglens\config\config.toml
    ///
    /// Falls back to ~/.taglens/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "taglens", "taglens")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".taglens").join("config.toml")
            })
    }

    /// Get the resolved model directory path (with ~ expansion).
    pub fn model_dir(&self) -> PathBuf {
        expand(&self.general.model_dir)
    }

    /// Get the resolved store file path (with ~ expansion).
    pub fn store_path(&self) -> PathBuf {
        expand(&self.general.store_path)
    }

    /// ONNX model file for the configured identity.
    pub fn model_path(&self) -> PathBuf {
        match &self.model.path {
            Some(path) => expand(path),
            None => self
                .model_dir()
                .join(&self.model.identity)
                .join("model.onnx"),
        }
    }

    /// Label vocabulary file for the configured identity.
    pub fn labels_path(&self) -> PathBuf {
        match &self.model.labels {
            Some(path) => expand(path),
            None => self
                .model_dir()
                .join(&self.model.identity)
                .join("selected_tags.csv"),
        }
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

/// Expand a leading `~` in a configured path.
pub(crate) fn expand(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(&path_str);
    PathBuf::from(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::video::SamplingPolicy;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.processing.parallel_workers, 4);
        assert_eq!(config.pipeline.buffer_size, 64);
        assert_eq!(config.tagging.batch_size, 8);
        assert_eq!(config.model.inference_concurrency, 1);
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[tagging]"));
        assert!(toml.contains("[model]"));
    }

    #[test]
    fn test_config_toml_roundtrip_keeps_sampling() {
        let mut config = Config::default();
        config.tagging.sampling = SamplingPolicy::Stride {
            seconds: 3.0,
            max_frames: 20,
        };
        let toml = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.tagging.sampling, config.tagging.sampling);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: Config = toml::from_str("[tagging]\nthreshold = 0.6\n").unwrap();
        assert!((parsed.tagging.threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(parsed.tagging.batch_size, 8);
        assert_eq!(parsed.processing.parallel_workers, 4);
    }

    #[test]
    fn test_model_paths_default_under_model_dir() {
        let mut config = Config::default();
        config.general.model_dir = PathBuf::from("/models");
        assert_eq!(
            config.model_path(),
            PathBuf::from("/models/wd-swinv2-tagger-v3/model.onnx")
        );
        assert_eq!(
            config.labels_path(),
            PathBuf::from("/models/wd-swinv2-tagger-v3/selected_tags.csv")
        );
    }

    #[test]
    fn test_load_from_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tagging]\nbatch_size = 0\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }
}
