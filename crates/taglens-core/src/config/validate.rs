//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.parallel_workers == 0 {
            return Err(ConfigError::ValidationError(
                "processing.parallel_workers must be > 0".into(),
            ));
        }
        if self.pipeline.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.buffer_size must be > 0".into(),
            ));
        }
        if self.pipeline.max_failed_batches == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.max_failed_batches must be > 0".into(),
            ));
        }
        if self.limits.max_file_size_mb == 0 || self.limits.max_video_size_mb == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_file_size_mb and limits.max_video_size_mb must be > 0".into(),
            ));
        }
        if self.limits.max_image_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_image_dimension must be > 0".into(),
            ));
        }
        if self.limits.decode_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.decode_timeout_ms must be > 0".into(),
            ));
        }
        if self.limits.video_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.video_timeout_ms must be > 0".into(),
            ));
        }
        if self.limits.inference_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.inference_timeout_ms must be > 0".into(),
            ));
        }
        if self.model.identity.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "model.identity must not be empty".into(),
            ));
        }
        if self.model.inference_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "model.inference_concurrency must be > 0".into(),
            ));
        }
        let provider = self.model.execution_provider;
        if !provider.is_available() {
            return Err(ConfigError::ValidationError(format!(
                "model.execution_provider = \"{provider}\" needs taglens built with the `{provider}` feature"
            )));
        }
        if self.model.device_id < 0 {
            return Err(ConfigError::ValidationError(
                "model.device_id must be >= 0".into(),
            ));
        }
        if self.tagging.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "tagging.batch_size must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tagging.threshold) {
            return Err(ConfigError::ValidationError(
                "tagging.threshold must be between 0.0 and 1.0".into(),
            ));
        }
        self.tagging
            .sampling
            .validate()
            .map_err(|msg| ConfigError::ValidationError(format!("tagging.sampling: {msg}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::video::SamplingPolicy;

    #[test]
    fn test_default_config_passes_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_parallel_workers() {
        let mut config = Config::default();
        config.processing.parallel_workers = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("parallel_workers"));
    }

    #[cfg(not(feature = "tensorrt"))]
    #[test]
    fn test_validate_rejects_provider_missing_from_build() {
        let mut config = Config::default();
        config.model.execution_provider = crate::inference::ExecutionProvider::Tensorrt;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("model.execution_provider"));
        assert!(err.to_string().contains("tensorrt"));
    }

    #[test]
    fn test_validate_rejects_negative_device_id() {
        let mut config = Config::default();
        config.model.device_id = -1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("device_id"));
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = Config::default();
        config.tagging.batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.limits.inference_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("inference_timeout_ms"));
    }

    #[test]
    fn test_validate_rejects_invalid_threshold() {
        let mut config = Config::default();
        config.tagging.threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("threshold"));

        config.tagging.threshold = -0.1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn test_validate_rejects_zero_frame_count() {
        let mut config = Config::default();
        config.tagging.sampling = SamplingPolicy::FixedCount { frames: 0 };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sampling"));
    }
}
