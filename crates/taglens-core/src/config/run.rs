//! Per-run configuration derived from the persistent [`Config`].

use std::path::PathBuf;

use serde::Serialize;

use crate::error::ConfigError;
use crate::pipeline::preprocess::ModelProfile;
use crate::pipeline::video::SamplingPolicy;
use crate::tagging::aggregate::AggregationPolicy;

use super::{expand, Config, FingerprintMode, LimitsConfig};

/// Everything a tagging run needs, fixed for the run's duration.
///
/// Components receive it as `Arc<RunConfig>`; nothing reads ambient state, so
/// runs with different settings can share a process.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    /// Recorded with every tag row
    pub model_identity: String,

    /// Minimum score for a label to be kept, in [0, 1]
    pub threshold: f32,

    /// Frames per engine call, > 0
    pub batch_size: usize,

    pub sampling: SamplingPolicy,
    pub min_video_span_secs: f64,
    pub aggregation: AggregationPolicy,

    /// Directories (or single files) to tag
    pub roots: Vec<PathBuf>,

    /// Re-tag media that already has results for this model
    pub force_retag: bool,

    pub parallel_workers: usize,
    pub inference_concurrency: usize,
    pub buffer_size: usize,
    pub store_retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_failed_batches: usize,

    pub fingerprint: FingerprintMode,
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
    pub limits: LimitsConfig,

    /// Resolved preprocessing profile for the model
    pub profile: ModelProfile,
}

impl RunConfig {
    /// Build and validate a run configuration.
    pub fn from_config(
        config: &Config,
        roots: Vec<PathBuf>,
        force_retag: bool,
    ) -> Result<Self, ConfigError> {
        let profile = ModelProfile::for_identity(&config.model.identity)
            .with_overrides(&config.model.preprocess);

        let run = Self {
            model_identity: config.model.identity.clone(),
            threshold: config.tagging.threshold,
            batch_size: config.tagging.batch_size,
            sampling: config.tagging.sampling.clone(),
            min_video_span_secs: config.tagging.min_video_span_secs,
            aggregation: config.tagging.aggregation,
            roots: roots.iter().map(|r| expand(r)).collect(),
            force_retag,
            parallel_workers: config.processing.parallel_workers,
            inference_concurrency: config.model.inference_concurrency,
            buffer_size: config.pipeline.buffer_size,
            store_retry_attempts: config.pipeline.store_retry_attempts,
            retry_delay_ms: config.pipeline.retry_delay_ms,
            max_failed_batches: config.pipeline.max_failed_batches,
            fingerprint: config.processing.fingerprint,
            image_extensions: config.processing.image_extensions.clone(),
            video_extensions: config.processing.video_extensions.clone(),
            limits: config.limits.clone(),
            profile,
        };
        run.validate()?;
        Ok(run)
    }

    /// Pre-flight checks. Any failure here is fatal for the run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_identity.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "model identity must not be empty".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold) || self.threshold.is_nan() {
            return Err(ConfigError::ValidationError(format!(
                "threshold must be between 0.0 and 1.0, got {}",
                self.threshold
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "batch_size must be > 0".into(),
            ));
        }
        if self.parallel_workers == 0 || self.inference_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "parallel_workers and inference_concurrency must be > 0".into(),
            ));
        }
        if self.buffer_size == 0 || self.max_failed_batches == 0 {
            return Err(ConfigError::ValidationError(
                "buffer_size and max_failed_batches must be > 0".into(),
            ));
        }
        if self.min_video_span_secs < 0.0 {
            return Err(ConfigError::ValidationError(
                "min_video_span_secs must be >= 0".into(),
            ));
        }
        self.sampling
            .validate()
            .map_err(|msg| ConfigError::ValidationError(format!("sampling: {msg}")))?;
        self.profile
            .validate()
            .map_err(|msg| ConfigError::ValidationError(format!("model profile: {msg}")))?;
        if self.roots.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one input root is required".into(),
            ));
        }
        for root in &self.roots {
            if !root.exists() {
                return Err(ConfigError::ValidationError(format!(
                    "input root does not exist: {}",
                    root.display()
                )));
            }
        }
        Ok(())
    }

    /// Whether an extension (without dot) is a configured image extension.
    pub fn is_image_extension(&self, ext: &str) -> bool {
        self.image_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
    }

    /// Whether an extension (without dot) is a configured video extension.
    pub fn is_video_extension(&self, ext: &str) -> bool {
        self.video_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
    }
}
