//! Taglens Core - batch media tagging library.
//!
//! Taglens walks directories of images and videos, runs every item through a
//! multi-label classifier and records the labels that clear a confidence
//! threshold in a local SQLite store, keyed by content fingerprint.
//!
//! # Architecture
//!
//! ```text
//! Locate → Fingerprint → Decode / Sample frames → Preprocess → Batch
//!        → Infer (ONNX) → Threshold → Aggregate → Store
//! ```
//!
//! Runs are resumable: media that already has results for the configured
//! model is skipped unless a re-tag is forced.
//!
//! # Usage
//!
//! ```rust,ignore
//! use taglens_core::{Config, RunConfig, Tagger};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> taglens_core::Result<()> {
//!     let config = Config::load()?;
//!     let run = RunConfig::from_config(&config, vec!["./photos".into()], false)?;
//!     let tagger = Tagger::load(&config, run)?;
//!
//!     let summary = tagger.run(CancellationToken::new()).await?;
//!     println!("{} tagged, {} skipped", summary.tagged, summary.skipped);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod inference;
pub mod output;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod tagging;
pub mod types;

pub use config::{Config, RunConfig};
pub use error::{
    ConfigError, InferenceError, PipelineError, PipelineResult, Result, StoreError, TaglensError,
};
pub use inference::{InferenceEngine, OnnxEngine};
pub use output::{OutputFormat, OutputWriter};
pub use pipeline::{Progress, Tagger};
pub use store::{TagFilter, TagQuery, TagStore};
pub use types::{
    Fingerprint, ItemOutcome, MediaDescriptor, MediaKind, RunSummary, Tag, TagResult,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
