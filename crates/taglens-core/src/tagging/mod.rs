//! Turning raw model scores into tags.
//!
//! The model emits one score per vocabulary label. The [`Thresholder`] keeps
//! labels that clear the run's threshold and the [`Aggregator`] merges
//! per-frame tag sets of a video into one set.

pub mod aggregate;
pub mod threshold;
pub mod vocabulary;

pub use aggregate::{AggregationPolicy, Aggregator};
pub use threshold::Thresholder;
pub use vocabulary::{LabelCategory, LabelVocabulary};
