//! Boundary to the classifier model.
//!
//! The pipeline only depends on [`InferenceEngine`]: a batch goes in, one raw
//! score vector per unit comes out, in the same order. [`OnnxEngine`] is the
//! ONNX Runtime implementation; [`BatchRunner`] wraps any engine with
//! timeouts, a concurrency limit and poison-input isolation.

pub mod isolate;
pub mod onnx;

pub use isolate::{BatchOutcome, BatchRunner, BatchState};
pub use onnx::{ExecutionProvider, OnnxEngine};

use crate::error::InferenceError;
use crate::pipeline::batcher::Batch;

/// A classifier that scores batches of prepared tensors. Calls are blocking.
pub trait InferenceEngine: Send + Sync {
    /// Identity recorded with every tag row this engine produces.
    fn model_identity(&self) -> &str;

    /// Score every unit of `batch`. The result has one vector per unit, in
    /// batch order, each with one score per vocabulary label.
    fn infer(&self, batch: &Batch) -> Result<Vec<Vec<f32>>, InferenceError>;

    /// How many `infer` calls the engine can usefully run at once.
    fn max_concurrency(&self) -> usize {
        1
    }
}
