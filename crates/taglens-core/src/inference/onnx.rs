//! ONNX Runtime classifier session.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Value;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;
use crate::pipeline::batcher::Batch;

use super::InferenceEngine;

/// Hardware backend for the ONNX Runtime session.
///
/// Anything but `Cpu` needs the matching cargo feature (`cuda`, `tensorrt`,
/// `coreml`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    #[default]
    Cpu,
    Cuda,
    Tensorrt,
    Coreml,
}

impl ExecutionProvider {
    /// Whether this build can register the provider.
    pub fn is_available(self) -> bool {
        match self {
            ExecutionProvider::Cpu => true,
            ExecutionProvider::Cuda => cfg!(feature = "cuda"),
            ExecutionProvider::Tensorrt => cfg!(feature = "tensorrt"),
            ExecutionProvider::Coreml => cfg!(feature = "coreml"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionProvider::Cpu => "cpu",
            ExecutionProvider::Cuda => "cuda",
            ExecutionProvider::Tensorrt => "tensorrt",
            ExecutionProvider::Coreml => "coreml",
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier loaded from an ONNX file.
///
/// Uses a `Mutex` because `Session::run` requires `&mut self`, so calls
/// serialize and [`InferenceEngine::max_concurrency`] is 1.
pub struct OnnxEngine {
    session: Mutex<Session>,
    identity: String,
    path: PathBuf,
    /// Name of the input tensor (detected from model metadata).
    input_name: String,
    /// Name of the probability output (first output).
    output_name: String,
    /// Expected per-unit input shape, batch axis included
    input_shape: [usize; 4],
}

impl OnnxEngine {
    /// Load a model. `input_shape` is the shape of one prepared tensor;
    /// `device_id` selects the GPU for CUDA and TensorRT.
    pub fn load(
        model_path: &Path,
        identity: impl Into<String>,
        input_shape: [usize; 4],
        provider: ExecutionProvider,
        device_id: i32,
    ) -> Result<Self, InferenceError> {
        if !model_path.exists() {
            return Err(InferenceError::Model {
                path: model_path.to_path_buf(),
                message: "model file not found".to_string(),
            });
        }
        if !provider.is_available() {
            return Err(InferenceError::Model {
                path: model_path.to_path_buf(),
                message: format!(
                    "{provider} execution provider requested but the `{provider}` feature is not enabled"
                ),
            });
        }

        let model_err = |message: String| InferenceError::Model {
            path: model_path.to_path_buf(),
            message,
        };
        let builder = Session::builder()
            .map_err(|e| model_err(format!("Failed to create ONNX session builder: {e}")))?;
        tracing::debug!("Using {} execution provider (device {})", provider, device_id);
        let builder = match provider {
            #[cfg(feature = "cuda")]
            ExecutionProvider::Cuda => builder
                .with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                ])
                .map_err(|e| model_err(format!("Failed to register CUDA: {e}")))?,
            #[cfg(feature = "tensorrt")]
            ExecutionProvider::Tensorrt => builder
                .with_execution_providers([
                    ort::execution_providers::TensorRTExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                ])
                .map_err(|e| model_err(format!("Failed to register TensorRT: {e}")))?,
            #[cfg(feature = "coreml")]
            ExecutionProvider::Coreml => builder
                .with_execution_providers([
                    ort::execution_providers::CoreMLExecutionProvider::default().build(),
                ])
                .map_err(|e| model_err(format!("Failed to register CoreML: {e}")))?,
            // ONNX Runtime falls back to CPU without a registered provider.
            _ => builder,
        };

        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| InferenceError::Model {
                path: model_path.to_path_buf(),
                message: format!("Failed to load ONNX model: {e}"),
            })?;

        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .unwrap_or_else(|| "input".to_string());
        let output_name = session
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .ok_or_else(|| InferenceError::Model {
                path: model_path.to_path_buf(),
                message: "model declares no outputs".to_string(),
            })?;

        tracing::debug!(
            "Loaded ONNX model from {:?} (input: {:?}, output: {:?})",
            model_path,
            input_name,
            output_name
        );

        Ok(Self {
            session: Mutex::new(session),
            identity: identity.into(),
            path: model_path.to_path_buf(),
            input_name,
            output_name,
            input_shape,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn engine_err(message: String) -> InferenceError {
        InferenceError::Engine { message }
    }
}

impl InferenceEngine for OnnxEngine {
    fn model_identity(&self) -> &str {
        &self.identity
    }

    fn infer(&self, batch: &Batch) -> Result<Vec<Vec<f32>>, InferenceError> {
        let n = batch.len();
        if n == 0 {
            return Ok(vec![]);
        }

        for unit in batch.units() {
            if unit.tensor.shape() != self.input_shape {
                return Err(Self::engine_err(format!(
                    "input shape {:?} for {:?}, model expects {:?}",
                    unit.tensor.shape(),
                    unit.origin.media.path,
                    self.input_shape
                )));
            }
        }

        // Flatten [N, ...] for ort.
        let single_len: usize = self.input_shape.iter().product();
        let mut flat = Vec::with_capacity(n * single_len);
        for unit in batch.units() {
            flat.extend(unit.tensor.iter().copied());
        }
        let shape: Vec<i64> = std::iter::once(n as i64)
            .chain(self.input_shape[1..].iter().map(|&d| d as i64))
            .collect();

        let input = Value::from_array((shape, flat))
            .map_err(|e| Self::engine_err(format!("Failed to create input tensor: {e}")))?;
        let inputs = ort::inputs![self.input_name.as_str() => input];

        let mut session = self
            .session
            .lock()
            .map_err(|e| Self::engine_err(format!("Session lock poisoned: {e}")))?;
        let outputs = session
            .run(inputs)
            .map_err(|e| Self::engine_err(format!("ONNX inference failed: {e}")))?;

        let output = outputs
            .iter()
            .find(|(name, _)| *name == self.output_name)
            .ok_or_else(|| Self::engine_err(format!("Model did not produce {}", self.output_name)))?;
        let (out_shape, data) = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| Self::engine_err(format!("Failed to extract output tensor: {e}")))?;

        if out_shape.len() != 2 || out_shape[0] as usize != n {
            return Err(InferenceError::OutputMismatch {
                expected: n,
                actual: out_shape.first().copied().unwrap_or(0) as usize,
            });
        }
        let width = out_shape[1] as usize;
        if width == 0 {
            return Err(Self::engine_err("model produced zero-width scores".to_string()));
        }
        Ok(data.chunks_exact(width).map(|row| row.to_vec()).collect())
    }
}
