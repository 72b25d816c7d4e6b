//! Engine calls with timeouts and poison-input isolation.
//!
//! Every batch moves through an explicit state machine:
//!
//! ```text
//! Pending -> Submitted -> Committed
//!                      -> Failed -> (len > 1) two Pending halves
//!                                -> (len = 1) RetriedSingle -> Committed
//!                                                           -> PermanentlyFailed
//! ```
//!
//! Halves produced by a failure are isolating: a half of one unit is
//! dispatched straight into `RetriedSingle`. A poison unit therefore costs
//! `O(log n)` extra calls and fails only itself.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::error::InferenceError;
use crate::pipeline::batcher::Batch;
use crate::types::Origin;

use super::InferenceEngine;

/// Lifecycle of one engine submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Submitted,
    Failed,
    RetriedSingle,
    Committed,
    PermanentlyFailed,
}

impl BatchState {
    /// State entered when a pending submission is dispatched.
    pub fn dispatch(len: usize, isolating: bool) -> Self {
        if isolating && len == 1 {
            BatchState::RetriedSingle
        } else {
            BatchState::Submitted
        }
    }

    /// State after the engine call returns.
    pub fn resolve(self, ok: bool) -> Self {
        match (self, ok) {
            (BatchState::Submitted | BatchState::RetriedSingle, true) => BatchState::Committed,
            (BatchState::Submitted, false) => BatchState::Failed,
            (BatchState::RetriedSingle, false) => BatchState::PermanentlyFailed,
            (other, _) => other,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchState::Committed | BatchState::PermanentlyFailed)
    }
}

/// Result of running one batch to completion.
#[derive(Debug)]
pub struct BatchOutcome {
    pub batch_id: usize,
    /// Scores per unit, in batch order
    pub scored: Vec<(Origin, Vec<f32>)>,
    /// Units that permanently failed, in batch order
    pub failed: Vec<(Origin, InferenceError)>,
    /// Engine calls spent, including isolation retries
    pub calls: usize,
}

impl BatchOutcome {
    /// Every unit of the batch failed.
    pub fn all_failed(&self) -> bool {
        self.scored.is_empty() && !self.failed.is_empty()
    }
}

struct Submission {
    batch: Batch,
    state: BatchState,
}

/// Runs batches on an engine under a timeout and a concurrency limit.
#[derive(Clone)]
pub struct BatchRunner {
    engine: Arc<dyn InferenceEngine>,
    timeout_ms: u64,
    expected_width: usize,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl BatchRunner {
    /// `expected_width` is the vocabulary length every score vector must have.
    /// Concurrency is capped by what the engine supports.
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        timeout_ms: u64,
        expected_width: usize,
        concurrency: usize,
    ) -> Self {
        let concurrency = concurrency.min(engine.max_concurrency()).max(1);
        Self {
            engine,
            timeout_ms,
            expected_width,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn model_identity(&self) -> &str {
        self.engine.model_identity()
    }

    /// Run `batch`, isolating failures down to single units.
    pub async fn run(&self, batch: Batch) -> BatchOutcome {
        let batch_id = batch.id;
        let mut outcome = BatchOutcome {
            batch_id,
            scored: Vec::with_capacity(batch.len()),
            failed: Vec::new(),
            calls: 0,
        };

        let mut work = VecDeque::new();
        work.push_back(Submission {
            state: BatchState::dispatch(batch.len(), false),
            batch,
        });

        while let Some(sub) = work.pop_front() {
            let shared = Arc::new(sub.batch);
            outcome.calls += 1;
            tracing::trace!(
                "Batch {} ({} units) {:?}",
                batch_id,
                shared.len(),
                sub.state
            );
            let result = self.call(Arc::clone(&shared)).await;
            let state = sub.state.resolve(result.is_ok());
            let batch = Arc::try_unwrap(shared).unwrap_or_else(|arc| (*arc).clone());

            match (state, result) {
                (BatchState::Committed, Ok(rows)) => {
                    outcome
                        .scored
                        .extend(batch.units().iter().map(|u| u.origin.clone()).zip(rows));
                }
                (BatchState::Failed, Err(e)) => {
                    tracing::warn!(
                        "Batch {} failed with {} units, isolating: {}",
                        batch_id,
                        batch.len(),
                        e
                    );
                    if batch.len() > 1 {
                        let (first, second) = batch.split();
                        work.push_front(Submission {
                            state: BatchState::dispatch(second.len(), true),
                            batch: second,
                        });
                        work.push_front(Submission {
                            state: BatchState::dispatch(first.len(), true),
                            batch: first,
                        });
                    } else {
                        work.push_front(Submission {
                            state: BatchState::RetriedSingle,
                            batch,
                        });
                    }
                }
                (BatchState::PermanentlyFailed, Err(e)) => {
                    for unit in batch.units() {
                        tracing::error!(
                            "Inference permanently failed for {:?} frame {}: {}",
                            unit.origin.media.path,
                            unit.origin.frame_index,
                            e
                        );
                        outcome.failed.push((unit.origin.clone(), e.clone()));
                    }
                }
                (state, _) => {
                    tracing::error!("Batch {} in unexpected state {:?}", batch_id, state);
                }
            }
        }

        outcome
    }

    /// One engine call on the blocking pool, bounded by the timeout.
    ///
    /// The permit lives inside the blocking task, so a call that timed out
    /// keeps its slot until the engine actually returns.
    async fn call(&self, batch: Arc<Batch>) -> Result<Vec<Vec<f32>>, InferenceError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| InferenceError::Engine {
                message: "inference limiter closed".to_string(),
            })?;

        let engine = Arc::clone(&self.engine);
        let task_batch = Arc::clone(&batch);
        let result = timeout(
            Duration::from_millis(self.timeout_ms),
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                engine.infer(&task_batch)
            }),
        )
        .await;

        let rows = match result {
            Ok(Ok(Ok(rows))) => rows,
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(e)) => {
                return Err(InferenceError::Engine {
                    message: format!("engine task crashed: {}", e),
                })
            }
            Err(_) => {
                return Err(InferenceError::Timeout {
                    timeout_ms: self.timeout_ms,
                })
            }
        };

        if rows.len() != batch.len() {
            return Err(InferenceError::OutputMismatch {
                expected: batch.len(),
                actual: rows.len(),
            });
        }
        if let Some(row) = rows.iter().find(|r| r.len() != self.expected_width) {
            return Err(InferenceError::OutputMismatch {
                expected: self.expected_width,
                actual: row.len(),
            });
        }
        Ok(rows)
    }
}
