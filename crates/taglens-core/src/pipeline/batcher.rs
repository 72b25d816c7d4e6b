//! Fixed-size batching of prepared tensors.

use ndarray::{Array4, Axis};

use crate::error::PipelineError;
use crate::types::{Origin, PreparedTensor};

/// An ordered group of same-shape tensors for one engine call.
///
/// Position `i` in the engine's output belongs to `origins()[i]`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Sequence number within the run, for logs
    pub id: usize,
    units: Vec<PreparedTensor>,
}

impl Batch {
    pub fn new(id: usize, units: Vec<PreparedTensor>) -> Self {
        Self { id, units }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[PreparedTensor] {
        &self.units
    }

    pub fn origins(&self) -> impl Iterator<Item = &Origin> {
        self.units.iter().map(|u| &u.origin)
    }

    /// Stack the unit tensors along the batch axis.
    pub fn stacked(&self) -> Result<Array4<f32>, String> {
        let views: Vec<_> = self.units.iter().map(|u| u.tensor.view()).collect();
        ndarray::concatenate(Axis(0), &views).map_err(|e| e.to_string())
    }

    /// Split into two halves for failure isolation. The first half gets the
    /// extra unit when the length is odd.
    pub fn split(self) -> (Batch, Batch) {
        let mut first = self.units;
        let second = first.split_off(first.len().div_ceil(2));
        (Batch::new(self.id, first), Batch::new(self.id, second))
    }
}

/// Accumulates prepared tensors into batches of exactly `batch_size`, with a
/// final partial batch on [`Batcher::finish`].
pub struct Batcher {
    batch_size: usize,
    shape: [usize; 4],
    pending: Vec<PreparedTensor>,
    emitted: usize,
}

impl Batcher {
    /// `shape` is the per-unit tensor shape every unit must match.
    pub fn new(batch_size: usize, shape: [usize; 4]) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            shape,
            pending: Vec::with_capacity(batch_size),
            emitted: 0,
        }
    }

    /// Add a unit. Returns a full batch when one is ready.
    ///
    /// A unit with the wrong shape is rejected and never enters a batch.
    pub fn push(&mut self, unit: PreparedTensor) -> Result<Option<Batch>, PipelineError> {
        if unit.tensor.shape() != self.shape {
            return Err(PipelineError::UnsupportedFormat {
                path: unit.origin.media.path.clone(),
                format: format!(
                    "tensor shape {:?}, expected {:?}",
                    unit.tensor.shape(),
                    self.shape
                ),
            });
        }

        self.pending.push(unit);
        if self.pending.len() == self.batch_size {
            return Ok(Some(self.take()));
        }
        Ok(None)
    }

    /// Flush the final partial batch, if any.
    pub fn finish(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    /// Units waiting for a batch.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Batches emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    fn take(&mut self) -> Batch {
        let units = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        let batch = Batch::new(self.emitted, units);
        self.emitted += 1;
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Fingerprint, MediaDescriptor, MediaKind};
    use std::path::PathBuf;
    use std::sync::Arc;

    const SHAPE: [usize; 4] = [1, 3, 2, 2];

    fn unit(i: usize, shape: [usize; 4]) -> PreparedTensor {
        PreparedTensor {
            origin: Origin {
                media: Arc::new(MediaDescriptor {
                    path: PathBuf::from(format!("{i}.png")),
                    kind: MediaKind::Image,
                    fingerprint: Fingerprint::new(format!("fp{i}")),
                    size: 1,
                }),
                frame_index: 0,
            },
            tensor: Array4::from_elem((shape[0], shape[1], shape[2], shape[3]), i as f32),
        }
    }

    fn run(len: usize, batch_size: usize) -> Vec<Batch> {
        let mut batcher = Batcher::new(batch_size, SHAPE);
        let mut out = Vec::new();
        for i in 0..len {
            if let Some(batch) = batcher.push(unit(i, SHAPE)).unwrap() {
                out.push(batch);
            }
        }
        out.extend(batcher.finish());
        out
    }

    #[test]
    fn test_ten_units_batch_of_four() {
        let sizes: Vec<usize> = run(10, 4).iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_batch_count_is_ceil_of_length() {
        for len in 0..20 {
            for batch_size in 1..7 {
                let batches = run(len, batch_size);
                assert_eq!(batches.len(), len.div_ceil(batch_size));
                if let Some((last, full)) = batches.split_last() {
                    assert!(full.iter().all(|b| b.len() == batch_size));
                    let expected_last = if len % batch_size == 0 { batch_size } else { len % batch_size };
                    assert_eq!(last.len(), expected_last);
                }
            }
        }
    }

    #[test]
    fn test_order_is_preserved() {
        let batches = run(7, 3);
        let order: Vec<String> = batches
            .iter()
            .flat_map(|b| b.origins().map(|o| o.fingerprint().to_string()))
            .collect();
        let expected: Vec<String> = (0..7).map(|i| format!("fp{i}")).collect();
        assert_eq!(order, expected);
        assert_eq!(batches.iter().map(|b| b.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_wrong_shape_is_rejected_without_blocking() {
        let mut batcher = Batcher::new(2, SHAPE);
        assert!(batcher.push(unit(0, SHAPE)).unwrap().is_none());
        assert!(batcher.push(unit(1, [1, 3, 4, 4])).is_err());
        let batch = batcher.push(unit(2, SHAPE)).unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batcher.pending(), 0);
    }

    #[test]
    fn test_stacked_and_split() {
        let batch = run(3, 3).remove(0);
        let stacked = batch.stacked().unwrap();
        assert_eq!(stacked.shape(), &[3, 3, 2, 2]);
        assert_eq!(stacked[[2, 0, 0, 0]], 2.0);

        let (a, b) = batch.split();
        assert_eq!((a.len(), b.len()), (2, 1));
        assert_eq!(b.units()[0].origin.fingerprint().as_str(), "fp2");
    }
}
