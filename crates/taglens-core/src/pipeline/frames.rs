//! Uniform frame source over images and videos.

use crate::error::PipelineError;
use crate::types::{FrameUnit, PreparedTensor};

use super::preprocess::Preprocessor;
use super::video::FrameSequence;

/// The frames a media item produces: one for an image, several for a video.
pub enum MediaFrames {
    Single(Option<FrameUnit>),
    Video(FrameSequence),
}

impl MediaFrames {
    pub fn image(frame: FrameUnit) -> Self {
        MediaFrames::Single(Some(frame))
    }

    /// Next frame in temporal order.
    pub async fn next_frame(&mut self) -> Option<FrameUnit> {
        match self {
            MediaFrames::Single(frame) => frame.take(),
            MediaFrames::Video(sequence) => sequence.next_frame().await,
        }
    }

    /// Drain every remaining frame.
    pub async fn collect_frames(mut self) -> Vec<FrameUnit> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await {
            frames.push(frame);
        }
        frames
    }
}

/// Preprocess every frame. Frames that cannot be prepared are returned
/// separately and left out of the tensors. Blocking.
pub fn prepare_all(
    frames: Vec<FrameUnit>,
    preprocessor: &Preprocessor,
) -> (Vec<PreparedTensor>, Vec<PipelineError>) {
    let mut prepared = Vec::with_capacity(frames.len());
    let mut rejected = Vec::new();
    for frame in &frames {
        match preprocessor.prepare(frame) {
            Ok(tensor) => prepared.push(tensor),
            Err(e) => rejected.push(e),
        }
    }
    (prepared, rejected)
}
