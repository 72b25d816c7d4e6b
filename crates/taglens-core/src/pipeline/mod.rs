//! Tagging pipeline stages.
//!
//! - **discovery**: walk input roots and classify files by signature
//! - **hash**: content or metadata fingerprints
//! - **decode**: image decoding with size and time limits
//! - **video**: frame sampling and extraction through ffmpeg
//! - **frames**: one frame source over images and videos
//! - **preprocess**: resize, normalize and lay out model input tensors
//! - **batcher**: group prepared tensors into fixed-size batches
//! - **orchestrator**: runs all of the above against an engine and a store
//! - **progress**: run counters published over a watch channel

pub mod batcher;
pub mod decode;
pub mod discovery;
pub mod frames;
pub mod hash;
pub mod orchestrator;
pub mod preprocess;
pub mod progress;
pub mod signature;
pub mod video;

pub use batcher::{Batch, Batcher};
pub use decode::{DecodedImage, ImageDecoder};
pub use discovery::{Candidate, Candidates, Located, MediaLocator, MediaWalk};
pub use frames::{prepare_all, MediaFrames};
pub use hash::Fingerprinter;
pub use orchestrator::Tagger;
pub use preprocess::{ModelProfile, Preprocessor};
pub use progress::{Progress, ProgressReporter};
pub use video::{FfmpegDecoder, FrameExtractor, FrameSequence, SamplingPolicy, VideoDecoder, VideoInfo};
