//! Core data types shared by the tagging pipeline stages.
//!
//! A [`MediaDescriptor`] enters the pipeline, is expanded into one or more
//! [`FrameUnit`]s, each becomes a [`PreparedTensor`], and what comes out the
//! other end is a set of [`Tag`]s persisted as [`TagResult`] rows.

use chrono::{DateTime, Utc};
use image::DynamicImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// What kind of media a file holds, decided from its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    /// Parse the lowercase form stored in the result store.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a file's content, used as the store's idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of work discovered by the media locator. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// Full path to the file
    pub path: PathBuf,

    /// Image or video, by signature
    pub kind: MediaKind,

    /// Content hash or mtime+size fingerprint
    pub fingerprint: Fingerprint,

    /// File size in bytes
    pub size: u64,
}

/// A single image-like unit extracted from a media item.
///
/// An image yields exactly one frame (index 0); a video yields one per sample.
#[derive(Debug, Clone)]
pub struct FrameUnit {
    pub media: Arc<MediaDescriptor>,
    pub frame_index: u32,
    /// Position in the video, `None` for still images
    pub timestamp_secs: Option<f64>,
    pub image: DynamicImage,
}

/// Identity of a prepared tensor, used to attribute scores after inference.
#[derive(Debug, Clone)]
pub struct Origin {
    pub media: Arc<MediaDescriptor>,
    pub frame_index: u32,
}

impl Origin {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.media.fingerprint
    }
}

/// A preprocessed frame with the exact shape the engine expects.
///
/// The tensor always has a leading batch axis of length 1.
#[derive(Debug, Clone)]
pub struct PreparedTensor {
    pub origin: Origin,
    pub tensor: Array4<f32>,
}

/// A label that cleared the threshold, with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// The label from the model vocabulary
    pub label: String,

    /// Confidence score from 0.0 to 1.0
    pub score: f32,
}

impl Tag {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// One persisted row: a label attached to a media item by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagResult {
    pub media_fingerprint: Fingerprint,
    pub label: String,
    pub score: f32,
    pub model_identity: String,
    pub tagged_at: DateTime<Utc>,
}

/// A media item that did not make it into the store, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub path: PathBuf,
    pub reason: String,
}

impl ItemOutcome {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Final report of a tagging run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunSummary {
    /// Media items committed to the store (including empty tag sets)
    pub tagged: usize,

    /// Media items skipped: already tagged, duplicate, unreadable or unsupported
    pub skipped: usize,

    /// Media items that failed inference or could not be committed
    pub failed: usize,

    /// Batches dispatched to the engine, counting isolation retries
    pub batches: usize,

    /// Every skip, with its reason
    pub skips: Vec<ItemOutcome>,

    /// Every failure, with its reason
    pub failures: Vec<ItemOutcome>,

    /// Wall time of the run in seconds
    pub total_seconds: f64,

    /// Whether the run stopped early on a cancellation signal
    pub cancelled: bool,
}

impl RunSummary {
    /// Processing rate in media items per second.
    pub fn items_per_second(&self) -> f64 {
        if self.total_seconds > 0.0 {
            self.tagged as f64 / self.total_seconds
        } else {
            0.0
        }
    }
}
