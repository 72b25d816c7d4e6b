//! Merging per-frame tag sets into one tag set per media item.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::Tag;

use super::threshold::sort_tags;

/// Rule for merging per-frame tags of a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Union of labels; score is the maximum across frames.
    #[default]
    MaxPool,
    /// Union of labels; the maximum score is scaled by the fraction of
    /// sampled frames the label appeared in.
    FrequencyWeighted,
}

/// Merges per-frame tag sets in temporal order.
pub struct Aggregator;

impl Aggregator {
    /// Merge `frames` (one tag set per successfully tagged frame).
    ///
    /// A single frame passes through unchanged under every policy.
    pub fn aggregate(policy: AggregationPolicy, frames: &[Vec<Tag>]) -> Vec<Tag> {
        let total = frames.len();
        if total == 0 {
            return Vec::new();
        }

        // label -> (max score, frames seen in)
        let mut merged: BTreeMap<&str, (f32, usize)> = BTreeMap::new();
        for tags in frames {
            for tag in tags {
                let entry = merged.entry(tag.label.as_str()).or_insert((0.0, 0));
                entry.0 = entry.0.max(tag.score);
                entry.1 += 1;
            }
        }

        let mut out: Vec<Tag> = merged
            .into_iter()
            .map(|(label, (max, seen))| {
                let score = match policy {
                    AggregationPolicy::MaxPool => max,
                    AggregationPolicy::FrequencyWeighted => max * seen as f32 / total as f32,
                };
                Tag::new(label, score)
            })
            .collect();

        sort_tags(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames_with_cat(scores: &[f32], threshold: f32) -> Vec<Vec<Tag>> {
        scores
            .iter()
            .map(|&s| {
                if s >= threshold {
                    vec![Tag::new("cat", s)]
                } else {
                    vec![]
                }
            })
            .collect()
    }

    #[test]
    fn test_max_pool_takes_strongest_frame() {
        let frames = frames_with_cat(&[0.3, 0.7, 0.2, 0.65, 0.1], 0.6);
        let merged = Aggregator::aggregate(AggregationPolicy::MaxPool, &frames);
        assert_eq!(merged, vec![Tag::new("cat", 0.7)]);
    }

    #[test]
    fn test_frequency_weighted_scales_by_presence() {
        let frames = frames_with_cat(&[0.3, 0.7, 0.2, 0.65, 0.1], 0.6);
        let merged = Aggregator::aggregate(AggregationPolicy::FrequencyWeighted, &frames);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].score - 0.7 * 2.0 / 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_union_of_labels() {
        let frames = vec![
            vec![Tag::new("cat", 0.8)],
            vec![Tag::new("dog", 0.9), Tag::new("cat", 0.6)],
        ];
        let merged = Aggregator::aggregate(AggregationPolicy::MaxPool, &frames);
        assert_eq!(merged, vec![Tag::new("dog", 0.9), Tag::new("cat", 0.8)]);
    }

    #[test]
    fn test_single_frame_passes_through() {
        let frame = vec![Tag::new("tree", 0.9), Tag::new("sky", 0.4)];
        for policy in [AggregationPolicy::MaxPool, AggregationPolicy::FrequencyWeighted] {
            assert_eq!(Aggregator::aggregate(policy, &[frame.clone()]), frame);
        }
    }

    #[test]
    fn test_no_frames_is_empty() {
        assert!(Aggregator::aggregate(AggregationPolicy::MaxPool, &[]).is_empty());
    }
}
