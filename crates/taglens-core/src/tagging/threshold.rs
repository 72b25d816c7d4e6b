//! Raw score vectors to thresholded tags.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::InferenceError;
use crate::types::Tag;

use super::vocabulary::LabelVocabulary;

/// Maps a score vector onto the vocabulary and keeps labels at or above the
/// threshold.
#[derive(Debug, Clone)]
pub struct Thresholder {
    vocabulary: Arc<LabelVocabulary>,
    threshold: f32,
}

impl Thresholder {
    pub fn new(vocabulary: Arc<LabelVocabulary>, threshold: f32) -> Self {
        Self {
            vocabulary,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    /// Tags for one score vector, highest score first.
    ///
    /// Scores are clamped to [0, 1]; NaN counts as 0. An empty result is valid.
    pub fn apply(&self, scores: &[f32]) -> Result<Vec<Tag>, InferenceError> {
        if scores.len() != self.vocabulary.len() {
            return Err(InferenceError::OutputMismatch {
                expected: self.vocabulary.len(),
                actual: scores.len(),
            });
        }

        let mut tags: Vec<Tag> = scores
            .iter()
            .zip(self.vocabulary.labels())
            .filter(|(_, label)| label.emitted)
            .map(|(&score, label)| {
                let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
                (score, label)
            })
            .filter(|(score, _)| *score >= self.threshold)
            .map(|(score, label)| Tag::new(label.name.clone(), score))
            .collect();

        sort_tags(&mut tags);
        Ok(tags)
    }
}

/// Score descending, then label ascending.
pub fn sort_tags(tags: &mut [Tag]) {
    tags.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.label.cmp(&b.label))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholder(threshold: f32) -> Thresholder {
        Thresholder::new(
            Arc::new(LabelVocabulary::from_labels(["cat", "dog", "tree"])),
            threshold,
        )
    }

    #[test]
    fn test_keeps_scores_at_or_above_threshold() {
        let tags = thresholder(0.6).apply(&[0.6, 0.59, 0.9]).unwrap();
        assert_eq!(tags, vec![Tag::new("tree", 0.9), Tag::new("cat", 0.6)]);
    }

    #[test]
    fn test_nothing_clears_threshold_is_empty_not_error() {
        let tags = thresholder(0.6).apply(&[0.55, 0.1, 0.2]).unwrap();
        assert!(tags.is_empty());
    }

    #[test]
    fn test_length_mismatch() {
        let err = thresholder(0.5).apply(&[0.9, 0.9]).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::OutputMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_out_of_range_scores_are_clamped() {
        let tags = thresholder(0.5).apply(&[1.7, f32::NAN, -0.2]).unwrap();
        assert_eq!(tags, vec![Tag::new("cat", 1.0)]);
    }

    #[test]
    fn test_raising_threshold_never_grows_tag_set() {
        let scores = [0.12, 0.47, 0.83];
        let mut previous = usize::MAX;
        for step in 0..=20 {
            let count = thresholder(step as f32 / 20.0).apply(&scores).unwrap().len();
            assert!(count <= previous);
            previous = count;
        }
    }
}
