//! Label vocabulary loading.
//!
//! The model's score vector is indexed positionally by this vocabulary. Labels
//! come from a tagger's `selected_tags.csv` (`tag_id,name,category,count`) or a
//! plain text file with one label per line.

use std::path::Path;

use serde::Deserialize;

use crate::error::InferenceError;

/// Labels kept verbatim when normalizing underscores to spaces.
#[rustfmt::skip]
const UNDERSCORE_LABELS: [&str; 19] = [
    ">_<", ">_o", "0_0", "o_o", "3_3", "6_9", "@_@", "u_u", "x_x", "^_^",
    "|_|", "=_=", "+_+", "+_-", "._.", "<o>_<o>", "<|>_<|>", "||_||", "(o)_(o)",
];

/// Category of a label, from the tagger's CSV codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelCategory {
    General,
    Artist,
    Copyright,
    Character,
    Meta,
    Rating,
    Other(u32),
}

impl LabelCategory {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => LabelCategory::General,
            1 => LabelCategory::Artist,
            3 => LabelCategory::Copyright,
            4 => LabelCategory::Character,
            5 => LabelCategory::Meta,
            9 => LabelCategory::Rating,
            other => LabelCategory::Other(other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LabelCategory::General => "general",
            LabelCategory::Artist => "artist",
            LabelCategory::Copyright => "copyright",
            LabelCategory::Character => "character",
            LabelCategory::Meta => "meta",
            LabelCategory::Rating => "rating",
            LabelCategory::Other(_) => "other",
        }
    }
}

/// One vocabulary entry.
#[derive(Debug, Clone)]
pub struct Label {
    /// Display name (normalized if enabled)
    pub name: String,
    pub category: LabelCategory,
    /// False for labels in an excluded category
    pub emitted: bool,
}

#[derive(Deserialize)]
struct CsvRow {
    name: String,
    #[serde(default)]
    category: u32,
}

/// Fixed, ordered list of labels a model's output corresponds to.
#[derive(Debug, Clone)]
pub struct LabelVocabulary {
    labels: Vec<Label>,
}

impl LabelVocabulary {
    /// Load from disk. `.csv` files are read as tagger label files, anything
    /// else as one label per line.
    pub fn load(path: &Path, normalize: bool, exclude: &[String]) -> Result<Self, InferenceError> {
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));

        let raw = if is_csv {
            Self::read_csv(path)?
        } else {
            Self::read_lines(path)?
        };

        let labels: Vec<Label> = raw
            .into_iter()
            .map(|(name, category)| Label {
                name: if normalize { normalize_label(&name) } else { name },
                emitted: !exclude
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(category.as_str())),
                category,
            })
            .collect();

        if labels.is_empty() {
            return Err(InferenceError::Model {
                path: path.to_path_buf(),
                message: "label file is empty".to_string(),
            });
        }

        let excluded = labels.iter().filter(|l| !l.emitted).count();
        tracing::info!(
            "Loaded {} labels from {:?} ({} excluded by category)",
            labels.len(),
            path,
            excluded
        );

        Ok(Self { labels })
    }

    /// Build from label names, all in the general category.
    pub fn from_labels<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: names
                .into_iter()
                .map(|name| Label {
                    name: name.into(),
                    category: LabelCategory::General,
                    emitted: true,
                })
                .collect(),
        }
    }

    fn read_csv(path: &Path) -> Result<Vec<(String, LabelCategory)>, InferenceError> {
        let model_err = |message: String| InferenceError::Model {
            path: path.to_path_buf(),
            message,
        };

        let mut reader = csv::Reader::from_path(path).map_err(|e| model_err(e.to_string()))?;
        let mut out = Vec::new();
        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row.map_err(|e| model_err(format!("row {}: {}", line + 1, e)))?;
            out.push((row.name, LabelCategory::from_code(row.category)));
        }
        Ok(out)
    }

    fn read_lines(path: &Path) -> Result<Vec<(String, LabelCategory)>, InferenceError> {
        let content = std::fs::read_to_string(path).map_err(|e| InferenceError::Model {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| (l.to_string(), LabelCategory::General))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Label> {
        self.labels.get(index)
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }
}

/// Replace underscores with spaces, except in emoticon labels.
pub fn normalize_label(label: &str) -> String {
    if UNDERSCORE_LABELS.contains(&label) {
        label.to_string()
    } else {
        label.replace('_', " ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "tag_id,name,category,count\n\
        9999999,general,9,807361\n\
        2851,long_hair,0,4350743\n\
        212816,^_^,0,31442\n\
        1291,hatsune_miku,4,137112\n";

    #[test]
    fn test_load_csv_with_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selected_tags.csv");
        std::fs::write(&path, CSV).unwrap();

        let vocab = LabelVocabulary::load(&path, true, &[]).unwrap();
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.get(1).unwrap().name, "long hair");
        assert_eq!(vocab.get(2).unwrap().name, "^_^");
        assert_eq!(vocab.get(3).unwrap().category, LabelCategory::Character);
    }

    #[test]
    fn test_excluded_categories_are_not_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selected_tags.csv");
        std::fs::write(&path, CSV).unwrap();

        let vocab = LabelVocabulary::load(&path, false, &["Rating".to_string()]).unwrap();
        assert!(!vocab.get(0).unwrap().emitted);
        assert!(vocab.get(1).unwrap().emitted);
        assert_eq!(vocab.get(1).unwrap().name, "long_hair");
    }

    #[test]
    fn test_load_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        std::fs::write(&path, "# comment\ncat\n\ndog\n").unwrap();

        let vocab = LabelVocabulary::load(&path, true, &[]).unwrap();
        let names: Vec<_> = vocab.labels().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["cat", "dog"]);
    }

    #[test]
    fn test_empty_label_file_is_model_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        std::fs::write(&path, "\n").unwrap();
        let err = LabelVocabulary::load(&path, true, &[]).unwrap_err();
        assert!(matches!(err, InferenceError::Model { .. }));
    }

    #[test]
    fn test_missing_file_is_model_error() {
        let err = LabelVocabulary::load(Path::new("/nope/selected_tags.csv"), true, &[]).unwrap_err();
        assert!(matches!(err, InferenceError::Model { .. }));
    }
}
