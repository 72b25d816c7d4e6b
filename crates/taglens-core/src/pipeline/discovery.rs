//! Media discovery: walks input roots and yields media descriptors lazily.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::config::{FingerprintMode, RunConfig};
use crate::types::{ItemOutcome, MediaDescriptor, MediaKind};

use super::hash::Fingerprinter;
use super::signature::{read_header, sniff};

/// One step of a walk: a media item, or a file that had to be skipped.
pub type Located = Result<MediaDescriptor, ItemOutcome>;

/// A file recognized as media by its signature, not yet fingerprinted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub size: u64,
}

impl Candidate {
    /// Fingerprint the file into a descriptor. Blocking; in content mode
    /// this reads the whole file.
    pub fn describe(self, mode: FingerprintMode) -> Located {
        match Fingerprinter::fingerprint(&self.path, mode) {
            Ok(fingerprint) => Ok(MediaDescriptor {
                path: self.path,
                kind: self.kind,
                fingerprint,
                size: self.size,
            }),
            Err(e) => Err(ItemOutcome::new(&self.path, format!("fingerprint failed: {e}"))),
        }
    }
}

/// Discovers images and videos under the configured roots.
pub struct MediaLocator {
    config: Arc<RunConfig>,
}

impl MediaLocator {
    /// Create a new locator for a run.
    pub fn new(config: Arc<RunConfig>) -> Self {
        Self { config }
    }

    /// Start a fresh walk over every root.
    ///
    /// Each call re-walks from the beginning; over an unchanged tree every walk
    /// yields the same descriptors in the same order.
    pub fn walk(&self) -> MediaWalk {
        MediaWalk {
            config: Arc::clone(&self.config),
            roots: self.config.roots.iter().cloned().collect(),
            current: None,
            skipped: 0,
        }
    }
}

/// Lazy, finite iterator over the media under a set of roots.
///
/// Roots are visited in the order given; within a root, entries are visited
/// depth-first in file-name order. Iterating fingerprints each file on the
/// calling thread; [`MediaWalk::candidates`] leaves that to the caller.
pub struct MediaWalk {
    config: Arc<RunConfig>,
    roots: VecDeque<PathBuf>,
    current: Option<walkdir::IntoIter>,
    skipped: usize,
}

impl MediaWalk {
    /// Number of files skipped so far in this walk.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Yield classified files without fingerprinting them.
    pub fn candidates(self) -> Candidates {
        Candidates { walk: self }
    }

    fn next_candidate(&mut self) -> Option<Result<Candidate, ItemOutcome>> {
        loop {
            let entry = match self.next_entry()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    tracing::warn!("Skipping unreadable entry {:?}: {}", path, e);
                    self.skipped += 1;
                    return Some(Err(ItemOutcome::new(path, format!("unreadable: {e}"))));
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            match self.classify(entry.path(), size) {
                Some(Ok(candidate)) => {
                    tracing::trace!("Located {:?} ({})", candidate.path, candidate.kind);
                    return Some(Ok(candidate));
                }
                Some(Err(skip)) => {
                    tracing::warn!("Skipping {:?}: {}", skip.path, skip.reason);
                    self.skipped += 1;
                    return Some(Err(skip));
                }
                None => continue,
            }
        }
    }

    fn next_entry(&mut self) -> Option<walkdir::Result<walkdir::DirEntry>> {
        loop {
            if let Some(iter) = self.current.as_mut() {
                if let Some(entry) = iter.next() {
                    return Some(entry);
                }
                self.current = None;
            }
            let root = self.roots.pop_front()?;
            tracing::debug!("Walking root {:?}", root);
            self.current = Some(
                WalkDir::new(root)
                    .follow_links(true)
                    .sort_by_file_name()
                    .into_iter(),
            );
        }
    }

    fn has_media_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.config.is_image_extension(ext) || self.config.is_video_extension(ext))
            .unwrap_or(false)
    }

    /// Classify one file. `None` means "not media, ignore silently".
    fn classify(&self, path: &Path, size: u64) -> Option<Result<Candidate, ItemOutcome>> {
        let header = match read_header(path) {
            Ok(header) => header,
            Err(e) if self.has_media_extension(path) => {
                return Some(Err(ItemOutcome::new(path, format!("unreadable: {e}"))));
            }
            Err(_) => return None,
        };

        let Some(kind) = sniff(&header) else {
            if self.has_media_extension(path) {
                return Some(Err(ItemOutcome::new(
                    path,
                    "unsupported format (unrecognized file signature)",
                )));
            }
            return None;
        };

        Some(Ok(Candidate {
            path: path.to_path_buf(),
            kind,
            size,
        }))
    }
}

impl Iterator for MediaWalk {
    type Item = Located;

    fn next(&mut self) -> Option<Self::Item> {
        let candidate = match self.next_candidate()? {
            Ok(candidate) => candidate,
            Err(skip) => return Some(Err(skip)),
        };
        match candidate.describe(self.config.fingerprint) {
            Ok(descriptor) => Some(Ok(descriptor)),
            Err(skip) => {
                tracing::warn!("Skipping {:?}: {}", skip.path, skip.reason);
                self.skipped += 1;
                Some(Err(skip))
            }
        }
    }
}

/// Classified files from a [`MediaWalk`], in walk order, unfingerprinted.
pub struct Candidates {
    walk: MediaWalk,
}

impl Candidates {
    pub fn skipped(&self) -> usize {
        self.walk.skipped
    }
}

impl Iterator for Candidates {
    type Item = Result<Candidate, ItemOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        self.walk.next_candidate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::MediaKind;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const MKV_HEADER: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

    fn locator(root: &Path) -> MediaLocator {
        let config = RunConfig::from_config(&Config::default(), vec![root.to_path_buf()], false)
            .unwrap();
        MediaLocator::new(Arc::new(config))
    }

    fn write(path: &Path, bytes: &[u8]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_walk_is_sorted_and_classified_by_signature() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("b.png"), &PNG_HEADER);
        write(&dir.path().join("a/clip.bin"), &MKV_HEADER);
        // A PNG renamed to .mp4 is still an image.
        write(&dir.path().join("c.mp4"), &PNG_HEADER);

        let found: Vec<MediaDescriptor> = locator(dir.path()).walk().filter_map(Result::ok).collect();
        let names: Vec<_> = found
            .iter()
            .map(|d| d.path.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a/clip.bin"),
                PathBuf::from("b.png"),
                PathBuf::from("c.mp4")
            ]
        );
        assert_eq!(found[0].kind, MediaKind::Video);
        assert_eq!(found[1].kind, MediaKind::Image);
        assert_eq!(found[2].kind, MediaKind::Image);
    }

    #[test]
    fn test_unrecognized_media_extension_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("broken.jpg"), b"definitely not a jpeg");
        write(&dir.path().join("notes.txt"), b"ignored entirely");
        write(&dir.path().join("ok.png"), &PNG_HEADER);

        let mut walk = locator(dir.path()).walk();
        let items: Vec<Located> = walk.by_ref().collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_err());
        assert!(items[0].as_ref().unwrap_err().reason.contains("signature"));
        assert!(items[1].is_ok());
        assert_eq!(walk.skipped(), 1);
    }

    #[test]
    fn test_walk_is_restartable_and_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["z.png", "m.png", "a.png"] {
            write(&dir.path().join(name), &PNG_HEADER);
        }
        let loc = locator(dir.path());
        let first: Vec<_> = loc.walk().filter_map(Result::ok).collect();
        let second: Vec<_> = loc.walk().filter_map(Result::ok).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_candidates_match_walk_before_fingerprinting() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.png"), &PNG_HEADER);
        write(&dir.path().join("b.mkv"), &MKV_HEADER);

        let loc = locator(dir.path());
        let candidates: Vec<Candidate> = loc.walk().candidates().filter_map(Result::ok).collect();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].kind, MediaKind::Video);

        let described: Vec<MediaDescriptor> = candidates
            .into_iter()
            .map(|c| c.describe(FingerprintMode::Content).unwrap())
            .collect();
        let walked: Vec<MediaDescriptor> = loc.walk().filter_map(Result::ok).collect();
        assert_eq!(described, walked);
    }

    #[test]
    fn test_describe_missing_file_is_skip() {
        let candidate = Candidate {
            path: PathBuf::from("/no/such/clip.mp4"),
            kind: MediaKind::Video,
            size: 0,
        };
        let skip = candidate.describe(FingerprintMode::Content).unwrap_err();
        assert!(skip.reason.starts_with("fingerprint failed"));
    }

    #[test]
    fn test_single_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("only.png");
        write(&file, &PNG_HEADER);
        let found: Vec<_> = locator(&file).walk().filter_map(Result::ok).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, file);
        assert_eq!(found[0].size, PNG_HEADER.len() as u64);
    }
}
