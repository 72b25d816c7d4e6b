//! Persistent tag results in SQLite.
//!
//! One `media` row per (fingerprint, model) records that an item was
//! processed, even when it produced no tags. `tags` holds one row per label
//! that cleared the threshold. Writes go through a single writer connection
//! and each media item is replaced inside one transaction, so readers see
//! either the previous tag set or the new one, never a mix.

mod query;
mod schema;

pub use query::{TagFilter, TagQuery};

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use serde::Serialize;

use crate::error::StoreError;
use crate::types::{Fingerprint, MediaDescriptor, Tag};

/// Per-model totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStats {
    pub model_identity: String,
    pub media: u64,
    pub tags: u64,
}

/// SQLite-backed result store.
pub struct TagStore {
    path: PathBuf,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl TagStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Open {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
            }
        }

        let writer = Connection::open(path).map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        schema::configure(&writer)?;
        schema::migrate(&writer)?;

        let reader = Self::open_reader(path)?;
        tracing::debug!("Opened tag store at {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    /// Open an existing store for reading only.
    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::Open {
                path: path.to_path_buf(),
                message: "store does not exist".to_string(),
            });
        }
        let reader = Self::open_reader(path)?;
        let writer = Self::open_reader(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn open_reader(path: &Path) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        schema::configure(&conn)?;
        conn.pragma_update(None, "query_only", "ON")?;
        Ok(conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A poisoned lock fails this attempt only. The panicking holder's
    /// transaction was rolled back when it unwound, so the next caller gets
    /// a clean connection.
    fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
        conn.lock().map_err(|_| {
            conn.clear_poison();
            StoreError::Poisoned
        })
    }

    /// Poison the writer lock the way a panicking commit would.
    #[cfg(test)]
    pub(crate) fn poison_writer(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.writer.lock();
            panic!("writer panicked mid-commit");
        }));
    }

    /// Replace the tag set of one media item for one model, atomically.
    ///
    /// An empty `tags` slice is recorded as a processed item with no tags.
    pub fn upsert(
        &self,
        media: &MediaDescriptor,
        model_identity: &str,
        tags: &[Tag],
        tagged_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if media.fingerprint.as_str().is_empty() || model_identity.is_empty() {
            return Err(StoreError::Orphan {
                fingerprint: media.fingerprint.to_string(),
            });
        }

        let stamp = tagged_at.to_rfc3339();
        let fingerprint = media.fingerprint.as_str();
        let mut conn = Self::lock(&self.writer)?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM tags WHERE media_fingerprint = ?1 AND model_identity = ?2",
            params![fingerprint, model_identity],
        )?;
        tx.execute(
            "INSERT INTO media (fingerprint, model_identity, path, kind, size, tag_count, tagged_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (fingerprint, model_identity) DO UPDATE SET
                path = excluded.path,
                kind = excluded.kind,
                size = excluded.size,
                tag_count = excluded.tag_count,
                tagged_at = excluded.tagged_at",
            params![
                fingerprint,
                model_identity,
                media.path.to_string_lossy().into_owned(),
                media.kind.as_str(),
                media.size as i64,
                tags.len() as i64,
                stamp,
            ],
        )?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO tags (media_fingerprint, label, score, model_identity, tagged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (media_fingerprint, label, model_identity)
                 DO UPDATE SET score = max(score, excluded.score)",
            )?;
            for tag in tags {
                insert
                    .execute(params![
                        fingerprint,
                        tag.label,
                        tag.score.clamp(0.0, 1.0) as f64,
                        model_identity,
                        stamp,
                    ])
                    .map_err(|e| match e.sqlite_error_code() {
                        Some(ErrorCode::ConstraintViolation) if is_foreign_key(&e) => {
                            StoreError::Orphan {
                                fingerprint: fingerprint.to_string(),
                            }
                        }
                        _ => StoreError::Sqlite(e),
                    })?;
            }
        }
        tx.commit()?;

        tracing::trace!(
            "Committed {} tags for {:?} ({})",
            tags.len(),
            media.path,
            model_identity
        );
        Ok(())
    }

    /// Whether a committed result exists for this media and model.
    pub fn has_result(&self, fingerprint: &Fingerprint, model_identity: &str) -> Result<bool, StoreError> {
        let conn = Self::lock(&self.reader)?;
        let found = conn
            .query_row(
                "SELECT 1 FROM media WHERE fingerprint = ?1 AND model_identity = ?2",
                params![fingerprint.as_str(), model_identity],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Lazily iterate tag rows matching `filter`.
    pub fn query(&self, filter: TagFilter) -> Result<TagQuery, StoreError> {
        Ok(TagQuery::new(Self::open_reader(&self.path)?, filter))
    }

    /// Media and tag counts per model.
    pub fn stats(&self) -> Result<Vec<ModelStats>, StoreError> {
        let conn = Self::lock(&self.reader)?;
        let mut stmt = conn.prepare(
            "SELECT m.model_identity, COUNT(*), COALESCE(SUM(m.tag_count), 0)
             FROM media m
             GROUP BY m.model_identity
             ORDER BY m.model_identity",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ModelStats {
                model_identity: row.get(0)?,
                media: row.get::<_, i64>(1)? as u64,
                tags: row.get::<_, i64>(2)? as u64,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn is_foreign_key(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaKind;

    fn media(fp: &str) -> MediaDescriptor {
        MediaDescriptor {
            path: PathBuf::from(format!("/photos/{fp}.jpg")),
            kind: MediaKind::Image,
            fingerprint: Fingerprint::new(fp),
            size: 42,
        }
    }

    fn open() -> (tempfile::TempDir, TagStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TagStore::open(&dir.path().join("tags.db")).unwrap();
        (dir, store)
    }

    fn all(store: &TagStore, filter: TagFilter) -> Vec<crate::types::TagResult> {
        store
            .query(filter)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_upsert_then_has_result() {
        let (_dir, store) = open();
        let m = media("a");
        assert!(!store.has_result(&m.fingerprint, "wd").unwrap());
        store
            .upsert(&m, "wd", &[Tag::new("cat", 0.9)], Utc::now())
            .unwrap();
        assert!(store.has_result(&m.fingerprint, "wd").unwrap());
        assert!(!store.has_result(&m.fingerprint, "other-model").unwrap());
    }

    #[test]
    fn test_poisoned_writer_fails_once_then_recovers() {
        let (_dir, store) = open();
        store.poison_writer();
        let m = media("after-panic");
        let first = store.upsert(&m, "wd", &[Tag::new("cat", 0.9)], Utc::now());
        assert!(matches!(first, Err(StoreError::Poisoned)));
        store
            .upsert(&m, "wd", &[Tag::new("cat", 0.9)], Utc::now())
            .unwrap();
        assert!(store.has_result(&m.fingerprint, "wd").unwrap());
    }

    #[test]
    fn test_empty_tag_set_is_recorded() {
        let (_dir, store) = open();
        let m = media("empty");
        store.upsert(&m, "wd", &[], Utc::now()).unwrap();
        assert!(store.has_result(&m.fingerprint, "wd").unwrap());
        assert!(all(&store, TagFilter::default()).is_empty());
        assert_eq!(store.stats().unwrap()[0].media, 1);
    }

    #[test]
    fn test_retag_replaces_instead_of_duplicating() {
        let (_dir, store) = open();
        let m = media("a");
        store
            .upsert(&m, "wd", &[Tag::new("cat", 0.9), Tag::new("dog", 0.7)], Utc::now())
            .unwrap();
        store
            .upsert(&m, "wd", &[Tag::new("cat", 0.8)], Utc::now())
            .unwrap();

        let rows = all(&store, TagFilter::default());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "cat");
        assert!((rows[0].score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_query_filters_and_pages() {
        let (_dir, store) = open();
        for i in 0..30 {
            let tags = vec![Tag::new("cat", i as f32 / 30.0), Tag::new("dog", 0.5)];
            store
                .upsert(&media(&format!("m{i:02}")), "wd", &tags, Utc::now())
                .unwrap();
        }
        store
            .upsert(&media("x"), "siglip", &[Tag::new("cat", 0.99)], Utc::now())
            .unwrap();

        let paged: Vec<_> = store
            .query(TagFilter::default().model("wd"))
            .unwrap()
            .with_page_size(7)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(paged.len(), 60);
        assert!(paged
            .windows(2)
            .all(|w| (w[0].media_fingerprint.as_str(), w[0].label.as_str())
                < (w[1].media_fingerprint.as_str(), w[1].label.as_str())));

        let strong_cats = all(&store, TagFilter::default().label("cat").min_score(0.9));
        // m27..m29 from wd, x from siglip
        assert_eq!(strong_cats.len(), 4);

        let one = all(&store, TagFilter::default().fingerprint(Fingerprint::new("x")));
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].model_identity, "siglip");
    }

    #[test]
    fn test_stats_per_model() {
        let (_dir, store) = open();
        store
            .upsert(&media("a"), "wd", &[Tag::new("cat", 0.9), Tag::new("dog", 0.6)], Utc::now())
            .unwrap();
        store.upsert(&media("b"), "wd", &[], Utc::now()).unwrap();
        store
            .upsert(&media("a"), "siglip", &[Tag::new("cat", 0.4)], Utc::now())
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(
            stats,
            vec![
                ModelStats {
                    model_identity: "siglip".into(),
                    media: 1,
                    tags: 1
                },
                ModelStats {
                    model_identity: "wd".into(),
                    media: 2,
                    tags: 2
                },
            ]
        );
    }

    #[test]
    fn test_orphan_rejected() {
        let (_dir, store) = open();
        let err = store
            .upsert(&media(""), "wd", &[Tag::new("cat", 0.9)], Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Orphan { .. }));
    }

    #[test]
    fn test_reopen_keeps_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/tags.db");
        {
            let store = TagStore::open(&path).unwrap();
            store
                .upsert(&media("a"), "wd", &[Tag::new("cat", 0.9)], Utc::now())
                .unwrap();
        }
        let store = TagStore::open_read_only(&path).unwrap();
        assert!(store.has_result(&Fingerprint::new("a"), "wd").unwrap());
    }
}
