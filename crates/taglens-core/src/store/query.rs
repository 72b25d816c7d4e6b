//! Lazy, paged reads of tag rows.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{Fingerprint, TagResult};

const DEFAULT_PAGE_SIZE: usize = 512;

/// Which tag rows a query returns. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagFilter {
    pub model_identity: Option<String>,
    pub label: Option<String>,
    pub min_score: Option<f32>,
    pub fingerprint: Option<Fingerprint>,
}

impl TagFilter {
    pub fn model(mut self, identity: impl Into<String>) -> Self {
        self.model_identity = Some(identity.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn min_score(mut self, score: f32) -> Self {
        self.min_score = Some(score);
        self
    }

    pub fn fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}

type Cursor = (String, String, String);

/// Iterator over matching rows ordered by (fingerprint, label, model).
///
/// Owns its own read connection and fetches one page at a time, resuming
/// after the last key it returned. Rows committed after the query started may
/// or may not be seen; partially written media items never are.
pub struct TagQuery {
    conn: Connection,
    filter: TagFilter,
    page_size: usize,
    cursor: Option<Cursor>,
    buffer: VecDeque<TagResult>,
    exhausted: bool,
}

impl TagQuery {
    pub(crate) fn new(conn: Connection, filter: TagFilter) -> Self {
        Self {
            conn,
            filter,
            page_size: DEFAULT_PAGE_SIZE,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn fetch_page(&mut self) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT media_fingerprint, label, score, model_identity, tagged_at
             FROM tags
             WHERE (?1 IS NULL OR model_identity = ?1)
               AND (?2 IS NULL OR label = ?2)
               AND (?3 IS NULL OR score >= ?3)
               AND (?4 IS NULL OR media_fingerprint = ?4)
               AND (?5 IS NULL OR (media_fingerprint, label, model_identity) > (?5, ?6, ?7))
             ORDER BY media_fingerprint, label, model_identity
             LIMIT ?8",
        )?;

        let (after_fp, after_label, after_model) = match &self.cursor {
            Some((fp, label, model)) => (Some(fp.as_str()), Some(label.as_str()), Some(model.as_str())),
            None => (None, None, None),
        };

        let rows = stmt.query_map(
            params![
                self.filter.model_identity,
                self.filter.label,
                self.filter.min_score.map(f64::from),
                self.filter.fingerprint.as_ref().map(Fingerprint::as_str),
                after_fp,
                after_label,
                after_model,
                self.page_size as i64,
            ],
            row_to_result,
        )?;

        let mut fetched = 0;
        for row in rows {
            self.buffer.push_back(row?);
            fetched += 1;
        }

        if let Some(last) = self.buffer.back() {
            self.cursor = Some((
                last.media_fingerprint.as_str().to_string(),
                last.label.clone(),
                last.model_identity.clone(),
            ));
        }
        if fetched < self.page_size {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for TagQuery {
    type Item = Result<TagResult, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn row_to_result(row: &Row<'_>) -> rusqlite::Result<TagResult> {
    let tagged_at: String = row.get(4)?;
    let tagged_at = parse_timestamp(&tagged_at).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(TagResult {
        media_fingerprint: Fingerprint::new(row.get::<_, String>(0)?),
        label: row.get(1)?,
        score: row.get::<_, f64>(2)? as f32,
        model_identity: row.get(3)?,
        tagged_at,
    })
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}
