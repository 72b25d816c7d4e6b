//! Store schema and connection setup.

use std::time::Duration;

use rusqlite::Connection;

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS media (
    fingerprint     TEXT NOT NULL,
    model_identity  TEXT NOT NULL,
    path            TEXT NOT NULL,
    kind            TEXT NOT NULL,
    size            INTEGER NOT NULL,
    tag_count       INTEGER NOT NULL,
    tagged_at       TEXT NOT NULL,
    PRIMARY KEY (fingerprint, model_identity)
);

CREATE TABLE IF NOT EXISTS tags (
    media_fingerprint TEXT NOT NULL,
    label             TEXT NOT NULL,
    score             REAL NOT NULL CHECK (score >= 0.0 AND score <= 1.0),
    model_identity    TEXT NOT NULL,
    tagged_at         TEXT NOT NULL,
    PRIMARY KEY (media_fingerprint, label, model_identity),
    FOREIGN KEY (media_fingerprint, model_identity)
        REFERENCES media (fingerprint, model_identity) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tags_label ON tags (label, model_identity);
";

/// Apply per-connection settings.
pub fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Create tables on a fresh store and switch it to WAL.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        tracing::warn!("Store journal mode is {}, not WAL", mode);
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        tracing::debug!("Migrating store schema {} -> {}", version, SCHEMA_VERSION);
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}
