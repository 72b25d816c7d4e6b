//! Retry utilities for transient store failures.
//!
//! Provides classification of retryable errors and exponential backoff.

use std::time::Duration;

use rusqlite::ErrorCode;

use crate::error::StoreError;

/// Determine whether a store error is worth retrying.
///
/// Retryable: busy/locked database, I/O and full-disk conditions, and a
/// poisoned lock (cleared for the next attempt).
/// Non-retryable: orphan results and constraint or schema errors.
pub fn is_retryable(error: &StoreError) -> bool {
    match error {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
            e.code,
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::OperationInterrupted
        ),
        StoreError::Sqlite(_) => false,
        StoreError::Open { .. } => true,
        StoreError::Poisoned => true,
        StoreError::Orphan { .. } => false,
    }
}

/// Calculate exponential backoff duration for a given attempt.
///
/// Uses `base_delay * 2^attempt` with a cap at 30 seconds.
pub fn backoff_duration(attempt: u32, base_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(30_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_error(code: std::os::raw::c_int) -> StoreError {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[test]
    fn test_busy_is_retryable() {
        assert!(is_retryable(&sqlite_error(rusqlite::ffi::SQLITE_BUSY)));
        assert!(is_retryable(&sqlite_error(rusqlite::ffi::SQLITE_LOCKED)));
    }

    #[test]
    fn test_constraint_not_retryable() {
        assert!(!is_retryable(&sqlite_error(rusqlite::ffi::SQLITE_CONSTRAINT)));
    }

    #[test]
    fn test_orphan_not_retryable() {
        let err = StoreError::Orphan {
            fingerprint: "abc".into(),
        };
        assert!(!is_retryable(&err));
    }

    #[test]
    fn test_backoff_exponential() {
        assert_eq!(backoff_duration(0, 1000), Duration::from_millis(1000));
        assert_eq!(backoff_duration(1, 1000), Duration::from_millis(2000));
        assert_eq!(backoff_duration(2, 1000), Duration::from_millis(4000));
        assert_eq!(backoff_duration(3, 1000), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_capped_at_30s() {
        assert_eq!(backoff_duration(10, 1000), Duration::from_millis(30_000));
        assert_eq!(backoff_duration(20, 1000), Duration::from_millis(30_000));
    }

    #[test]
    fn test_backoff_small_base() {
        assert_eq!(backoff_duration(0, 100), Duration::from_millis(100));
        assert_eq!(backoff_duration(3, 100), Duration::from_millis(800));
    }
}
