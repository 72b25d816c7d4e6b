//! Media fingerprints: the store's idempotency key.

use blake3::Hasher as Blake3Hasher;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::config::FingerprintMode;
use crate::types::Fingerprint;

/// Computes fingerprints for media files.
pub struct Fingerprinter;

impl Fingerprinter {
    /// Fingerprint a file with the given strategy.
    pub fn fingerprint(path: &Path, mode: FingerprintMode) -> std::io::Result<Fingerprint> {
        match mode {
            FingerprintMode::Content => Self::content_hash(path).map(Fingerprint::new),
            FingerprintMode::Metadata => Self::metadata_fingerprint(path),
        }
    }

    /// Generate a BLAKE3 hash of file contents.
    ///
    /// Streams the file so large videos are never held in memory.
    pub fn content_hash(path: &Path) -> std::io::Result<String> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Blake3Hasher::new();

        let mut buffer = [0u8; 65536];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize().to_hex().to_string())
    }

    /// Generate a BLAKE3 hash from an in-memory byte buffer.
    pub fn content_hash_from_bytes(data: &[u8]) -> String {
        let mut hasher = Blake3Hasher::new();
        hasher.update(data);
        hasher.finalize().to_hex().to_string()
    }

    /// Fingerprint from modification time and size, without reading contents.
    ///
    /// Prefixed with `m:` so it can never collide with a content hash.
    pub fn metadata_fingerprint(path: &Path) -> std::io::Result<Fingerprint> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(Fingerprint::new(format!("m:{}-{}", mtime, meta.len())))
    }
}
