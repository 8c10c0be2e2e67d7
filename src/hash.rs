//! Content hashing for duplicate detection.
//!
//! The hash is the document's identity for idempotency: byte-identical files
//! hash identically regardless of filename or upload time, so re-uploads are
//! recognised even after a rename. SHA-256 over the raw bytes, hex-encoded,
//! so the value is stable, printable, and safe inside storage keys and log
//! lines.

use sha2::{Digest, Sha256};

/// Compute the content hash of an uploaded file's bytes.
///
/// Deterministic: the same bytes always produce the same string, and any
/// single-byte change produces a different one.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}
