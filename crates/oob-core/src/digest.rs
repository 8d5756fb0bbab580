//! JCS canonicalization and SHA-256 digests.
//!
//! Attachment integrity digests are computed over the canonical (RFC 8785)
//! form of JSON content, so two agents that reorder object keys still agree.

use crate::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Canonicalize a value using JCS (RFC 8785).
pub fn canonicalize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_jcs::to_vec(value)?)
}

/// Hex-encoded SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex-encoded SHA-256 of the canonical JSON form of a value.
pub fn json_sha256<T: Serialize>(value: &T) -> Result<String> {
    Ok(sha256_hex(&canonicalize(value)?))
}
