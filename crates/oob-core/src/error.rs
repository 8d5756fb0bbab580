//! Error types for oob-core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid DID: {0}")]
    InvalidDid(String),

    #[error("Invalid key reference: {0}")]
    InvalidKey(String),

    #[error("Invalid base58 encoding: {0}")]
    Base58(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
