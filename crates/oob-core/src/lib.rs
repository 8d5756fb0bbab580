//! # oob-core
//!
//! Identity primitives shared by out-of-band invitations.
//!
//! This crate provides:
//! - DID reference syntax checks
//! - `did:key` and raw base58 key references
//! - Ephemeral Ed25519 peer keys
//! - JCS canonicalization and SHA-256 digests

pub mod did;
pub mod digest;
pub mod error;
pub mod keys;

pub use did::{DidReference, KeyReference};
pub use error::Error;
pub use keys::PeerKey;

/// Result type for oob-core operations.
pub type Result<T> = std::result::Result<T, Error>;
