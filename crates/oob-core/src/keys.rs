//! Ephemeral keys for peer services.

use crate::KeyReference;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

/// A freshly generated key pair backing one peer service.
///
/// Each invitation built without a public DID gets its own peer key so the
/// inviter can tell connections apart by recipient key.
#[derive(Debug, Clone)]
pub struct PeerKey {
    signing_key: SigningKey,
}

impl PeerKey {
    /// Generate a new random peer key.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Get the public verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The `did:key` reference published as a recipient key.
    pub fn key_reference(&self) -> KeyReference {
        KeyReference::did_key(&self.verifying_key())
    }
}
