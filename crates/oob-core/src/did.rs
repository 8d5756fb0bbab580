//! DID and key references.
//!
//! Invitations name services by DID and list recipient/routing keys either as
//! `did:key` references or as bare base58 Ed25519 keys. Only syntax is checked
//! here; resolving a DID to a document is a resolver's job.

use crate::{Error, Result};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Multicodec prefix of an Ed25519 public key (varint `0xed`).
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// A syntactically valid DID, optionally with a fragment.
///
/// Format: `did:<method>:<method-specific-id>[#fragment]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DidReference {
    method: String,
    method_id: String,
    fragment: Option<String>,
}

impl DidReference {
    /// The DID method, e.g. `sov` or `peer`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The method-specific identifier.
    pub fn method_id(&self) -> &str {
        &self.method_id
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }
}

impl fmt::Display for DidReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "did:{}:{}", self.method, self.method_id)?;
        if let Some(fragment) = &self.fragment {
            write!(f, "#{fragment}")?;
        }
        Ok(())
    }
}

impl FromStr for DidReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("did:")
            .ok_or_else(|| Error::InvalidDid("must start with 'did:'".into()))?;

        let (rest, fragment) = match rest.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment)),
            None => (rest, None),
        };

        let (method, method_id) = rest
            .split_once(':')
            .ok_or_else(|| Error::InvalidDid("missing method-specific id".into()))?;

        if method.is_empty()
            || !method
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(Error::InvalidDid(format!("invalid method '{method}'")));
        }

        if method_id.is_empty() || method_id.ends_with(':') || !method_id.chars().all(is_id_char)
        {
            return Err(Error::InvalidDid(format!(
                "invalid method-specific id '{method_id}'"
            )));
        }

        if let Some(fragment) = fragment
            && (fragment.is_empty() || !fragment.chars().all(is_id_char))
        {
            return Err(Error::InvalidDid(format!("invalid fragment '{fragment}'")));
        }

        Ok(Self {
            method: method.to_string(),
            method_id: method_id.to_string(),
            fragment: fragment.map(str::to_string),
        })
    }
}

impl TryFrom<String> for DidReference {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DidReference> for String {
    fn from(did: DidReference) -> Self {
        did.to_string()
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '%' | '-')
}

/// A recipient or routing key named in a service block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyReference {
    /// `did:key:z6Mk…` with an optional fragment.
    DidKey {
        key: [u8; 32],
        fragment: Option<String>,
    },
    /// Bare base58 Ed25519 verification key, as older agents publish them.
    Raw([u8; 32]),
}

impl KeyReference {
    /// Reference a verification key as `did:key:<mb>#<mb>`.
    pub fn did_key(public_key: &VerifyingKey) -> Self {
        let key = public_key.to_bytes();
        Self::DidKey {
            key,
            fragment: Some(multibase(&key)),
        }
    }

    /// Get the public key bytes.
    pub fn public_key_bytes(&self) -> &[u8; 32] {
        match self {
            Self::DidKey { key, .. } | Self::Raw(key) => key,
        }
    }

    /// Get the public key.
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(self.public_key_bytes())
            .map_err(|e| Error::InvalidKey(e.to_string()))
    }
}

fn multibase(key: &[u8; 32]) -> String {
    let mut prefixed = Vec::with_capacity(ED25519_MULTICODEC.len() + key.len());
    prefixed.extend_from_slice(&ED25519_MULTICODEC);
    prefixed.extend_from_slice(key);
    format!("z{}", bs58::encode(prefixed).into_string())
}

fn key_bytes(bytes: &[u8]) -> Result<[u8; 32]> {
    let key: [u8; 32] = bytes.try_into().map_err(|_| {
        Error::InvalidKey(format!("public key must be 32 bytes, got {}", bytes.len()))
    })?;
    VerifyingKey::from_bytes(&key).map_err(|e| Error::InvalidKey(e.to_string()))?;
    Ok(key)
}

impl fmt::Display for KeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DidKey { key, fragment } => {
                write!(f, "did:key:{}", multibase(key))?;
                if let Some(fragment) = fragment {
                    write!(f, "#{fragment}")?;
                }
                Ok(())
            }
            Self::Raw(key) => f.write_str(&bs58::encode(key).into_string()),
        }
    }
}

impl FromStr for KeyReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("did:key:") {
            let (encoded, fragment) = match rest.split_once('#') {
                Some((encoded, fragment)) => (encoded, Some(fragment)),
                None => (rest, None),
            };
            let encoded = encoded
                .strip_prefix('z')
                .ok_or_else(|| Error::InvalidKey("did:key must be base58btc ('z')".into()))?;
            let decoded = bs58::decode(encoded)
                .into_vec()
                .map_err(|e| Error::Base58(e.to_string()))?;
            let key = decoded
                .strip_prefix(&ED25519_MULTICODEC[..])
                .ok_or_else(|| Error::InvalidKey("only Ed25519 did:key is supported".into()))?;
            if fragment.is_some_and(str::is_empty) {
                return Err(Error::InvalidKey("empty fragment".into()));
            }
            return Ok(Self::DidKey {
                key: key_bytes(key)?,
                fragment: fragment.map(str::to_string),
            });
        }

        if s.starts_with("did:") {
            return Err(Error::InvalidKey(format!("unsupported key DID '{s}'")));
        }

        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| Error::Base58(e.to_string()))?;
        Ok(Self::Raw(key_bytes(&decoded)?))
    }
}

impl TryFrom<String> for KeyReference {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<KeyReference> for String {
    fn from(key: KeyReference) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_did_reference_parts() {
        let did: DidReference = "did:sov:LjgpST2rjsoxYegQDRm7EL".parse().unwrap();
        assert_eq!(did.method(), "sov");
        assert_eq!(did.method_id(), "LjgpST2rjsoxYegQDRm7EL");
        assert_eq!(did.fragment(), None);
        assert_eq!(did.to_string(), "did:sov:LjgpST2rjsoxYegQDRm7EL");
    }

    #[test]
    fn test_did_reference_fragment() {
        let did: DidReference = "did:peer:2.Ez6LSbys#didcomm-0".parse().unwrap();
        assert_eq!(did.fragment(), Some("didcomm-0"));
        assert_eq!(did.to_string(), "did:peer:2.Ez6LSbys#didcomm-0");
    }

    #[test]
    fn test_did_reference_rejects_malformed() {
        for bad in [
            "",
            "sov:abc",
            "did:",
            "did:sov",
            "did:sov:",
            "did:SOV:abc",
            "did:sov:abc:",
            "did:sov:a b",
            "did:sov:abc#",
            "https://example.com",
        ] {
            assert!(bad.parse::<DidReference>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_did_key_roundtrip() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let reference = KeyReference::did_key(&signing_key.verifying_key());

        let text = reference.to_string();
        assert!(text.starts_with("did:key:z6Mk"));
        assert!(text.contains("#z6Mk"));

        let parsed: KeyReference = text.parse().unwrap();
        assert_eq!(parsed, reference);
        assert_eq!(
            parsed.verifying_key().unwrap(),
            signing_key.verifying_key()
        );
    }

    #[test]
    fn test_raw_key_reference() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let raw = bs58::encode(signing_key.verifying_key().as_bytes()).into_string();

        let parsed: KeyReference = raw.parse().unwrap();
        assert!(matches!(parsed, KeyReference::Raw(_)));
        assert_eq!(parsed.to_string(), raw);
    }

    #[test]
    fn test_key_reference_rejects_garbage() {
        assert!("did:key:abc".parse::<KeyReference>().is_err());
        assert!("did:sov:LjgpST2rjsoxYegQDRm7EL".parse::<KeyReference>().is_err());
        assert!("0OIl".parse::<KeyReference>().is_err());
        assert!("3mJr7AoUXx2Wqd".parse::<KeyReference>().is_err());
    }
}
