//! Service resolution for invitations.
//!
//! An invitation either names the agent's public DID, leaving endpoint lookup
//! to the invitee's DID resolver, or carries an inline peer service backed by a
//! freshly generated key.

use crate::error::{InvitationError, Result};
use crate::messages::{ServiceDescriptor, ServiceEntry};
use async_trait::async_trait;
use oob_core::{DidReference, KeyReference, PeerKey};
use url::Url;

/// Id given to inline service blocks.
pub const INLINE_SERVICE_ID: &str = "#inline";

/// Source of service information for new invitations.
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    /// The agent's public DID as a service reference.
    ///
    /// # Errors
    /// [`InvitationError::NotFound`] when the agent has no public DID.
    async fn resolve_public(&self) -> Result<ServiceEntry>;

    /// A new peer service with its own recipient key.
    ///
    /// Custody of the private half belongs to the implementation.
    async fn resolve_peer(&self) -> ServiceDescriptor;
}

/// Resolver backed by local configuration.
///
/// Peer keys are ephemeral: only the public half leaves `resolve_peer`.
#[derive(Debug, Clone)]
pub struct LocalServiceResolver {
    endpoint: Url,
    public_did: Option<DidReference>,
    routing_keys: Vec<KeyReference>,
}

impl LocalServiceResolver {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            public_did: None,
            routing_keys: Vec::new(),
        }
    }

    pub fn with_public_did(mut self, did: DidReference) -> Self {
        self.public_did = Some(did);
        self
    }

    pub fn with_routing_keys(mut self, routing_keys: Vec<KeyReference>) -> Self {
        self.routing_keys = routing_keys;
        self
    }
}

#[async_trait]
impl ServiceResolver for LocalServiceResolver {
    async fn resolve_public(&self) -> Result<ServiceEntry> {
        self.public_did
            .clone()
            .map(ServiceEntry::Reference)
            .ok_or_else(|| InvitationError::NotFound("public DID".to_string()))
    }

    async fn resolve_peer(&self) -> ServiceDescriptor {
        let recipient_key = PeerKey::generate().key_reference();

        ServiceDescriptor::new(INLINE_SERVICE_ID, recipient_key, self.endpoint.clone())
            .with_routing_keys(self.routing_keys.clone())
    }
}
