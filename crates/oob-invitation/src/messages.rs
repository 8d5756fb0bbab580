//! Out-of-band invitation message types.

use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use oob_core::{DidReference, KeyReference};
use serde::{Deserialize, Serialize};
use url::Url;

/// Message type of an out-of-band invitation.
pub const INVITATION_TYPE: &str = "https://didcomm.org/out-of-band/1.0/invitation";

/// Current DIDComm message type prefix.
pub const DIDCOMM_PREFIX: &str = "https://didcomm.org/";

/// Prefix older agents still put in front of message and protocol types.
pub const LEGACY_DIDCOMM_PREFIX: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/";

/// Service type of an inline service block.
pub const DID_COMMUNICATION: &str = "did-communication";

/// Query parameter carrying an encoded invitation in an invitation URL.
pub const URL_PARAM: &str = "oob";

/// Rewrite a legacy `did:sov:…;spec/` type URI to the `https://didcomm.org/` form.
pub fn normalize_type(uri: &str) -> String {
    match uri.strip_prefix(LEGACY_DIDCOMM_PREFIX) {
        Some(rest) => format!("{DIDCOMM_PREFIX}{rest}"),
        None => uri.to_string(),
    }
}

/// A handshake protocol the invitee may use to connect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HandshakeProtocol {
    /// `https://didcomm.org/connections/1.0`
    Connections,
    /// `https://didcomm.org/didexchange/1.0`
    DidExchange,
    /// Anything else, kept verbatim so newer protocols survive a round trip.
    Unrecognized(String),
}

impl HandshakeProtocol {
    pub const CONNECTIONS_URI: &'static str = "https://didcomm.org/connections/1.0";
    pub const DIDEXCHANGE_URI: &'static str = "https://didcomm.org/didexchange/1.0";

    pub fn from_uri(uri: &str) -> Self {
        let normalized = normalize_type(uri);
        match normalized.trim_end_matches('/') {
            Self::CONNECTIONS_URI => Self::Connections,
            Self::DIDEXCHANGE_URI => Self::DidExchange,
            _ => Self::Unrecognized(uri.to_string()),
        }
    }

    /// Accept either a full type URI or a short name such as
    /// `didexchange/1.0`.
    pub fn from_name(name: &str) -> Self {
        if name.contains(':') {
            Self::from_uri(name)
        } else {
            Self::from_uri(&format!("{DIDCOMM_PREFIX}{}", name.trim_start_matches('/')))
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            Self::Connections => Self::CONNECTIONS_URI,
            Self::DidExchange => Self::DIDEXCHANGE_URI,
            Self::Unrecognized(uri) => uri,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl From<String> for HandshakeProtocol {
    fn from(uri: String) -> Self {
        Self::from_uri(&uri)
    }
}

impl From<HandshakeProtocol> for String {
    fn from(protocol: HandshakeProtocol) -> Self {
        protocol.uri().to_string()
    }
}

/// An inline `did-communication` service block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    /// Keys the invitee encrypts to. Never empty.
    pub recipient_keys: Vec<KeyReference>,
    #[serde(default)]
    pub routing_keys: Vec<KeyReference>,
    pub service_endpoint: Url,
}

impl ServiceDescriptor {
    pub fn new(id: impl Into<String>, recipient_key: KeyReference, endpoint: Url) -> Self {
        Self {
            id: id.into(),
            type_: DID_COMMUNICATION.to_string(),
            recipient_keys: vec![recipient_key],
            routing_keys: Vec::new(),
            service_endpoint: endpoint,
        }
    }

    pub fn with_routing_keys(mut self, routing_keys: Vec<KeyReference>) -> Self {
        self.routing_keys = routing_keys;
        self
    }
}

/// One entry of an invitation's service list.
///
/// A DID reference is resolved later by whoever needs the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceEntry {
    Reference(DidReference),
    Inline(ServiceDescriptor),
}

/// Attachment content, in one of the three attachment data forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentContent {
    Json(serde_json::Value),
    /// base64url-encoded bytes.
    Base64(String),
    Links(Vec<Url>),
}

/// The `data` block of an attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentData {
    #[serde(flatten)]
    pub content: AttachmentContent,
    /// Hex SHA-256 of the inline content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// A typed piece of content carried in `requests~attach`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    #[serde(rename = "@id")]
    pub id: String,
    /// Selects the handler that processes this attachment on the receiving side.
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(rename = "mime-type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub data: AttachmentData,
}

impl AttachmentDescriptor {
    pub fn new(
        id: impl Into<String>,
        type_: impl Into<String>,
        content: AttachmentContent,
    ) -> Self {
        let mime_type = match &content {
            AttachmentContent::Json(_) => Some("application/json".to_string()),
            AttachmentContent::Base64(_) | AttachmentContent::Links(_) => None,
        };
        Self {
            id: id.into(),
            type_: type_.into(),
            mime_type,
            data: AttachmentData {
                content,
                sha256: None,
            },
        }
    }
}

/// An out-of-band invitation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invitation {
    #[serde(rename = "@type")]
    pub type_: String,
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub handshake_protocols: Vec<HandshakeProtocol>,
    pub services: Vec<ServiceEntry>,
    #[serde(rename = "requests~attach", skip_serializing_if = "Vec::is_empty")]
    pub request_attach: Vec<AttachmentDescriptor>,
    /// Emitted only when set, so single-use stays the default on the wire.
    #[serde(skip_serializing_if = "is_false")]
    pub multi_use: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Invitation {
    pub fn wants_handshake(&self) -> bool {
        !self.handshake_protocols.is_empty()
    }

    pub fn has_attachments(&self) -> bool {
        !self.request_attach.is_empty()
    }

    /// Handshake protocols this agent does not know, kept for diagnostics.
    pub fn unrecognized_protocols(&self) -> impl Iterator<Item = &str> {
        self.handshake_protocols
            .iter()
            .filter(|p| !p.is_recognized())
            .map(HandshakeProtocol::uri)
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Encode as `<base>?oob=<base64url(json)>`.
    pub fn to_url(&self, base: &Url) -> Result<Url> {
        let json = serde_json::to_string(self)?;
        let mut url = base.clone();
        url.query_pairs_mut()
            .append_pair(URL_PARAM, &URL_SAFE_NO_PAD.encode(json));
        Ok(url)
    }
}

/// How an ingested invitation was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Classification {
    Handshake,
    AttachmentOnly,
    Rejected,
}

/// Result of ingesting one invitation. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionOutcome {
    pub classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl IngestionOutcome {
    pub fn handshake() -> Self {
        Self {
            classification: Classification::Handshake,
            reason: None,
        }
    }

    pub fn attachment_only() -> Self {
        Self {
            classification: Classification::AttachmentOnly,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            classification: Classification::Rejected,
            reason: Some(reason.into()),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.classification == Classification::Rejected
    }
}

/// Rejection reasons.
pub mod reasons {
    pub const EMPTY_INVITATION: &str = "empty invitation";
    pub const ALREADY_CONSUMED: &str = "single-use invitation already consumed";
    pub const NO_ATTACHMENT_HANDLER: &str = "no handler for attachment type";
    pub const NO_SUPPORTED_PROTOCOL: &str = "no supported handshake protocol";
}
