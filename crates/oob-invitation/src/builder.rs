//! Invitation construction.

use crate::attachment;
use crate::error::{CollaboratorError, InvitationError, Result};
use crate::messages::{
    AttachmentContent, AttachmentDescriptor, HandshakeProtocol, INVITATION_TYPE, Invitation,
    ServiceEntry,
};
use crate::service::ServiceResolver;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// An attachment the caller wants carried in the invitation.
///
/// Without inline `data`, content is loaded from the [`AttachmentSource`]
/// (e.g. the credential offer stored under that exchange id).
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRequest {
    pub id: String,
    pub type_: String,
    pub data: Option<AttachmentContent>,
}

/// Caller input for a new invitation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvitationRequest {
    pub attachments: Vec<AttachmentRequest>,
    pub include_handshake: bool,
    pub use_public_did: bool,
    pub multi_use: bool,
}

impl InvitationRequest {
    /// Read a request from JSON text. Blank text is an empty request.
    ///
    /// # Errors
    /// [`InvitationError::Validation`] naming the offending field, or
    /// `request` when the text is not a JSON object.
    pub fn from_json(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: Value = serde_json::from_str(text)
            .map_err(|e| InvitationError::validation("request", format!("invalid JSON: {e}")))?;
        Self::from_value(&raw)
    }

    /// Read a request from a JSON value. Absent and `null` fields take
    /// their defaults.
    ///
    /// # Errors
    /// [`InvitationError::Validation`] naming the offending field.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let object = raw
            .as_object()
            .ok_or_else(|| InvitationError::validation("request", "expected a JSON object"))?;

        let attachments = match object.get("attachments") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries
                .iter()
                .enumerate()
                .map(|(index, entry)| attachment_request(&format!("attachments[{index}]"), entry))
                .collect::<Result<_>>()?,
            Some(_) => {
                return Err(InvitationError::validation("attachments", "expected an array"));
            }
        };

        Ok(Self {
            attachments,
            include_handshake: flag(object, "include_handshake")?,
            use_public_did: flag(object, "use_public_did")?,
            multi_use: flag(object, "multi_use")?,
        })
    }

    /// Reject requests that would produce an invitation with neither a
    /// handshake nor attachments.
    ///
    /// # Errors
    /// [`InvitationError::Validation`] naming `include_handshake`.
    pub fn ensure_actionable(&self) -> Result<()> {
        if !self.include_handshake && self.attachments.is_empty() {
            return Err(InvitationError::validation(
                "include_handshake",
                "an invitation needs a handshake protocol or at least one attachment",
            ));
        }
        Ok(())
    }
}

fn flag(object: &Map<String, Value>, key: &str) -> Result<bool> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(value)) => Ok(*value),
        Some(_) => Err(InvitationError::validation(key, "expected a boolean")),
    }
}

fn attachment_request(field: &str, entry: &Value) -> Result<AttachmentRequest> {
    let block = entry
        .as_object()
        .ok_or_else(|| InvitationError::validation(field, "expected an object"))?;

    let text = |key: &str| match block.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(InvitationError::validation(format!("{field}.{key}"), "expected a string")),
        None => Err(InvitationError::validation(format!("{field}.{key}"), "missing")),
    };
    let id = text("id")?;
    let type_ = text("type")?;

    let data = match block.get("data") {
        None | Some(Value::Null) => None,
        Some(data) => Some(serde_json::from_value::<AttachmentContent>(data.clone()).map_err(|e| {
            InvitationError::validation(
                format!("{field}.data"),
                format!("expected one of json, base64 or links: {e}"),
            )
        })?),
    };

    Ok(AttachmentRequest { id, type_, data })
}

/// Where attachment content referenced by id comes from.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    /// Content stored for `(type, id)`, if any.
    async fn load(
        &self,
        type_: &str,
        id: &str,
    ) -> std::result::Result<Option<AttachmentContent>, CollaboratorError>;
}

/// In-memory attachment source.
#[derive(Default)]
pub struct MemoryAttachmentSource {
    records: RwLock<HashMap<(String, String), AttachmentContent>>,
}

impl MemoryAttachmentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        type_: impl Into<String>,
        id: impl Into<String>,
        content: AttachmentContent,
    ) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((type_.into(), id.into()), content);
    }
}

#[async_trait]
impl AttachmentSource for MemoryAttachmentSource {
    async fn load(
        &self,
        type_: &str,
        id: &str,
    ) -> std::result::Result<Option<AttachmentContent>, CollaboratorError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(type_.to_string(), id.to_string()))
            .cloned())
    }
}

/// Composes service information and attachments into invitations.
pub struct InvitationBuilder {
    resolver: Arc<dyn ServiceResolver>,
    attachments: Arc<dyn AttachmentSource>,
    label: Option<String>,
    handshake_protocols: Vec<HandshakeProtocol>,
}

impl InvitationBuilder {
    pub fn new(resolver: Arc<dyn ServiceResolver>, attachments: Arc<dyn AttachmentSource>) -> Self {
        Self {
            resolver,
            attachments,
            label: None,
            handshake_protocols: vec![HandshakeProtocol::Connections],
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Protocols offered when a handshake is requested. An empty list keeps
    /// the current ones.
    pub fn with_handshake_protocols(mut self, protocols: Vec<HandshakeProtocol>) -> Self {
        if !protocols.is_empty() {
            self.handshake_protocols = protocols;
        }
        self
    }

    /// Build a new invitation.
    ///
    /// Nothing is returned unless every step succeeds. Attachments are
    /// loaded and bound before the service is resolved.
    ///
    /// # Errors
    /// - [`InvitationError::Validation`] for malformed attachment requests
    /// - [`InvitationError::NotFound`] when a public DID is requested but
    ///   none exists, or attachment content cannot be found
    /// - [`InvitationError::Collaborator`] when the attachment source fails
    pub async fn build(&self, request: InvitationRequest) -> Result<Invitation> {
        attachment::check_entries(
            request
                .attachments
                .iter()
                .map(|a| (a.id.as_str(), a.type_.as_str())),
        )
        .map_err(|p| {
            InvitationError::validation(format!("attachments[{}].{}", p.index, p.field), p.reason)
        })?;

        let mut descriptors = Vec::with_capacity(request.attachments.len());
        for AttachmentRequest { id, type_, data } in request.attachments {
            let content = match data {
                Some(content) => content,
                None => self.attachments.load(&type_, &id).await?.ok_or_else(|| {
                    InvitationError::NotFound(format!("attachment '{id}' of type '{type_}'"))
                })?,
            };
            descriptors.push(AttachmentDescriptor::new(id, type_, content));
        }
        let request_attach = attachment::bind(descriptors)?;

        // A peer key is only generated for an invitation that will be returned.
        let service = if request.use_public_did {
            self.resolver.resolve_public().await?
        } else {
            ServiceEntry::Inline(self.resolver.resolve_peer().await)
        };

        let handshake_protocols = if request.include_handshake {
            self.handshake_protocols.clone()
        } else {
            Vec::new()
        };

        Ok(Invitation {
            type_: INVITATION_TYPE.to_string(),
            id: Uuid::now_v7().to_string(),
            label: self.label.clone(),
            handshake_protocols,
            services: vec![service],
            request_attach,
            multi_use: request.multi_use,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ServiceDescriptor;
    use crate::service::LocalServiceResolver;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn builder(public_did: Option<&str>) -> (InvitationBuilder, Arc<MemoryAttachmentSource>) {
        let mut resolver =
            LocalServiceResolver::new(Url::parse("https://agent.example.com/didcomm").unwrap());
        if let Some(did) = public_did {
            resolver = resolver.with_public_did(did.parse().unwrap());
        }
        let source = Arc::new(MemoryAttachmentSource::new());
        let builder =
            InvitationBuilder::new(Arc::new(resolver), source.clone()).with_label("Alice");
        (builder, source)
    }

    fn handshake_request() -> InvitationRequest {
        InvitationRequest {
            include_handshake: true,
            ..Default::default()
        }
    }

    fn inline_attachment(id: &str) -> AttachmentRequest {
        AttachmentRequest {
            id: id.to_string(),
            type_: "credential-offer".to_string(),
            data: Some(AttachmentContent::Json(json!({"offer": id}))),
        }
    }

    #[tokio::test]
    async fn test_build_peer_invitation() {
        let (builder, _) = builder(None);
        let invitation = builder.build(handshake_request()).await.unwrap();

        assert!(!invitation.id.is_empty());
        assert_eq!(invitation.type_, INVITATION_TYPE);
        assert_eq!(invitation.label.as_deref(), Some("Alice"));
        assert_eq!(invitation.handshake_protocols, vec![HandshakeProtocol::Connections]);
        assert!(!invitation.multi_use);
        assert!(matches!(invitation.services.as_slice(), [ServiceEntry::Inline(_)]));
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (builder, _) = builder(None);
        let mut ids = HashSet::new();
        for _ in 0..20 {
            let invitation = builder.build(handshake_request()).await.unwrap();
            assert!(ids.insert(invitation.id));
        }
    }

    #[tokio::test]
    async fn test_handshake_flag() {
        let (builder, _) = builder(None);

        let with = builder.build(handshake_request()).await.unwrap();
        assert!(!with.handshake_protocols.is_empty());

        let without = builder
            .build(InvitationRequest {
                attachments: vec![inline_attachment("a")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(without.handshake_protocols.is_empty());
    }

    #[tokio::test]
    async fn test_public_did_missing() {
        let (builder, _) = builder(None);
        let result = builder
            .build(InvitationRequest {
                use_public_did: true,
                ..handshake_request()
            })
            .await;
        assert!(matches!(result, Err(InvitationError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_public_did_reference() {
        let (builder, _) = builder(Some("did:sov:LjgpST2rjsoxYegQDRm7EL"));
        let invitation = builder
            .build(InvitationRequest {
                use_public_did: true,
                multi_use: true,
                ..handshake_request()
            })
            .await
            .unwrap();

        assert!(invitation.multi_use);
        assert_eq!(
            invitation.services,
            vec![ServiceEntry::Reference("did:sov:LjgpST2rjsoxYegQDRm7EL".parse().unwrap())]
        );
    }

    #[tokio::test]
    async fn test_duplicate_attachment_ids() {
        let (builder, _) = builder(None);
        let result = builder
            .build(InvitationRequest {
                attachments: vec![inline_attachment("a"), inline_attachment("a")],
                ..handshake_request()
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, InvitationError::Validation { .. }));
        assert_eq!(err.field(), Some("attachments[1].id"));
    }

    #[tokio::test]
    async fn test_attachment_loaded_from_source() {
        let (builder, source) = builder(None);
        source.insert("present-proof", "req-7", AttachmentContent::Json(json!({"request": 7})));

        let invitation = builder
            .build(InvitationRequest {
                attachments: vec![AttachmentRequest {
                    id: "req-7".to_string(),
                    type_: "present-proof".to_string(),
                    data: None,
                }],
                ..Default::default()
            })
            .await
            .unwrap();

        let attachment = &invitation.request_attach[0];
        assert_eq!(attachment.id, "req-7");
        assert_eq!(attachment.data.content, AttachmentContent::Json(json!({"request": 7})));
        assert!(attachment.data.sha256.is_some());
    }

    #[tokio::test]
    async fn test_attachment_missing_from_source() {
        let (builder, _) = builder(None);
        let result = builder
            .build(InvitationRequest {
                attachments: vec![AttachmentRequest {
                    id: "nope".to_string(),
                    type_: "credential-offer".to_string(),
                    data: None,
                }],
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(InvitationError::NotFound(_))));
    }

    #[test]
    fn test_empty_request_not_actionable() {
        let err = InvitationRequest::default().ensure_actionable().unwrap_err();
        assert_eq!(err.field(), Some("include_handshake"));
        assert!(handshake_request().ensure_actionable().is_ok());
    }

    /// Counts key generations and delegates to a local resolver.
    struct CountingResolver {
        inner: LocalServiceResolver,
        peers: AtomicUsize,
    }

    #[async_trait]
    impl ServiceResolver for CountingResolver {
        async fn resolve_public(&self) -> Result<ServiceEntry> {
            self.inner.resolve_public().await
        }

        async fn resolve_peer(&self) -> ServiceDescriptor {
            self.peers.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve_peer().await
        }
    }

    #[tokio::test]
    async fn test_failed_build_generates_no_key() {
        let endpoint = Url::parse("https://agent.example.com/didcomm").unwrap();
        let resolver = Arc::new(CountingResolver {
            inner: LocalServiceResolver::new(endpoint),
            peers: AtomicUsize::new(0),
        });
        let builder =
            InvitationBuilder::new(resolver.clone(), Arc::new(MemoryAttachmentSource::new()));

        let undecodable = builder
            .build(InvitationRequest {
                attachments: vec![AttachmentRequest {
                    id: "blob".to_string(),
                    type_: "credential-offer".to_string(),
                    data: Some(AttachmentContent::Base64("!!!".to_string())),
                }],
                ..Default::default()
            })
            .await;
        assert!(matches!(undecodable, Err(InvitationError::Validation { .. })));

        let unknown = builder
            .build(InvitationRequest {
                attachments: vec![AttachmentRequest {
                    id: "nope".to_string(),
                    type_: "credential-offer".to_string(),
                    data: None,
                }],
                ..Default::default()
            })
            .await;
        assert!(matches!(unknown, Err(InvitationError::NotFound(_))));
        assert_eq!(resolver.peers.load(Ordering::SeqCst), 0);

        builder.build(handshake_request()).await.unwrap();
        assert_eq!(resolver.peers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_from_value() {
        let request = InvitationRequest::from_value(&json!({
            "attachments": [
                {"id": "x", "type": "credential-offer"},
                {"id": "y", "type": "present-proof", "data": {"json": {"a": 1}}}
            ],
            "include_handshake": true,
            "multi_use": null
        }))
        .unwrap();

        assert!(request.include_handshake);
        assert!(!request.use_public_did);
        assert!(!request.multi_use);
        assert_eq!(request.attachments[0].type_, "credential-offer");
        assert!(request.attachments[0].data.is_none());
        assert_eq!(request.attachments[1].data, Some(AttachmentContent::Json(json!({"a": 1}))));
    }

    #[test]
    fn test_request_null_attachments_are_absent() {
        let request =
            InvitationRequest::from_json(r#"{"attachments": null, "include_handshake": true}"#)
                .unwrap();
        assert!(request.attachments.is_empty());
        assert_eq!(InvitationRequest::from_json("  ").unwrap(), InvitationRequest::default());
    }

    #[test]
    fn test_request_errors_name_field() {
        let field = |text: &str| {
            let err = InvitationRequest::from_json(text).unwrap_err();
            assert_eq!(err.kind(), "validation_error");
            err.field().map(str::to_string)
        };

        let cases = [
            (r#"{"attachments":[{"id":"a"}]}"#, "attachments[0].type"),
            (r#"{"attachments":[{"type":"t"}]}"#, "attachments[0].id"),
            (r#"{"attachments":[{"id":1,"type":"t"}]}"#, "attachments[0].id"),
            (r#"{"attachments":[7]}"#, "attachments[0]"),
            (r#"{"attachments":{}}"#, "attachments"),
            (r#"{"attachments":[{"id":"a","type":"t","data":{"xml":1}}]}"#, "attachments[0].data"),
            (r#"{"multi_use":"yes"}"#, "multi_use"),
            ("[]", "request"),
            ("{", "request"),
        ];
        for (text, expected) in cases {
            assert_eq!(field(text).as_deref(), Some(expected), "{text}");
        }
    }
}
