//! Out-of-band invitations for agent-to-agent connections.
//!
//! An inviter builds an invitation carrying service information, an optional
//! handshake offer and optional attachments. The invitee parses it (the trust
//! boundary) and dispatches it to a connection initiator or to attachment
//! handlers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use oob_invitation::{
//!     InvitationBuilder, InvitationRequest, LocalServiceResolver, MemoryAttachmentSource, parser,
//! };
//! use url::Url;
//!
//! # async fn run() -> oob_invitation::Result<()> {
//! let endpoint = Url::parse("https://alice.example.com/didcomm").unwrap();
//! let resolver = Arc::new(LocalServiceResolver::new(endpoint));
//! let builder = InvitationBuilder::new(resolver, Arc::new(MemoryAttachmentSource::new()))
//!     .with_label("Alice");
//!
//! let invitation = builder
//!     .build(InvitationRequest { include_handshake: true, ..Default::default() })
//!     .await?;
//!
//! // Bob receives the JSON and validates it before acting on it.
//! let received = parser::parse(&invitation.to_json()?)?;
//! assert_eq!(received, invitation);
//! # Ok(())
//! # }
//! ```

pub mod attachment;
pub mod builder;
pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod parser;
pub mod service;
pub mod store;

pub use builder::{
    AttachmentRequest, AttachmentSource, InvitationBuilder, InvitationRequest,
    MemoryAttachmentSource,
};
pub use dispatcher::{AttachmentHandler, ConnectionInitiator, Dispatcher, classify};
pub use error::{CollaboratorError, InvitationError, Result};
pub use messages::{
    AttachmentContent, AttachmentData, AttachmentDescriptor, Classification, HandshakeProtocol,
    IngestionOutcome, Invitation, ServiceDescriptor, ServiceEntry,
};
pub use service::{LocalServiceResolver, ServiceResolver};
pub use store::{ConnectionStore, Consumption, MemoryConnectionStore};
