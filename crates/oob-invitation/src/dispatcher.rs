//! Ingestion dispatch.
//!
//! A validated invitation ends in exactly one outcome:
//!
//! - `handshake`: the connection initiator is invoked once
//! - `attachmentOnly`: each attachment goes to the handler for its type
//! - `rejected`: nothing is invoked
//!
//! Every rejection the invitation itself explains (empty, no supported
//! handshake protocol, unhandled attachment type) is decided before the
//! store is touched.
//!
//! Single-use enforcement relies on the store's atomic `try_consume`. No
//! retries happen here.

use crate::error::{CollaboratorError, Result};
use crate::messages::{
    AttachmentDescriptor, Classification, HandshakeProtocol, IngestionOutcome, Invitation, reasons,
};
use crate::store::ConnectionStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Starts the handshake protocol named by an invitation.
#[async_trait]
pub trait ConnectionInitiator: Send + Sync {
    async fn initiate(
        &self,
        invitation: &Invitation,
    ) -> std::result::Result<(), CollaboratorError>;
}

/// Processes one attachment type delivered without a handshake.
#[async_trait]
pub trait AttachmentHandler: Send + Sync {
    async fn handle(
        &self,
        invitation: &Invitation,
        attachment: &AttachmentDescriptor,
    ) -> std::result::Result<(), CollaboratorError>;
}

/// Stateless part of the decision: what the invitation asks for.
///
/// Ignores consumption history and handler availability.
pub fn classify(invitation: &Invitation) -> IngestionOutcome {
    if invitation.wants_handshake() {
        IngestionOutcome::handshake()
    } else if invitation.has_attachments() {
        IngestionOutcome::attachment_only()
    } else {
        IngestionOutcome::rejected(reasons::EMPTY_INVITATION)
    }
}

enum Route<'a> {
    Handshake,
    Attachments(Vec<(&'a AttachmentDescriptor, Arc<dyn AttachmentHandler>)>),
}

/// Routes received invitations to their collaborators.
pub struct Dispatcher {
    store: Arc<dyn ConnectionStore>,
    initiator: Arc<dyn ConnectionInitiator>,
    handlers: HashMap<String, Arc<dyn AttachmentHandler>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ConnectionStore>, initiator: Arc<dyn ConnectionInitiator>) -> Self {
        Self {
            store,
            initiator,
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for one attachment type.
    pub fn with_handler(
        mut self,
        type_: impl Into<String>,
        handler: Arc<dyn AttachmentHandler>,
    ) -> Self {
        self.handlers.insert(type_.into(), handler);
        self
    }

    /// Pick the route, or the rejection reason.
    fn route<'a>(&self, invitation: &'a Invitation) -> std::result::Result<Route<'a>, String> {
        match classify(invitation).classification {
            Classification::Handshake => {
                if invitation
                    .handshake_protocols
                    .iter()
                    .any(HandshakeProtocol::is_recognized)
                {
                    Ok(Route::Handshake)
                } else {
                    Err(reasons::NO_SUPPORTED_PROTOCOL.to_string())
                }
            }
            Classification::AttachmentOnly => {
                let mut routes = Vec::with_capacity(invitation.request_attach.len());
                for attachment in &invitation.request_attach {
                    match self.handlers.get(&attachment.type_) {
                        Some(handler) => routes.push((attachment, handler.clone())),
                        None => {
                            return Err(format!(
                                "{} '{}'",
                                reasons::NO_ATTACHMENT_HANDLER,
                                attachment.type_
                            ));
                        }
                    }
                }
                Ok(Route::Attachments(routes))
            }
            Classification::Rejected => Err(reasons::EMPTY_INVITATION.to_string()),
        }
    }

    /// Ingest a validated invitation.
    ///
    /// Rejections are outcomes, not errors. Nothing is consumed for an
    /// invitation rejected before the store is consulted.
    ///
    /// # Errors
    /// [`crate::InvitationError::Collaborator`] when the store, initiator or
    /// a handler fails.
    pub async fn dispatch(&self, invitation: &Invitation) -> Result<IngestionOutcome> {
        let route = match self.route(invitation) {
            Ok(route) => route,
            Err(reason) => {
                warn!(invitation = %invitation.id, %reason, "invitation rejected");
                return Ok(IngestionOutcome::rejected(reason));
            }
        };

        let consumption = self.store.try_consume(&invitation.id).await?;
        if !consumption.first && !invitation.multi_use {
            warn!(
                invitation = %invitation.id,
                count = consumption.count,
                "single-use invitation received again"
            );
            return Ok(IngestionOutcome::rejected(reasons::ALREADY_CONSUMED));
        }

        match route {
            Route::Handshake => {
                self.initiator.initiate(invitation).await?;
                info!(invitation = %invitation.id, "handshake initiated");
                Ok(IngestionOutcome::handshake())
            }
            Route::Attachments(routes) => {
                for (attachment, handler) in routes {
                    handler.handle(invitation, attachment).await?;
                }
                info!(
                    invitation = %invitation.id,
                    attachments = invitation.request_attach.len(),
                    "attachments delivered"
                );
                Ok(IngestionOutcome::attachment_only())
            }
        }
    }
}
