//! Out-of-Band Agent Service
//!
//! Creates invitations for prospective peers and ingests the invitations
//! they send back. Collaborators are in-memory: peer keys are not retained
//! and received handshakes are only logged.

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use oob_core::{DidReference, KeyReference};
use oob_invitation::{
    AttachmentDescriptor, AttachmentHandler, CollaboratorError, ConnectionInitiator, Dispatcher,
    HandshakeProtocol, IngestionOutcome, Invitation, InvitationBuilder, InvitationError,
    InvitationRequest, LocalServiceResolver, MemoryAttachmentSource, MemoryConnectionStore, parser,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Attachment types this agent accepts without a handshake.
const HANDLED_ATTACHMENT_TYPES: [&str; 2] = ["credential-offer", "present-proof"];

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8020";
const DEFAULT_ENDPOINT: &str = "http://localhost:8020";

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub listen_addr: SocketAddr,
    /// Label put on every invitation.
    pub label: Option<String>,
    /// Endpoint advertised in peer service blocks.
    pub endpoint: Url,
    /// Public DID, when this agent has one.
    pub public_did: Option<DidReference>,
    pub routing_keys: Vec<KeyReference>,
    pub handshake_protocols: Vec<HandshakeProtocol>,
}

impl AgentConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Unset and blank variables take
    /// their defaults.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let listen_addr = lookup("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("Invalid LISTEN_ADDR")?;
        let endpoint =
            Url::parse(&lookup("OOB_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()))
                .context("Invalid OOB_ENDPOINT")?;
        let public_did = lookup("OOB_PUBLIC_DID")
            .map(|did| did.parse::<DidReference>())
            .transpose()
            .context("Invalid OOB_PUBLIC_DID")?;
        let routing_keys = lookup("OOB_ROUTING_KEYS")
            .map(|keys| {
                split_list(&keys)
                    .map(str::parse::<KeyReference>)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .context("Invalid OOB_ROUTING_KEYS")?
            .unwrap_or_default();
        let handshake_protocols = match lookup("OOB_HANDSHAKE_PROTOCOLS") {
            Some(protocols) => split_list(&protocols)
                .map(HandshakeProtocol::from_name)
                .collect(),
            None => vec![HandshakeProtocol::Connections],
        };

        Ok(Self {
            listen_addr,
            label: lookup("OOB_LABEL"),
            endpoint,
            public_did,
            routing_keys,
            handshake_protocols,
        })
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

/// Starts handshakes by logging them; the handshake protocols themselves
/// run elsewhere.
struct LoggingInitiator;

#[async_trait]
impl ConnectionInitiator for LoggingInitiator {
    async fn initiate(&self, invitation: &Invitation) -> Result<(), CollaboratorError> {
        let protocol = invitation
            .handshake_protocols
            .iter()
            .find(|p| p.is_recognized())
            .ok_or_else(|| {
                CollaboratorError::new("initiator", "no supported handshake protocol")
            })?;
        info!(invitation = %invitation.id, protocol = protocol.uri(), "starting handshake");
        Ok(())
    }
}

struct LoggingAttachmentHandler;

#[async_trait]
impl AttachmentHandler for LoggingAttachmentHandler {
    async fn handle(
        &self,
        invitation: &Invitation,
        attachment: &AttachmentDescriptor,
    ) -> Result<(), CollaboratorError> {
        info!(
            invitation = %invitation.id,
            attachment = %attachment.id,
            attachment_type = %attachment.type_,
            "attachment received"
        );
        Ok(())
    }
}

/// Application state.
#[derive(Clone)]
pub struct AppState {
    builder: Arc<InvitationBuilder>,
    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: &AgentConfig) -> Self {
        Self::with_initiator(config, Arc::new(LoggingInitiator))
    }

    fn with_initiator(config: &AgentConfig, initiator: Arc<dyn ConnectionInitiator>) -> Self {
        let mut resolver = LocalServiceResolver::new(config.endpoint.clone())
            .with_routing_keys(config.routing_keys.clone());
        if let Some(did) = &config.public_did {
            resolver = resolver.with_public_did(did.clone());
        }

        let attachments = Arc::new(MemoryAttachmentSource::new());
        let mut builder = InvitationBuilder::new(Arc::new(resolver), attachments)
            .with_handshake_protocols(config.handshake_protocols.clone());
        if let Some(label) = &config.label {
            builder = builder.with_label(label.clone());
        }

        let handler: Arc<dyn AttachmentHandler> = Arc::new(LoggingAttachmentHandler);
        let dispatcher = HANDLED_ATTACHMENT_TYPES.iter().fold(
            Dispatcher::new(Arc::new(MemoryConnectionStore::new()), initiator),
            |dispatcher, type_| dispatcher.with_handler(*type_, handler.clone()),
        );

        Self {
            builder: Arc::new(builder),
            dispatcher: Arc::new(dispatcher),
        }
    }
}

// === API Types ===

#[derive(Debug, Deserialize)]
pub struct CreateQuery {
    multi_use: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ReceiveResponse {
    pub outcome: IngestionOutcome,
    pub invitation: Invitation,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

fn error_response(err: InvitationError) -> Response {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else if matches!(err, InvitationError::Collaborator(_)) {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    if status.is_server_error() {
        warn!(kind = err.kind(), "request failed: {}", err);
    }

    let body = ErrorResponse {
        error: err.to_string(),
        kind: err.kind(),
        field: err.field().map(str::to_string),
    };
    (status, Json(body)).into_response()
}

// === Handlers ===

/// Health check endpoint.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "oob-agent"}))
}

/// Create an invitation.
///
/// The body is read as text so malformed requests get the same error body
/// as every other validation failure.
async fn create_invitation(
    State(state): State<AppState>,
    Query(query): Query<CreateQuery>,
    body: String,
) -> Response {
    let mut request = match InvitationRequest::from_json(&body) {
        Ok(request) => request,
        Err(err) => return error_response(err),
    };
    if let Some(multi_use) = query.multi_use {
        request.multi_use = multi_use;
    }
    if let Err(err) = request.ensure_actionable() {
        return error_response(err);
    }

    match state.builder.build(request).await {
        Ok(invitation) => {
            info!(
                invitation = %invitation.id,
                multi_use = invitation.multi_use,
                handshake = invitation.wants_handshake(),
                attachments = invitation.request_attach.len(),
                "invitation created"
            );
            Json(invitation).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// Receive an invitation from a prospective peer.
async fn receive_invitation(State(state): State<AppState>, body: String) -> Response {
    let invitation = match parser::parse_str(&body) {
        Ok(invitation) => invitation,
        Err(err) => {
            warn!(kind = err.kind(), field = err.field(), "unparseable invitation");
            return error_response(err);
        }
    };

    match state.dispatcher.dispatch(&invitation).await {
        Ok(outcome) => Json(ReceiveResponse { outcome, invitation }).into_response(),
        Err(err) => error_response(err),
    }
}

/// Build the router.
fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/out-of-band/create-invitation", post(create_invitation))
        .route("/out-of-band/receive-invitation", post(receive_invitation))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::from_env()?;
    info!(
        endpoint = %config.endpoint,
        public_did = config.public_did.is_some(),
        "Starting out-of-band agent on {}",
        config.listen_addr
    );

    let app = build_router(AppState::new(&config));
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    info!("Out-of-band agent listening on {}", config.listen_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
