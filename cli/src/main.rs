//! oob - create and inspect out-of-band invitations offline.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use clap::{Parser, Subcommand};
use oob_core::DidReference;
use oob_invitation::{
    AttachmentContent, AttachmentRequest, Classification, HandshakeProtocol, Invitation,
    InvitationBuilder, InvitationRequest, LocalServiceResolver, MemoryAttachmentSource,
    ServiceEntry, classify, parser,
};
use std::fmt::Write as _;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Out-of-band invitation tool
#[derive(Parser)]
#[command(name = "oob")]
#[command(about = "Create and inspect out-of-band invitations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Invitation management
    Invitation {
        #[command(subcommand)]
        action: InvitationAction,
    },
}

#[derive(Subcommand)]
enum InvitationAction {
    /// Create a new invitation and print it
    Create {
        /// Label shown to the invitee
        #[arg(short, long)]
        label: Option<String>,
        /// Endpoint for a peer service block
        #[arg(short, long, default_value = "http://localhost:8020")]
        endpoint: Url,
        /// Reference this public DID instead of generating a peer service
        #[arg(long)]
        public_did: Option<DidReference>,
        /// Ask the invitee for a handshake
        #[arg(long)]
        handshake: bool,
        /// Handshake protocol to offer, as a URI or short name (repeatable)
        #[arg(long = "protocol", value_name = "PROTOCOL")]
        protocols: Vec<String>,
        /// Allow the invitation to be used more than once
        #[arg(long)]
        multi_use: bool,
        /// Attach a file as TYPE:ID:FILE (repeatable)
        #[arg(long = "attach", value_name = "TYPE:ID:FILE", value_parser = parse_attach_arg)]
        attachments: Vec<AttachArg>,
        /// Print an invitation URL under this base instead of JSON
        #[arg(long, value_name = "BASE")]
        url: Option<Url>,
    },
    /// Parse an invitation and describe what receiving it would do
    Inspect {
        /// Invitation JSON file, invitation URL, or `-` for stdin
        input: String,
        /// Print the normalized invitation JSON
        #[arg(long)]
        json: bool,
    },
}

/// A file to carry as an invitation attachment.
#[derive(Debug, Clone, PartialEq)]
struct AttachArg {
    type_: String,
    id: String,
    path: PathBuf,
}

fn parse_attach_arg(value: &str) -> std::result::Result<AttachArg, String> {
    let mut parts = value.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(type_), Some(id), Some(path))
            if !type_.is_empty() && !id.is_empty() && !path.is_empty() =>
        {
            Ok(AttachArg {
                type_: type_.to_string(),
                id: id.to_string(),
                path: PathBuf::from(path),
            })
        }
        _ => Err(format!("expected TYPE:ID:FILE, got '{value}'")),
    }
}

/// JSON files are embedded as JSON, anything else as base64.
fn load_attachment(arg: &AttachArg) -> Result<AttachmentRequest> {
    let bytes = std::fs::read(&arg.path)
        .with_context(|| format!("Could not read attachment file: {}", arg.path.display()))?;
    let content = match serde_json::from_slice(&bytes) {
        Ok(value) => AttachmentContent::Json(value),
        Err(_) => AttachmentContent::Base64(URL_SAFE_NO_PAD.encode(&bytes)),
    };

    Ok(AttachmentRequest {
        id: arg.id.clone(),
        type_: arg.type_.clone(),
        data: Some(content),
    })
}

#[allow(clippy::too_many_arguments)]
async fn cmd_invitation_create(
    label: Option<String>,
    endpoint: Url,
    public_did: Option<DidReference>,
    handshake: bool,
    protocols: Vec<String>,
    multi_use: bool,
    attachments: Vec<AttachArg>,
    url: Option<Url>,
) -> Result<()> {
    let use_public_did = public_did.is_some();
    let mut resolver = LocalServiceResolver::new(endpoint);
    if let Some(did) = public_did {
        resolver = resolver.with_public_did(did);
    }

    let protocols: Vec<_> = protocols
        .iter()
        .map(|p| HandshakeProtocol::from_name(p))
        .collect();
    let mut builder =
        InvitationBuilder::new(Arc::new(resolver), Arc::new(MemoryAttachmentSource::new()))
            .with_handshake_protocols(protocols);
    if let Some(label) = label {
        builder = builder.with_label(label);
    }

    let request = InvitationRequest {
        attachments: attachments.iter().map(load_attachment).collect::<Result<_>>()?,
        include_handshake: handshake,
        use_public_did,
        multi_use,
    };
    request.ensure_actionable()?;

    let invitation = builder.build(request).await.context("Could not build invitation")?;

    match url {
        Some(base) => println!("{}", invitation.to_url(&base)?),
        None => println!("{}", serde_json::to_string_pretty(&invitation)?),
    }
    Ok(())
}

/// Accepts raw JSON or an invitation URL.
fn parse_input(text: &str) -> Result<Invitation> {
    let text = text.trim();
    let invitation = if text.starts_with('{') {
        parser::parse_str(text)?
    } else {
        parser::parse_url(text)?
    };
    Ok(invitation)
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Could not read stdin")?;
        Ok(text)
    } else if input.starts_with("http://") || input.starts_with("https://") {
        Ok(input.to_string())
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Could not read invitation file: {input}"))
    }
}

fn describe(invitation: &Invitation) -> String {
    let outcome = classify(invitation);
    let mut out = String::new();

    let _ = writeln!(out, "Invitation {}", invitation.id);
    if let Some(label) = &invitation.label {
        let _ = writeln!(out, "  Label: {label}");
    }
    let _ = writeln!(out, "  Multi-use: {}", invitation.multi_use);
    let summary = match outcome.classification {
        Classification::Handshake => "handshake".to_string(),
        Classification::AttachmentOnly => "attachments only".to_string(),
        Classification::Rejected => {
            format!("rejected ({})", outcome.reason.as_deref().unwrap_or("unknown"))
        }
    };
    let _ = writeln!(out, "  Outcome: {summary}");

    for protocol in &invitation.handshake_protocols {
        let marker = if protocol.is_recognized() { "" } else { " (unrecognized)" };
        let _ = writeln!(out, "  Handshake: {}{marker}", protocol.uri());
    }
    for service in &invitation.services {
        let _ = match service {
            ServiceEntry::Reference(did) => writeln!(out, "  Service: {did}"),
            ServiceEntry::Inline(block) => writeln!(
                out,
                "  Service: {} ({} recipient key(s), {} routing key(s))",
                block.service_endpoint,
                block.recipient_keys.len(),
                block.routing_keys.len()
            ),
        };
    }
    for attachment in &invitation.request_attach {
        let _ = writeln!(
            out,
            "  Attachment: {} [{}] sha256={}",
            attachment.id,
            attachment.type_,
            attachment.data.sha256.as_deref().unwrap_or("-")
        );
    }
    out
}

fn cmd_invitation_inspect(input: &str, json: bool) -> Result<()> {
    let invitation = parse_input(&read_input(input)?).context("Invalid invitation")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&invitation)?);
    } else {
        print!("{}", describe(&invitation));
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Invitation { action } => match action {
            InvitationAction::Create {
                label,
                endpoint,
                public_did,
                handshake,
                protocols,
                multi_use,
                attachments,
                url,
            } => {
                cmd_invitation_create(
                    label,
                    endpoint,
                    public_did,
                    handshake,
                    protocols,
                    multi_use,
                    attachments,
                    url,
                )
                .await
            }
            InvitationAction::Inspect { input, json } => cmd_invitation_inspect(&input, json),
        },
    }
}
