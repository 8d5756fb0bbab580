//! Attachment binding.
//!
//! The binder never invents content. It checks that every attachment is
//! addressable (non-empty, unique `@id`) and typed, and seals inline content
//! with a SHA-256 digest.

use crate::error::{InvitationError, Result};
use crate::messages::{AttachmentContent, AttachmentDescriptor};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use oob_core::digest;
use std::collections::HashSet;

/// A problem with one attachment entry.
///
/// Construction input turns this into a validation error, received
/// invitations into a parse error.
#[derive(Debug)]
pub(crate) struct EntryProblem {
    pub index: usize,
    pub field: &'static str,
    pub reason: String,
}

/// Check `(id, type)` pairs: both non-empty, ids unique.
pub(crate) fn check_entries<'a>(
    entries: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> std::result::Result<(), EntryProblem> {
    let mut seen = HashSet::new();
    for (index, (id, type_)) in entries.into_iter().enumerate() {
        if id.trim().is_empty() {
            return Err(EntryProblem {
                index,
                field: "id",
                reason: "attachment id must not be empty".to_string(),
            });
        }
        if type_.trim().is_empty() {
            return Err(EntryProblem {
                index,
                field: "type",
                reason: "attachment type must not be empty".to_string(),
            });
        }
        if !seen.insert(id) {
            return Err(EntryProblem {
                index,
                field: "id",
                reason: format!("duplicate attachment id '{id}'"),
            });
        }
    }
    Ok(())
}

/// Validate and package attachments for an invitation.
///
/// Empty input is valid and yields no attachments.
///
/// # Errors
/// [`InvitationError::Validation`] naming `attachments[i].id`/`.type`/`.data`.
pub fn bind(descriptors: Vec<AttachmentDescriptor>) -> Result<Vec<AttachmentDescriptor>> {
    check_entries(descriptors.iter().map(|d| (d.id.as_str(), d.type_.as_str())))
        .map_err(|p| {
            InvitationError::validation(format!("attachments[{}].{}", p.index, p.field), p.reason)
        })?;

    descriptors
        .into_iter()
        .enumerate()
        .map(|(index, mut descriptor)| {
            let digest = content_digest(&descriptor.data.content).map_err(|reason| {
                InvitationError::validation(format!("attachments[{index}].data"), reason)
            })?;
            match (&descriptor.data.sha256, digest) {
                (None, digest) => descriptor.data.sha256 = digest,
                (Some(given), Some(actual)) if !given.eq_ignore_ascii_case(&actual) => {
                    return Err(InvitationError::validation(
                        format!("attachments[{index}].data.sha256"),
                        "digest does not match content",
                    ));
                }
                _ => {}
            }
            Ok(descriptor)
        })
        .collect()
}

/// Hex SHA-256 of inline content; links carry none.
pub(crate) fn content_digest(
    content: &AttachmentContent,
) -> std::result::Result<Option<String>, String> {
    match content {
        AttachmentContent::Json(value) => digest::json_sha256(value)
            .map(Some)
            .map_err(|e| e.to_string()),
        AttachmentContent::Base64(encoded) => URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map(|bytes| Some(digest::sha256_hex(&bytes)))
            .map_err(|e| format!("invalid base64url content: {e}")),
        AttachmentContent::Links(_) => Ok(None),
    }
}
