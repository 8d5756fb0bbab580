//! Parsing of received invitations.
//!
//! Everything here comes from a remote party. Fields stay untyped JSON until
//! they pass their checks, and the first structural problem fails the whole
//! invitation with the offending field name. There is no partial acceptance.

use crate::attachment;
use crate::error::{InvitationError, Result};
use crate::messages::{
    AttachmentContent, AttachmentData, AttachmentDescriptor, DID_COMMUNICATION,
    HandshakeProtocol, INVITATION_TYPE, Invitation, ServiceDescriptor, ServiceEntry, URL_PARAM,
    normalize_type,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use oob_core::{DidReference, KeyReference};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

type Object = Map<String, Value>;

/// Parse and validate a received invitation.
///
/// Checks run in order: object shape, `@id`, `@type`, `label`, services,
/// handshake protocols, attachments, `multi_use`. Unrecognized handshake
/// protocols are kept, not rejected.
///
/// # Errors
/// [`InvitationError::Parse`] naming the first offending field.
pub fn parse(raw: &Value) -> Result<Invitation> {
    let object = raw
        .as_object()
        .ok_or_else(|| InvitationError::parse("invitation", "expected a JSON object"))?;

    let id = required_string(object, "@id", "id")?;

    let type_ = match object.get("@type") {
        None => INVITATION_TYPE.to_string(),
        Some(Value::String(t)) => {
            let normalized = normalize_type(t);
            if normalized != INVITATION_TYPE {
                return Err(InvitationError::parse(
                    "type",
                    format!("not an out-of-band invitation: '{t}'"),
                ));
            }
            normalized
        }
        Some(_) => return Err(InvitationError::parse("type", "expected a string")),
    };

    let label = optional_string(object, "label")?;
    let services = parse_services(object)?;
    let handshake_protocols = parse_handshake_protocols(object)?;
    let request_attach = parse_attachments(object)?;

    let multi_use = match object.get("multi_use") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(_) => return Err(InvitationError::parse("multi_use", "expected a boolean")),
    };

    let invitation = Invitation {
        type_,
        id,
        label,
        handshake_protocols,
        services,
        request_attach,
        multi_use,
    };

    for protocol in invitation.unrecognized_protocols() {
        debug!(invitation = %invitation.id, protocol, "unrecognized handshake protocol");
    }

    Ok(invitation)
}

/// Parse an invitation from JSON text.
///
/// # Errors
/// [`InvitationError::Parse`] for invalid JSON or an invalid invitation.
pub fn parse_str(text: &str) -> Result<Invitation> {
    let raw: Value = serde_json::from_str(text)
        .map_err(|e| InvitationError::parse("invitation", format!("invalid JSON: {e}")))?;
    parse(&raw)
}

/// Parse an invitation URL of the form `<base>?oob=<base64url(json)>`.
///
/// # Errors
/// [`InvitationError::Parse`] naming `url` when the URL carries no decodable
/// invitation, otherwise as [`parse`].
pub fn parse_url(text: &str) -> Result<Invitation> {
    let url = Url::parse(text).map_err(|e| InvitationError::parse("url", e.to_string()))?;
    let encoded = url
        .query_pairs()
        .find_map(|(key, value)| (key == URL_PARAM).then(|| value.into_owned()))
        .ok_or_else(|| {
            InvitationError::parse("url", format!("missing '{URL_PARAM}' query parameter"))
        })?;
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| InvitationError::parse("url", format!("invalid base64url: {e}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| InvitationError::parse("url", "invitation is not UTF-8"))?;
    parse_str(&text)
}

fn required_string(object: &Object, key: &str, field: &str) -> Result<String> {
    match object.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(InvitationError::parse(field, "must not be empty")),
        Some(_) => Err(InvitationError::parse(field, "expected a string")),
        None => Err(InvitationError::parse(field, "missing")),
    }
}

fn optional_string(object: &Object, key: &str) -> Result<Option<String>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(InvitationError::parse(key, "expected a string")),
    }
}

fn parse_services(object: &Object) -> Result<Vec<ServiceEntry>> {
    // Early agents used the singular key.
    let value = object
        .get("services")
        .or_else(|| object.get("service"))
        .ok_or_else(|| InvitationError::parse("services", "missing"))?;

    let entries = value
        .as_array()
        .ok_or_else(|| InvitationError::parse("services", "expected an array"))?;
    if entries.is_empty() {
        return Err(InvitationError::parse("services", "must not be empty"));
    }

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_service(&format!("services[{index}]"), entry))
        .collect()
}

fn parse_service(field: &str, entry: &Value) -> Result<ServiceEntry> {
    match entry {
        Value::String(did) => did
            .parse::<DidReference>()
            .map(ServiceEntry::Reference)
            .map_err(|e| InvitationError::parse(field, e.to_string())),
        Value::Object(block) => parse_descriptor(field, block).map(ServiceEntry::Inline),
        _ => Err(InvitationError::parse(
            field,
            "expected a DID string or a service object",
        )),
    }
}

fn parse_descriptor(field: &str, block: &Object) -> Result<ServiceDescriptor> {
    let id = required_string(block, "id", &format!("{field}.id"))?;

    let type_ = required_string(block, "type", &format!("{field}.type"))?;
    if type_ != DID_COMMUNICATION {
        return Err(InvitationError::parse(
            format!("{field}.type"),
            format!("unsupported service type '{type_}'"),
        ));
    }

    let recipient_keys = parse_keys(block, "recipientKeys", field)?;
    if recipient_keys.is_empty() {
        return Err(InvitationError::parse(
            format!("{field}.recipientKeys"),
            "must not be empty",
        ));
    }
    let routing_keys = parse_keys(block, "routingKeys", field)?;

    let endpoint_field = format!("{field}.serviceEndpoint");
    let endpoint = required_string(block, "serviceEndpoint", &endpoint_field)?;
    let service_endpoint =
        Url::parse(&endpoint).map_err(|e| InvitationError::parse(&endpoint_field, e.to_string()))?;

    Ok(ServiceDescriptor {
        id,
        type_,
        recipient_keys,
        routing_keys,
        service_endpoint,
    })
}

fn parse_keys(block: &Object, key: &str, field: &str) -> Result<Vec<KeyReference>> {
    let Some(value) = block.get(key) else {
        return Ok(Vec::new());
    };
    let keys = value
        .as_array()
        .ok_or_else(|| InvitationError::parse(format!("{field}.{key}"), "expected an array"))?;

    keys.iter()
        .enumerate()
        .map(|(index, key_value)| {
            let key_field = format!("{field}.{key}[{index}]");
            key_value
                .as_str()
                .ok_or_else(|| InvitationError::parse(&key_field, "expected a string"))?
                .parse::<KeyReference>()
                .map_err(|e| InvitationError::parse(&key_field, e.to_string()))
        })
        .collect()
}

fn parse_handshake_protocols(object: &Object) -> Result<Vec<HandshakeProtocol>> {
    let Some(value) = object.get("handshake_protocols") else {
        return Ok(Vec::new());
    };
    let protocols = value
        .as_array()
        .ok_or_else(|| InvitationError::parse("handshake_protocols", "expected an array"))?;

    protocols
        .iter()
        .enumerate()
        .map(|(index, protocol)| match protocol {
            Value::String(uri) if !uri.trim().is_empty() => Ok(HandshakeProtocol::from_uri(uri)),
            _ => Err(InvitationError::parse(
                format!("handshake_protocols[{index}]"),
                "expected a protocol identifier",
            )),
        })
        .collect()
}

fn parse_attachments(object: &Object) -> Result<Vec<AttachmentDescriptor>> {
    let Some(value) = object
        .get("requests~attach")
        .or_else(|| object.get("request~attach"))
    else {
        return Ok(Vec::new());
    };
    let entries = value
        .as_array()
        .ok_or_else(|| InvitationError::parse("request_attach", "expected an array"))?;

    let attachments = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_attachment(&format!("request_attach[{index}]"), entry))
        .collect::<Result<Vec<_>>>()?;

    attachment::check_entries(attachments.iter().map(|a| (a.id.as_str(), a.type_.as_str())))
        .map_err(|p| {
            InvitationError::parse(format!("request_attach[{}].{}", p.index, p.field), p.reason)
        })?;

    Ok(attachments)
}

fn parse_attachment(field: &str, entry: &Value) -> Result<AttachmentDescriptor> {
    let block = entry
        .as_object()
        .ok_or_else(|| InvitationError::parse(field, "expected an object"))?;

    let id = required_string(block, "@id", &format!("{field}.id"))?;
    let mime_type = optional_string(block, "mime-type")
        .map_err(|_| InvitationError::parse(format!("{field}.mime-type"), "expected a string"))?;

    let data_field = format!("{field}.data");
    let data = block
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| InvitationError::parse(&data_field, "expected an object"))?;
    let data = parse_attachment_data(&data_field, data)?;

    // Without an explicit type, fall back to the embedded message's type.
    let type_ = match block.get("type") {
        Some(_) => required_string(block, "type", &format!("{field}.type"))?,
        None => match &data.content {
            AttachmentContent::Json(json) => json
                .get("@type")
                .and_then(Value::as_str)
                .map(normalize_type)
                .ok_or_else(|| InvitationError::parse(format!("{field}.type"), "missing"))?,
            _ => return Err(InvitationError::parse(format!("{field}.type"), "missing")),
        },
    };

    Ok(AttachmentDescriptor {
        id,
        type_,
        mime_type,
        data,
    })
}

fn parse_attachment_data(field: &str, data: &Object) -> Result<AttachmentData> {
    let mut forms = Vec::new();
    if let Some(json) = data.get("json") {
        forms.push(AttachmentContent::Json(json.clone()));
    }
    if let Some(encoded) = data.get("base64") {
        let encoded = encoded
            .as_str()
            .ok_or_else(|| InvitationError::parse(format!("{field}.base64"), "expected a string"))?;
        forms.push(AttachmentContent::Base64(encoded.to_string()));
    }
    if let Some(links) = data.get("links") {
        let links = links
            .as_array()
            .ok_or_else(|| InvitationError::parse(format!("{field}.links"), "expected an array"))?
            .iter()
            .map(|link| {
                link.as_str()
                    .and_then(|l| Url::parse(l).ok())
                    .ok_or_else(|| {
                        InvitationError::parse(format!("{field}.links"), "expected URLs")
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        forms.push(AttachmentContent::Links(links));
    }

    if forms.len() != 1 {
        return Err(InvitationError::parse(
            field,
            "expected exactly one of json, base64 or links",
        ));
    }
    let content = forms.remove(0);

    let sha256 = match data.get("sha256") {
        None | Some(Value::Null) => None,
        Some(Value::String(digest)) => Some(digest.clone()),
        Some(_) => {
            return Err(InvitationError::parse(format!("{field}.sha256"), "expected a string"));
        }
    };

    let actual = attachment::content_digest(&content)
        .map_err(|reason| InvitationError::parse(field, reason))?;
    if let (Some(expected), Some(actual)) = (&sha256, &actual)
        && !expected.eq_ignore_ascii_case(actual)
    {
        return Err(InvitationError::parse(
            format!("{field}.sha256"),
            "digest does not match content",
        ));
    }

    Ok(AttachmentData { content, sha256 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use oob_core::PeerKey;
    use serde_json::json;

    fn recipient() -> String {
        PeerKey::generate().key_reference().to_string()
    }

    const LEGACY_PRESENTATION_REQUEST: &str =
        "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/present-proof/1.0/request-presentation";

    fn valid() -> Value {
        json!({
            "@type": INVITATION_TYPE,
            "@id": "f0b1d4e2-6f4b-4c7e-9a53-6a2a1c0f5d11",
            "label": "Faber",
            "handshake_protocols": ["https://didcomm.org/connections/1.0"],
            "services": [{
                "id": "#inline",
                "type": "did-communication",
                "recipientKeys": [recipient()],
                "routingKeys": [],
                "serviceEndpoint": "https://faber.example.com/didcomm"
            }]
        })
    }

    fn field_of(raw: &Value) -> String {
        match parse(raw) {
            Err(InvitationError::Parse { field, .. }) => field,
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_valid() {
        let invitation = parse(&valid()).unwrap();

        assert_eq!(invitation.id, "f0b1d4e2-6f4b-4c7e-9a53-6a2a1c0f5d11");
        assert_eq!(invitation.label.as_deref(), Some("Faber"));
        assert_eq!(invitation.handshake_protocols, vec![HandshakeProtocol::Connections]);
        assert!(matches!(invitation.services.as_slice(), [ServiceEntry::Inline(_)]));
        assert!(!invitation.multi_use);
    }

    #[test]
    fn test_not_an_object() {
        assert_eq!(field_of(&json!(["@id"])), "invitation");
        assert!(parse_str("{not json").is_err());
    }

    #[test]
    fn test_missing_id() {
        let mut raw = valid();
        raw.as_object_mut().unwrap().remove("@id");
        assert_eq!(field_of(&raw), "id");

        raw["@id"] = json!("");
        assert_eq!(field_of(&raw), "id");
    }

    #[test]
    fn test_wrong_type() {
        let mut raw = valid();
        raw["@type"] = json!("https://didcomm.org/connections/1.0/invitation");
        assert_eq!(field_of(&raw), "type");
    }

    #[test]
    fn test_missing_id_reported_before_foreign_type() {
        let mut raw = valid();
        raw.as_object_mut().unwrap().remove("@id");
        raw["@type"] = json!("https://didcomm.org/connections/1.0/invitation");
        assert_eq!(field_of(&raw), "id");
    }

    #[test]
    fn test_legacy_type_prefix() {
        let mut raw = valid();
        raw["@type"] = json!("did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/out-of-band/1.0/invitation");
        assert_eq!(parse(&raw).unwrap().type_, INVITATION_TYPE);
    }

    #[test]
    fn test_services_required() {
        let mut raw = valid();
        raw.as_object_mut().unwrap().remove("services");
        assert_eq!(field_of(&raw), "services");

        raw["services"] = json!([]);
        assert_eq!(field_of(&raw), "services");
    }

    #[test]
    fn test_did_service_reference() {
        let mut raw = valid();
        raw["services"] = json!(["did:sov:LjgpST2rjsoxYegQDRm7EL"]);
        let invitation = parse(&raw).unwrap();
        assert!(matches!(invitation.services.as_slice(), [ServiceEntry::Reference(_)]));

        raw["services"] = json!(["not-a-did"]);
        assert_eq!(field_of(&raw), "services[0]");
    }

    #[test]
    fn test_legacy_service_key() {
        let mut raw = valid();
        let services = raw.as_object_mut().unwrap().remove("services").unwrap();
        raw["service"] = services;
        assert!(parse(&raw).is_ok());
    }

    #[test]
    fn test_service_descriptor_checks() {
        let mut raw = valid();
        raw["services"][0]["recipientKeys"] = json!([]);
        assert_eq!(field_of(&raw), "services[0].recipientKeys");

        let mut raw = valid();
        raw["services"][0]["recipientKeys"] = json!(["garbage"]);
        assert_eq!(field_of(&raw), "services[0].recipientKeys[0]");

        let mut raw = valid();
        raw["services"][0]["serviceEndpoint"] = json!("not a url");
        assert_eq!(field_of(&raw), "services[0].serviceEndpoint");

        let mut raw = valid();
        raw["services"][0]["type"] = json!("IndyAgent");
        assert_eq!(field_of(&raw), "services[0].type");
    }

    #[test]
    fn test_unrecognized_protocols_tolerated() {
        let mut raw = valid();
        raw["handshake_protocols"] = json!([
            "https://didcomm.org/didexchange/1.0",
            "https://example.org/handshake/9.0"
        ]);
        let invitation = parse(&raw).unwrap();

        assert_eq!(invitation.handshake_protocols[0], HandshakeProtocol::DidExchange);
        assert_eq!(
            invitation.unrecognized_protocols().collect::<Vec<_>>(),
            vec!["https://example.org/handshake/9.0"]
        );

        raw["handshake_protocols"] = json!([42]);
        assert_eq!(field_of(&raw), "handshake_protocols[0]");
    }

    #[test]
    fn test_attachments() {
        let mut raw = valid();
        raw["requests~attach"] = json!([{
            "@id": "offer-0",
            "type": "credential-offer",
            "mime-type": "application/json",
            "data": {"json": {"@type": "https://didcomm.org/issue-credential/1.0/offer-credential"}}
        }]);
        let invitation = parse(&raw).unwrap();
        assert_eq!(invitation.request_attach[0].id, "offer-0");
        assert_eq!(invitation.request_attach[0].type_, "credential-offer");
    }

    #[test]
    fn test_attachment_type_from_embedded_message() {
        let mut raw = valid();
        raw["request~attach"] = json!([{
            "@id": "req-0",
            "data": {"json": {"@type": LEGACY_PRESENTATION_REQUEST}}
        }]);
        let invitation = parse(&raw).unwrap();
        assert_eq!(
            invitation.request_attach[0].type_,
            "https://didcomm.org/present-proof/1.0/request-presentation"
        );
    }

    #[test]
    fn test_attachment_checks() {
        let entry = json!({"@id": "a", "type": "t", "data": {"json": {}}});

        let mut raw = valid();
        raw["requests~attach"] = json!([entry.clone(), entry.clone()]);
        assert_eq!(field_of(&raw), "request_attach[1].id");

        let mut raw = valid();
        raw["requests~attach"] = json!([{"@id": "a", "type": "t", "data": {}}]);
        assert_eq!(field_of(&raw), "request_attach[0].data");

        let mut raw = valid();
        raw["requests~attach"] =
            json!([{"@id": "a", "type": "t", "data": {"json": {}, "base64": "e30"}}]);
        assert_eq!(field_of(&raw), "request_attach[0].data");

        let mut raw = valid();
        raw["requests~attach"] = json!([{"type": "t", "data": {"json": {}}}]);
        assert_eq!(field_of(&raw), "request_attach[0].id");
    }

    #[test]
    fn test_attachment_digest_mismatch() {
        let mut raw = valid();
        raw["requests~attach"] = json!([{
            "@id": "a",
            "type": "t",
            "data": {"json": {"x": 1}, "sha256": "00"}
        }]);
        assert_eq!(field_of(&raw), "request_attach[0].data.sha256");
    }

    #[test]
    fn test_multi_use_flag() {
        let mut raw = valid();
        raw["multi_use"] = json!(true);
        assert!(parse(&raw).unwrap().multi_use);

        raw["multi_use"] = json!("yes");
        assert_eq!(field_of(&raw), "multi_use");
    }

    #[test]
    fn test_parse_url() {
        let invitation = parse(&valid()).unwrap();
        let url = invitation
            .to_url(&Url::parse("https://faber.example.com/invite").unwrap())
            .unwrap();

        let parsed = parse_url(url.as_str()).unwrap();
        assert_eq!(parsed, invitation);

        let err = parse_url("https://faber.example.com/invite?c_i=abc").unwrap_err();
        assert_eq!(err.field(), Some("url"));
    }
}
