//! Question extraction from inbound DoH requests.
//!
//! The extracted question only feeds diagnostics and the audit record. The
//! original inbound request — not the question — is what gets fanned out to
//! the upstream providers.

use std::collections::HashMap;

use axum::http::header::ACCEPT;
use axum::http::HeaderMap;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hickory_proto::op::Message;
use serde::Serialize;

use crate::error::GatewayError;

/// Media types a GET request may ask for.
pub const SUPPORTED_ACCEPT_HEADERS: [&str; 2] =
    ["application/dns-json", "application/dns-message"];

/// The canonical question of an inbound query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub name: String,
    /// Record type name ("A", "AAAA", ...); empty when the client did not
    /// specify one.
    #[serde(rename = "type")]
    pub record_type: String,
}

/// Extract the question from a GET request.
///
/// The Accept header must be exactly one of [`SUPPORTED_ACCEPT_HEADERS`].
/// A `dns` parameter (base64 wire-format message) takes precedence over the
/// `name`/`type` parameter form.
pub fn from_get(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<Question, GatewayError> {
    let accept = headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !SUPPORTED_ACCEPT_HEADERS.contains(&accept) {
        return Err(GatewayError::unsupported_accept());
    }

    if let Some(dns) = params.get("dns") {
        let raw = decode_base64(dns)?;
        return from_wire(&raw);
    }

    if let Some(name) = params.get("name") {
        return Ok(Question {
            name: name.clone(),
            record_type: params.get("type").cloned().unwrap_or_default(),
        });
    }

    Err(GatewayError::MissingQueryParameter)
}

/// Extract the question from a POST body (raw wire-format message).
pub fn from_post(body: &[u8]) -> Result<Question, GatewayError> {
    from_wire(body)
}

/// Decode a wire-format message and take its first question record.
fn from_wire(bytes: &[u8]) -> Result<Question, GatewayError> {
    let message = Message::from_vec(bytes).map_err(|_| GatewayError::MalformedPacket)?;
    let query = message
        .queries()
        .first()
        .ok_or(GatewayError::MalformedPacket)?;

    // Wire-decoded names are fully qualified; strip the root dot so the
    // `dns=` and `name=` forms of the same query extract identically.
    let name = query.name().to_utf8();
    let name = name.strip_suffix('.').unwrap_or(&name).to_string();

    Ok(Question {
        name,
        record_type: query.query_type().to_string(),
    })
}

/// The `dns` parameter is base64url without padding per RFC 8484, but some
/// clients send the standard alphabet; accept both.
fn decode_base64(encoded: &str) -> Result<Vec<u8>, GatewayError> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .or_else(|_| STANDARD.decode(encoded))
        .map_err(|_| GatewayError::MalformedPacket)
}
