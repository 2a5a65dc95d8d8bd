//! Upstream answer decoding and blocking classification.
//!
//! Filtering resolvers signal a blocked lookup either with a null-route
//! answer address or with NXDOMAIN. Both DoH response encodings (JSON and
//! binary wire format) are decoded into one tagged shape so the classifier
//! itself stays encoding-agnostic.

use hickory_proto::op::{Message, ResponseCode as WireResponseCode};
use hickory_proto::rr::RData;
use serde::Deserialize;

/// Answer addresses that mean "blocked" when returned by a filtering
/// resolver.
pub const NULL_ROUTE_SENTINELS: [&str; 2] = ["0.0.0.0", "::"];

/// Response code as it appears in the decoded payload: the JSON profile
/// carries a number (occasionally a string), the wire profile a code name.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseCode {
    Numeric(i64),
    Named(String),
}

impl ResponseCode {
    fn is_nxdomain(&self) -> bool {
        match self {
            ResponseCode::Numeric(code) => *code == 3,
            ResponseCode::Named(name) => name.eq_ignore_ascii_case("NXDOMAIN"),
        }
    }
}

/// Blocking signals extracted from one upstream answer. The flags are
/// independent; both may be set on the same result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub blocked: bool,
    pub possibly_blocked: bool,
}

/// Classify a decoded answer for blocking signals.
pub fn classify(rcode: Option<&ResponseCode>, answers: &[String]) -> Classification {
    Classification {
        blocked: answers
            .iter()
            .any(|answer| NULL_ROUTE_SENTINELS.contains(&answer.as_str())),
        possibly_blocked: rcode.is_some_and(ResponseCode::is_nxdomain),
    }
}

/// A successful upstream body reduced to the parts classification needs.
///
/// `Opaque` covers bodies in neither DoH profile and bodies that fail to
/// decode; they classify as not blocked.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAnswer {
    pub rcode: Option<ResponseCode>,
    pub answers: Vec<String>,
}

impl DecodedAnswer {
    const OPAQUE: DecodedAnswer = DecodedAnswer {
        rcode: None,
        answers: Vec::new(),
    };

    pub fn classify(&self) -> Classification {
        classify(self.rcode.as_ref(), &self.answers)
    }
}

/// JSON DoH profile body (the subset classification reads).
#[derive(Debug, Deserialize)]
struct JsonDohBody {
    #[serde(rename = "Status", default)]
    status: serde_json::Value,
    #[serde(rename = "Answer", default)]
    answer: Vec<JsonDohAnswer>,
}

#[derive(Debug, Deserialize)]
struct JsonDohAnswer {
    #[serde(default)]
    data: String,
}

/// Decode a successful upstream body according to its Content-Type.
pub fn decode_payload(content_type: Option<&str>, body: &[u8]) -> DecodedAnswer {
    let Some(content_type) = content_type else {
        return DecodedAnswer::OPAQUE;
    };

    if is_json_profile(content_type) {
        decode_json(body)
    } else if is_wire_profile(content_type) {
        decode_wire(body)
    } else {
        DecodedAnswer::OPAQUE
    }
}

fn is_json_profile(content_type: &str) -> bool {
    content_type.contains("application/dns-json") || content_type.contains("application/json")
}

fn is_wire_profile(content_type: &str) -> bool {
    content_type.contains("application/dns-message")
}

fn decode_json(body: &[u8]) -> DecodedAnswer {
    let Ok(parsed) = serde_json::from_slice::<JsonDohBody>(body) else {
        return DecodedAnswer::OPAQUE;
    };

    let rcode = match parsed.status {
        serde_json::Value::Number(number) => number.as_i64().map(ResponseCode::Numeric),
        serde_json::Value::String(name) => Some(ResponseCode::Named(name)),
        _ => None,
    };

    DecodedAnswer {
        rcode,
        answers: parsed.answer.into_iter().map(|a| a.data).collect(),
    }
}

fn decode_wire(body: &[u8]) -> DecodedAnswer {
    let Ok(message) = Message::from_vec(body) else {
        return DecodedAnswer::OPAQUE;
    };

    let mut answers = Vec::new();
    for record in message.answers() {
        match record.data() {
            RData::A(a) => answers.push(a.0.to_string()),
            RData::AAAA(aaaa) => answers.push(aaaa.0.to_string()),
            _ => {}
        }
    }

    DecodedAnswer {
        rcode: Some(ResponseCode::Named(
            rcode_name(message.response_code()).to_string(),
        )),
        answers,
    }
}

fn rcode_name(rcode: WireResponseCode) -> &'static str {
    match rcode {
        WireResponseCode::NoError => "NOERROR",
        WireResponseCode::NXDomain => "NXDOMAIN",
        WireResponseCode::ServFail => "SERVFAIL",
        WireResponseCode::Refused => "REFUSED",
        WireResponseCode::NotImp => "NOTIMP",
        WireResponseCode::FormErr => "FORMERR",
        _ => "UNKNOWN",
    }
}
