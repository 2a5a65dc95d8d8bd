//! Gateway error taxonomy.
//!
//! Every variant maps to a client-facing HTTP response. Per-provider upstream
//! failures are not errors — they are captured as `failed = true` on a
//! [`ProviderResult`](crate::proxy::fanout::ProviderResult) and only ever
//! influence selection.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::dns::question::SUPPORTED_ACCEPT_HEADERS;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// GET with an Accept header outside the supported DoH media types.
    #[error("Unsupported Accept header\n\nUse one of: {0}")]
    UnsupportedAccept(String),

    #[error("GET requests must include one of name or dns as query parameters")]
    MissingQueryParameter,

    #[error("Failed to decode DNS packet")]
    MalformedPacket,

    /// More than one provider on the endpoint has `main = true`.
    #[error("Multiple DoH providers have main set to true")]
    MainProviderConflict,

    /// No blocking signal and no successful main provider to fall back to.
    #[error("All providers responded with an error")]
    UpstreamsExhausted,

    /// The selector's defensive final branch. Unreachable under the stated
    /// policy; `proxy::select` carries a test proving it.
    #[error("An unknown error occurred")]
    UnknownSelection,
}

impl GatewayError {
    pub fn unsupported_accept() -> Self {
        GatewayError::UnsupportedAccept(SUPPORTED_ACCEPT_HEADERS.join(", "))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::UnsupportedAccept(_) => StatusCode::NOT_ACCEPTABLE,
            GatewayError::MissingQueryParameter => StatusCode::BAD_REQUEST,
            GatewayError::MalformedPacket => StatusCode::BAD_REQUEST,
            GatewayError::MainProviderConflict => StatusCode::CONFLICT,
            GatewayError::UpstreamsExhausted => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::UnknownSelection => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
