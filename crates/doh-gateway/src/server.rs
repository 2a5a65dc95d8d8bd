//! Axum HTTP server: per-endpoint routes, the fanout request handler,
//! graceful shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use tracing::Instrument;
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::config::GatewayConfig;
use crate::dns::question;
use crate::proxy::fanout::{self, ProviderResult, HOP_BY_HOP_HEADERS};
use crate::proxy::{diagnostics, select};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub upstream_client: reqwest::Client,
    pub audit: AuditSink,
}

/// Build and run the HTTP server.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();

    // One GET+POST route per configured endpoint path; everything else 404s
    // with an empty body.
    let mut app = Router::new();
    for path in state.config.endpoints.keys() {
        app = app.route(path, get(handle_query).post(handle_query));
    }
    let app = app
        .fallback(handle_unconfigured)
        .with_state(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "doh-gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("doh-gateway shut down gracefully");
    Ok(())
}

/// Handler for every configured DoH endpoint.
///
/// 1. Extract the question (diagnostics/audit only) — client-input errors
///    short-circuit before any fanout
/// 2. Fan the unmodified inbound request out to all providers and join
/// 3. Select exactly one response (or synthesize an error)
/// 4. Annotate with aggregate diagnostic headers
/// 5. Dispatch the audit record off the response path
async fn handle_query(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_timestamp = SystemTime::now();
    let endpoint = uri.path().to_string();

    // Routes are built from this same map, so the lookup only misses if the
    // router normalized the path differently than configured.
    let Some(endpoint_config) = state.config.endpoints.get(&endpoint) else {
        return (StatusCode::NOT_FOUND, "").into_response();
    };
    let providers = endpoint_config.providers.clone();

    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "doh_request",
        request_id = %request_id,
        endpoint = %endpoint,
        method = %method,
    );

    async move {
        let question = if method == Method::GET {
            question::from_get(&headers, &params)
        } else {
            question::from_post(&body)
        };
        let question = match question {
            Ok(question) => question,
            Err(error) => {
                tracing::debug!(error = %error, "Rejecting client input");
                return error.into_response();
            }
        };

        let results = fanout::dispatch_all(
            &state.upstream_client,
            &providers,
            method.clone(),
            &headers,
            body,
        )
        .await;

        let selected = select::select(&results);
        let response_from = selected
            .as_ref()
            .ok()
            .map(|&index| results[index].identity());

        let mut response = match selected {
            Ok(index) => upstream_response(&results[index]),
            Err(error) => {
                tracing::warn!(error = %error, "No provider response selected");
                error.into_response()
            }
        };
        diagnostics::annotate(response.headers_mut(), &results);

        if state.config.debug {
            tracing::info!(
                endpoint = %endpoint,
                response_from = response_from.as_deref().unwrap_or(""),
                response_codes = %diagnostics::response_codes(&results),
                possibly_blocked_by = %diagnostics::possibly_blocked_by(&results),
                blocked_by = %diagnostics::blocked_by(&results),
                "Query diagnostics"
            );
        }

        state
            .audit
            .dispatch(request_timestamp, endpoint, question, response_from, results);

        response
    }
    .instrument(span)
    .await
}

/// Mirror the selected provider's status, headers, and body back to the
/// client. The response-from header was set on the result during fanout and
/// rides along here.
fn upstream_response(result: &ProviderResult) -> Response {
    let mut builder = Response::builder().status(result.status);

    for (name, value) in result.headers.iter() {
        let name_str = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&name_str) || name_str == "content-length" {
            continue;
        }
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from(result.body.clone()))
        .unwrap_or_else(|error| {
            tracing::error!(error = %error, "Failed to build response");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        })
}

/// Any path without a configured provider list.
async fn handle_unconfigured() -> Response {
    (StatusCode::NOT_FOUND, "").into_response()
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, draining connections...");
}
