//! Concurrent upstream dispatch.
//!
//! Every configured provider receives a copy of the inbound request, all at
//! once, and every dispatch is awaited — a join over N tasks, not a race.
//! Result order is configured provider order, never completion order, so the
//! selector's first-match rules stay deterministic. A provider failure
//! (network error, non-2xx, task panic) is folded into its own result and
//! never aborts a sibling.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;

use crate::config::ProviderConfig;
use crate::dns::classify;
use crate::proxy::diagnostics::HEADER_RESPONSE_FROM;

/// Headers that should NOT be forwarded (hop-by-hop headers).
pub(crate) const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
];

/// One provider's classified outcome for a single inbound request.
///
/// Created once during fanout and read-only afterwards: the selector, the
/// diagnostics annotator, and the audit sink all consume the same list.
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub host: String,
    pub path: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub blocked: bool,
    pub possibly_blocked: bool,
    /// True iff the upstream did not produce a 2xx response.
    pub failed: bool,
    pub is_main: bool,
}

impl ProviderResult {
    pub fn identity(&self) -> String {
        format!("{}{}", self.host, self.path)
    }
}

/// Send the inbound request to every provider concurrently and collect the
/// classified results in configured order.
pub async fn dispatch_all(
    client: &reqwest::Client,
    providers: &[ProviderConfig],
    method: Method,
    headers: &HeaderMap,
    body: Bytes,
) -> Vec<ProviderResult> {
    let mut handles = Vec::with_capacity(providers.len());
    for provider in providers {
        handles.push(tokio::spawn(send_one(
            client.clone(),
            provider.clone(),
            method.clone(),
            headers.clone(),
            body.clone(),
        )));
    }

    // Awaiting in spawn order keeps results aligned with configured provider
    // order while all requests run concurrently.
    let mut results = Vec::with_capacity(providers.len());
    for (provider, handle) in providers.iter().zip(handles) {
        match handle.await {
            Ok(result) => results.push(result),
            Err(error) => {
                tracing::error!(
                    provider = %provider.identity(),
                    error = %error,
                    "Provider dispatch task failed"
                );
                results.push(failure(provider, StatusCode::BAD_GATEWAY));
            }
        }
    }
    results
}

/// Dispatch one upstream request; infallible by design — every failure mode
/// becomes a `failed` result.
async fn send_one(
    client: reqwest::Client,
    provider: ProviderConfig,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> ProviderResult {
    let url = provider_url(&provider);
    let upstream_headers = upstream_headers(&headers, &provider);

    let sent = client
        .request(method, &url)
        .headers(upstream_headers)
        .body(body)
        .send()
        .await;

    let response = match sent {
        Ok(response) => response,
        Err(error) => {
            let status = if error.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            tracing::warn!(provider = %provider.identity(), error = %error, "Upstream request failed");
            return failure(&provider, status);
        }
    };

    let status = response.status();
    let mut response_headers = response.headers().clone();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(error) => {
            tracing::warn!(provider = %provider.identity(), error = %error, "Failed to read upstream body");
            return failure(&provider, StatusCode::BAD_GATEWAY);
        }
    };

    set_response_from(&mut response_headers, &provider);

    if !status.is_success() {
        return ProviderResult {
            host: provider.host,
            path: provider.path,
            status,
            headers: response_headers,
            body,
            blocked: false,
            possibly_blocked: false,
            failed: true,
            is_main: provider.main,
        };
    }

    let content_type = response_headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let class = classify::decode_payload(content_type, &body).classify();

    ProviderResult {
        host: provider.host,
        path: provider.path,
        status,
        headers: response_headers,
        body,
        blocked: class.blocked,
        possibly_blocked: class.possibly_blocked,
        failed: false,
        is_main: provider.main,
    }
}

fn provider_url(provider: &ProviderConfig) -> String {
    format!("https://{}:443{}", provider.host, provider.path)
}

/// Inbound headers minus hop-by-hop ones, with the provider's static overlay
/// inserted last so it overrides whatever the client sent.
fn upstream_headers(inbound: &HeaderMap, provider: &ProviderConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound.iter() {
        let name_str = name.as_str();
        if HOP_BY_HOP_HEADERS.contains(&name_str) || name_str == "content-length" {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    for (key, value) in &provider.headers {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => {
                tracing::warn!(
                    provider = %provider.identity(),
                    header = %key,
                    "Skipping invalid provider header override"
                );
            }
        }
    }

    headers
}

fn set_response_from(headers: &mut HeaderMap, provider: &ProviderConfig) {
    if let Ok(value) = HeaderValue::from_str(&provider.identity()) {
        headers.insert(HEADER_RESPONSE_FROM, value);
    }
}

fn failure(provider: &ProviderConfig, status: StatusCode) -> ProviderResult {
    let mut headers = HeaderMap::new();
    set_response_from(&mut headers, provider);

    ProviderResult {
        host: provider.host.clone(),
        path: provider.path.clone(),
        status,
        headers,
        body: Bytes::new(),
        blocked: false,
        possibly_blocked: false,
        failed: true,
        is_main: provider.main,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn provider_with_headers(overrides: &[(&str, &str)]) -> ProviderConfig {
        ProviderConfig {
            host: "dns.example".to_string(),
            path: "/dns-query".to_string(),
            headers: overrides
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            main: false,
        }
    }

    #[test]
    fn test_provider_url_pins_https_port_443() {
        let provider = ProviderConfig {
            host: "cloudflare-dns.com".to_string(),
            path: "/dns-query".to_string(),
            headers: HashMap::new(),
            main: true,
        };
        assert_eq!(
            provider_url(&provider),
            "https://cloudflare-dns.com:443/dns-query"
        );
    }

    #[test]
    fn test_hop_by_hop_headers_stripped() {
        let mut inbound = HeaderMap::new();
        inbound.insert("accept", HeaderValue::from_static("application/dns-json"));
        inbound.insert("connection", HeaderValue::from_static("keep-alive"));
        inbound.insert("host", HeaderValue::from_static("gateway.example"));
        inbound.insert("content-length", HeaderValue::from_static("42"));

        let headers = upstream_headers(&inbound, &provider_with_headers(&[]));
        assert_eq!(
            headers.get("accept").unwrap(),
            &HeaderValue::from_static("application/dns-json")
        );
        assert!(headers.get("connection").is_none());
        assert!(headers.get("host").is_none());
        assert!(headers.get("content-length").is_none());
    }

    #[test]
    fn test_provider_overlay_overrides_inbound() {
        let mut inbound = HeaderMap::new();
        inbound.insert("accept", HeaderValue::from_static("application/dns-json"));

        let provider = provider_with_headers(&[
            ("accept", "application/dns-message"),
            ("x-extra", "1"),
        ]);
        let headers = upstream_headers(&inbound, &provider);

        assert_eq!(
            headers.get("accept").unwrap(),
            &HeaderValue::from_static("application/dns-message")
        );
        assert_eq!(headers.get("x-extra").unwrap(), &HeaderValue::from_static("1"));
    }

    #[test]
    fn test_invalid_overlay_header_skipped() {
        let provider = provider_with_headers(&[("bad header name", "x")]);
        let headers = upstream_headers(&HeaderMap::new(), &provider);
        assert!(headers.is_empty());
    }

    /// Dispatch really joins in configured index order and folds each
    /// provider's failure into its own result. The `.invalid` TLD is
    /// reserved, so both sends fail at resolution without a live upstream.
    #[tokio::test]
    async fn test_dispatch_all_joins_in_configured_order_with_isolated_failures() {
        let providers = vec![
            ProviderConfig {
                host: "first.invalid".to_string(),
                path: "/dns-query".to_string(),
                headers: HashMap::new(),
                main: false,
            },
            ProviderConfig {
                host: "second.invalid".to_string(),
                path: "/dns-query".to_string(),
                headers: HashMap::new(),
                main: true,
            },
        ];
        let client = reqwest::Client::new();

        let results = dispatch_all(
            &client,
            &providers,
            Method::GET,
            &HeaderMap::new(),
            Bytes::new(),
        )
        .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].identity(), "first.invalid/dns-query");
        assert_eq!(results[1].identity(), "second.invalid/dns-query");
        assert!(!results[0].is_main);
        assert!(results[1].is_main);
        for result in &results {
            assert!(result.failed);
            assert!(!result.blocked);
            assert!(!result.possibly_blocked);
            assert!(result.status.is_server_error());
        }
    }

    #[test]
    fn test_failure_result_shape() {
        let provider = provider_with_headers(&[]);
        let result = failure(&provider, StatusCode::BAD_GATEWAY);

        assert!(result.failed);
        assert!(!result.blocked);
        assert!(!result.possibly_blocked);
        assert_eq!(result.status, StatusCode::BAD_GATEWAY);
        assert_eq!(result.identity(), "dns.example/dns-query");
        assert_eq!(
            result.headers.get(HEADER_RESPONSE_FROM).unwrap(),
            &HeaderValue::from_static("dns.example/dns-query")
        );
    }
}
