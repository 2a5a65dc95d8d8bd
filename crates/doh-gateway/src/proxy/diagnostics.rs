//! Aggregate diagnostic headers describing every provider's outcome.

use axum::http::{HeaderMap, HeaderValue};

use crate::proxy::fanout::ProviderResult;

/// Which provider's body/status won selection. Set per provider during
/// fanout; present on the outgoing response only when one was selected.
pub const HEADER_RESPONSE_FROM: &str = "x-doh-gateway-response-from";

/// `host+path:status` for every provider, fanout order, comma-joined.
pub const HEADER_RESPONSE_CODES: &str = "x-doh-gateway-response-codes";

pub const HEADER_POSSIBLY_BLOCKED_BY: &str = "x-doh-gateway-possibly-blocked-by";

pub const HEADER_BLOCKED_BY: &str = "x-doh-gateway-blocked-by";

pub fn response_codes(results: &[ProviderResult]) -> String {
    results
        .iter()
        .map(|r| format!("{}:{}", r.identity(), r.status.as_u16()))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn blocked_by(results: &[ProviderResult]) -> String {
    identities(results, |r| r.blocked)
}

pub fn possibly_blocked_by(results: &[ProviderResult]) -> String {
    identities(results, |r| r.possibly_blocked)
}

fn identities(results: &[ProviderResult], flagged: impl Fn(&ProviderResult) -> bool) -> String {
    results
        .iter()
        .filter(|r| flagged(r))
        .map(ProviderResult::identity)
        .collect::<Vec<_>>()
        .join(",")
}

/// Attach the aggregate headers to an outgoing response. Applied to selected
/// upstream responses and synthesized errors alike.
pub fn annotate(headers: &mut HeaderMap, results: &[ProviderResult]) {
    insert(headers, HEADER_RESPONSE_CODES, response_codes(results));
    insert(headers, HEADER_POSSIBLY_BLOCKED_BY, possibly_blocked_by(results));
    insert(headers, HEADER_BLOCKED_BY, blocked_by(results));
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: String) {
    match HeaderValue::from_str(&value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(error) => {
            tracing::warn!(header = name, error = %error, "Skipping unencodable diagnostic header");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::StatusCode;
    use bytes::Bytes;

    use crate::config::ProviderConfig;
    use crate::dns::classify;
    use crate::proxy::select;

    fn result(host: &str, status: StatusCode, blocked: bool, possibly: bool) -> ProviderResult {
        ProviderResult {
            host: host.to_string(),
            path: "/dns-query".to_string(),
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            blocked,
            possibly_blocked: possibly,
            failed: !status.is_success(),
            is_main: false,
        }
    }

    #[test]
    fn test_response_codes_in_fanout_order() {
        let results = vec![
            result("a.example", StatusCode::OK, false, false),
            result("b.example", StatusCode::BAD_GATEWAY, false, false),
        ];
        assert_eq!(
            response_codes(&results),
            "a.example/dns-query:200,b.example/dns-query:502"
        );
    }

    #[test]
    fn test_flag_headers_list_only_flagged_providers() {
        let results = vec![
            result("a.example", StatusCode::OK, true, false),
            result("b.example", StatusCode::OK, false, true),
            result("c.example", StatusCode::OK, true, true),
        ];
        assert_eq!(blocked_by(&results), "a.example/dns-query,c.example/dns-query");
        assert_eq!(
            possibly_blocked_by(&results),
            "b.example/dns-query,c.example/dns-query"
        );
    }

    #[test]
    fn test_annotate_sets_empty_values_when_nothing_flagged() {
        let results = vec![result("a.example", StatusCode::OK, false, false)];
        let mut headers = HeaderMap::new();
        annotate(&mut headers, &results);

        assert_eq!(headers.get(HEADER_RESPONSE_CODES).unwrap(), "a.example/dns-query:200");
        assert_eq!(headers.get(HEADER_BLOCKED_BY).unwrap(), "");
        assert_eq!(headers.get(HEADER_POSSIBLY_BLOCKED_BY).unwrap(), "");
    }

    /// End-to-end over the in-process pipeline, no network: a non-main
    /// provider null-routes the lookup while the main provider answers
    /// normally. The blocker must win selection and show up in the headers.
    #[test]
    fn test_blocked_non_main_beats_successful_main() {
        let classified = |config: &ProviderConfig, body: &[u8]| {
            let class = classify::decode_payload(Some("application/dns-json"), body).classify();
            ProviderResult {
                host: config.host.clone(),
                path: config.path.clone(),
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::copy_from_slice(body),
                blocked: class.blocked,
                possibly_blocked: class.possibly_blocked,
                failed: false,
                is_main: config.main,
            }
        };

        let blocker = ProviderConfig {
            host: "filter.example".to_string(),
            path: "/dns-query".to_string(),
            headers: Default::default(),
            main: false,
        };
        let main = ProviderConfig {
            host: "resolver.example".to_string(),
            path: "/dns-query".to_string(),
            headers: Default::default(),
            main: true,
        };

        let results = vec![
            classified(&blocker, br#"{"Status":0,"Answer":[{"data":"0.0.0.0"}]}"#),
            classified(&main, br#"{"Status":0,"Answer":[{"data":"93.184.216.34"}]}"#),
        ];

        let selected = select::select(&results).unwrap();
        assert_eq!(selected, 0);
        assert_eq!(results[selected].identity(), "filter.example/dns-query");
        assert_eq!(
            results[selected].body.as_ref(),
            br#"{"Status":0,"Answer":[{"data":"0.0.0.0"}]}"#
        );

        let mut headers = HeaderMap::new();
        annotate(&mut headers, &results);
        assert_eq!(headers.get(HEADER_BLOCKED_BY).unwrap(), "filter.example/dns-query");
        assert_eq!(headers.get(HEADER_POSSIBLY_BLOCKED_BY).unwrap(), "");
        assert_eq!(
            headers.get(HEADER_RESPONSE_CODES).unwrap(),
            "filter.example/dns-query:200,resolver.example/dns-query:200"
        );
    }
}
