//! Best-effort audit log delivery (Loki push API shape).
//!
//! Dispatched after the client-facing response is finalized and never
//! awaited on the response path. Delivery failures are logged and swallowed,
//! not retried. Record maps are built fresh per request; nothing is shared
//! across concurrent requests.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::AuditConfig;
use crate::dns::question::Question;
use crate::proxy::fanout::ProviderResult;

/// Stream label identifying this gateway in the log store.
pub const AUDIT_SOURCE: &str = "doh-gateway";

/// Fire-and-forget sink for per-request audit records.
#[derive(Clone)]
pub struct AuditSink {
    client: reqwest::Client,
    config: AuditConfig,
}

/// One structured log record per request.
#[derive(Debug, Serialize)]
pub struct AuditRecord {
    endpoint: String,
    question: Question,
    result_status: &'static str,
    blocked_by: BTreeMap<String, bool>,
    possibly_blocked_by: BTreeMap<String, bool>,
    response_codes: BTreeMap<String, u16>,
    response_from: Option<String>,
}

impl AuditRecord {
    pub fn new(
        endpoint: String,
        question: Question,
        response_from: Option<String>,
        results: &[ProviderResult],
    ) -> Self {
        let mut blocked_by = BTreeMap::new();
        let mut possibly_blocked_by = BTreeMap::new();
        let mut response_codes = BTreeMap::new();
        for result in results {
            let identity = result.identity();
            blocked_by.insert(identity.clone(), result.blocked);
            possibly_blocked_by.insert(identity.clone(), result.possibly_blocked);
            response_codes.insert(identity, result.status.as_u16());
        }

        // Overall status follows the provider whose response was returned;
        // synthesized errors have no response-from and count as not blocked.
        let flagged = |pick: fn(&ProviderResult) -> bool| {
            response_from
                .as_deref()
                .is_some_and(|from| results.iter().any(|r| pick(r) && r.identity() == from))
        };
        let result_status = if flagged(|r| r.blocked) {
            "blocked"
        } else if flagged(|r| r.possibly_blocked) {
            "possibly blocked"
        } else {
            "not blocked"
        };

        Self {
            endpoint,
            question,
            result_status,
            blocked_by,
            possibly_blocked_by,
            response_codes,
            response_from,
        }
    }
}

/// Wrap a record in the push wire format: one stream, one value pair of
/// nanosecond timestamp and the record serialized as a JSON string.
pub fn push_body(timestamp: SystemTime, record: &AuditRecord) -> anyhow::Result<serde_json::Value> {
    let nanos = timestamp
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .to_string();

    Ok(serde_json::json!({
        "streams": [{
            "stream": { "source": AUDIT_SOURCE },
            "values": [[nanos, serde_json::to_string(record)?]],
        }]
    }))
}

impl AuditSink {
    pub fn new(client: reqwest::Client, config: AuditConfig) -> Self {
        Self { client, config }
    }

    /// Spawn delivery of one audit record. Returns immediately; the response
    /// path never waits on this.
    pub fn dispatch(
        &self,
        timestamp: SystemTime,
        endpoint: String,
        question: Question,
        response_from: Option<String>,
        results: Vec<ProviderResult>,
    ) {
        if !self.config.enabled {
            return;
        }

        let sink = self.clone();
        tokio::spawn(async move {
            let record = AuditRecord::new(endpoint, question, response_from, &results);
            if let Err(error) = sink.push(timestamp, &record).await {
                tracing::warn!(error = %error, "Audit log delivery failed");
            }
        });
    }

    async fn push(&self, timestamp: SystemTime, record: &AuditRecord) -> anyhow::Result<()> {
        let body = push_body(timestamp, record)?;
        let response = self
            .client
            .post(&self.config.url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("audit endpoint returned {}", response.status());
        }
        Ok(())
    }
}
