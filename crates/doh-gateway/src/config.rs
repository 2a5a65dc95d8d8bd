//! Configuration types and loading logic.

use std::collections::{BTreeMap, HashMap};

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Request path -> ordered upstream provider list.
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointConfig>,

    #[serde(default)]
    pub audit: AuditConfig,

    /// Emit a per-request diagnostics log line (response-from, response
    /// codes, blocked-by sets) in addition to the usual request span.
    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

/// One inbound endpoint: the ordered set of upstream DoH providers its
/// queries are fanned out to.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub providers: Vec<ProviderConfig>,
}

/// A single upstream DoH provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub host: String,
    pub path: String,

    /// Static headers overlaid on (overriding) the inbound request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// The provider whose answer is used when no blocking signal wins.
    #[serde(default)]
    pub main: bool,
}

impl ProviderConfig {
    /// Identity string used in diagnostic headers and audit records.
    pub fn identity(&self) -> String {
        format!("{}{}", self.host, self.path)
    }
}

/// Best-effort audit log delivery (Loki push API shape).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_audit_timeout")]
    pub timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0:8053".to_string()
}

fn default_audit_timeout() -> u64 {
    10
}

impl GatewayConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (DOH_GATEWAY_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let mut config: GatewayConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("DOH_GATEWAY_").split("__"))
            .extract()?;

        // Direct env var overrides for sensitive values
        if let Ok(username) = std::env::var("DOH_GATEWAY_AUDIT_USERNAME") {
            config.audit.username = username;
        }
        if let Ok(password) = std::env::var("DOH_GATEWAY_AUDIT_PASSWORD") {
            config.audit.password = password;
        }

        Ok(config)
    }

    /// Fail fast on misconfiguration: at most one `main` provider per
    /// endpoint. The selector enforces the same invariant at request time
    /// (409) for provider lists that do not come from this loader.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (path, endpoint) in &self.endpoints {
            let mains = endpoint.providers.iter().filter(|p| p.main).count();
            if mains > 1 {
                anyhow::bail!(
                    "endpoint '{}' has {} providers with main = true, expected at most one",
                    path,
                    mains
                );
            }
        }
        Ok(())
    }
}
