//! DoH gateway: fans a single DNS-over-HTTPS query out to every configured
//! upstream resolver, classifies each answer for blocking signals, and
//! returns exactly one deterministically selected response.

mod audit;
mod config;
mod dns;
mod error;
mod proxy;
mod server;

use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use audit::AuditSink;
use config::GatewayConfig;
use server::AppState;

fn main() -> anyhow::Result<()> {
    // Determine config path
    let config_path = {
        let args: Vec<String> = std::env::args().collect();
        // Check for --config flag first
        args.iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1).cloned())
            // Fall back to positional arg
            .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
            .or_else(|| std::env::var("DOH_GATEWAY_CONFIG").ok())
            .unwrap_or_else(|| "doh-gateway.toml".to_string())
    };

    // Load configuration; a dual-main endpoint fails startup here
    let config = GatewayConfig::load(&config_path)?;
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        init_tracing(&config.log_level);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            endpoints = config.endpoints.len(),
            audit_enabled = config.audit.enabled,
            "Starting doh-gateway"
        );

        run(config).await
    })
}

fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .init();
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    // No timeout on the upstream client: the handler joins all providers and
    // the aggregate is bounded by the slowest one.
    let upstream_client = reqwest::Client::builder().build()?;

    // Audit delivery is off the response path and gets its own bounded client
    let audit_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.audit.timeout_secs))
        .build()?;
    let audit = AuditSink::new(audit_client, config.audit.clone());

    let state = AppState {
        config,
        upstream_client,
        audit,
    };

    server::run(state).await
}
