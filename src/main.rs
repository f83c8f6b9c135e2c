use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use ems_agent::vendor::adapter_for;
use ems_agent::{
    Config, ControlLoop, EnvTokenProvider, HttpGateway, HttpPolicyClient, HttpTelemetryReporter,
    TokenProvider, TokioCommandRunner, VendorKind,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let vendor: VendorKind = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("AGENT_VENDOR").ok())
        .context("usage: ems-agent <sungrow|enphase|goodwe> (or set AGENT_VENDOR)")?
        .parse()?;
    let config = Arc::new(Config::from_env(vendor)?);

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(if config.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let tokens = Arc::new(EnvTokenProvider::new());
    info!(
        "[{}] Agent up. verify_ssl={} debug={}",
        config.vendor, config.verify_tls, config.debug
    );
    info!(
        "[{}] HA_URL={} token_present={} disable_ha={}",
        config.vendor,
        config.gateway_api_url(),
        tokens.token().is_some(),
        config.gateway_disabled
    );

    let upstream = ems_agent::upstream_client(config.verify_tls).context("building HTTP client")?;
    let gateway = Arc::new(HttpGateway::new(
        reqwest::Client::new(),
        config.gateway_api_url(),
        tokens,
        config.gateway_disabled,
    ));
    let policy = Arc::new(HttpPolicyClient::new(
        upstream.clone(),
        config.policy_url.clone(),
        config.api_key.clone(),
    ));
    let reporter = Arc::new(HttpTelemetryReporter::new(
        upstream,
        config.telemetry_url.clone(),
        config.api_key.clone(),
    ));

    let control = ControlLoop::new(
        config.clone(),
        policy,
        Arc::from(adapter_for(&config)),
        gateway,
        Arc::new(TokioCommandRunner::default()),
        reporter,
    );
    control.run().await;
    Ok(())
}
