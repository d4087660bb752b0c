//! # sos-relay
//!
//! SOS relay binary: loads settings, starts logging and metrics, and serves
//! the WebSocket relay until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sos_core::logging::{LogFormat, init_subscriber};
use sos_server::sms::TextbeeGateway;
use sos_server::{RelayServer, ServerConfig};
use sos_settings::RelaySettings;
use tracing::{info, warn};

/// How long shutdown waits for the server and relay tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// SOS relay server.
#[derive(Parser, Debug)]
#[command(name = "sos-relay", about = "Real-time SOS relay server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.sos-relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `sos_server=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: `compact` or `json`.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    /// Settings file, then env, then these flags.
    fn resolve_settings(&self) -> Result<RelaySettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(sos_settings::settings_path);
        let mut settings = sos_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        sos_settings::validate(&settings).context("Invalid settings")?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.resolve_settings()?;

    init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics =
        sos_server::metrics::install_recorder().context("Failed to install metrics recorder")?;
    let mut server = RelayServer::new(ServerConfig::from(&settings.server)).with_metrics(metrics);

    match TextbeeGateway::from_settings(&settings.sms).context("Failed to build SMS gateway")? {
        Some(gateway) => {
            info!(endpoint = gateway.endpoint(), "SMS gateway configured");
            server = server.with_sms_gateway(Arc::new(gateway));
        }
        None => info!("SMS gateway not configured, /send-sms will answer 503"),
    }

    let (addr, _serve) = server.listen().await.context("Failed to bind server")?;
    info!(%addr, "SOS relay listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("shutting down");
    if server.stop(Some(SHUTDOWN_TIMEOUT)).await {
        info!("shutdown complete");
    } else {
        warn!("shutdown timed out, exiting with tasks still running");
    }
    Ok(())
}
