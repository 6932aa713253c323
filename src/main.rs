//! # beacon
//!
//! Relay binary: loads settings, starts the public (and optional admin)
//! listener, and runs until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use beacon_core::{LogFormat, init_subscriber};
use beacon_server::BeaconServer;
use beacon_settings::BeaconSettings;
use clap::Parser;

/// Token-addressed notification relay.
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about = "Token-addressed notification relay")]
struct Cli {
    /// Settings file (JSON). Missing files are ignored.
    #[arg(long, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind, overriding settings.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding settings and `PORT`.
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    fn load_settings(&self) -> Result<BeaconSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(beacon_settings::settings_path);
        let mut settings = beacon_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    if settings.server.trust_forwarded_for {
        tracing::warn!(
            "trusting X-Forwarded-For: notification addresses can be spoofed unless a reverse proxy overwrites the header"
        );
    }

    let mut server = BeaconServer::from_settings(&settings)
        .await
        .context("Failed to start notifier")?;
    if settings.server.admin_port.is_some() {
        let handle = beacon_server::metrics::install_recorder()
            .context("Failed to install metrics recorder")?;
        server = server.with_metrics(handle);
    }

    let addr = server.listen().await.context("Failed to bind public listener")?;
    let admin = server
        .listen_admin()
        .await
        .context("Failed to bind admin listener")?;
    tracing::info!(%addr, ?admin, "beacon relay ready");

    beacon_server::wait_for_signal().await;
    tracing::info!("shutting down");
    server.shutdown_gracefully().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_are_empty() {
        let cli = Cli::parse_from(["beacon"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "beacon",
            "--config",
            "/tmp/beacon-test.json",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/beacon-test.json")));
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(cli.port, Some(8080));
    }

    #[test]
    fn cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["beacon", "--port", "99999"]).is_err());
    }

    #[test]
    fn overrides_apply_to_loaded_settings() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/beacon.json")),
            host: Some("127.0.0.1".into()),
            port: Some(6001),
        };
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 6001);
    }
}
