//! Settings types with compiled defaults.
//!
//! Every struct is `#[serde(default)]`, so a partial JSON file or a single
//! environment variable only overrides the keys it names.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Default public listener port (the original deployment's fallback).
pub const DEFAULT_PORT: u16 = 5000;

/// Default Redis channel for cross-instance notifications.
pub const DEFAULT_CHANNEL: &str = "beacon:notifications";

/// Default MTA-STS upstream. `{domain}` is replaced by the requested host.
pub const DEFAULT_MTA_STS_URL_TEMPLATE: &str = "https://mta-sts.{domain}/.well-known/mta-sts.txt";

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconSettings {
    /// Listener and connection settings.
    pub server: ServerSettings,
    /// Cross-instance notifier settings.
    pub notifier: NotifierSettings,
    /// MTA-STS passthrough settings.
    pub mta_sts: MtaStsSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl BeaconSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.notifier.backend == NotifierBackend::Redis && self.notifier.redis_url.is_none() {
            return Err(SettingsError::InvalidValue(
                "notifier.redis_url is required when notifier.backend is \"redis\"".into(),
            ));
        }
        if self.notifier.channel.is_empty() {
            return Err(SettingsError::InvalidValue(
                "notifier.channel must not be empty".into(),
            ));
        }
        require_nonzero("server.send_queue_capacity", self.server.send_queue_capacity as u64)?;
        require_nonzero("server.heartbeat_interval_secs", self.server.heartbeat_interval_secs)?;
        require_nonzero("server.heartbeat_timeout_secs", self.server.heartbeat_timeout_secs)?;
        require_nonzero("notifier.publish_timeout_ms", self.notifier.publish_timeout_ms)?;
        require_nonzero("mta_sts.timeout_ms", self.mta_sts.timeout_ms)?;
        if self.server.port != 0 && self.server.admin_port == Some(self.server.port) {
            return Err(SettingsError::InvalidValue(format!(
                "server.admin_port must differ from server.port ({})",
                self.server.port
            )));
        }
        Ok(())
    }
}

fn require_nonzero(key: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(SettingsError::InvalidValue(format!("{key} must be greater than zero")));
    }
    Ok(())
}

/// Public and admin listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address for both listeners.
    pub host: String,
    /// Public listener port (`0` picks a free port).
    pub port: u16,
    /// Admin listener port serving `/health` and `/metrics`. Disabled when unset.
    pub admin_port: Option<u16>,
    /// Take the notification address from the first `X-Forwarded-For` entry.
    ///
    /// Only safe behind a reverse proxy that overwrites the header; any
    /// client can otherwise spoof its reported address.
    pub trust_forwarded_for: bool,
    /// Seconds between WebSocket pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a subscriber is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Outbound frames buffered per subscriber before new ones are dropped.
    pub send_queue_capacity: usize,
    /// Seconds to wait for tasks to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            admin_port: None,
            trust_forwarded_for: false,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            send_queue_capacity: 32,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Which broadcast substrate carries notifications between instances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierBackend {
    /// Single instance: deliver directly to the local registry.
    #[default]
    Local,
    /// Redis pub/sub channel shared by all instances.
    Redis,
}

/// Cross-instance notifier settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierSettings {
    /// Substrate to use.
    pub backend: NotifierBackend,
    /// Redis connection URL (`redis://host:6379/0`).
    pub redis_url: Option<String>,
    /// Pub/sub channel name.
    pub channel: String,
    /// Upper bound on a single publish before it is abandoned.
    pub publish_timeout_ms: u64,
    /// Delay before the subscriber loop reconnects after a failure.
    pub reconnect_delay_ms: u64,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            backend: NotifierBackend::Local,
            redis_url: None,
            channel: DEFAULT_CHANNEL.into(),
            publish_timeout_ms: 2_000,
            reconnect_delay_ms: 1_000,
        }
    }
}

/// MTA-STS passthrough settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MtaStsSettings {
    /// Serve `/mta-sts.txt?domain=...`. When off the path is a plain 404.
    pub enabled: bool,
    /// Upstream URL; `{domain}` is substituted.
    pub url_template: String,
    /// Upstream request timeout.
    pub timeout_ms: u64,
}

impl Default for MtaStsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url_template: DEFAULT_MTA_STS_URL_TEMPLATE.into(),
            timeout_ms: 5_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults() {
        let s = BeaconSettings::default();
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.server.port, 5000);
        assert!(s.server.admin_port.is_none());
        assert!(!s.server.trust_forwarded_for);
        assert_eq!(s.notifier.backend, NotifierBackend::Local);
        assert_eq!(s.notifier.channel, DEFAULT_CHANNEL);
        assert!(s.mta_sts.enabled);
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn defaults_validate() {
        assert!(BeaconSettings::default().validate().is_ok());
    }

    #[test]
    fn redis_without_url_is_invalid() {
        let mut s = BeaconSettings::default();
        s.notifier.backend = NotifierBackend::Redis;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("redis_url"));
        s.notifier.redis_url = Some("redis://127.0.0.1/".into());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn zero_queue_capacity_is_invalid() {
        let mut s = BeaconSettings::default();
        s.server.send_queue_capacity = 0;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(msg)) if msg.contains("send_queue_capacity"));
    }

    #[test]
    fn admin_port_clash_is_invalid() {
        let mut s = BeaconSettings::default();
        s.server.admin_port = Some(s.server.port);
        assert!(s.validate().is_err());
    }

    #[test]
    fn backend_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&NotifierBackend::Redis).unwrap(), r#""redis""#);
        let b: NotifierBackend = serde_json::from_str(r#""local""#).unwrap();
        assert_eq!(b, NotifierBackend::Local);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: BeaconSettings = serde_json::from_str(r#"{"server":{"port":8080}}"#).unwrap();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.notifier, NotifierSettings::default());
    }
}
