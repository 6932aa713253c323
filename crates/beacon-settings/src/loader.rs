//! Layered settings loading.
//!
//! Loading flow (later layers win):
//! 1. Compiled [`BeaconSettings::default()`]
//! 2. JSON file at [`settings_path()`], if it exists
//! 3. `BEACON_*` environment variables, nested with `__`
//!    (`BEACON_NOTIFIER__BACKEND=redis` sets `notifier.backend`)
//! 4. The bare `PORT` variable, mapped to `server.port`
//!
//! Command-line flags are applied by the binary on top of the result.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::debug;

use crate::errors::Result;
use crate::types::BeaconSettings;

/// Prefix for nested environment overrides.
pub const ENV_PREFIX: &str = "BEACON_";

/// Environment variable naming the settings file.
pub const CONFIG_PATH_ENV: &str = "BEACON_CONFIG";

/// Settings file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "beacon.json";

/// Resolve the settings file path.
pub fn settings_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BeaconSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file is not an error; a malformed one is.
pub fn load_settings_from_path(path: &Path) -> Result<BeaconSettings> {
    if path.exists() {
        debug!(?path, "loading settings from file");
    } else {
        debug!(?path, "settings file not found, using defaults");
    }
    let settings: BeaconSettings = figment(path).extract()?;
    settings.validate()?;
    Ok(settings)
}

/// The full provider stack, exposed for callers that want to inspect layers.
pub fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(BeaconSettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
        .merge(Env::raw().only(&["port"]).map(|_| "server.port".into()))
}
