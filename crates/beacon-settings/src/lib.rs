//! # beacon-settings
//!
//! Configuration for the beacon relay, loaded from layered sources
//! (in priority order, lowest first):
//! 1. **Compiled defaults**: [`BeaconSettings::default()`]
//! 2. **Settings file**: `beacon.json` or the path in `BEACON_CONFIG`
//! 3. **Environment variables**: `BEACON_*` with `__` nesting
//! 4. **`PORT`**: the listener port, as most hosting platforms inject it
//!
//! # Usage
//!
//! ```no_run
//! let settings = beacon_settings::load_settings().unwrap_or_default();
//! println!("listening on port {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{figment, load_settings, load_settings_from_path, settings_path};
pub use types::*;
