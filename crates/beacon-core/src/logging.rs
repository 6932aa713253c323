//! Tracing subscriber setup.
//!
//! All crates log through `tracing` macros with structured fields. Binaries
//! call [`init_subscriber`] once at startup; `RUST_LOG` overrides the
//! configured level.

use tracing_subscriber::EnvFilter;

/// Output format for the global subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line, for log shippers.
    Json,
}

/// Initialize the global tracing subscriber writing to stderr.
///
/// Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Default filter directive (e.g. `"info"`, `"beacon_server=debug"`).
/// * `format` - Compact text or JSON lines.
pub fn init_subscriber(level: &str, format: LogFormat) {
    let filter = build_filter(level);

    // try_init fails only when a global subscriber is already installed
    let _ = match format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init(),
    };
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
