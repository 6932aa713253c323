//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the admin `/metrics` endpoint. Call
/// once at startup; a second install fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Inbound public requests (counter, labels: kind).
pub const REQUESTS_TOTAL: &str = "beacon_requests_total";
/// Notifications handed to the notifier (counter, labels: target).
pub const NOTIFICATIONS_PUBLISHED_TOTAL: &str = "beacon_notifications_published_total";
/// Notifications queued to a local subscriber (counter).
pub const NOTIFICATIONS_DELIVERED_TOTAL: &str = "beacon_notifications_delivered_total";
/// Notifications for a local subscriber that could not be queued (counter).
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "beacon_notifications_dropped_total";
/// Publishes that failed or timed out (counter, labels: backend).
pub const PUBLISH_FAILURES_TOTAL: &str = "beacon_publish_failures_total";
/// Subscribers displaced by a newer subscriber (counter).
pub const EVICTIONS_TOTAL: &str = "beacon_evictions_total";
/// Subscribers that connected (counter).
pub const SUBSCRIBERS_CONNECTED_TOTAL: &str = "beacon_subscribers_connected_total";
/// Subscribers that went away (counter, labels: reason).
pub const SUBSCRIBERS_CLOSED_TOTAL: &str = "beacon_subscribers_closed_total";
/// Tokens currently owned on this instance (gauge).
pub const SUBSCRIBERS_ACTIVE: &str = "beacon_subscribers_active";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_names_are_prefixed_snake_case() {
        let names = [
            REQUESTS_TOTAL,
            NOTIFICATIONS_PUBLISHED_TOTAL,
            NOTIFICATIONS_DELIVERED_TOTAL,
            NOTIFICATIONS_DROPPED_TOTAL,
            PUBLISH_FAILURES_TOTAL,
            EVICTIONS_TOTAL,
            SUBSCRIBERS_CONNECTED_TOTAL,
            SUBSCRIBERS_CLOSED_TOTAL,
            SUBSCRIBERS_ACTIVE,
        ];
        for name in names {
            assert!(name.starts_with("beacon_"), "metric '{name}' must be prefixed");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
