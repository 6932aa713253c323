//! Subscriber lifecycle: subscribe, unsubscribe and delivery.

use std::sync::Arc;

use beacon_core::{NotificationEvent, Token};
use metrics::{counter, gauge};
use tracing::{debug, info, warn};

use crate::connection::{CloseReason, Connection};
use crate::metrics::{
    EVICTIONS_TOTAL, NOTIFICATIONS_DELIVERED_TOTAL, NOTIFICATIONS_DROPPED_TOTAL,
    SUBSCRIBERS_ACTIVE, SUBSCRIBERS_CLOSED_TOTAL, SUBSCRIBERS_CONNECTED_TOTAL,
};
use crate::registry::TokenRegistry;

/// Owns the registry on behalf of the routing layer and the notifier.
pub struct SubscriptionManager {
    registry: Arc<TokenRegistry>,
}

impl SubscriptionManager {
    /// Wrap a registry.
    pub fn new(registry: Arc<TokenRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    /// Make `connection` the owner of `token`, evicting any previous owner.
    ///
    /// The connection's close handler is armed to unregister exactly this
    /// connection, so a late disconnect of an evicted subscriber never
    /// removes its successor.
    pub fn subscribe(&self, token: Token, connection: Arc<Connection>) {
        let registry = Arc::downgrade(&self.registry);
        let handler_token = token.clone();
        connection.set_close_handler(move |conn, reason| {
            counter!(SUBSCRIBERS_CLOSED_TOTAL, "reason" => reason.as_str()).increment(1);
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let removed = registry.unregister(&handler_token, conn);
            record_active(&registry);
            debug!(token = %handler_token, conn_id = %conn.id(), %reason, removed, "subscriber unregistered");
        });

        counter!(SUBSCRIBERS_CONNECTED_TOTAL).increment(1);
        if let Some(previous) = self.registry.register(token.clone(), Arc::clone(&connection)) {
            counter!(EVICTIONS_TOTAL).increment(1);
            info!(
                %token,
                evicted = %previous.id(),
                conn_id = %connection.id(),
                "evicted previous subscriber"
            );
        }
        record_active(&self.registry);
    }

    /// Remove `connection` as owner of `token` and close it.
    ///
    /// A no-op for the registry if a newer subscriber already owns `token`.
    pub fn unsubscribe(&self, token: &Token, connection: &Connection) -> bool {
        let _ = connection.close(CloseReason::Disconnected);
        let removed = self.registry.unregister(token, connection);
        record_active(&self.registry);
        removed
    }

    /// Queue a serialized notification frame on `connection`.
    ///
    /// Best effort: a closed or saturated connection drops the frame.
    pub fn deliver(&self, connection: &Connection, frame: Arc<String>) -> bool {
        if connection.send(frame) {
            counter!(NOTIFICATIONS_DELIVERED_TOTAL).increment(1);
            true
        } else {
            counter!(NOTIFICATIONS_DROPPED_TOTAL).increment(1);
            debug!(conn_id = %connection.id(), drops = connection.drop_count(), "notification dropped");
            false
        }
    }

    /// Deliver `event` if this instance owns its token.
    ///
    /// This is the sink every notifier feeds, on every instance.
    pub fn receive(&self, event: &NotificationEvent) -> bool {
        let Some(connection) = self.registry.lookup(&event.token) else {
            debug!(token = %event.token, "no local subscriber");
            return false;
        };
        let frame = match event.notification.to_frame() {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(token = %event.token, error = %e, "failed to serialize notification");
                return false;
            }
        };
        let delivered = self.deliver(&connection, frame);
        debug!(
            token = %event.token,
            target = event.notification.target.as_str(),
            delivered,
            "notification received"
        );
        delivered
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_active(registry: &TokenRegistry) {
    gauge!(SUBSCRIBERS_ACTIVE).set(registry.len() as f64);
}
