//! Cross-instance notification bus.
//!
//! Every beacon hit is published through a [`Notifier`]; every instance
//! receives every event and hands it to its own [`SubscriptionManager`],
//! which delivers it only if this instance owns the token.
//!
//! Backends:
//! - [`LocalNotifier`]: single instance, dispatches in-process.
//! - [`MemoryBus`]: in-process broadcast shared by several servers.
//! - [`RedisNotifier`]: Redis pub/sub, one channel shared by all instances.

mod local;
mod memory;
mod pubsub;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{Envelope, EnvelopeError, NotificationEvent};
use beacon_settings::{NotifierBackend, NotifierSettings};
use metrics::counter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use local::LocalNotifier;
pub use memory::{MemoryBus, MemoryNotifier};
pub use pubsub::RedisNotifier;

use crate::lifecycle::SubscriptionManager;
use crate::metrics::{NOTIFICATIONS_PUBLISHED_TOTAL, PUBLISH_FAILURES_TOTAL};

/// Errors raised while publishing to or connecting the bus.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    /// Event could not be encoded.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Redis connection or command failure.
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Publish did not complete in time.
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    /// Bus has no listeners left.
    #[error("notifier closed")]
    Closed,

    /// Redis backend selected without a URL.
    #[error("notifier.redis_url is required for the redis backend")]
    MissingUrl,
}

/// Publishes notification events to every instance.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish one event.
    async fn publish(&self, event: NotificationEvent) -> Result<(), NotifierError>;

    /// Backend label for logs and metrics.
    fn backend(&self) -> &'static str;
}

/// Publish `event` in the background.
///
/// The HTTP response never waits on the bus; failures are logged and
/// counted.
pub fn spawn_publish(notifier: Arc<dyn Notifier>, event: NotificationEvent) -> JoinHandle<()> {
    counter!(NOTIFICATIONS_PUBLISHED_TOTAL, "target" => event.notification.target.as_str())
        .increment(1);
    tokio::spawn(async move {
        let token = event.token.clone();
        if let Err(e) = notifier.publish(event).await {
            counter!(PUBLISH_FAILURES_TOTAL, "backend" => notifier.backend()).increment(1);
            warn!(%token, backend = notifier.backend(), error = %e, "failed to publish notification");
        }
    })
}

/// Decode a raw bus message and hand it to the local manager.
///
/// Malformed messages are logged and skipped.
pub fn receive_raw(manager: &SubscriptionManager, raw: &str) -> bool {
    let event = match Envelope::decode(raw).and_then(|env| NotificationEvent::from_envelope(&env)) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "discarding malformed bus message");
            return false;
        }
    };
    manager.receive(&event)
}

/// Build the notifier selected by `settings`.
///
/// Returns the notifier and, for backends with a receive loop, the task
/// driving it. The loop stops when `cancel` fires.
pub async fn from_settings(
    settings: &NotifierSettings,
    manager: Arc<SubscriptionManager>,
    cancel: CancellationToken,
) -> Result<(Arc<dyn Notifier>, Option<JoinHandle<()>>), NotifierError> {
    match settings.backend {
        NotifierBackend::Local => {
            debug!("using local notifier");
            let notifier: Arc<dyn Notifier> = Arc::new(LocalNotifier::new(manager));
            Ok((notifier, None))
        }
        NotifierBackend::Redis => {
            let url = settings.redis_url.as_deref().ok_or(NotifierError::MissingUrl)?;
            let (notifier, handle) = RedisNotifier::connect(
                url,
                &settings.channel,
                Duration::from_millis(settings.publish_timeout_ms),
                Duration::from_millis(settings.reconnect_delay_ms),
                manager,
                cancel,
            )
            .await?;
            let notifier: Arc<dyn Notifier> = Arc::new(notifier);
            Ok((notifier, Some(handle)))
        }
    }
}
