//! Redis pub/sub backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::NotificationEvent;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Notifier, NotifierError, receive_raw};
use crate::lifecycle::SubscriptionManager;

/// Publishes envelopes to a Redis channel and feeds the channel back into
/// the local [`SubscriptionManager`].
pub struct RedisNotifier {
    publisher: ConnectionManager,
    channel: String,
    publish_timeout: Duration,
}

impl RedisNotifier {
    /// Connect the publisher and start the subscriber loop.
    ///
    /// Fails if Redis is unreachable at startup. Once running, the
    /// subscriber reconnects after `reconnect_delay` on any failure until
    /// `cancel` fires.
    pub async fn connect(
        url: &str,
        channel: &str,
        publish_timeout: Duration,
        reconnect_delay: Duration,
        manager: Arc<SubscriptionManager>,
        cancel: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), NotifierError> {
        let client = redis::Client::open(url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        info!(channel, "connected to redis");

        let handle = tokio::spawn(run_subscriber(
            client,
            channel.to_owned(),
            reconnect_delay,
            manager,
            cancel,
        ));

        Ok((
            Self {
                publisher,
                channel: channel.to_owned(),
                publish_timeout,
            },
            handle,
        ))
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn publish(&self, event: NotificationEvent) -> Result<(), NotifierError> {
        let raw = event.to_envelope()?.encode()?;
        let mut conn = self.publisher.clone();
        let receivers: i64 =
            bounded(self.publish_timeout, conn.publish(&self.channel, raw)).await?;
        debug!(token = %event.token, receivers, "published to redis");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Await a Redis call for at most `limit`.
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T, NotifierError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| NotifierError::Timeout(limit))?
        .map_err(NotifierError::from)
}

async fn run_subscriber(
    client: redis::Client,
    channel: String,
    reconnect_delay: Duration,
    manager: Arc<SubscriptionManager>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            result = subscribe_once(&client, &channel, &manager) => match result {
                Ok(()) => warn!(%channel, "redis subscription ended"),
                Err(e) => warn!(%channel, error = %e, "redis subscription failed"),
            },
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(reconnect_delay) => {}
        }
    }
    debug!(%channel, "redis subscriber stopped");
}

async fn subscribe_once(
    client: &redis::Client,
    channel: &str,
    manager: &SubscriptionManager,
) -> Result<(), NotifierError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    info!(channel, "subscribed to redis channel");

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        match msg.get_payload::<String>() {
            Ok(raw) => {
                let _ = receive_raw(manager, &raw);
            }
            Err(e) => warn!(error = %e, "non-text redis payload"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TokenRegistry;

    #[tokio::test]
    async fn connect_rejects_malformed_url() {
        let manager = Arc::new(SubscriptionManager::new(Arc::new(TokenRegistry::new())));
        let result = RedisNotifier::connect(
            "not a url",
            "beacon:test",
            Duration::from_millis(100),
            Duration::from_millis(100),
            manager,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(NotifierError::Redis(_))));
    }

    #[tokio::test]
    async fn unanswered_call_times_out() {
        let limit = Duration::from_millis(20);
        let result = bounded(limit, std::future::pending::<redis::RedisResult<i64>>()).await;
        assert!(matches!(result, Err(NotifierError::Timeout(d)) if d == limit));
    }

    #[tokio::test]
    async fn answered_call_passes_through() {
        let result = bounded(Duration::from_secs(1), async { Ok::<i64, _>(2) }).await;
        assert_eq!(result.unwrap(), 2);

        let failed = bounded(Duration::from_secs(1), async {
            Err::<i64, _>(redis::RedisError::from((redis::ErrorKind::IoError, "reset")))
        })
        .await;
        assert!(matches!(failed, Err(NotifierError::Redis(_))));
    }
}
