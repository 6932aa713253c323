//! In-process bus shared by several servers in one process.

use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::NotificationEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Notifier, NotifierError, receive_raw};
use crate::lifecycle::SubscriptionManager;

/// Broadcast channel carrying encoded envelopes.
///
/// Messages travel in the same encoded form as on Redis, so the receive
/// path is identical across backends.
#[derive(Clone)]
pub struct MemoryBus {
    tx: broadcast::Sender<Arc<str>>,
}

impl MemoryBus {
    /// Create a bus buffering up to `capacity` messages per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Attach an instance: returns its notifier and the receive loop task.
    pub fn attach(
        &self,
        manager: Arc<SubscriptionManager>,
        cancel: CancellationToken,
    ) -> (MemoryNotifier, JoinHandle<()>) {
        let mut rx = self.tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(raw) => {
                            let _ = receive_raw(&manager, &raw);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "memory bus receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("memory bus receiver stopped");
        });
        (MemoryNotifier { tx: self.tx.clone() }, handle)
    }
}

/// Publishing side of a [`MemoryBus`].
pub struct MemoryNotifier {
    tx: broadcast::Sender<Arc<str>>,
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn publish(&self, event: NotificationEvent) -> Result<(), NotifierError> {
        let raw = event.to_envelope()?.encode()?;
        let receivers = self
            .tx
            .send(Arc::from(raw))
            .map_err(|_| NotifierError::Closed)?;
        debug!(token = %event.token, receivers, "published to memory bus");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
