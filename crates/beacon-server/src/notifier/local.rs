use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::NotificationEvent;

use super::{Notifier, NotifierError};
use crate::lifecycle::SubscriptionManager;

/// Single-instance notifier: every publish is received locally.
pub struct LocalNotifier {
    manager: Arc<SubscriptionManager>,
}

impl LocalNotifier {
    /// Dispatch straight into `manager`.
    pub fn new(manager: Arc<SubscriptionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Notifier for LocalNotifier {
    async fn publish(&self, event: NotificationEvent) -> Result<(), NotifierError> {
        let _ = self.manager.receive(&event);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
