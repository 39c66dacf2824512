//! Translation of one notification into its persistent authorization
//! effect.

use std::sync::Arc;

use async_trait::async_trait;
use authex_model::NotificationEvent;
use tracing::debug;

use crate::error::Result;
use crate::gateway::PersistenceGateway;

/// Applies a single event against the store. Returns whether the event was
/// semantically applicable; irrelevant events report `Ok(false)` so the
/// caller can still advance the stream head past them.
#[async_trait]
pub trait NotificationProcessor: Send + Sync {
    async fn process_event(&self, event: &NotificationEvent) -> Result<bool>;
}

/// The stock processor: path-image changes go to the gateway, everything
/// else is reported as not applicable without touching storage.
pub struct PathChangeProcessor {
    gateway: Arc<dyn PersistenceGateway>,
}

impl PathChangeProcessor {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }
}

impl std::fmt::Debug for PathChangeProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathChangeProcessor").finish()
    }
}

#[async_trait]
impl NotificationProcessor for PathChangeProcessor {
    async fn process_event(&self, event: &NotificationEvent) -> Result<bool> {
        if !event.change.is_relevant() {
            debug!(event_id = %event.id, "event has no authorization effect");
            return Ok(false);
        }
        self.gateway.apply_event(event).await
    }
}
