//! Operator-initiated force-full-refresh signal.
//!
//! A latched flag raised by the pub/sub subscriber and consumed by the
//! follower once per tick via [`RefreshSignal::test_and_clear`]. The
//! subscription side is a plain capability (`on_message`), not a subscriber
//! base type; the broker glue lives in the server crate.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, SyncError};

/// Topic the force-full-update messages arrive on. The subscriber is bound
/// to exactly this topic; a delivery for anything else is a wiring bug.
pub const FULL_UPDATE_TOPIC: &str = "authex.full-update";

#[derive(Debug, Default)]
pub struct RefreshSignal {
    requested: AtomicBool,
}

impl RefreshSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch the flag. Idempotent; repeated raises collapse into one
    /// refresh.
    pub fn raise(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Consume the latch: returns whether it was set, clearing it
    /// atomically.
    pub fn test_and_clear(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }

    /// Delivery entry point for the pub/sub subscriber. The payload carries
    /// no information; any message on the topic requests a rebuild.
    pub fn on_message(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if topic != FULL_UPDATE_TOPIC {
            tracing::error!(topic, "refresh delivery arrived on an unexpected topic");
            return Err(SyncError::Internal(format!(
                "refresh subscriber is bound to `{FULL_UPDATE_TOPIC}` but received `{topic}`"
            )));
        }
        tracing::info!(payload_len = payload.len(), "full update requested");
        self.raise();
        Ok(())
    }
}
