//! Process-local follower state, owned in one place instead of scattered
//! process-wide booleans. The follower task is the only writer; the read
//! side (status endpoint) takes point-in-time snapshots.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use authex_model::EventId;

use crate::error::{Result, SyncError};

#[derive(Debug, Default)]
pub struct FollowerStatus {
    connected: AtomicBool,
    full_update_running: AtomicBool,
    ready_emitted: AtomicBool,
    /// In-memory high-water of the persisted image id. Only the follower
    /// task writes this; readers must not treat it as fresher than the
    /// store's own `last_image_id`.
    hms_image_id: AtomicI64,
    last_tick_ms: AtomicI64,
}

impl FollowerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn hms_image_id(&self) -> EventId {
        EventId(self.hms_image_id.load(Ordering::SeqCst))
    }

    pub(crate) fn set_hms_image_id(&self, id: EventId) {
        self.hms_image_id.store(id.as_i64(), Ordering::SeqCst);
    }

    pub fn ready(&self) -> bool {
        self.ready_emitted.load(Ordering::SeqCst)
    }

    /// Returns true exactly once, on the transition into readiness.
    pub(crate) fn mark_ready(&self) -> bool {
        !self.ready_emitted.swap(true, Ordering::SeqCst)
    }

    pub fn full_update_running(&self) -> bool {
        self.full_update_running.load(Ordering::SeqCst)
    }

    /// Assert the full-update flag. Two overlapping full updates cannot
    /// happen in a single-threaded loop; observing the flag already set
    /// means the invariant broke somewhere.
    pub(crate) fn begin_full_update(&self) -> Result<()> {
        if self.full_update_running.swap(true, Ordering::SeqCst) {
            return Err(SyncError::Internal(
                "a full update is already running".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn end_full_update(&self) {
        self.full_update_running.store(false, Ordering::SeqCst);
    }

    pub(crate) fn record_tick(&self) {
        self.last_tick_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.connected(),
            full_update_running: self.full_update_running(),
            ready: self.ready(),
            hms_image_id: self.hms_image_id().as_i64(),
            last_tick_ms: self.last_tick_ms.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time view for operators.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub full_update_running: bool,
    pub ready: bool,
    pub hms_image_id: i64,
    pub last_tick_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_ready_fires_once() {
        let status = FollowerStatus::new();
        assert!(status.mark_ready());
        assert!(!status.mark_ready());
        assert!(status.ready());
    }

    #[test]
    fn overlapping_full_updates_are_rejected() {
        let status = FollowerStatus::new();
        status.begin_full_update().unwrap();
        assert!(status.begin_full_update().is_err());
        status.end_full_update();
        assert!(status.begin_full_update().is_ok());
    }
}
