//! Seam to the durable permission store.
//!
//! The follower never touches storage directly; everything goes through this
//! trait so the store engine stays swappable and the integration tests can
//! run against an in-memory double. All durability and atomicity guarantees
//! live behind these operations.

use std::sync::Arc;

use async_trait::async_trait;
use authex_model::{EventId, NotificationEvent, PathImage};

use crate::counter_wait::CounterWait;
use crate::error::Result;

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Highest event id fully applied, or [`authex_model::EMPTY_EVENT_ID`]
    /// when nothing has been persisted yet.
    async fn max_notification_id(&self) -> Result<EventId>;

    /// True iff no notifications have ever been persisted.
    async fn notifications_empty(&self) -> Result<bool>;

    /// True iff no path image has been persisted.
    async fn path_snapshot_empty(&self) -> Result<bool>;

    /// Id of the most recent persisted full snapshot, or the empty sentinel.
    async fn last_image_id(&self) -> Result<EventId>;

    /// Atomically replace the path image and set the stream head to
    /// `image_id`.
    async fn persist_full_image(&self, paths: PathImage, image_id: EventId) -> Result<()>;

    /// Advance the stream head only; used for events with no authorization
    /// effect so the stream never sticks on them.
    async fn persist_last_processed_id(&self, id: EventId) -> Result<()>;

    /// Apply one event's authorization mutation and record its id
    /// atomically. Returns whether the event was semantically applicable.
    /// Raises [`crate::SyncError::Conflict`] when the id is already
    /// recorded.
    async fn apply_event(&self, event: &NotificationEvent) -> Result<bool>;

    /// The shared rendezvous readers block on until the follower has caught
    /// up to a given event id.
    fn counter_wait(&self) -> Arc<CounterWait>;
}
