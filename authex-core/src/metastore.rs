//! Seam to the upstream Hive-style metastore.

use async_trait::async_trait;
use authex_model::{EventId, NotificationEvent, SnapshotImage};

use crate::error::Result;

#[async_trait]
pub trait MetastoreClient: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Release transport resources. Idempotent; never fails.
    async fn disconnect(&self);

    /// The upstream's current maximum event id.
    async fn current_notification_id(&self) -> Result<EventId>;

    /// Notifications with id strictly greater than `after`, in id order.
    /// Fails with [`crate::SyncError::OutOfSync`] when the upstream no
    /// longer retains the event at `after + 1`.
    async fn fetch_notifications(&self, after: EventId) -> Result<Vec<NotificationEvent>>;

    /// A complete path image together with the last event id it folds in.
    async fn full_snapshot(&self) -> Result<SnapshotImage>;
}
