use authex_model::EventId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("persistence read failed: {0}")]
    PersistenceRead(String),

    #[error("persistence write failed: {0}")]
    PersistenceWrite(String),

    #[error("event {event_id} is already persisted")]
    Conflict { event_id: EventId },

    #[error("upstream no longer retains notifications after {after}")]
    OutOfSync { after: EventId },

    #[error("metastore connect failed: {0}")]
    Connect(String),

    #[error("metastore transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
