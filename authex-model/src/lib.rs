//! Core data model definitions shared across Authex crates.
#![allow(missing_docs)]

#[cfg(feature = "chrono")]
pub use ::chrono;

pub mod authz;
pub mod error;
pub mod events;
pub mod ids;
pub mod image;

// Intentionally curated re-exports for downstream consumers.
pub use authz::AuthzObject;
pub use error::{ModelError, Result as ModelResult};
pub use events::{ChangeRecord, NotificationEvent};
pub use ids::{EMPTY_EVENT_ID, EventId};
pub use image::{PathImage, SnapshotImage};
