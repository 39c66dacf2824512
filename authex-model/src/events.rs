use crate::authz::AuthzObject;
use crate::ids::EventId;

/// The authorization-relevant payload of one metastore notification.
///
/// The upstream emits many event kinds; only the ones that move paths or
/// authorizable objects matter to the permission store. Everything else is
/// carried as [`ChangeRecord::Noop`] so the follower can still record the id
/// and keep the stream head advancing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum ChangeRecord {
    /// A path became governed by an authorizable object (new table or
    /// partition location).
    AddPath { authz_obj: AuthzObject, path: String },
    /// A path stopped being governed by an object (drop partition, drop
    /// table location).
    RemovePath { authz_obj: AuthzObject, path: String },
    /// An object was renamed, possibly relocating its path.
    RenameAuthzObject {
        old_authz_obj: AuthzObject,
        new_authz_obj: AuthzObject,
        old_path: String,
        new_path: String,
    },
    /// An object was dropped entirely; all of its paths go with it.
    RemoveAuthzObject { authz_obj: AuthzObject },
    /// An upstream event kind with no authorization effect.
    Noop { kind: String },
}

impl ChangeRecord {
    /// Whether this record mutates the path image at all.
    pub fn is_relevant(&self) -> bool {
        !matches!(self, ChangeRecord::Noop { .. })
    }
}

/// One change notification as delivered by the upstream metastore.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NotificationEvent {
    pub id: EventId,
    pub change: ChangeRecord,
    pub timestamp_ms: i64,
}

impl NotificationEvent {
    pub fn new(id: EventId, change: ChangeRecord, timestamp_ms: i64) -> Self {
        Self {
            id,
            change,
            timestamp_ms,
        }
    }
}
