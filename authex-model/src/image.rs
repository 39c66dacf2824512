use std::collections::{HashMap, HashSet};

use crate::authz::AuthzObject;
use crate::events::ChangeRecord;
use crate::ids::EventId;

/// Mapping from filesystem path to the authorizable objects governing it.
///
/// This is the unit the follower persists: either wholesale as part of a
/// snapshot, or incrementally one [`ChangeRecord`] at a time. The mutation
/// semantics live here so the store implementations and the in-memory test
/// doubles cannot drift apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PathImage {
    entries: HashMap<String, HashSet<AuthzObject>>,
}

impl PathImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<String, HashSet<AuthzObject>>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn objects_at(&self, path: &str) -> Option<&HashSet<AuthzObject>> {
        self.entries.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HashSet<AuthzObject>)> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> HashMap<String, HashSet<AuthzObject>> {
        self.entries
    }

    pub fn add(&mut self, path: &str, obj: AuthzObject) {
        self.entries.entry(path.to_string()).or_default().insert(obj);
    }

    pub fn remove(&mut self, path: &str, obj: &AuthzObject) {
        if let Some(objs) = self.entries.get_mut(path) {
            objs.remove(obj);
            if objs.is_empty() {
                self.entries.remove(path);
            }
        }
    }

    /// Strip an object from every path it governs, dropping paths left with
    /// no governing object.
    pub fn remove_object(&mut self, obj: &AuthzObject) {
        self.entries.retain(|_, objs| {
            objs.remove(obj);
            !objs.is_empty()
        });
    }

    pub fn rename(
        &mut self,
        old_obj: &AuthzObject,
        new_obj: AuthzObject,
        old_path: &str,
        new_path: &str,
    ) {
        self.remove(old_path, old_obj);
        self.add(new_path, new_obj);
    }

    /// Fold one change record into the image. Returns whether the record was
    /// semantically relevant to the image; `Noop` records report `false`.
    pub fn apply(&mut self, change: &ChangeRecord) -> bool {
        match change {
            ChangeRecord::AddPath { authz_obj, path } => {
                self.add(path, authz_obj.clone());
                true
            }
            ChangeRecord::RemovePath { authz_obj, path } => {
                self.remove(path, authz_obj);
                true
            }
            ChangeRecord::RenameAuthzObject {
                old_authz_obj,
                new_authz_obj,
                old_path,
                new_path,
            } => {
                self.rename(old_authz_obj, new_authz_obj.clone(), old_path, new_path);
                true
            }
            ChangeRecord::RemoveAuthzObject { authz_obj } => {
                self.remove_object(authz_obj);
                true
            }
            ChangeRecord::Noop { .. } => false,
        }
    }
}

/// A complete, self-consistent view of the path image at a given event id.
/// `image_id` equals the last event id folded into the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnapshotImage {
    pub image_id: EventId,
    pub paths: PathImage,
}

impl SnapshotImage {
    pub fn new(image_id: EventId, paths: PathImage) -> Self {
        Self { image_id, paths }
    }
}
