/// Strongly typed id for metastore notification events.
///
/// Ids are assigned by the upstream metastore and are intended to advance by
/// one per event, but gaps, duplicates, and backward jumps all occur in
/// practice and callers must tolerate them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct EventId(pub i64);

/// Sentinel for "no event id": used both for an empty store and for an
/// abandoned snapshot attempt.
pub const EMPTY_EVENT_ID: EventId = EventId(0);

impl EventId {
    pub fn new(value: i64) -> Self {
        EventId(value)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// True when this id carries no position (store never written).
    pub fn is_empty(&self) -> bool {
        self.0 == EMPTY_EVENT_ID.0
    }

    /// The id the upstream is expected to assign after this one.
    pub fn successor(&self) -> EventId {
        EventId(self.0.saturating_add(1))
    }
}

impl From<i64> for EventId {
    fn from(value: i64) -> Self {
        EventId(value)
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
