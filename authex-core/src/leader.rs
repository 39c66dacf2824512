/// Answers whether this replica currently holds leadership. Backed by an
/// external election subsystem in production; the answer may flip at any
/// moment, so callers re-check at every phase boundary.
pub trait LeaderMonitor: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Single-node mode: no election subsystem, this replica always leads.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticLeader;

impl LeaderMonitor for StaticLeader {
    fn is_leader(&self) -> bool {
        true
    }
}
