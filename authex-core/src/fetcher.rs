//! Notification fetch adapter over the metastore client.
//!
//! Adds two things to the raw transport: a bounded dedup cache for events
//! the upstream re-delivers, and an explicit [`FetchOutcome`] so the
//! follower handles truncation with a flat match instead of exception
//! plumbing.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use authex_model::{EventId, NotificationEvent};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::metastore::MetastoreClient;

const DEFAULT_CACHE_SIZE: usize = 1024;

#[derive(Clone, Debug)]
pub struct FetcherConfig {
    /// Bound on the dedup cache; eviction is oldest-first.
    pub cache_size: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// What a fetch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Events with id strictly greater than the requested position, in id
    /// order, minus anything the cache has already seen.
    Events(Vec<NotificationEvent>),
    /// The upstream truncated past our position; only a full snapshot can
    /// recover.
    OutOfSync,
}

/// Bounded FIFO of recently observed event ids.
struct DedupCache {
    capacity: usize,
    order: VecDeque<EventId>,
    seen: HashSet<EventId>,
}

impl DedupCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    fn contains(&self, id: EventId) -> bool {
        self.seen.contains(&id)
    }

    fn insert(&mut self, id: EventId) {
        if !self.seen.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }
}

impl fmt::Debug for DedupCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupCache")
            .field("capacity", &self.capacity)
            .field("len", &self.order.len())
            .finish()
    }
}

pub struct NotificationFetcher {
    client: Arc<dyn MetastoreClient>,
    cache: Mutex<DedupCache>,
}

impl NotificationFetcher {
    pub fn new(client: Arc<dyn MetastoreClient>, config: FetcherConfig) -> Self {
        Self {
            client,
            cache: Mutex::new(DedupCache::new(config.cache_size)),
        }
    }

    /// The upstream's current maximum event id.
    pub async fn current_id(&self) -> Result<EventId> {
        self.client.current_notification_id().await
    }

    /// Fetch notifications strictly after `after`, suppressing ids the
    /// cache has already observed.
    pub async fn fetch(&self, after: EventId) -> Result<FetchOutcome> {
        let events = match self.client.fetch_notifications(after).await {
            Ok(events) => events,
            Err(SyncError::OutOfSync { .. }) => return Ok(FetchOutcome::OutOfSync),
            Err(err) => return Err(err),
        };

        let total = events.len();
        let fresh: Vec<NotificationEvent> = {
            let cache = self
                .cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            events
                .into_iter()
                .filter(|event| !cache.contains(event.id))
                .collect()
        };
        if fresh.len() < total {
            debug!(
                suppressed = total - fresh.len(),
                %after,
                "dropped re-delivered notifications"
            );
        }
        Ok(FetchOutcome::Events(fresh))
    }

    /// Remember an event as observed so a near-future re-delivery is
    /// suppressed.
    pub fn update_cache(&self, event: &NotificationEvent) {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(event.id);
    }

    /// Release transport resources.
    pub async fn close(&self) {
        self.client.disconnect().await;
    }
}

impl fmt::Debug for NotificationFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("NotificationFetcher");
        match self.cache.lock() {
            Ok(cache) => debug.field("cache", &*cache),
            Err(_) => debug.field("cache", &"<poisoned>"),
        };
        debug.finish()
    }
}
