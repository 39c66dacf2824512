//! The metastore follower loop.
//!
//! A single-writer control loop that keeps the permission store synchronized
//! with the upstream metastore: one full pass per tick, deciding between
//! incremental notification ingest and a full snapshot re-baseline. The loop
//! is strictly single-threaded; concurrency with external readers goes
//! through the persistence gateway and the [`CounterWait`] rendezvous only.

mod status;

pub use status::{FollowerStatus, StatusSnapshot};

use std::sync::Arc;
use std::time::Duration;

use authex_model::{EMPTY_EVENT_ID, EventId, NotificationEvent};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::counter_wait::CounterWait;
use crate::error::{Result, SyncError};
use crate::fetcher::{FetchOutcome, NotificationFetcher};
use crate::gateway::PersistenceGateway;
use crate::leader::{LeaderMonitor, StaticLeader};
use crate::metastore::MetastoreClient;
use crate::processor::NotificationProcessor;
use crate::refresh::RefreshSignal;

/// Deployment knobs the follower needs at runtime. The server crate maps
/// these from the loaded configuration.
#[derive(Clone, Debug)]
pub struct FollowerOptions {
    /// Logical server name, printed with the ready marker.
    pub server_name: String,
    /// Whether the path image is synchronized with HDFS. Controls the
    /// empty-path-snapshot trigger and whether snapshots persist the full
    /// image or just the stream head.
    pub hdfs_sync_enabled: bool,
    /// Scheduler period for [`Follower::run`].
    pub tick_interval: Duration,
}

impl Default for FollowerOptions {
    fn default() -> Self {
        Self {
            server_name: "authex".to_string(),
            hdfs_sync_enabled: true,
            tick_interval: Duration::from_millis(500),
        }
    }
}

pub struct Follower {
    options: FollowerOptions,
    gateway: Arc<dyn PersistenceGateway>,
    client: Arc<dyn MetastoreClient>,
    fetcher: NotificationFetcher,
    processor: Arc<dyn NotificationProcessor>,
    leader: Arc<dyn LeaderMonitor>,
    refresh: Arc<RefreshSignal>,
    status: Arc<FollowerStatus>,
}

impl std::fmt::Debug for Follower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Follower")
            .field("options", &self.options)
            .field("status", &self.status.snapshot())
            .finish()
    }
}

impl Follower {
    /// `leader` may be absent: no election subsystem means single-node mode,
    /// where this replica always leads.
    pub fn new(
        options: FollowerOptions,
        gateway: Arc<dyn PersistenceGateway>,
        client: Arc<dyn MetastoreClient>,
        fetcher: NotificationFetcher,
        processor: Arc<dyn NotificationProcessor>,
        leader: Option<Arc<dyn LeaderMonitor>>,
        refresh: Arc<RefreshSignal>,
    ) -> Self {
        Self {
            options,
            gateway,
            client,
            fetcher,
            processor,
            leader: leader.unwrap_or_else(|| Arc::new(StaticLeader)),
            refresh,
            status: Arc::new(FollowerStatus::new()),
        }
    }

    pub fn status(&self) -> Arc<FollowerStatus> {
        Arc::clone(&self.status)
    }

    /// Drive ticks until cancelled. A tick never propagates an error and
    /// never panics the task; every failure path logs and leaves recovery to
    /// the next tick.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.options.tick_interval.as_millis() as u64,
            "metastore follower started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
        self.teardown("shutting down").await;
        info!("metastore follower stopped");
    }

    /// One full pass. Public so harnesses can drive the loop without the
    /// scheduler.
    pub async fn tick(&self) {
        self.status.record_tick();

        let max_id = match self.gateway.max_notification_id().await {
            Ok(id) => id,
            Err(err) => {
                warn!(%err, "could not read the last processed id; skipping tick");
                return;
            }
        };

        // Waiters pinned to already-applied ids unblock even on non-leader
        // replicas, so this happens before the leader gate.
        self.wake_waiters(max_id).await;

        if !self.leader.is_leader() {
            self.teardown("not the leader").await;
            return;
        }

        if !self.status.connected() {
            if let Err(err) = self.client.connect().await {
                warn!(%err, "metastore connect failed; retrying next tick");
                return;
            }
            self.status.set_connected(true);
            debug!("connected to metastore");
        }

        match self.needs_full_snapshot(max_id).await {
            Ok(true) => {
                self.run_full_snapshot().await;
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(%err, "snapshot decision aborted");
                if matches!(err, SyncError::Transport(_)) {
                    self.teardown("transport failure").await;
                }
                return;
            }
        }

        let outcome = match self.fetcher.fetch(max_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(%err, %max_id, "notification fetch failed");
                self.teardown("transport failure").await;
                return;
            }
        };

        let events = match outcome {
            FetchOutcome::OutOfSync => {
                info!(%max_id, "upstream truncated past our position; rebuilding from snapshot");
                self.run_full_snapshot().await;
                return;
            }
            FetchOutcome::Events(events) => events,
        };

        self.emit_ready();

        if let Err(err) = self.process_batch(max_id, events).await {
            warn!(%err, "notification batch aborted");
            self.teardown("batch failure").await;
        }
    }

    /// Release waiters for the freshly read stream head. When the persisted
    /// image id has leapt past our in-memory high-water, some other actor
    /// re-based the image and thresholds must be recomputed against the new
    /// baseline; that is the one case the counter moves backward.
    /// `last_image_id` is read fresh on every wake-up, never cached.
    async fn wake_waiters(&self, max_id: EventId) {
        let counter = self.gateway.counter_wait();
        match self.gateway.last_image_id().await {
            Ok(image_id) if image_id > self.status.hms_image_id() => {
                info!(%image_id, %max_id, "image re-based elsewhere; resetting waiter baseline");
                counter.set_baseline(image_id, max_id);
                self.status.set_hms_image_id(image_id);
            }
            Ok(_) => counter.update(max_id),
            Err(err) => {
                debug!(%err, "could not read the image id; advancing the counter only");
                counter.update(max_id);
            }
        }
    }

    /// The four snapshot triggers, evaluated in order. The refresh latch is
    /// consumed only when it is the deciding rule, so a latched request
    /// survives a tick that snapshots for some other reason.
    async fn needs_full_snapshot(&self, max_id: EventId) -> Result<bool> {
        if self.gateway.notifications_empty().await? {
            info!("no notifications persisted; full snapshot required");
            return Ok(true);
        }
        if self.options.hdfs_sync_enabled && self.gateway.path_snapshot_empty().await? {
            info!("path image is empty; full snapshot required");
            return Ok(true);
        }
        let upstream_id = self.fetcher.current_id().await?;
        if upstream_id < max_id {
            warn!(%upstream_id, %max_id, "upstream log rewound behind our position");
            return Ok(true);
        }
        if self.refresh.test_and_clear() {
            info!("full refresh requested by operator");
            return Ok(true);
        }
        Ok(false)
    }

    async fn run_full_snapshot(&self) {
        match self.take_full_snapshot().await {
            Ok(image_id) if image_id.is_empty() => {
                debug!("snapshot abandoned");
            }
            Ok(image_id) => {
                self.gateway.counter_wait().update(image_id);
                self.emit_ready();
            }
            Err(err) => {
                warn!(%err, "full snapshot failed");
                if matches!(err, SyncError::Transport(_) | SyncError::Connect(_)) {
                    self.teardown("transport failure").await;
                }
            }
        }
    }

    /// Take and persist a full snapshot, returning the resulting image id or
    /// the empty sentinel when the attempt was abandoned. The running flag
    /// guards against overlapping full updates and is cleared on every exit.
    async fn take_full_snapshot(&self) -> Result<EventId> {
        self.status.begin_full_update()?;
        let result = self.snapshot_inner().await;
        self.status.end_full_update();
        result
    }

    async fn snapshot_inner(&self) -> Result<EventId> {
        let snapshot = self.client.full_snapshot().await?;
        let image_id = snapshot.image_id;

        if snapshot.paths.is_empty() {
            debug!(%image_id, "snapshot holds no paths; nothing to persist");
            return Ok(image_id);
        }

        // The fetch may have taken a while; a de-elected replica must not
        // publish an image.
        if !self.leader.is_leader() {
            info!("lost leadership while snapshotting; abandoning image");
            return Ok(EMPTY_EVENT_ID);
        }

        if self.options.hdfs_sync_enabled {
            let paths = snapshot.paths.len();
            self.gateway
                .persist_full_image(snapshot.paths, image_id)
                .await?;
            info!(%image_id, paths, "full path image persisted");
        } else {
            self.gateway.persist_last_processed_id(image_id).await?;
            info!(%image_id, "stream head re-based without path image");
        }
        self.status.set_hms_image_id(image_id);
        Ok(image_id)
    }

    /// Apply a batch in id order. `batch_start` seeds the gap/duplicate
    /// detection; the persistence layer stays the source of truth, so
    /// neither condition aborts processing.
    async fn process_batch(
        &self,
        batch_start: EventId,
        events: Vec<NotificationEvent>,
    ) -> Result<()> {
        let counter = self.gateway.counter_wait();
        let mut prev = batch_start;

        for event in events {
            if event.id == prev {
                warn!(event_id = %event.id, "duplicate notification id delivered");
            } else if event.id != prev.successor() {
                warn!(
                    expected = %prev.successor(),
                    got = %event.id,
                    "gap in the notification stream"
                );
            }

            if !self.leader.is_leader() {
                info!("lost leadership mid-batch; stopping cleanly");
                return Ok(());
            }

            match self.processor.process_event(&event).await {
                Ok(true) => {
                    self.fetcher.update_cache(&event);
                }
                Ok(false) => {
                    // Recording the id for a no-op event is what keeps the
                    // stream from sticking on it forever; failing to do so
                    // is fatal to the batch.
                    if let Err(err) = self.gateway.persist_last_processed_id(event.id).await {
                        error!(event_id = %event.id, %err, "could not advance past a no-op event");
                        return Err(err);
                    }
                    self.fetcher.update_cache(&event);
                }
                Err(SyncError::Conflict { event_id }) => {
                    let persisted = self.gateway.max_notification_id().await.unwrap_or(event_id);
                    if event_id <= persisted {
                        info!(
                            %event_id,
                            %persisted,
                            "event is already durable; fetcher must re-seek"
                        );
                        return Ok(());
                    }
                    // Another writer raced us on a not-yet-durable id; the
                    // next tick re-seeks from the persisted head anyway.
                    warn!(%event_id, %persisted, "conflict ahead of the stream head; continuing");
                    prev = event.id;
                    continue;
                }
                Err(err) => {
                    warn!(event_id = %event.id, %err, "event processing failed; continuing");
                    prev = event.id;
                    continue;
                }
            }

            counter.update(event.id);
            prev = event.id;
        }
        Ok(())
    }

    fn emit_ready(&self) {
        if self.status.mark_ready() {
            // Operator contract: a single line on stdout, not just the log
            // stream.
            println!("{} metastore follower is ready", self.options.server_name);
            info!("metastore follower is ready");
        }
    }

    async fn teardown(&self, reason: &str) {
        if self.status.connected() {
            debug!(reason, "closing metastore connection");
        }
        self.fetcher.close().await;
        self.status.set_connected(false);
    }
}
