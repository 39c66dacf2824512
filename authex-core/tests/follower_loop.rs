//! Integration tests for the follower loop, driven tick by tick against an
//! in-memory store and a scripted metastore.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use authex_core::{
    CounterWait, FetcherConfig, Follower, FollowerOptions, LeaderMonitor, MetastoreClient,
    NotificationFetcher, PathChangeProcessor, PersistenceGateway, RefreshSignal, Result,
    SyncError, WaitOutcome,
};
use authex_model::{
    AuthzObject, ChangeRecord, EventId, NotificationEvent, PathImage, SnapshotImage,
};

fn obj(name: &str) -> AuthzObject {
    AuthzObject::new(name).unwrap()
}

fn add_event(id: i64) -> NotificationEvent {
    NotificationEvent::new(
        EventId(id),
        ChangeRecord::AddPath {
            authz_obj: obj(&format!("db.t{id}")),
            path: format!("/warehouse/t{id}"),
        },
        id * 1_000,
    )
}

fn noop_event(id: i64) -> NotificationEvent {
    NotificationEvent::new(
        EventId(id),
        ChangeRecord::Noop {
            kind: "ALTER_TABLE_PROPERTIES".to_string(),
        },
        id * 1_000,
    )
}

fn image_with(path: &str, name: &str) -> PathImage {
    let mut image = PathImage::new();
    image.add(path, obj(name));
    image
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GatewayState {
    image: PathImage,
    processed: BTreeSet<i64>,
    max_id: i64,
    last_image_id: i64,
    apply_calls: Vec<i64>,
    noop_persists: Vec<i64>,
    full_images: Vec<(usize, i64)>,
}

#[derive(Default)]
struct MemoryGateway {
    state: Mutex<GatewayState>,
    counter: Arc<CounterWait>,
    fail_reads: AtomicBool,
    fail_noop_persist: AtomicBool,
    /// When applying this event id succeeds, flip the shared leader flag to
    /// false, simulating de-election mid-batch.
    drop_leader_on_apply: Mutex<Option<(i64, Arc<AtomicBool>)>>,
}

impl MemoryGateway {
    fn seeded(max_id: i64, with_image: bool) -> Arc<Self> {
        let gateway = Arc::new(Self::default());
        {
            let mut state = gateway.state.lock().unwrap();
            state.max_id = max_id;
            state.processed.insert(max_id);
            if with_image {
                state.image.add("/warehouse/seed", obj("seed.table"));
            }
        }
        gateway
    }

    fn max_id(&self) -> i64 {
        self.state.lock().unwrap().max_id
    }

    fn apply_calls(&self) -> Vec<i64> {
        self.state.lock().unwrap().apply_calls.clone()
    }

    fn noop_persists(&self) -> Vec<i64> {
        self.state.lock().unwrap().noop_persists.clone()
    }

    fn full_images(&self) -> Vec<(usize, i64)> {
        self.state.lock().unwrap().full_images.clone()
    }

    fn set_last_image_id(&self, id: i64) {
        self.state.lock().unwrap().last_image_id = id;
    }

    fn insert_processed(&self, id: i64) {
        self.state.lock().unwrap().processed.insert(id);
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn max_notification_id(&self) -> Result<EventId> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SyncError::PersistenceRead("store offline".to_string()));
        }
        Ok(EventId(self.max_id()))
    }

    async fn notifications_empty(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().processed.is_empty())
    }

    async fn path_snapshot_empty(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().image.is_empty())
    }

    async fn last_image_id(&self) -> Result<EventId> {
        Ok(EventId(self.state.lock().unwrap().last_image_id))
    }

    async fn persist_full_image(&self, paths: PathImage, image_id: EventId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.full_images.push((paths.len(), image_id.as_i64()));
        state.image = paths;
        state.processed.clear();
        state.processed.insert(image_id.as_i64());
        state.max_id = image_id.as_i64();
        state.last_image_id = image_id.as_i64();
        Ok(())
    }

    async fn persist_last_processed_id(&self, id: EventId) -> Result<()> {
        if self.fail_noop_persist.load(Ordering::SeqCst) {
            return Err(SyncError::PersistenceWrite("store offline".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.noop_persists.push(id.as_i64());
        state.processed.insert(id.as_i64());
        state.max_id = state.max_id.max(id.as_i64());
        Ok(())
    }

    async fn apply_event(&self, event: &NotificationEvent) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.apply_calls.push(event.id.as_i64());
        if state.processed.contains(&event.id.as_i64()) {
            return Err(SyncError::Conflict { event_id: event.id });
        }
        state.processed.insert(event.id.as_i64());
        let applied = state.image.apply(&event.change);
        state.max_id = state.max_id.max(event.id.as_i64());
        drop(state);

        let trigger = self.drop_leader_on_apply.lock().unwrap().clone();
        if let Some((id, flag)) = trigger {
            if id == event.id.as_i64() {
                flag.store(false, Ordering::SeqCst);
            }
        }
        Ok(applied)
    }

    fn counter_wait(&self) -> Arc<CounterWait> {
        Arc::clone(&self.counter)
    }
}

#[derive(Default)]
struct MetastoreScript {
    current_id: i64,
    batches: VecDeque<Result<Vec<NotificationEvent>>>,
    snapshots: VecDeque<SnapshotImage>,
}

#[derive(Default)]
struct ScriptedMetastore {
    script: Mutex<MetastoreScript>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    current_id_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    snapshot_calls: AtomicUsize,
    fail_connect: AtomicBool,
    /// Flip the shared leader flag once the snapshot has been produced,
    /// simulating de-election between fetch and persist.
    drop_leader_on_snapshot: Mutex<Option<Arc<AtomicBool>>>,
}

impl ScriptedMetastore {
    fn new(current_id: i64) -> Arc<Self> {
        let metastore = Arc::new(Self::default());
        metastore.script.lock().unwrap().current_id = current_id;
        metastore
    }

    fn push_batch(&self, batch: Result<Vec<NotificationEvent>>) {
        self.script.lock().unwrap().batches.push_back(batch);
    }

    fn push_snapshot(&self, snapshot: SnapshotImage) {
        self.script.lock().unwrap().snapshots.push_back(snapshot);
    }

    fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetastoreClient for ScriptedMetastore {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SyncError::Connect("metastore unreachable".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn current_notification_id(&self) -> Result<EventId> {
        self.current_id_calls.fetch_add(1, Ordering::SeqCst);
        Ok(EventId(self.script.lock().unwrap().current_id))
    }

    async fn fetch_notifications(&self, _after: EventId) -> Result<Vec<NotificationEvent>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().batches.pop_front() {
            Some(batch) => batch,
            None => Ok(Vec::new()),
        }
    }

    async fn full_snapshot(&self) -> Result<SnapshotImage> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let drop_leader = self.drop_leader_on_snapshot.lock().unwrap().clone();
        if let Some(flag) = drop_leader {
            flag.store(false, Ordering::SeqCst);
        }
        self.script
            .lock()
            .unwrap()
            .snapshots
            .pop_front()
            .ok_or_else(|| SyncError::Transport("no snapshot available".to_string()))
    }
}

struct FlagLeader {
    flag: Arc<AtomicBool>,
}

impl LeaderMonitor for FlagLeader {
    fn is_leader(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct Harness {
    gateway: Arc<MemoryGateway>,
    metastore: Arc<ScriptedMetastore>,
    leader: Arc<AtomicBool>,
    refresh: Arc<RefreshSignal>,
    follower: Follower,
}

fn harness(gateway: Arc<MemoryGateway>, metastore: Arc<ScriptedMetastore>) -> Harness {
    let leader = Arc::new(AtomicBool::new(true));
    let refresh = Arc::new(RefreshSignal::new());
    let fetcher = NotificationFetcher::new(
        metastore.clone() as Arc<dyn MetastoreClient>,
        FetcherConfig::default(),
    );
    let processor = Arc::new(PathChangeProcessor::new(
        gateway.clone() as Arc<dyn PersistenceGateway>,
    ));
    let follower = Follower::new(
        FollowerOptions::default(),
        gateway.clone(),
        metastore.clone(),
        fetcher,
        processor,
        Some(Arc::new(FlagLeader {
            flag: leader.clone(),
        })),
        refresh.clone(),
    );
    Harness {
        gateway,
        metastore,
        leader,
        refresh,
        follower,
    }
}

const SHORT: Duration = Duration::from_millis(50);
const LONG: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Snapshot paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cold_start_takes_snapshot_and_wakes_waiters() {
    let gateway = Arc::new(MemoryGateway::default());
    let metastore = ScriptedMetastore::new(42);
    metastore.push_snapshot(SnapshotImage::new(
        EventId(42),
        image_with("/a", "db.r1"),
    ));
    let h = harness(gateway, metastore);

    h.follower.tick().await;

    assert_eq!(h.gateway.full_images(), vec![(1, 42)]);
    assert_eq!(h.gateway.max_id(), 42);
    assert_eq!(h.gateway.counter_wait().value(), EventId(42));
    assert!(h.follower.status().ready());
}

#[tokio::test]
async fn empty_path_image_with_notifications_triggers_snapshot() {
    // Notifications exist but the path image table is empty; with HDFS sync
    // on, that alone forces a rebuild.
    let gateway = MemoryGateway::seeded(10, false);
    let metastore = ScriptedMetastore::new(10);
    metastore.push_snapshot(SnapshotImage::new(EventId(10), image_with("/a", "db.r1")));
    let h = harness(gateway, metastore);

    h.follower.tick().await;

    assert_eq!(h.metastore.snapshot_calls(), 1);
    assert_eq!(h.gateway.full_images().len(), 1);
}

#[tokio::test]
async fn rewound_upstream_triggers_snapshot() {
    let gateway = MemoryGateway::seeded(100, true);
    let metastore = ScriptedMetastore::new(50);
    metastore.push_snapshot(SnapshotImage::new(EventId(50), image_with("/a", "db.r1")));
    let h = harness(gateway, metastore);

    h.follower.tick().await;

    assert_eq!(h.metastore.snapshot_calls(), 1);
    assert_eq!(h.metastore.fetch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.gateway.max_id(), 50);
}

#[tokio::test]
async fn truncated_upstream_falls_back_to_snapshot_in_same_tick() {
    let gateway = MemoryGateway::seeded(100, true);
    let metastore = ScriptedMetastore::new(120);
    metastore.push_batch(Err(SyncError::OutOfSync {
        after: EventId(100),
    }));
    metastore.push_snapshot(SnapshotImage::new(
        EventId(150),
        image_with("/a", "db.r1"),
    ));
    let h = harness(gateway, metastore);

    h.follower.tick().await;

    assert_eq!(h.metastore.snapshot_calls(), 1);
    assert_eq!(h.gateway.max_id(), 150);
}

#[tokio::test]
async fn refresh_request_snapshots_exactly_once() {
    let gateway = MemoryGateway::seeded(10, true);
    let metastore = ScriptedMetastore::new(10);
    metastore.push_snapshot(SnapshotImage::new(EventId(10), image_with("/a", "db.r1")));
    let h = harness(gateway, metastore);

    h.refresh.raise();
    h.follower.tick().await;
    assert_eq!(h.metastore.snapshot_calls(), 1);
    assert!(!h.refresh.is_raised());

    h.follower.tick().await;
    assert_eq!(h.metastore.snapshot_calls(), 1);
}

#[tokio::test]
async fn snapshot_abandoned_when_leadership_lost_midway() {
    let gateway = Arc::new(MemoryGateway::default());
    let metastore = ScriptedMetastore::new(42);
    metastore.push_snapshot(SnapshotImage::new(EventId(42), image_with("/a", "db.r1")));
    let h = harness(gateway, metastore);
    *h.metastore.drop_leader_on_snapshot.lock().unwrap() = Some(h.leader.clone());

    h.follower.tick().await;

    assert!(h.gateway.full_images().is_empty());
    assert_eq!(h.gateway.counter_wait().value(), EventId(0));
    assert!(!h.follower.status().ready());
}

#[tokio::test]
async fn empty_snapshot_persists_nothing_but_wakes_waiters() {
    let gateway = Arc::new(MemoryGateway::default());
    let metastore = ScriptedMetastore::new(42);
    metastore.push_snapshot(SnapshotImage::new(EventId(42), PathImage::new()));
    let h = harness(gateway, metastore);

    h.follower.tick().await;

    assert!(h.gateway.full_images().is_empty());
    assert_eq!(h.gateway.counter_wait().value(), EventId(42));
    assert_eq!(h.gateway.max_id(), 0);
}

// ---------------------------------------------------------------------------
// Incremental paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn incremental_batch_applies_in_order() {
    let gateway = MemoryGateway::seeded(10, true);
    let metastore = ScriptedMetastore::new(13);
    metastore.push_batch(Ok(vec![add_event(11), add_event(12), add_event(13)]));
    let h = harness(gateway, metastore);

    h.follower.tick().await;

    assert_eq!(h.gateway.apply_calls(), vec![11, 12, 13]);
    assert_eq!(h.gateway.max_id(), 13);
    assert_eq!(h.gateway.counter_wait().value(), EventId(13));
    assert!(h.follower.status().ready());
}

#[tokio::test]
async fn noop_event_advances_stream_head() {
    let gateway = MemoryGateway::seeded(20, true);
    let metastore = ScriptedMetastore::new(21);
    metastore.push_batch(Ok(vec![noop_event(21)]));
    let h = harness(gateway, metastore);

    h.follower.tick().await;

    assert_eq!(h.gateway.noop_persists(), vec![21]);
    assert!(h.gateway.apply_calls().is_empty());
    assert_eq!(h.gateway.max_id(), 21);
    assert_eq!(h.gateway.counter_wait().value(), EventId(21));
}

#[tokio::test]
async fn gap_in_stream_is_tolerated() {
    let gateway = MemoryGateway::seeded(10, true);
    let metastore = ScriptedMetastore::new(14);
    metastore.push_batch(Ok(vec![add_event(11), add_event(13), add_event(14)]));
    let h = harness(gateway, metastore);

    h.follower.tick().await;

    assert_eq!(h.gateway.apply_calls(), vec![11, 13, 14]);
    assert_eq!(h.gateway.max_id(), 14);
}

#[tokio::test]
async fn duplicate_of_durable_event_stops_the_batch() {
    let gateway = MemoryGateway::seeded(10, true);
    let metastore = ScriptedMetastore::new(11);
    metastore.push_batch(Ok(vec![add_event(10), add_event(11)]));
    let h = harness(gateway, metastore);

    h.follower.tick().await;

    // The conflict on 10 ends the batch; 11 is never attempted.
    assert_eq!(h.gateway.apply_calls(), vec![10]);
    assert_eq!(h.gateway.max_id(), 10);
}

#[tokio::test]
async fn conflict_ahead_of_stream_head_continues_the_batch() {
    let gateway = MemoryGateway::seeded(10, true);
    // Another writer raced us: 12 is recorded but the head still reads 10.
    gateway.insert_processed(12);
    let metastore = ScriptedMetastore::new(13);
    metastore.push_batch(Ok(vec![add_event(12), add_event(13)]));
    let h = harness(gateway, metastore);

    h.follower.tick().await;

    assert_eq!(h.gateway.apply_calls(), vec![12, 13]);
    assert_eq!(h.gateway.max_id(), 13);
}

#[tokio::test]
async fn redelivered_events_are_deduped_across_ticks() {
    let gateway = MemoryGateway::seeded(10, true);
    let metastore = ScriptedMetastore::new(13);
    metastore.push_batch(Ok(vec![add_event(11), add_event(12)]));
    metastore.push_batch(Ok(vec![add_event(12), add_event(13)]));
    let h = harness(gateway, metastore);

    h.follower.tick().await;
    h.follower.tick().await;

    // 12 was re-delivered but the fetcher cache suppressed it.
    assert_eq!(h.gateway.apply_calls(), vec![11, 12, 13]);
    assert_eq!(h.gateway.max_id(), 13);
}

#[tokio::test]
async fn leadership_lost_mid_batch_stops_cleanly() {
    let gateway = MemoryGateway::seeded(10, true);
    let metastore = ScriptedMetastore::new(13);
    metastore.push_batch(Ok(vec![add_event(11), add_event(12), add_event(13)]));
    let h = harness(gateway, metastore);
    *h.gateway.drop_leader_on_apply.lock().unwrap() = Some((12, h.leader.clone()));

    h.follower.tick().await;

    assert_eq!(h.gateway.apply_calls(), vec![11, 12]);
    assert_eq!(h.gateway.max_id(), 12);
    assert_eq!(h.gateway.counter_wait().value(), EventId(12));
}

// ---------------------------------------------------------------------------
// Gating and failure dispositions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_leader_makes_no_upstream_calls() {
    let gateway = MemoryGateway::seeded(10, true);
    let metastore = ScriptedMetastore::new(10);
    let h = harness(gateway, metastore);
    h.leader.store(false, Ordering::SeqCst);

    h.follower.tick().await;

    assert_eq!(h.metastore.connect_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.metastore.current_id_calls.load(Ordering::SeqCst), 0);
    assert!(h.metastore.disconnect_calls.load(Ordering::SeqCst) >= 1);
    // Waiters pinned to already-applied ids still unblock.
    assert_eq!(h.gateway.counter_wait().value(), EventId(10));
}

#[tokio::test]
async fn persistence_read_failure_aborts_the_tick() {
    let gateway = MemoryGateway::seeded(10, true);
    let metastore = ScriptedMetastore::new(10);
    let h = harness(gateway, metastore);
    h.gateway.fail_reads.store(true, Ordering::SeqCst);

    h.follower.tick().await;

    assert_eq!(h.metastore.connect_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.metastore.snapshot_calls(), 0);
}

#[tokio::test]
async fn connect_failure_retries_on_the_next_tick() {
    let gateway = MemoryGateway::seeded(10, true);
    let metastore = ScriptedMetastore::new(10);
    let h = harness(gateway, metastore);
    h.metastore.fail_connect.store(true, Ordering::SeqCst);

    h.follower.tick().await;
    assert_eq!(h.metastore.connect_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.metastore.current_id_calls.load(Ordering::SeqCst), 0);

    h.metastore.fail_connect.store(false, Ordering::SeqCst);
    h.follower.tick().await;
    assert_eq!(h.metastore.connect_calls.load(Ordering::SeqCst), 2);
    assert!(h.follower.status().ready());
}

#[tokio::test]
async fn noop_persist_failure_closes_the_connection() {
    let gateway = MemoryGateway::seeded(20, true);
    let metastore = ScriptedMetastore::new(21);
    metastore.push_batch(Ok(vec![noop_event(21)]));
    let h = harness(gateway, metastore);
    h.gateway.fail_noop_persist.store(true, Ordering::SeqCst);

    h.follower.tick().await;

    assert_eq!(h.gateway.max_id(), 20);
    assert!(h.metastore.disconnect_calls.load(Ordering::SeqCst) >= 1);
    assert!(!h.follower.status().connected());
}

// ---------------------------------------------------------------------------
// Waiter rendezvous
// ---------------------------------------------------------------------------

#[tokio::test]
async fn waiter_releases_once_its_event_is_durable() {
    let gateway = MemoryGateway::seeded(10, true);
    let metastore = ScriptedMetastore::new(13);
    metastore.push_batch(Ok(vec![add_event(11), add_event(12), add_event(13)]));
    let h = harness(gateway, metastore);

    let counter = h.gateway.counter_wait();
    let waiter = {
        let counter = counter.clone();
        tokio::spawn(async move { counter.wait(EventId(13), LONG).await })
    };
    tokio::task::yield_now().await;

    h.follower.tick().await;

    assert_eq!(waiter.await.unwrap(), WaitOutcome::Ok);
    assert_eq!(counter.wait(EventId(14), SHORT).await, WaitOutcome::TimedOut);
}

#[tokio::test]
async fn image_rebase_by_another_actor_resets_the_counter() {
    let gateway = MemoryGateway::seeded(150, true);
    // Some other actor persisted a newer image while we were away.
    gateway.set_last_image_id(200);
    let metastore = ScriptedMetastore::new(150);
    let h = harness(gateway, metastore);

    let counter = h.gateway.counter_wait();
    counter.update(EventId(180));

    h.follower.tick().await;

    // The counter was reset to this tick's event id; only `reset` can move
    // it backward like this.
    assert_eq!(counter.value(), EventId(150));
    assert_eq!(counter.baseline(), EventId(200));
    assert_eq!(
        counter.wait(EventId(160), SHORT).await,
        WaitOutcome::TimedOut
    );

    // The high-water caught up, so the next tick must not reset again.
    h.follower.tick().await;
    assert_eq!(counter.value(), EventId(150));
    assert_eq!(counter.baseline(), EventId(200));
}

// ---------------------------------------------------------------------------
// Cross-tick properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_head_is_monotonic_across_messy_ticks() {
    let gateway = MemoryGateway::seeded(10, true);
    let metastore = ScriptedMetastore::new(15);
    metastore.push_batch(Ok(vec![add_event(11), add_event(12)]));
    metastore.push_batch(Ok(vec![add_event(12)]));
    metastore.push_batch(Ok(vec![noop_event(14), add_event(15)]));
    let h = harness(gateway, metastore);

    let mut previous = 10;
    for _ in 0..4 {
        h.follower.tick().await;
        let head = h.gateway.max_id();
        assert!(head >= previous, "head went backward: {head} < {previous}");
        previous = head;
    }
    assert_eq!(previous, 15);
}
