//! Core follower runtime for the Authex authorization service.
//!
//! Everything the single-writer metastore follower needs: the tick loop and
//! its snapshot-vs-increment decision, the notification fetch adapter with
//! its dedup cache, the waiter rendezvous external readers block on, the
//! force-refresh latch, and the seams to the durable store, the upstream
//! metastore, and the leader election subsystem.

#[cfg(feature = "database")]
pub mod database;

pub mod counter_wait;
pub mod error;
pub mod fetcher;
pub mod follower;
pub mod gateway;
pub mod leader;
pub mod metastore;
pub mod processor;
pub mod refresh;

pub use counter_wait::{CounterWait, WaitOutcome};
#[cfg(feature = "database")]
pub use database::PostgresGateway;
pub use error::{Result, SyncError};
pub use fetcher::{FetchOutcome, FetcherConfig, NotificationFetcher};
pub use follower::{Follower, FollowerOptions, FollowerStatus, StatusSnapshot};
pub use gateway::PersistenceGateway;
pub use leader::{LeaderMonitor, StaticLeader};
pub use metastore::MetastoreClient;
pub use processor::{NotificationProcessor, PathChangeProcessor};
pub use refresh::{FULL_UPDATE_TOPIC, RefreshSignal};
