//! # Authex Server
//!
//! Authorization service daemon whose permission store follows an external
//! Hive-style metastore. The process runs three cooperating pieces:
//!
//! - the **metastore follower**: a single-writer loop ingesting change
//!   notifications and re-baselining from full snapshots when needed
//! - the **refresh subscriber**: a pub/sub listener letting operators force
//!   a full rebuild
//! - the **read API**: health, status, and the sync-wait rendezvous that
//!   blocks clients until a given event id is durable

mod api;
mod hms;
mod refresh_subscriber;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use authex_config::ConfigLoader;
use authex_core::{
    FetcherConfig, Follower, FollowerOptions, NotificationFetcher, PathChangeProcessor,
    PersistenceGateway, PostgresGateway, RefreshSignal,
};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::hms::HttpMetastoreClient;

#[derive(Debug, Parser)]
#[command(name = "authex-server", about = "Authex authorization server")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info,authex_core=debug`. Falls back to RUST_LOG.
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    authex_config::init_dotenv();
    let args = Args::parse();

    let filter = args
        .log
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (config, warnings) = ConfigLoader::new()
        .load(args.config.as_deref())
        .context("loading configuration")?;
    warnings.log_all();
    info!(server_name = %config.server.name, "starting authex");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database.url)
        .await
        .context("connecting to the permission store")?;
    let gateway = Arc::new(
        PostgresGateway::new(pool)
            .await
            .context("preparing the permission store")?,
    );

    let client = Arc::new(HttpMetastoreClient::new(&config.metastore)?);
    let fetcher = NotificationFetcher::new(
        client.clone(),
        FetcherConfig {
            cache_size: config.follower.fetcher_cache_size,
        },
    );
    let processor = Arc::new(PathChangeProcessor::new(
        gateway.clone() as Arc<dyn PersistenceGateway>
    ));
    let refresh = Arc::new(RefreshSignal::new());

    let options = FollowerOptions {
        server_name: config.server.name.clone(),
        hdfs_sync_enabled: config.follower.hdfs_sync_enabled,
        tick_interval: config.follower.tick_interval(),
    };
    let follower = Arc::new(Follower::new(
        options,
        gateway.clone(),
        client.clone(),
        fetcher,
        processor,
        // No election subsystem wired yet: single-node mode.
        None,
        refresh.clone(),
    ));

    let cancel = CancellationToken::new();

    if config.follower.full_update_subscribe_enabled {
        match &config.redis {
            Some(redis) => {
                tokio::spawn(refresh_subscriber::run(
                    redis.url.clone(),
                    refresh.clone(),
                    cancel.child_token(),
                ));
            }
            None => warn!("refresh subscription enabled but no redis configured; skipping"),
        }
    }

    let follower_task = {
        let follower = follower.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move { follower.run(cancel).await })
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    let state = api::AppState {
        status: follower.status(),
        counter: gateway.counter_wait(),
        gateway: gateway.clone() as Arc<dyn PersistenceGateway>,
    };
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "read api listening");

    let shutdown = cancel.clone();
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("serving the read api")?;

    cancel.cancel();
    follower_task.await.context("joining the follower task")?;
    info!("authex stopped");
    Ok(())
}
