//! Redis pub/sub subscription feeding the force-full-refresh latch.
//!
//! Runs as its own task: subscribes to the fixed topic, forwards every
//! delivery into [`RefreshSignal::on_message`], and reconnects with a flat
//! backoff when the broker connection drops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use authex_core::{RefreshSignal, FULL_UPDATE_TOPIC};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub async fn run(redis_url: String, signal: Arc<RefreshSignal>, cancel: CancellationToken) {
    loop {
        match subscribe_once(&redis_url, &signal, &cancel).await {
            Ok(()) => return,
            Err(err) => {
                warn!(%err, "refresh subscription lost; reconnecting");
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }
}

/// One subscription lifetime. Returns `Ok` only on cancellation; any broker
/// failure surfaces as an error so the outer loop reconnects.
async fn subscribe_once(
    redis_url: &str,
    signal: &RefreshSignal,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let client = redis::Client::open(redis_url).context("redis client")?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .context("redis connection")?;
    pubsub
        .subscribe(FULL_UPDATE_TOPIC)
        .await
        .context("topic subscription")?;
    info!(topic = FULL_UPDATE_TOPIC, "watching for refresh requests");

    let mut messages = pubsub.on_message();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            message = messages.next() => {
                let Some(message) = message else {
                    anyhow::bail!("pub/sub stream ended");
                };
                let topic = message.get_channel_name().to_string();
                let payload: Vec<u8> = message.get_payload().unwrap_or_default();
                if let Err(err) = signal.on_message(&topic, &payload) {
                    // A mismatched topic is a wiring bug, not broker noise.
                    error!(%err, "dropping refresh delivery");
                }
            }
        }
    }
}
