//! HTTP client for the metastore notification gateway.
//!
//! The upstream metastore is fronted by a small JSON gateway; this client
//! maps its three endpoints onto the [`MetastoreClient`] seam. Truncation is
//! signalled by the gateway with `410 Gone` and becomes
//! [`SyncError::OutOfSync`]; everything else transport-shaped becomes
//! [`SyncError::Transport`].

use async_trait::async_trait;
use authex_config::MetastoreConfig;
use authex_core::{MetastoreClient, Result, SyncError};
use authex_model::{EventId, NotificationEvent, PathImage, SnapshotImage};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpMetastoreClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CurrentIdBody {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct EventsBody {
    events: Vec<NotificationEvent>,
}

#[derive(Debug, Deserialize)]
struct SnapshotBody {
    image_id: i64,
    paths: PathImage,
}

impl HttpMetastoreClient {
    pub fn new(config: &MetastoreConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| SyncError::Config(format!("metastore http client: {err}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|err| SyncError::Transport(format!("GET {path}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Transport(format!("GET {path}: {status}")));
        }
        response
            .json()
            .await
            .map_err(|err| SyncError::Transport(format!("decode {path}: {err}")))
    }
}

#[async_trait]
impl MetastoreClient for HttpMetastoreClient {
    async fn connect(&self) -> Result<()> {
        // HTTP is connectionless; probe the gateway so a dead upstream is
        // caught at the same phase a stateful transport would catch it.
        self.get_json::<CurrentIdBody>("/notification/current-id")
            .await
            .map_err(|err| SyncError::Connect(err.to_string()))?;
        Ok(())
    }

    async fn disconnect(&self) {
        debug!("metastore client released");
    }

    async fn current_notification_id(&self) -> Result<EventId> {
        let body: CurrentIdBody = self.get_json("/notification/current-id").await?;
        Ok(EventId(body.id))
    }

    async fn fetch_notifications(&self, after: EventId) -> Result<Vec<NotificationEvent>> {
        let path = format!("/notification/events?after={}", after.as_i64());
        let response = self
            .http
            .get(self.url(&path))
            .send()
            .await
            .map_err(|err| SyncError::Transport(format!("GET {path}: {err}")))?;
        match response.status() {
            StatusCode::GONE => Err(SyncError::OutOfSync { after }),
            status if status.is_success() => {
                let body: EventsBody = response
                    .json()
                    .await
                    .map_err(|err| SyncError::Transport(format!("decode {path}: {err}")))?;
                Ok(body.events)
            }
            status => Err(SyncError::Transport(format!("GET {path}: {status}"))),
        }
    }

    async fn full_snapshot(&self) -> Result<SnapshotImage> {
        let body: SnapshotBody = self.get_json("/notification/snapshot").await?;
        Ok(SnapshotImage::new(EventId(body.image_id), body.paths))
    }
}
