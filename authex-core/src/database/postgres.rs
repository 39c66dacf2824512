//! Postgres-backed persistence gateway.
//!
//! Two tables carry the whole contract: `authz_paths` holds the path image
//! as one jsonb array of authorizable names per path, and
//! `processed_notifications` records every event id the follower has seen
//! so duplicates surface as conflicts. The `follower_state` key/value table
//! holds the two bookkeeping counters. Every multi-statement operation runs
//! in a transaction; atomicity here is what the follower's durability story
//! rests on.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use authex_model::{AuthzObject, ChangeRecord, EventId, NotificationEvent, PathImage};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::counter_wait::CounterWait;
use crate::error::{Result, SyncError};
use crate::gateway::PersistenceGateway;

const MAX_NOTIFICATION_ID_KEY: &str = "max_notification_id";
const LAST_IMAGE_ID_KEY: &str = "last_image_id";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS authz_paths (
    path TEXT PRIMARY KEY,
    authz_objs JSONB NOT NULL
);
CREATE TABLE IF NOT EXISTS processed_notifications (
    event_id BIGINT PRIMARY KEY,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS follower_state (
    key TEXT PRIMARY KEY,
    value BIGINT NOT NULL
);
"#;

#[derive(Clone)]
pub struct PostgresGateway {
    pool: PgPool,
    counter: Arc<CounterWait>,
}

impl PostgresGateway {
    pub async fn new(pool: PgPool) -> Result<Self> {
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|err| SyncError::PersistenceWrite(format!("schema setup: {err}")))?;
        }
        Ok(Self {
            pool,
            counter: Arc::new(CounterWait::new()),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn read_state(&self, key: &str) -> Result<EventId> {
        let row = sqlx::query("SELECT value FROM follower_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| SyncError::PersistenceRead(format!("{key}: {err}")))?;
        Ok(row
            .map(|row| EventId(row.get::<i64, _>("value")))
            .unwrap_or_default())
    }
}

impl fmt::Debug for PostgresGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresGateway")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn write_err(context: &str, err: sqlx::Error) -> SyncError {
    SyncError::PersistenceWrite(format!("{context}: {err}"))
}

async fn record_event_id(tx: &mut Transaction<'_, Postgres>, id: EventId) -> Result<()> {
    let result = sqlx::query("INSERT INTO processed_notifications (event_id) VALUES ($1)")
        .bind(id.as_i64())
        .execute(&mut **tx)
        .await;
    match result {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => Err(SyncError::Conflict { event_id: id }),
        Err(err) => Err(write_err("record event id", err)),
    }
}

/// Raise the stream head, never lowering it.
async fn advance_max_id(tx: &mut Transaction<'_, Postgres>, id: EventId) -> Result<()> {
    sqlx::query(
        "INSERT INTO follower_state (key, value) VALUES ($1, $2)
         ON CONFLICT (key) DO UPDATE
         SET value = GREATEST(follower_state.value, EXCLUDED.value)",
    )
    .bind(MAX_NOTIFICATION_ID_KEY)
    .bind(id.as_i64())
    .execute(&mut **tx)
    .await
    .map_err(|err| write_err("advance stream head", err))?;
    Ok(())
}

async fn set_state(tx: &mut Transaction<'_, Postgres>, key: &str, id: EventId) -> Result<()> {
    sqlx::query(
        "INSERT INTO follower_state (key, value) VALUES ($1, $2)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
    )
    .bind(key)
    .bind(id.as_i64())
    .execute(&mut **tx)
    .await
    .map_err(|err| write_err(key, err))?;
    Ok(())
}

async fn read_objs(tx: &mut Transaction<'_, Postgres>, path: &str) -> Result<Vec<AuthzObject>> {
    let row = sqlx::query("SELECT authz_objs FROM authz_paths WHERE path = $1")
        .bind(path)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|err| SyncError::PersistenceRead(format!("path objects: {err}")))?;
    match row {
        Some(row) => {
            let raw: serde_json::Value = row.get("authz_objs");
            serde_json::from_value(raw)
                .map_err(|err| SyncError::PersistenceRead(format!("decode path objects: {err}")))
        }
        None => Ok(Vec::new()),
    }
}

/// Upsert the object list for a path, or drop the row once nothing governs
/// the path anymore.
async fn write_objs(
    tx: &mut Transaction<'_, Postgres>,
    path: &str,
    objs: Vec<AuthzObject>,
) -> Result<()> {
    if objs.is_empty() {
        sqlx::query("DELETE FROM authz_paths WHERE path = $1")
            .bind(path)
            .execute(&mut **tx)
            .await
            .map_err(|err| write_err("drop path", err))?;
        return Ok(());
    }
    let encoded = serde_json::to_value(&objs)
        .map_err(|err| SyncError::PersistenceWrite(format!("encode path objects: {err}")))?;
    sqlx::query(
        "INSERT INTO authz_paths (path, authz_objs) VALUES ($1, $2)
         ON CONFLICT (path) DO UPDATE SET authz_objs = EXCLUDED.authz_objs",
    )
    .bind(path)
    .bind(encoded)
    .execute(&mut **tx)
    .await
    .map_err(|err| write_err("upsert path", err))?;
    Ok(())
}

async fn add_obj(
    tx: &mut Transaction<'_, Postgres>,
    path: &str,
    obj: &AuthzObject,
) -> Result<()> {
    let mut objs = read_objs(tx, path).await?;
    if !objs.contains(obj) {
        objs.push(obj.clone());
        objs.sort();
    }
    write_objs(tx, path, objs).await
}

async fn remove_obj(
    tx: &mut Transaction<'_, Postgres>,
    path: &str,
    obj: &AuthzObject,
) -> Result<()> {
    let mut objs = read_objs(tx, path).await?;
    objs.retain(|existing| existing != obj);
    write_objs(tx, path, objs).await
}

async fn apply_change(tx: &mut Transaction<'_, Postgres>, change: &ChangeRecord) -> Result<()> {
    match change {
        ChangeRecord::AddPath { authz_obj, path } => add_obj(tx, path, authz_obj).await,
        ChangeRecord::RemovePath { authz_obj, path } => remove_obj(tx, path, authz_obj).await,
        ChangeRecord::RenameAuthzObject {
            old_authz_obj,
            new_authz_obj,
            old_path,
            new_path,
        } => {
            remove_obj(tx, old_path, old_authz_obj).await?;
            add_obj(tx, new_path, new_authz_obj).await
        }
        ChangeRecord::RemoveAuthzObject { authz_obj } => {
            sqlx::query(
                "UPDATE authz_paths SET authz_objs = authz_objs - $1
                 WHERE authz_objs ? $1",
            )
            .bind(authz_obj.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|err| write_err("strip object", err))?;
            sqlx::query("DELETE FROM authz_paths WHERE authz_objs = '[]'::jsonb")
                .execute(&mut **tx)
                .await
                .map_err(|err| write_err("drop orphaned paths", err))?;
            Ok(())
        }
        ChangeRecord::Noop { .. } => Ok(()),
    }
}

#[async_trait]
impl PersistenceGateway for PostgresGateway {
    async fn max_notification_id(&self) -> Result<EventId> {
        self.read_state(MAX_NOTIFICATION_ID_KEY).await
    }

    async fn notifications_empty(&self) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM processed_notifications) AS present")
            .fetch_one(&self.pool)
            .await
            .map_err(|err| SyncError::PersistenceRead(format!("notifications empty: {err}")))?;
        Ok(!row.get::<bool, _>("present"))
    }

    async fn path_snapshot_empty(&self) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM authz_paths) AS present")
            .fetch_one(&self.pool)
            .await
            .map_err(|err| SyncError::PersistenceRead(format!("path snapshot empty: {err}")))?;
        Ok(!row.get::<bool, _>("present"))
    }

    async fn last_image_id(&self) -> Result<EventId> {
        self.read_state(LAST_IMAGE_ID_KEY).await
    }

    async fn persist_full_image(&self, paths: PathImage, image_id: EventId) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| write_err("begin image transaction", err))?;

        sqlx::query("DELETE FROM authz_paths")
            .execute(&mut *tx)
            .await
            .map_err(|err| write_err("clear path image", err))?;
        for (path, objs) in paths.iter() {
            let mut objs: Vec<AuthzObject> = objs.iter().cloned().collect();
            objs.sort();
            write_objs(&mut tx, path, objs).await?;
        }

        // A re-base invalidates every previously recorded id: the image now
        // speaks for everything at or below `image_id`.
        sqlx::query("DELETE FROM processed_notifications")
            .execute(&mut *tx)
            .await
            .map_err(|err| write_err("clear processed ids", err))?;
        record_event_id(&mut tx, image_id).await?;
        set_state(&mut tx, MAX_NOTIFICATION_ID_KEY, image_id).await?;
        set_state(&mut tx, LAST_IMAGE_ID_KEY, image_id).await?;

        tx.commit()
            .await
            .map_err(|err| write_err("commit image transaction", err))
    }

    async fn persist_last_processed_id(&self, id: EventId) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| write_err("begin head transaction", err))?;
        sqlx::query(
            "INSERT INTO processed_notifications (event_id) VALUES ($1)
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(id.as_i64())
        .execute(&mut *tx)
        .await
        .map_err(|err| write_err("record no-op id", err))?;
        advance_max_id(&mut tx, id).await?;
        tx.commit()
            .await
            .map_err(|err| write_err("commit head transaction", err))
    }

    async fn apply_event(&self, event: &NotificationEvent) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| write_err("begin event transaction", err))?;
        record_event_id(&mut tx, event.id).await?;
        apply_change(&mut tx, &event.change).await?;
        advance_max_id(&mut tx, event.id).await?;
        tx.commit()
            .await
            .map_err(|err| write_err("commit event transaction", err))?;
        Ok(event.change.is_relevant())
    }

    fn counter_wait(&self) -> Arc<CounterWait> {
        Arc::clone(&self.counter)
    }
}
