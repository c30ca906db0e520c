use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::store::{DrawRecord, ResultStore, StoreError};

/// Shared store for deployments running several instances. Keys expire through
/// Redis TTLs, so there is nothing to sweep locally.
pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<redis::aio::ConnectionManager>>,
    prefix: String,
    ttl: Duration,
}

impl RedisStore {
    pub fn new(url: &str, prefix: String, ttl: Duration) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            prefix,
            ttl,
        })
    }

    fn result_key(&self, client_id: &str, day: &str) -> String {
        format!("{}result:{}:{}", self.prefix, day, client_id)
    }

    fn code_key(&self, code: &str) -> String {
        format!("{}code:{}", self.prefix, code)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }

    /// Hand out a connection, dialing lazily. The manager is cloned out so the
    /// lock is not held across the command round trip.
    async fn connection(&self) -> Result<redis::aio::ConnectionManager, StoreError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_connection_manager().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self, err: &redis::RedisError) {
        tracing::warn!("Redis store command failed: {err}");
        *self.connection.lock().await = None;
    }

    async fn run<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(redis::aio::ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match op(conn).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.reset(&err).await;
                Err(err.into())
            }
        }
    }
}

impl ResultStore for RedisStore {
    async fn cached_result(
        &self,
        client_id: &str,
        day: &str,
    ) -> Result<Option<DrawRecord>, StoreError> {
        let key = self.result_key(client_id, day);
        let raw: Option<String> = self
            .run(|mut conn| async move { conn.get(key).await })
            .await?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
    }

    async fn store_result(
        &self,
        client_id: &str,
        record: DrawRecord,
    ) -> Result<DrawRecord, StoreError> {
        let key = self.result_key(client_id, &record.day);
        let value = serde_json::to_string(&record)?;
        let ttl = self.ttl_secs();
        let set_key = key.clone();
        let inserted: Option<String> = self
            .run(|mut conn| async move {
                let mut cmd = redis::cmd("SET");
                cmd.arg(set_key).arg(value).arg("NX").arg("EX").arg(ttl);
                cmd.query_async(&mut conn).await
            })
            .await?;
        if inserted.is_some() {
            return Ok(record);
        }

        // Another request stored first; serve its record.
        let existing: Option<String> = self
            .run(|mut conn| async move { conn.get(key).await })
            .await?;
        match existing {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(record),
        }
    }

    async fn store_issued_code(&self, code: &str, issued_at_ms: u64) -> Result<(), StoreError> {
        let key = self.code_key(code);
        let ttl = self.ttl_secs();
        self.run(|mut conn| async move { conn.set_ex::<_, _, ()>(key, issued_at_ms, ttl).await })
            .await
    }

    async fn evict_older_than(&self, _now_ms: u64, _max_age: Duration) -> Result<usize, StoreError> {
        Ok(0)
    }
}
