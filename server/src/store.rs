//! Replay and result bookkeeping.
//!
//! Two records are kept: the outcome each client id received on a given day
//! (so repeated requests replay it verbatim) and every issued verification
//! code with its issuance time. Backends only need to be consistent per key;
//! the in-memory store is per process, the Redis store is shared.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("corrupt stored record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Everything a caller was told about a draw. Once stored it is served back
/// byte-for-byte for the rest of the day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawRecord {
    pub day: String,
    pub won: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prize: Option<String>,
    pub mensaje: String,
    pub now_utc: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub issued_at_ms: u64,
}

pub trait ResultStore: Send + Sync + 'static {
    /// Outcome already issued to `client_id` on `day`, if any.
    fn cached_result(
        &self,
        client_id: &str,
        day: &str,
    ) -> impl Future<Output = Result<Option<DrawRecord>, StoreError>> + Send;

    /// Store `record` for `client_id` unless one already exists for the same
    /// day, returning whichever record is authoritative.
    fn store_result(
        &self,
        client_id: &str,
        record: DrawRecord,
    ) -> impl Future<Output = Result<DrawRecord, StoreError>> + Send;

    fn store_issued_code(
        &self,
        code: &str,
        issued_at_ms: u64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Drop entries issued more than `max_age` before `now_ms`. Returns the
    /// number of entries removed.
    fn evict_older_than(
        &self,
        now_ms: u64,
        max_age: Duration,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;
}

#[derive(Default)]
struct MemoryState {
    results: HashMap<String, DrawRecord>,
    codes: HashMap<String, u64>,
}

/// Process-local store. Each operation holds the lock for its whole
/// read-modify-write, so racing requests for one client cannot both insert.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issued_code_count(&self) -> usize {
        self.lock().codes.len()
    }

    pub fn result_count(&self) -> usize {
        self.lock().results.len()
    }

    pub fn issued_at(&self, code: &str) -> Option<u64> {
        self.lock().codes.get(code).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ResultStore for MemoryStore {
    async fn cached_result(
        &self,
        client_id: &str,
        day: &str,
    ) -> Result<Option<DrawRecord>, StoreError> {
        let state = self.lock();
        Ok(state
            .results
            .get(client_id)
            .filter(|record| record.day == day)
            .cloned())
    }

    async fn store_result(
        &self,
        client_id: &str,
        record: DrawRecord,
    ) -> Result<DrawRecord, StoreError> {
        let mut state = self.lock();
        match state.results.get(client_id) {
            Some(existing) if existing.day == record.day => Ok(existing.clone()),
            _ => {
                state.results.insert(client_id.to_string(), record.clone());
                Ok(record)
            }
        }
    }

    async fn store_issued_code(&self, code: &str, issued_at_ms: u64) -> Result<(), StoreError> {
        self.lock().codes.insert(code.to_string(), issued_at_ms);
        Ok(())
    }

    async fn evict_older_than(&self, now_ms: u64, max_age: Duration) -> Result<usize, StoreError> {
        let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        let expired = |issued_at_ms: u64| now_ms.saturating_sub(issued_at_ms) > max_age_ms;

        let mut state = self.lock();
        let before = state.codes.len() + state.results.len();
        state.codes.retain(|_, issued_at_ms| !expired(*issued_at_ms));
        state.results.retain(|_, record| !expired(record.issued_at_ms));
        Ok(before - state.codes.len() - state.results.len())
    }
}
