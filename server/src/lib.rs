//! Raffle HTTP service.
//!
//! A [`Raffle`] owns the configured guards and stores and runs one draw per
//! request: rate limit the caller's network bucket, replay a stored result for
//! a known client id, otherwise decide, pick a prize, issue a code, and record
//! it. The origin check and HTTP plumbing live in [`Api`].
//!
//! Rate windows and the in-memory store are per process. With several
//! instances behind a load balancer the limits and replay guarantees hold per
//! instance unless a shared [`RedisStore`] is configured, and even then the
//! rate limiter stays local.

use chrono::{DateTime, SecondsFormat, Utc};
use raffle_execution::{draw, issue_code, BucketKey, DayKey, DrawInput, Outcome};
use std::time::Instant;
use tracing::{debug, info};

mod api;
pub use api::Api;

mod cache;
pub use cache::RedisStore;
mod config;
pub use config::{
    parse_host_list, ConfigError, FairnessMode, RaffleConfig, Secret, DEFAULT_SECRET,
};
mod error;
pub use error::RaffleError;
mod metrics;
pub use metrics::{RaffleMetrics, RaffleMetricsSnapshot};
mod origin;
pub use origin::{OriginCheck, OriginGuard};
mod rate_limit;
pub use rate_limit::SlidingWindowLimiter;
mod store;
pub use store::{DrawRecord, MemoryStore, ResultStore, StoreError};

/// Client ids longer than this are ignored rather than stored.
pub const MAX_CLIENT_ID_LEN: usize = 128;

pub const LOSE_MESSAGE: &str = "😅 Sin premio esta vez. ¡Probá en tu próxima carga!";

/// Message shown to a winner of `prize`.
pub fn win_message(prize: &str) -> String {
    format!("🎁 ¡Ganaste {prize}!")
}

/// Trim a caller-supplied client id, dropping empty or oversized values.
pub fn normalize_client_id(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_CLIENT_ID_LEN {
        return None;
    }
    Some(trimmed.to_string())
}

/// Caller identity for one draw.
#[derive(Clone, Debug, Default)]
pub struct DrawRequest {
    /// Raw caller address, as extracted from headers or the socket.
    pub address: String,
    pub client_id: Option<String>,
}

/// Source of the current instant; replaceable so draws can be replayed.
pub type Clock = fn() -> DateTime<Utc>;

pub struct Raffle<S> {
    config: RaffleConfig,
    clock: Clock,
    origin_guard: OriginGuard,
    limiter: SlidingWindowLimiter,
    store: S,
    metrics: RaffleMetrics,
}

impl<S: ResultStore> Raffle<S> {
    pub fn new(config: RaffleConfig, store: S) -> Self {
        let origin_guard = OriginGuard::new(&config.allowed_hosts, config.preview_suffix());
        let limiter =
            SlidingWindowLimiter::new(config.rate_limit_window(), config.rate_limit_max_requests);
        Self {
            config,
            clock: Utc::now,
            origin_guard,
            limiter,
            store,
            metrics: RaffleMetrics::default(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RaffleConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn metrics(&self) -> &RaffleMetrics {
        &self.metrics
    }

    pub fn check_origin(&self, declared: Option<&str>) -> OriginCheck {
        self.origin_guard.check(declared)
    }

    pub async fn draw(&self, request: DrawRequest) -> Result<DrawRecord, RaffleError> {
        self.draw_at(request, (self.clock)()).await
    }

    /// Run the draw pipeline as of `now`.
    pub async fn draw_at(
        &self,
        request: DrawRequest,
        now: DateTime<Utc>,
    ) -> Result<DrawRecord, RaffleError> {
        let start = Instant::now();
        let now_ms = u64::try_from(now.timestamp_millis())
            .map_err(|_| RaffleError::Internal(format!("clock before unix epoch: {now}")))?;

        let bucket = BucketKey::from_address(&request.address);
        if !self.limiter.allow_at(bucket.as_str(), now_ms) {
            self.metrics.inc_reject_rate_limit();
            info!(bucket = %bucket, "raffle.rate_limited");
            return Err(RaffleError::RateLimited);
        }

        let day = DayKey::from_datetime(now);
        let client_id = match self.config.fairness {
            FairnessMode::Network => None,
            FairnessMode::Client => normalize_client_id(request.client_id.as_deref()),
        };

        if let Some(client_id) = client_id.as_deref() {
            if let Some(record) = self.store.cached_result(client_id, day.as_str()).await? {
                self.metrics.inc_replay();
                debug!(bucket = %bucket, day = %day, client_id, code = %record.code, "raffle.replay");
                return Ok(record);
            }
        }

        let secret = self.config.secret.expose();
        let Outcome { won, prize, .. } = draw(
            &DrawInput {
                bucket: &bucket,
                day: &day,
                secret,
                client_id: client_id.as_deref(),
            },
            self.config.win_probability,
            &self.config.prizes,
        );
        let prize = prize.map(|prize| prize.label);
        let mensaje = match prize.as_deref() {
            Some(label) => win_message(label),
            None => LOSE_MESSAGE.to_string(),
        };
        let now_utc = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let code = issue_code(&now_utc, &bucket, client_id.as_deref(), won, secret);

        let record = DrawRecord {
            day: day.to_string(),
            won,
            prize,
            mensaje,
            now_utc,
            code,
            client_id: client_id.clone(),
            issued_at_ms: now_ms,
        };

        self.store.store_issued_code(&record.code, now_ms).await?;
        let record = match client_id.as_deref() {
            Some(client_id) => self.store.store_result(client_id, record).await?,
            None => record,
        };
        let evicted = self
            .store
            .evict_older_than(now_ms, self.config.code_ttl())
            .await?;
        if evicted > 0 {
            self.metrics.add_evicted(evicted);
            debug!(evicted, "raffle.evicted");
        }

        self.metrics.record_draw(record.won, start.elapsed());
        info!(
            bucket = %bucket,
            day = %day,
            client = record.client_id.is_some(),
            won = record.won,
            code = %record.code,
            "raffle.draw"
        );
        Ok(record)
    }
}
