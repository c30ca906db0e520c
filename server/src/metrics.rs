use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LATENCY_BUCKET_COUNT: usize = 10;
const LATENCY_BUCKETS_MS: [u64; LATENCY_BUCKET_COUNT] = [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000];

#[derive(Clone, Debug, Serialize)]
pub struct LatencySnapshot {
    pub buckets_ms: Vec<u64>,
    pub counts: Vec<u64>,
    pub overflow: u64,
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

#[derive(Default)]
struct LatencyMetrics {
    buckets: [AtomicU64; LATENCY_BUCKET_COUNT],
    overflow: AtomicU64,
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyMetrics {
    fn record(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);

        match LATENCY_BUCKETS_MS.iter().position(|bucket| ms <= *bucket) {
            Some(idx) => self.buckets[idx].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_ms = self.total_ms.load(Ordering::Relaxed);
        let avg_ms = if count > 0 {
            total_ms as f64 / count as f64
        } else {
            0.0
        };
        LatencySnapshot {
            buckets_ms: LATENCY_BUCKETS_MS.to_vec(),
            counts: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            overflow: self.overflow.load(Ordering::Relaxed),
            count,
            avg_ms,
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RaffleMetricsSnapshot {
    pub draws: u64,
    pub wins: u64,
    pub replays: u64,
    pub reject_origin: u64,
    pub reject_rate_limit: u64,
    pub reject_method: u64,
    pub reject_body: u64,
    pub internal_errors: u64,
    pub evicted: u64,
    pub draw_latency: LatencySnapshot,
}

#[derive(Default)]
pub struct RaffleMetrics {
    draws: AtomicU64,
    wins: AtomicU64,
    replays: AtomicU64,
    reject_origin: AtomicU64,
    reject_rate_limit: AtomicU64,
    reject_method: AtomicU64,
    reject_body: AtomicU64,
    internal_errors: AtomicU64,
    evicted: AtomicU64,
    draw_latency: LatencyMetrics,
}

impl RaffleMetrics {
    pub fn record_draw(&self, won: bool, duration: Duration) {
        self.draws.fetch_add(1, Ordering::Relaxed);
        if won {
            self.wins.fetch_add(1, Ordering::Relaxed);
        }
        self.draw_latency.record(duration);
    }

    pub fn inc_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_origin(&self) {
        self.reject_origin.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_rate_limit(&self) {
        self.reject_rate_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_method(&self) {
        self.reject_method.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_body(&self) {
        self.reject_body.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_evicted(&self, count: usize) {
        self.evicted
            .fetch_add(u64::try_from(count).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RaffleMetricsSnapshot {
        RaffleMetricsSnapshot {
            draws: self.draws.load(Ordering::Relaxed),
            wins: self.wins.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            reject_origin: self.reject_origin.load(Ordering::Relaxed),
            reject_rate_limit: self.reject_rate_limit.load(Ordering::Relaxed),
            reject_method: self.reject_method.load(Ordering::Relaxed),
            reject_body: self.reject_body.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            draw_latency: self.draw_latency.snapshot(),
        }
    }
}

/// Render a snapshot in the Prometheus text exposition format.
pub fn render_prometheus(snapshot: &RaffleMetricsSnapshot) -> String {
    let mut out = String::new();
    append_counter(&mut out, "raffle_draws_total", snapshot.draws);
    append_counter(&mut out, "raffle_wins_total", snapshot.wins);
    append_counter(&mut out, "raffle_replays_total", snapshot.replays);
    append_counter(&mut out, "raffle_reject_origin_total", snapshot.reject_origin);
    append_counter(
        &mut out,
        "raffle_reject_rate_limit_total",
        snapshot.reject_rate_limit,
    );
    append_counter(&mut out, "raffle_reject_method_total", snapshot.reject_method);
    append_counter(&mut out, "raffle_reject_body_total", snapshot.reject_body);
    append_counter(&mut out, "raffle_internal_errors_total", snapshot.internal_errors);
    append_counter(&mut out, "raffle_evicted_total", snapshot.evicted);
    append_histogram(&mut out, "raffle_draw_latency_ms", &snapshot.draw_latency);
    out
}

fn append_counter(out: &mut String, name: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn append_histogram(out: &mut String, name: &str, snapshot: &LatencySnapshot) {
    let _ = writeln!(out, "# TYPE {name} histogram");
    let mut cumulative = 0u64;
    for (bucket, count) in snapshot.buckets_ms.iter().zip(snapshot.counts.iter()) {
        cumulative = cumulative.saturating_add(*count);
        let _ = writeln!(out, "{name}_bucket{{le=\"{bucket}\"}} {cumulative}");
    }
    cumulative = cumulative.saturating_add(snapshot.overflow);
    let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(out, "{name}_count {}", snapshot.count);
    let sum = snapshot.avg_ms * snapshot.count as f64;
    let _ = writeln!(out, "{name}_sum {sum}");
}
