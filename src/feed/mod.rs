// =============================================================================
// FeedController — per-symbol connection lifecycle and liveness policy
// =============================================================================
//
// Replaces the REST rate-limit tracker's job of "decide whether it's safe to
// call the exchange again" with the feed's equivalent: decide whether it's
// safe to request another snapshot, how long to back off after a failure,
// and whether the symbol currently counts as live for auto-scaling. The
// atomic-counter idiom for lock-free cross-task reads carries over from the
// REST rate limiter; everything here is timestamp-driven instead of
// weight-driven.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::book::UiState;

mod rest_snapshot;
pub use rest_snapshot::RestSnapshotFetcher;

/// 1 Hz liveness watchdog cadence, per the feed's auto-scaler loop.
pub const WATCHDOG_INTERVAL_MS: i64 = 1_000;
/// Rolling window used to compute live-uptime percentage for auto-scaling.
pub const AUTO_SCALE_WINDOW_MS: i64 = 60_000;

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// HTTP status codes Binance uses to signal "back off hard, you're banned".
fn is_hard_ban_status(status: u16) -> bool {
    status == 429 || status == 418
}

/// Exponential backoff with a hard cap, shared by snapshot refetches and
/// reconnects. Doubling matches the REST client's own weight-warning
/// escalation rather than inventing a new curve.
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    current_ms: AtomicU64,
    halted: AtomicBool,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            current_ms: AtomicU64::new(base_ms),
            halted: AtomicBool::new(false),
        }
    }

    /// Record a failed attempt, optionally carrying the upstream HTTP
    /// status. Returns the delay to wait before retrying.
    pub fn on_failure(&self, status: Option<u16>) -> u64 {
        if let Some(s) = status {
            if is_hard_ban_status(s) {
                self.halted.store(true, Ordering::SeqCst);
                warn!(status = s, "feed backoff: hard ban status, halting symbol");
                return self.max_ms;
            }
        }
        let prev = self.current_ms.load(Ordering::Relaxed);
        let next = (prev.saturating_mul(2)).min(self.max_ms);
        self.current_ms.store(next, Ordering::Relaxed);
        debug!(prev_ms = prev, next_ms = next, "feed backoff doubled");
        next
    }

    pub fn on_success(&self) {
        self.current_ms.store(self.base_ms, Ordering::Relaxed);
    }

    pub fn current_ms(&self) -> u64 {
        self.current_ms.load(Ordering::Relaxed)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn clear_halt(&self) {
        self.halted.store(false, Ordering::SeqCst);
        self.current_ms.store(self.base_ms, Ordering::Relaxed);
    }
}

/// Per-symbol connection/liveness tracker. One instance lives alongside each
/// symbol's order book and metric pipeline.
pub struct FeedController {
    symbol: String,
    snapshot_min_interval_ms: u64,
    backoff: Backoff,
    last_snapshot_request_ms: AtomicI64,
    last_data_ms: AtomicI64,
    last_snapshot_applied_ms: AtomicI64,
    live_snapshot_fresh_ms: i64,
    live_samples: parking_lot::Mutex<std::collections::VecDeque<(i64, bool)>>,
}

impl FeedController {
    pub fn new(
        symbol: impl Into<String>,
        snapshot_min_interval_ms: u64,
        max_backoff_ms: u64,
        live_snapshot_fresh_ms: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            snapshot_min_interval_ms,
            backoff: Backoff::new(snapshot_min_interval_ms.max(1), max_backoff_ms),
            last_snapshot_request_ms: AtomicI64::new(0),
            last_data_ms: AtomicI64::new(0),
            last_snapshot_applied_ms: AtomicI64::new(0),
            live_snapshot_fresh_ms,
            live_samples: parking_lot::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// `max(SNAPSHOT_MIN_INTERVAL_MS, per-symbol backoff)`.
    pub fn snapshot_throttle_ms(&self) -> u64 {
        self.snapshot_min_interval_ms.max(self.backoff.current_ms())
    }

    pub fn may_request_snapshot(&self, ts_ms: i64) -> bool {
        if self.backoff.is_halted() {
            return false;
        }
        let last = self.last_snapshot_request_ms.load(Ordering::Relaxed);
        ts_ms - last >= self.snapshot_throttle_ms() as i64
    }

    pub fn record_snapshot_request(&self, ts_ms: i64) {
        self.last_snapshot_request_ms.store(ts_ms, Ordering::Relaxed);
    }

    pub fn record_snapshot_applied(&self, ts_ms: i64) {
        self.last_snapshot_applied_ms.store(ts_ms, Ordering::Relaxed);
        self.backoff.on_success();
    }

    pub fn record_snapshot_failure(&self, status: Option<u16>) -> u64 {
        self.backoff.on_failure(status)
    }

    pub fn record_data_received(&self, ts_ms: i64) {
        self.last_data_ms.store(ts_ms, Ordering::Relaxed);
    }

    pub fn is_halted(&self) -> bool {
        self.backoff.is_halted()
    }

    pub fn clear_halt(&self) {
        self.backoff.clear_halt();
        info!(symbol = %self.symbol, "feed unhalted");
    }

    /// `is_live := has_book AND (data_flowing OR snapshot_fresh)`, sampled by
    /// the 1 Hz watchdog.
    pub fn check_liveness(&self, ts_ms: i64, book_state: UiState) -> bool {
        let has_book = matches!(book_state, UiState::Live);
        let data_flowing = ts_ms - self.last_data_ms.load(Ordering::Relaxed) <= WATCHDOG_INTERVAL_MS * 2;
        let snapshot_fresh =
            ts_ms - self.last_snapshot_applied_ms.load(Ordering::Relaxed) <= self.live_snapshot_fresh_ms;
        let is_live = has_book && (data_flowing || snapshot_fresh);

        let mut samples = self.live_samples.lock();
        samples.push_back((ts_ms, is_live));
        let floor = ts_ms - AUTO_SCALE_WINDOW_MS;
        while let Some(&(t, _)) = samples.front() {
            if t < floor {
                samples.pop_front();
            } else {
                break;
            }
        }
        is_live
    }

    /// Rolling live-uptime percentage over the auto-scale window, used by
    /// the caller to decide whether to add or shed symbol subscriptions.
    pub fn live_uptime_pct(&self) -> f64 {
        let samples = self.live_samples.lock();
        if samples.is_empty() {
            return 0.0;
        }
        let live_count = samples.iter().filter(|(_, live)| *live).count();
        live_count as f64 / samples.len() as f64 * 100.0
    }
}

/// Decides whether the set of actively-subscribed symbols should grow or
/// shrink, based on each feed's rolling live-uptime percentage. Mirrors the
/// rate limiter's threshold/hysteresis shape (soft warn vs. hard cap)
/// without sharing its counters.
pub struct AutoScaler {
    down_pct: f64,
    up_pct: f64,
    hold_ms: i64,
    last_change_ms: AtomicI64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Hold,
    ScaleUp,
    ScaleDown,
}

impl AutoScaler {
    pub fn new(down_pct: f64, up_pct: f64, hold_ms: i64) -> Self {
        Self {
            down_pct,
            up_pct,
            hold_ms,
            last_change_ms: AtomicI64::new(i64::MIN),
        }
    }

    pub fn decide(&self, ts_ms: i64, aggregate_live_uptime_pct: f64) -> ScaleDecision {
        let last_change = self.last_change_ms.load(Ordering::Relaxed);
        if ts_ms - last_change < self.hold_ms {
            return ScaleDecision::Hold;
        }
        let decision = if aggregate_live_uptime_pct <= self.down_pct {
            ScaleDecision::ScaleDown
        } else if aggregate_live_uptime_pct >= self.up_pct {
            ScaleDecision::ScaleUp
        } else {
            ScaleDecision::Hold
        };
        if decision != ScaleDecision::Hold {
            self.last_change_ms.store(ts_ms, Ordering::Relaxed);
        }
        decision
    }
}

/// Boundary to the REST snapshot fetcher. The transport itself (HTTP client,
/// retry-after parsing) is outside this crate; callers supply an
/// implementation and the `FeedController` only consumes its outcome.
#[async_trait::async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch_snapshot(
        &self,
        symbol: &str,
    ) -> Result<crate::types::DepthSnapshot, SnapshotFetchError>;
}

#[derive(Debug, Clone)]
pub struct SnapshotFetchError {
    pub status: Option<u16>,
    pub retry_after_ms: Option<u64>,
    pub message: String,
}

/// Boundary to the outbound metric-bundle broadcast. Transport (WebSocket
/// server, SSE, message bus) is outside this crate's scope.
#[async_trait::async_trait]
pub trait BundleBroadcaster: Send + Sync {
    async fn broadcast(&self, bundle: &crate::metrics::MetricBundle);
}

/// Boundary to wherever `OrchestratorV1::evaluate`'s per-tick `Decision`
/// goes next — an execution layer, a dashboard feed, or (in dry-run) just a
/// log sink. This crate only produces the `Decision`; acting on it is out of
/// scope the same way order placement and signing are.
#[async_trait::async_trait]
pub trait DecisionSink: Send + Sync {
    async fn on_decision(&self, symbol: &str, decision: &crate::orchestrator::Decision);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let b = Backoff::new(100, 1_000);
        assert_eq!(b.on_failure(None), 200);
        assert_eq!(b.on_failure(None), 400);
        assert_eq!(b.on_failure(None), 800);
        assert_eq!(b.on_failure(None), 1_000);
        assert_eq!(b.on_failure(None), 1_000);
    }

    #[test]
    fn hard_ban_status_halts_immediately() {
        let b = Backoff::new(100, 1_000);
        assert!(!b.is_halted());
        b.on_failure(Some(429));
        assert!(b.is_halted());
    }

    #[test]
    fn snapshot_throttle_uses_backoff_when_larger() {
        let fc = FeedController::new("BTCUSDT", 500, 10_000, 3_000);
        assert_eq!(fc.snapshot_throttle_ms(), 500);
        fc.record_snapshot_failure(None);
        assert!(fc.snapshot_throttle_ms() > 500);
    }

    #[test]
    fn liveness_requires_book_and_fresh_data() {
        let fc = FeedController::new("BTCUSDT", 500, 10_000, 3_000);
        assert!(!fc.check_liveness(0, UiState::Init));
        fc.record_data_received(0);
        assert!(fc.check_liveness(100, UiState::Live));
        assert!(!fc.check_liveness(10_000, UiState::Live));
    }

    #[test]
    fn autoscaler_respects_hold_interval() {
        let scaler = AutoScaler::new(50.0, 90.0, 5_000);
        assert_eq!(scaler.decide(0, 10.0), ScaleDecision::ScaleDown);
        assert_eq!(scaler.decide(1_000, 95.0), ScaleDecision::Hold);
        assert_eq!(scaler.decide(6_000, 95.0), ScaleDecision::ScaleUp);
    }
}
