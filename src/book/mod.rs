// =============================================================================
// OrderBook — sparse price-indexed book with sequence-tracked apply
// =============================================================================
//
// Replaces the flat best-bid/best-ask tracker the feed used to keep: every
// price level is retained until explicitly deleted (qty == 0), and every
// applied diff is checked against the (U, u) sequence window before it
// touches the book. Levels are stored in a `BTreeMap` so best bid/ask and
// top-N traversal fall out of key ordering instead of a separate max/min
// scan.
// =============================================================================

use std::collections::{BTreeMap, VecDeque};

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::types::{DepthDiff, DepthSnapshot, PriceLevel};

/// Lifecycle state of a single symbol's book, per the feed controller state
/// machine: `INIT -> SNAPSHOT_PENDING -> APPLYING_SNAPSHOT -> LIVE`, with
/// `RESYNCING`/`HALTED` excursions on gaps and persistent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiState {
    Init,
    SnapshotPending,
    ApplyingSnapshot,
    Live,
    Resyncing,
    Halted,
}

impl std::fmt::Display for UiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::SnapshotPending => "SNAPSHOT_PENDING",
            Self::ApplyingSnapshot => "APPLYING_SNAPSHOT",
            Self::Live => "LIVE",
            Self::Resyncing => "RESYNCING",
            Self::Halted => "HALTED",
        };
        write!(f, "{s}")
    }
}

/// Applied/dropped/buffered/desync counters, surfaced for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookStats {
    pub applied: u64,
    pub dropped: u64,
    pub buffered: u64,
    pub desyncs: u64,
}

/// The last diff's (U, u) pair, kept for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastSeenUU {
    pub u_first: u64,
    pub u_final: u64,
}

/// Result of applying a REST snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotResult {
    pub ok: bool,
    pub applied_count: u64,
    pub dropped_count: u64,
    pub gap_detected: bool,
}

/// Result of applying a single depth-diff event.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthApplyResult {
    pub ok: bool,
    pub applied: bool,
    pub dropped: bool,
    pub buffered: bool,
    pub gap_detected: bool,
}

/// The maximum number of buffered diffs retained while not LIVE before a
/// buffer overflow forces a resync (failure mode in §4.1).
const BUFFER_OVERFLOW_LIMIT: usize = 2_000;

/// Per-symbol sparse limit order book with sequence-tracked apply semantics.
pub struct OrderBook {
    symbol: String,
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_update_id: u64,
    buffer: VecDeque<DepthDiff>,
    ui_state: UiState,
    last_seen: LastSeenUU,
    stats: BookStats,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            buffer: VecDeque::new(),
            ui_state: UiState::Init,
            last_seen: LastSeenUU::default(),
            stats: BookStats::default(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn ui_state(&self) -> UiState {
        self.ui_state
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn stats(&self) -> BookStats {
        self.stats
    }

    pub fn last_seen(&self) -> LastSeenUU {
        self.last_seen
    }

    /// Call once the WebSocket connects, per the INIT -> SNAPSHOT_PENDING
    /// transition.
    pub fn on_ws_open(&mut self) {
        if self.ui_state == UiState::Init {
            self.ui_state = UiState::SnapshotPending;
            debug!(symbol = %self.symbol, "book: ws_open, entering SNAPSHOT_PENDING");
        }
    }

    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.iter().next_back().map(|(p, q)| (*p, *q))
    }

    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.iter().next().map(|(p, q)| (*p, *q))
    }

    /// Top-N levels per side, best first, with cumulative quantity alongside
    /// price/qty.
    pub fn top_n(&self, n: usize) -> (Vec<(Decimal, Decimal, Decimal)>, Vec<(Decimal, Decimal, Decimal)>) {
        let mut cum = Decimal::ZERO;
        let bids = self
            .bids
            .iter()
            .rev()
            .take(n)
            .map(|(p, q)| {
                cum += *q;
                (*p, *q, cum)
            })
            .collect();
        cum = Decimal::ZERO;
        let asks = self
            .asks
            .iter()
            .take(n)
            .map(|(p, q)| {
                cum += *q;
                (*p, *q, cum)
            })
            .collect();
        (bids, asks)
    }

    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bb, _)), Some((ba, _))) => bb >= ba,
            _ => false,
        }
    }

    fn apply_levels(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        for level in bids {
            if level.is_delete() {
                self.bids.remove(&level.price);
            } else {
                self.bids.insert(level.price, level.quantity);
            }
        }
        for level in asks {
            if level.is_delete() {
                self.asks.remove(&level.price);
            } else {
                self.asks.insert(level.price, level.quantity);
            }
        }
    }

    /// I1: in LIVE state, every applied diff satisfies `U <= last_update_id+1 <= u`.
    fn satisfies_window(&self, diff: &DepthDiff) -> bool {
        diff.first_update_id <= self.last_update_id + 1
            && self.last_update_id + 1 <= diff.final_update_id
    }

    /// Apply a REST depth snapshot: clears the book, loads all non-zero
    /// levels, then drains the buffer built up while not LIVE.
    pub fn apply_snapshot(&mut self, snap: &DepthSnapshot) -> SnapshotResult {
        self.bids.clear();
        self.asks.clear();
        self.apply_levels(&snap.bids, &snap.asks);
        self.last_update_id = snap.last_update_id;
        self.ui_state = UiState::ApplyingSnapshot;

        info!(
            symbol = %self.symbol,
            last_update_id = snap.last_update_id,
            bids = snap.bids.len(),
            asks = snap.asks.len(),
            "book: snapshot applied, draining buffer"
        );

        let mut result = SnapshotResult {
            ok: true,
            ..Default::default()
        };

        let buffered: Vec<DepthDiff> = self.buffer.drain(..).collect();
        let mut seeded = false;

        for diff in buffered {
            if diff.final_update_id <= self.last_update_id {
                result.dropped_count += 1;
                self.stats.dropped += 1;
                continue;
            }

            if !seeded {
                if !self.satisfies_window(&diff) {
                    result.gap_detected = true;
                    result.ok = false;
                    self.stats.desyncs += 1;
                    warn!(
                        symbol = %self.symbol,
                        last_update_id = self.last_update_id,
                        u_first = diff.first_update_id,
                        u_final = diff.final_update_id,
                        "book: gap detected while draining post-snapshot buffer"
                    );
                    break;
                }
                seeded = true;
            }

            self.apply_levels(&diff.bids, &diff.asks);
            self.last_update_id = diff.final_update_id;
            self.last_seen = LastSeenUU {
                u_first: diff.first_update_id,
                u_final: diff.final_update_id,
            };
            result.applied_count += 1;
            self.stats.applied += 1;
        }

        if result.ok {
            self.ui_state = UiState::Live;
        } else {
            self.ui_state = UiState::Resyncing;
        }

        result
    }

    /// Apply a single depth-diff event, per the state-dependent rules in
    /// §4.1.
    pub fn apply_depth_update(&mut self, diff: DepthDiff) -> DepthApplyResult {
        let mut result = DepthApplyResult::default();

        if !matches!(self.ui_state, UiState::Live) || self.last_update_id == 0 {
            self.buffer.push_back(diff);
            result.buffered = true;
            self.stats.buffered += 1;
            if self.buffer.len() > BUFFER_OVERFLOW_LIMIT {
                warn!(symbol = %self.symbol, len = self.buffer.len(), "book: buffer overflow, forcing resync");
                self.buffer.clear();
                self.ui_state = UiState::Resyncing;
            }
            return result;
        }

        if diff.final_update_id <= self.last_update_id {
            result.dropped = true;
            self.stats.dropped += 1;
            return result;
        }

        if diff.first_update_id > self.last_update_id + 1 {
            result.gap_detected = true;
            self.stats.desyncs += 1;
            self.ui_state = UiState::Resyncing;
            warn!(
                symbol = %self.symbol,
                last_update_id = self.last_update_id,
                u_first = diff.first_update_id,
                u_final = diff.final_update_id,
                "book: sequence gap, transitioning to RESYNCING"
            );
            return result;
        }

        self.last_seen = LastSeenUU {
            u_first: diff.first_update_id,
            u_final: diff.final_update_id,
        };
        self.apply_levels(&diff.bids, &diff.asks);
        self.last_update_id = diff.final_update_id;
        result.ok = true;
        result.applied = true;
        self.stats.applied += 1;
        result
    }

    /// Force the book into RESYNCING, e.g. from an integrity alert.
    pub fn force_resync(&mut self) {
        self.ui_state = UiState::Resyncing;
        self.buffer.clear();
    }

    pub fn set_halted(&mut self) {
        self.ui_state = UiState::Halted;
    }

    pub fn on_retry_after_elapsed(&mut self) {
        if self.ui_state == UiState::Halted {
            self.ui_state = UiState::SnapshotPending;
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal as D;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        D::from_str(s).unwrap()
    }

    fn level(price: &str, qty: &str) -> PriceLevel {
        PriceLevel::new(dec(price), dec(qty))
    }

    fn snap(last_update_id: u64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> DepthSnapshot {
        DepthSnapshot {
            symbol: "BTCUSDT".into(),
            last_update_id,
            bids,
            asks,
        }
    }

    fn diff(u_first: u64, u_final: u64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> DepthDiff {
        DepthDiff {
            symbol: "BTCUSDT".into(),
            first_update_id: u_first,
            final_update_id: u_final,
            prev_final_update_id: None,
            bids,
            asks,
            event_time_ms: 0,
            receipt_time_ms: 0,
        }
    }

    #[test]
    fn scenario_cold_start_single_symbol() {
        let mut book = OrderBook::new("BTCUSDT");
        book.on_ws_open();
        let snapshot = snap(
            1000,
            vec![level("100", "1"), level("99", "2")],
            vec![level("101", "3")],
        );
        let r = book.apply_snapshot(&snapshot);
        assert!(r.ok);
        assert_eq!(book.ui_state(), UiState::Live);

        let r1 = book.apply_depth_update(diff(1001, 1001, vec![level("100", "0")], vec![]));
        assert!(r1.applied);
        let r2 = book.apply_depth_update(diff(1002, 1003, vec![], vec![level("101", "1"), level("102", "0.5")]));
        assert!(r2.applied);

        assert_eq!(book.last_update_id(), 1003);
        assert_eq!(book.best_bid(), Some((dec("99"), dec("2"))));
        assert_eq!(book.best_ask(), Some((dec("101"), dec("1"))));
        assert!(!book.is_crossed());
    }

    #[test]
    fn scenario_gap_detection() {
        let mut book = OrderBook::new("BTCUSDT");
        book.on_ws_open();
        let snapshot = snap(2000, vec![level("100", "1")], vec![level("101", "1")]);
        book.apply_snapshot(&snapshot);

        let r = book.apply_depth_update(diff(2005, 2006, vec![], vec![]));
        assert!(r.gap_detected);
        assert!(!r.applied);
        assert_eq!(book.ui_state(), UiState::Resyncing);
        assert_eq!(book.stats().desyncs, 1);
    }

    #[test]
    fn late_diff_is_dropped_idempotently() {
        let mut book = OrderBook::new("BTCUSDT");
        book.on_ws_open();
        book.apply_snapshot(&snap(100, vec![], vec![]));
        book.apply_depth_update(diff(101, 105, vec![level("10", "1")], vec![]));
        assert_eq!(book.last_update_id(), 105);

        let r = book.apply_depth_update(diff(90, 100, vec![level("10", "5")], vec![]));
        assert!(r.dropped);
        assert_eq!(book.last_update_id(), 105);
        assert_eq!(book.best_bid(), Some((dec("10"), dec("1"))));
    }

    #[test]
    fn diffs_buffer_until_live() {
        let mut book = OrderBook::new("BTCUSDT");
        book.on_ws_open();
        let r = book.apply_depth_update(diff(1, 2, vec![level("10", "1")], vec![]));
        assert!(r.buffered);
        assert_eq!(book.buffer_len(), 1);
        assert_eq!(book.ui_state(), UiState::SnapshotPending);
    }

    #[test]
    fn snapshot_drains_buffer_with_gap_free_continuation() {
        let mut book = OrderBook::new("BTCUSDT");
        book.on_ws_open();
        book.apply_depth_update(diff(1001, 1001, vec![level("100", "0")], vec![]));
        book.apply_depth_update(diff(1002, 1003, vec![], vec![level("101", "1")]));

        let snapshot = snap(1000, vec![level("100", "1"), level("99", "2")], vec![level("101", "3")]);
        let r = book.apply_snapshot(&snapshot);
        assert!(r.ok);
        assert_eq!(r.applied_count, 2);
        assert_eq!(book.last_update_id(), 1003);
        assert_eq!(book.ui_state(), UiState::Live);
    }

    #[test]
    fn best_bid_never_crosses_best_ask_after_batch() {
        let mut book = OrderBook::new("BTCUSDT");
        book.on_ws_open();
        book.apply_snapshot(&snap(1, vec![level("10", "1")], vec![level("11", "1")]));
        book.apply_depth_update(diff(2, 2, vec![level("10.5", "1")], vec![]));
        let (bb, _) = book.best_bid().unwrap();
        let (ba, _) = book.best_ask().unwrap();
        assert!(bb < ba);
    }
}
