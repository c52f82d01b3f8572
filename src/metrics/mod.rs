// =============================================================================
// MetricPipeline — per-symbol facade fanning sequenced events into accumulators
// =============================================================================
//
// One pipeline per symbol. It is the sole writer to its accumulators and is
// driven exclusively by the symbol's SequencedEventQueue consumer, so none of
// its methods take locks: the caller already guarantees single-threaded
// access per symbol.

pub mod absorption;
pub mod advanced;
pub mod cross_market;
pub mod cvd;
pub mod derivatives;
pub mod funding;
pub mod htf;
pub mod legacy;
pub mod open_interest;
pub mod passive_flow;
pub mod regime;
pub mod session_vwap;
pub mod time_and_sales;
pub mod toxicity;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::book::DepthApplyResult;
use crate::rolling::WindowStats;
use crate::types::{Side, TradePrint};

use absorption::{AbsorptionAccumulator, AbsorptionState};
use advanced::{LiquiditySnapshot, Resiliency};
use cross_market::{CrossMarketSnapshot, CrossMarketTracker};
use cvd::CvdAccumulator;
use derivatives::{DerivativesSnapshot, DerivativesTracker};
use funding::{FundingSnapshot, interpret_funding};
use htf::{HtfStructureSnapshot, HtfStructureTracker};
use legacy::{LegacyCalculator, LegacySnapshot};
use open_interest::{OpenInterestSnapshot, OpenInterestTracker};
use passive_flow::{PassiveFlowSnapshot, PassiveFlowTracker};
use regime::{RegimeSnapshot, RegimeTracker};
use session_vwap::SessionVwap;
use time_and_sales::TimeAndSales;
use toxicity::{ToxicitySnapshot, ToxicityTracker};

/// {OK, DEGRADED, CRITICAL} per §4.2/§4.3 — sequence contiguity, crossed-book
/// occurrences, and reconnect hints feed this observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityLevel {
    Ok,
    Degraded,
    Critical,
}

impl Default for IntegrityLevel {
    fn default() -> Self {
        IntegrityLevel::Ok
    }
}

/// Finds the resting quantity at `price` among `levels` (best-first
/// (price, qty, cumulative) triples), tolerating float round-trip noise.
fn level_qty_at(levels: &[(f64, f64, f64)], price: f64) -> f64 {
    levels
        .iter()
        .find(|(p, _, _)| (p - price).abs() <= price.abs().max(1.0) * 1e-9)
        .map(|(_, q, _)| *q)
        .unwrap_or(0.0)
}

const INTEGRITY_FAULT_WINDOW_MS: i64 = 60_000;
const INTEGRITY_CRITICAL_FAULT_COUNT: usize = 5;

/// How long a large trade keeps the resiliency detector's `large_trade_recent`
/// signal live.
const LARGE_TRADE_RECENT_WINDOW_MS: i64 = 5_000;
/// Delay after a trade before sampling the mid for realized spread.
const REALIZED_SPREAD_DELAY_MS: i64 = 1_000;
/// Safety cap on the pending realized-spread queue so a symbol with trades
/// but no further depth/trade activity can't grow it unbounded.
const PENDING_REALIZED_SPREAD_CAP: usize = 200;

/// Observes applied-diff outcomes and escalates OK → DEGRADED → CRITICAL.
pub struct IntegrityMonitor {
    recent_faults: std::collections::VecDeque<i64>,
    level: IntegrityLevel,
}

impl Default for IntegrityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrityMonitor {
    pub fn new() -> Self {
        Self {
            recent_faults: std::collections::VecDeque::new(),
            level: IntegrityLevel::Ok,
        }
    }

    /// `faulted` covers a sequence gap or a crossed-book observation.
    pub fn observe(&mut self, ts_ms: i64, faulted: bool) -> IntegrityLevel {
        if faulted {
            self.recent_faults.push_back(ts_ms);
        }
        let floor = ts_ms - INTEGRITY_FAULT_WINDOW_MS;
        while let Some(&t) = self.recent_faults.front() {
            if t < floor {
                self.recent_faults.pop_front();
            } else {
                break;
            }
        }

        self.level = if self.recent_faults.len() >= INTEGRITY_CRITICAL_FAULT_COUNT {
            IntegrityLevel::Critical
        } else if !self.recent_faults.is_empty() {
            IntegrityLevel::Degraded
        } else {
            IntegrityLevel::Ok
        };
        self.level
    }

    pub fn level(&self) -> IntegrityLevel {
        self.level
    }

    /// True once the monitor has escalated far enough to recommend a
    /// reconnect rather than a plain resync.
    pub fn reconnect_recommended(&self) -> bool {
        self.level == IntegrityLevel::Critical
    }
}

/// Snapshot produced per tick by a symbol's `MetricPipeline`; published to
/// the broadcaster and consumed by `OrchestratorV1::evaluate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricBundle {
    pub symbol: String,
    pub event_time_ms: i64,

    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub mid: f64,
    pub spread_pct: f64,
    pub top_bids: Vec<(f64, f64, f64)>,
    pub top_asks: Vec<(f64, f64, f64)>,

    pub cvd_snapshots: Vec<(String, cvd::CvdSnapshot)>,
    pub time_and_sales: time_and_sales::TimeAndSalesSnapshot,
    pub absorption: AbsorptionState,
    pub legacy: LegacySnapshot,
    #[serde(skip_deserializing)]
    pub session_vwap: Option<session_vwap::SessionVwapSnapshot>,
    pub liquidity: LiquiditySnapshot,
    pub passive_flow: PassiveFlowSnapshot,
    pub derivatives: DerivativesSnapshot,
    pub toxicity: ToxicitySnapshot,
    pub regime: RegimeSnapshot,
    pub cross_market: Option<CrossMarketSnapshot>,
    pub htf: HtfStructureSnapshot,
    pub open_interest: OpenInterestSnapshot,
    pub funding: FundingSnapshot,
    pub integrity: IntegrityLevel,

    pub depth_apply_latency_ms_p50: f64,
}

pub struct MetricPipeline {
    symbol: String,

    cvd: CvdAccumulator,
    tas: TimeAndSales,
    absorption: AbsorptionAccumulator,
    legacy: LegacyCalculator,
    session_vwap: SessionVwap,
    resiliency: Resiliency,
    passive_flow: PassiveFlowTracker,
    derivatives: DerivativesTracker,
    toxicity: ToxicityTracker,
    regime: RegimeTracker,
    cross_market: CrossMarketTracker,
    htf: HtfStructureTracker,
    open_interest: OpenInterestTracker,
    integrity: IntegrityMonitor,

    latest_funding: FundingSnapshot,
    latest_liquidity: LiquiditySnapshot,
    latest_best_bid: Option<(f64, f64)>,
    latest_best_ask: Option<(f64, f64)>,
    latest_top_bids: Vec<(f64, f64, f64)>,
    latest_top_asks: Vec<(f64, f64, f64)>,

    /// Deadline (ms) through which `on_depth_event` should report
    /// `large_trade_recent = true` to the resiliency detector.
    recent_large_trade_until_ms: i64,
    /// Trades awaiting their delayed mid sample for realized spread:
    /// `(trade_ts_ms, trade_price, is_buy_aggressor)`.
    pending_realized_spread: std::collections::VecDeque<(i64, f64, bool)>,

    depth_apply_latency: WindowStats,
}

impl MetricPipeline {
    pub fn new(symbol: impl Into<String>, cross_market_enabled: bool) -> Self {
        Self {
            symbol: symbol.into(),
            cvd: CvdAccumulator::default_windows(),
            tas: TimeAndSales::new(),
            absorption: AbsorptionAccumulator::new(),
            legacy: LegacyCalculator::new(),
            session_vwap: SessionVwap::new(),
            resiliency: Resiliency::new(0.2, 0.8),
            passive_flow: PassiveFlowTracker::new(),
            derivatives: DerivativesTracker::new(),
            toxicity: ToxicityTracker::new(50, 10.0),
            regime: RegimeTracker::new(),
            cross_market: CrossMarketTracker::new(cross_market_enabled, 60),
            htf: HtfStructureTracker::new(),
            open_interest: OpenInterestTracker::new(),
            integrity: IntegrityMonitor::new(),
            latest_funding: FundingSnapshot::default(),
            latest_liquidity: LiquiditySnapshot::default(),
            latest_best_bid: None,
            latest_best_ask: None,
            latest_top_bids: Vec::new(),
            latest_top_asks: Vec::new(),
            recent_large_trade_until_ms: i64::MIN,
            pending_realized_spread: std::collections::VecDeque::new(),
            depth_apply_latency: WindowStats::new(60_000),
        }
    }

    /// Called after `OrderBook::apply_depth_update` on every depth event,
    /// whether or not it actually applied — buffered/dropped events still
    /// feed the integrity observer and latency stats. `top50_bids`/`asks`
    /// are `OrderBook::top_n(50)`'s (price, qty, cumulative) triples.
    pub fn on_depth_event(
        &mut self,
        ts_ms: i64,
        result: &DepthApplyResult,
        top50_bids: &[(Decimal, Decimal, Decimal)],
        top50_asks: &[(Decimal, Decimal, Decimal)],
        is_crossed: bool,
        base_qty: f64,
        receipt_lag_ms: f64,
    ) {
        self.depth_apply_latency.push(ts_ms, receipt_lag_ms);
        let faulted = result.gap_detected || is_crossed;
        self.integrity.observe(ts_ms, faulted);

        if !result.ok {
            return;
        }

        let to_f64_pair = |(p, q, _): &(Decimal, Decimal, Decimal)| (p.to_f64().unwrap_or(0.0), q.to_f64().unwrap_or(0.0));
        let bid_pairs: Vec<(f64, f64)> = top50_bids.iter().map(to_f64_pair).collect();
        let ask_pairs: Vec<(f64, f64)> = top50_asks.iter().map(to_f64_pair).collect();

        self.latest_best_bid = bid_pairs.first().copied();
        self.latest_best_ask = ask_pairs.first().copied();
        self.latest_top_bids = bid_pairs.iter().zip(top50_bids.iter()).map(|((p, q), (_, _, c))| (*p, *q, c.to_f64().unwrap_or(0.0))).collect();
        self.latest_top_asks = ask_pairs.iter().zip(top50_asks.iter()).map(|((p, q), (_, _, c))| (*p, *q, c.to_f64().unwrap_or(0.0))).collect();

        self.latest_liquidity = advanced::compute_liquidity_snapshot(&bid_pairs, &ask_pairs, base_qty);

        let top10_bid: f64 = bid_pairs.iter().take(10).map(|(_, q)| q).sum();
        let top10_ask: f64 = ask_pairs.iter().take(10).map(|(_, q)| q).sum();
        let top50_bid: f64 = bid_pairs.iter().map(|(_, q)| q).sum();
        let top50_ask: f64 = ask_pairs.iter().map(|(_, q)| q).sum();
        self.legacy.on_depth(top10_bid, top10_ask, top50_bid, top50_ask);

        let total_depth = top50_bid + top50_ask;
        let large_trade_recent = ts_ms <= self.recent_large_trade_until_ms;
        self.latest_liquidity.resiliency = self.resiliency.on_depth_sample(ts_ms, total_depth, large_trade_recent);

        let levels: Vec<(Decimal, Decimal)> = top50_bids
            .iter()
            .chain(top50_asks.iter())
            .map(|(p, q, _)| (*p, *q))
            .collect();
        self.passive_flow.on_levels(ts_ms, &levels);

        self.drain_realized_spread(ts_ms);
    }

    /// Applies any trades whose `REALIZED_SPREAD_DELAY_MS` delay has elapsed,
    /// sampling the current mid as the post-trade reference price.
    fn drain_realized_spread(&mut self, ts_ms: i64) {
        while let Some(&(trade_ts, _, _)) = self.pending_realized_spread.front() {
            if ts_ms - trade_ts < REALIZED_SPREAD_DELAY_MS {
                break;
            }
            let (_, trade_price, is_buy_aggressor) = self.pending_realized_spread.pop_front().unwrap();
            let mid_at_delay = self.mid();
            if mid_at_delay > f64::EPSILON {
                self.latest_liquidity.realized_spread = advanced::realized_spread(trade_price, mid_at_delay, is_buy_aggressor);
            }
        }
    }

    /// Called for each validated trade print.
    pub fn on_trade(&mut self, trade: &TradePrint) {
        let price = trade.price.to_f64().unwrap_or(0.0);
        let quantity = trade.quantity.to_f64().unwrap_or(0.0);
        if price <= 0.0 || quantity <= 0.0 {
            warn!(symbol = %self.symbol, price, quantity, "dropping trade with non-positive price/quantity");
            return;
        }
        let notional = price * quantity;
        let mid = self.mid();

        self.cvd.on_trade(trade.event_time_ms, trade.side, quantity);
        self.tas.on_trade(trade.event_time_ms, trade.side, notional);
        let delta = match trade.side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };
        self.legacy.on_delta_sample(trade.event_time_ms, delta);
        if let Some(cvd_snap) = self.cvd.snapshot("1m") {
            self.legacy.on_cvd_sample(cvd_snap.cvd);
        }
        self.regime.on_price(trade.event_time_ms, price);
        self.htf.on_price(trade.event_time_ms, price);
        self.session_vwap.on_trade(trade.event_time_ms, price, quantity);
        self.toxicity.on_trade(trade.event_time_ms, trade.side, quantity, notional, mid);

        if mid > f64::EPSILON {
            self.latest_liquidity.effective_spread = advanced::effective_spread(price, mid);
        }

        let is_buy_aggressor = trade.side == Side::Buy;
        if self.absorption.is_large_trade(notional) {
            self.recent_large_trade_until_ms = trade.event_time_ms + LARGE_TRADE_RECENT_WINDOW_MS;
        }
        let opposing_levels = if is_buy_aggressor { &self.latest_top_asks } else { &self.latest_top_bids };
        let level_qty_before = level_qty_at(opposing_levels, price);
        let level_qty_after = (level_qty_before - quantity).max(0.0);
        self.on_absorption_sample(trade.side, notional, level_qty_before, level_qty_after);

        self.pending_realized_spread.push_back((trade.event_time_ms, price, is_buy_aggressor));
        while self.pending_realized_spread.len() > PENDING_REALIZED_SPREAD_CAP {
            self.pending_realized_spread.pop_front();
        }

        self.passive_flow.note_trade(trade.event_time_ms, trade.price);
    }

    pub fn on_absorption_sample(&mut self, side: Side, notional: f64, level_qty_before: f64, level_qty_after: f64) {
        self.absorption.on_trade(side, notional, level_qty_before, level_qty_after);
    }

    pub fn on_mark(&mut self, ts_ms: i64, perp: f64, index: f64) {
        self.derivatives.on_mark(ts_ms, perp, index);
    }

    pub fn on_liquidation_tick(&mut self, ts_ms: i64, large_trade_recent: bool, oi_change_pct: f64, oi_drop_threshold: f64) {
        self.derivatives.on_tick(ts_ms, large_trade_recent, oi_change_pct, oi_drop_threshold);
    }

    pub fn on_open_interest_sample(&mut self, ts_ms: i64, current_oi: f64) {
        self.open_interest.on_sample(ts_ms, current_oi);
    }

    pub fn on_funding_sample(&mut self, rate: f64, next_funding_time_ms: i64) {
        self.latest_funding = interpret_funding(rate, next_funding_time_ms);
    }

    pub fn on_cross_market_returns(&mut self, symbol_log_return: f64, btc_log_return: f64, eth_log_return: f64) {
        self.cross_market.on_returns(symbol_log_return, btc_log_return, eth_log_return);
    }

    fn mid(&self) -> f64 {
        match (self.latest_best_bid, self.latest_best_ask) {
            (Some((bid, _)), Some((ask, _))) => (bid + ask) / 2.0,
            _ => 0.0,
        }
    }

    pub fn integrity_level(&self) -> IntegrityLevel {
        self.integrity.level()
    }

    /// Assemble the full `MetricBundle` for broadcast. `spot_price`,
    /// `spot_imbalance_10`, `oi_snapshot` are fed by the caller since they
    /// cross symbol boundaries (spot reference symbol, futures REST poll).
    pub fn snapshot(
        &mut self,
        ts_ms: i64,
        oi_snapshot: OpenInterestSnapshot,
        spot_price: f64,
        spot_imbalance_10: f64,
    ) -> MetricBundle {
        let best_bid = self.latest_best_bid.map(|(p, _)| p);
        let best_ask = self.latest_best_ask.map(|(p, _)| p);
        let mid = self.mid();
        let spread_pct = match (best_bid, best_ask) {
            (Some(b), Some(a)) if mid > f64::EPSILON => (a - b) / mid,
            _ => 0.0,
        };

        let perp_price = best_bid.zip(best_ask).map(|(b, a)| (b + a) / 2.0).unwrap_or(0.0);
        let symbol_imbalance_10 = advanced::compute_liquidity_snapshot(
            &self.latest_top_bids.iter().map(|(p, q, _)| (*p, *q)).collect::<Vec<_>>(),
            &self.latest_top_asks.iter().map(|(p, q, _)| (*p, *q)).collect::<Vec<_>>(),
            1.0,
        )
        .imbalance_10;

        MetricBundle {
            symbol: self.symbol.clone(),
            event_time_ms: ts_ms,
            best_bid,
            best_ask,
            mid,
            spread_pct,
            top_bids: self.latest_top_bids.clone(),
            top_asks: self.latest_top_asks.clone(),
            cvd_snapshots: self
                .cvd
                .all_snapshots()
                .into_iter()
                .map(|(tf, snap)| (tf.to_string(), snap))
                .collect(),
            time_and_sales: self.tas.snapshot(),
            absorption: self.absorption.state(),
            legacy: self.legacy.snapshot(),
            session_vwap: self.session_vwap.snapshot(ts_ms, mid),
            liquidity: self.latest_liquidity,
            passive_flow: self.passive_flow.snapshot(),
            derivatives: self.derivatives.snapshot(),
            toxicity: self.toxicity.snapshot(),
            regime: self.regime.snapshot(ts_ms),
            cross_market: self
                .cross_market
                .snapshot(spot_price, perp_price, symbol_imbalance_10, spot_imbalance_10),
            htf: self.htf.snapshot(),
            open_interest: oi_snapshot,
            funding: self.latest_funding,
            integrity: self.integrity.level(),
            depth_apply_latency_ms_p50: self.depth_apply_latency.mean(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_escalates_after_repeated_faults() {
        let mut m = IntegrityMonitor::new();
        assert_eq!(m.level(), IntegrityLevel::Ok);
        for i in 0..5 {
            m.observe(i * 1_000, true);
        }
        assert_eq!(m.level(), IntegrityLevel::Critical);
        assert!(m.reconnect_recommended());
    }

    #[test]
    fn integrity_drops_back_to_ok_once_faults_age_out() {
        let mut m = IntegrityMonitor::new();
        m.observe(0, true);
        assert_eq!(m.level(), IntegrityLevel::Degraded);
        let level = m.observe(120_000, false);
        assert_eq!(level, IntegrityLevel::Ok);
    }

    #[test]
    fn pipeline_rejects_non_positive_trade() {
        let mut p = MetricPipeline::new("BTCUSDT", false);
        let trade = TradePrint {
            price: rust_decimal::Decimal::ZERO,
            quantity: rust_decimal::Decimal::new(1, 0),
            side: Side::Buy,
            event_time_ms: 0,
        };
        p.on_trade(&trade);
        assert_eq!(p.tas.snapshot().trade_count, 0);
    }
}
