// =============================================================================
// Passive-flow decomposition — add/cancel/trade-related classification, spoof
// =============================================================================
//
// On every depth snapshot, classify per-level size changes into {add,
// cancel, trade-related} using a recent-trade coincidence window, then
// accumulate add/cancel rates over 30s windows and a decaying spoof score
// for large-add-then-fast-cancel sequences.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::rolling::WindowSum;

const TRADE_RELATED_WINDOW_MS: i64 = 500;
const PRICE_TOLERANCE: f64 = 1e-6;
const SPOOF_WINDOW_MS: i64 = 2_000;
const SPOOF_HALF_LIFE_MS: f64 = 10_000.0;
const LARGE_ADD_MULTIPLE: f64 = 3.0;

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct PassiveFlowSnapshot {
    pub add_rate: f64,
    pub cancel_rate: f64,
    pub queue_delta: f64,
    pub spoof_score: f64,
    pub refresh_rate: f64,
}

struct RecentLevel {
    qty: Decimal,
    #[allow(dead_code)]
    first_seen_ms: i64,
}

pub struct PassiveFlowTracker {
    prior_levels: HashMap<Decimal, RecentLevel>,
    recent_trade_prices: VecDeque<(i64, Decimal)>,
    add_window: WindowSum,
    cancel_window: WindowSum,
    avg_add_size: f64,
    pending_large_adds: VecDeque<(i64, Decimal, Decimal)>,
    spoof_score: f64,
    last_update_ms: i64,
    refresh_events: WindowSum,
}

impl Default for PassiveFlowTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PassiveFlowTracker {
    pub fn new() -> Self {
        Self {
            prior_levels: HashMap::new(),
            recent_trade_prices: VecDeque::new(),
            add_window: WindowSum::new(30_000),
            cancel_window: WindowSum::new(30_000),
            avg_add_size: 0.0,
            pending_large_adds: VecDeque::new(),
            spoof_score: 0.0,
            last_update_ms: 0,
            refresh_events: WindowSum::new(30_000),
        }
    }

    pub fn note_trade(&mut self, ts_ms: i64, price: Decimal) {
        self.recent_trade_prices.push_back((ts_ms, price));
        let floor = ts_ms - TRADE_RELATED_WINDOW_MS;
        while let Some(&(t, _)) = self.recent_trade_prices.front() {
            if t < floor {
                self.recent_trade_prices.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_trade_related(&self, ts_ms: i64, price: Decimal) -> bool {
        let price_f = price.to_f64().unwrap_or(0.0);
        self.recent_trade_prices.iter().any(|(t, p)| {
            (ts_ms - t).abs() <= TRADE_RELATED_WINDOW_MS
                && (p.to_f64().unwrap_or(0.0) - price_f).abs() <= PRICE_TOLERANCE
        })
    }

    fn decay_spoof(&mut self, ts_ms: i64) {
        let dt = (ts_ms - self.last_update_ms).max(0) as f64;
        if dt > 0.0 {
            let decay = 0.5_f64.powf(dt / SPOOF_HALF_LIFE_MS);
            self.spoof_score *= decay;
        }
        self.last_update_ms = ts_ms;
    }

    /// Observe the current set of (price, qty) levels for one side at
    /// `ts_ms`, classifying each delta and updating the spoof score.
    pub fn on_levels(&mut self, ts_ms: i64, levels: &[(Decimal, Decimal)]) {
        self.decay_spoof(ts_ms);

        let current: HashMap<Decimal, Decimal> = levels.iter().copied().collect();

        for (price, qty) in &current {
            let prior_qty = self.prior_levels.get(price).map(|l| l.qty).unwrap_or(Decimal::ZERO);
            if *qty > prior_qty {
                let added = (*qty - prior_qty).to_f64().unwrap_or(0.0);
                if !self.is_trade_related(ts_ms, *price) {
                    self.add_window.push(ts_ms, added);
                    self.avg_add_size = 0.9 * self.avg_add_size + 0.1 * added;
                    if self.avg_add_size > f64::EPSILON && added > LARGE_ADD_MULTIPLE * self.avg_add_size {
                        self.pending_large_adds.push_back((ts_ms, *price, *qty));
                    }
                }
            }
        }

        for (price, prior) in &self.prior_levels {
            let current_qty = current.get(price).copied().unwrap_or(Decimal::ZERO);
            if prior.qty > current_qty {
                let cancelled = (prior.qty - current_qty).to_f64().unwrap_or(0.0);
                if !self.is_trade_related(ts_ms, *price) {
                    self.cancel_window.push(ts_ms, cancelled);

                    while let Some(&(add_ts, add_price, add_qty)) = self.pending_large_adds.front() {
                        if ts_ms - add_ts > SPOOF_WINDOW_MS {
                            self.pending_large_adds.pop_front();
                            continue;
                        }
                        if add_price == *price && current_qty < add_qty {
                            self.spoof_score += 1.0;
                            self.pending_large_adds.pop_front();
                        }
                        break;
                    }
                } else {
                    self.refresh_events.push(ts_ms, 1.0);
                }
            }
        }

        self.prior_levels = current
            .into_iter()
            .map(|(p, q)| (p, RecentLevel { qty: q, first_seen_ms: ts_ms }))
            .collect();
    }

    pub fn snapshot(&self) -> PassiveFlowSnapshot {
        PassiveFlowSnapshot {
            add_rate: self.add_window.sum() / 30.0,
            cancel_rate: self.cancel_window.sum() / 30.0,
            queue_delta: self.add_window.sum() - self.cancel_window.sum(),
            spoof_score: self.spoof_score,
            refresh_rate: self.refresh_events.sum() / 30.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn add_then_cancel_tracked_as_non_trade_related() {
        let mut t = PassiveFlowTracker::new();
        t.on_levels(0, &[(dec("100"), dec("1"))]);
        t.on_levels(100, &[(dec("100"), dec("5"))]);
        t.on_levels(200, &[(dec("100"), dec("0"))]);
        let snap = t.snapshot();
        assert!(snap.add_rate > 0.0);
        assert!(snap.cancel_rate > 0.0);
    }

    #[test]
    fn trade_coincident_change_not_counted_as_cancel() {
        let mut t = PassiveFlowTracker::new();
        t.on_levels(0, &[(dec("100"), dec("5"))]);
        t.note_trade(100, dec("100"));
        t.on_levels(100, &[(dec("100"), dec("1"))]);
        let snap = t.snapshot();
        assert_eq!(snap.cancel_rate, 0.0);
    }

    #[test]
    fn large_add_then_fast_cancel_raises_spoof_score() {
        let mut t = PassiveFlowTracker::new();
        for i in 0..5 {
            t.on_levels(i * 50, &[(dec("100"), dec("1"))]);
        }
        t.on_levels(300, &[(dec("100"), dec("50"))]);
        t.on_levels(400, &[(dec("100"), dec("0"))]);
        assert!(t.snapshot().spoof_score > 0.0);
    }
}
