// =============================================================================
// Regime scores — realizedVol, volOfVol, microATR, chop vs trendiness
// =============================================================================

use std::collections::VecDeque;

use crate::rolling::WindowStats;

const MICRO_ATR_ALPHA: f64 = 2.0 / 15.0;

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct RegimeSnapshot {
    pub realized_vol_1m: f64,
    pub realized_vol_5m: f64,
    pub realized_vol_15m: f64,
    pub vol_of_vol: f64,
    pub micro_atr: f64,
    pub chop_score: f64,
    pub trendiness_score: f64,
}

pub struct RegimeTracker {
    log_returns_1m: WindowStats,
    log_returns_5m: WindowStats,
    log_returns_15m: WindowStats,
    realized_vol_1m_history: WindowStats,
    micro_atr: f64,
    last_price: Option<f64>,

    chop_window: VecDeque<(i64, f64)>,
}

impl Default for RegimeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RegimeTracker {
    pub fn new() -> Self {
        Self {
            log_returns_1m: WindowStats::new(60_000),
            log_returns_5m: WindowStats::new(300_000),
            log_returns_15m: WindowStats::new(900_000),
            realized_vol_1m_history: WindowStats::new(900_000),
            micro_atr: 0.0,
            last_price: None,
            chop_window: VecDeque::new(),
        }
    }

    pub fn on_price(&mut self, ts_ms: i64, price: f64) {
        if price <= f64::EPSILON {
            return;
        }
        if let Some(prev) = self.last_price {
            if prev > f64::EPSILON {
                let log_ret = (price / prev).ln() * 100.0;
                self.log_returns_1m.push(ts_ms, log_ret);
                self.log_returns_5m.push(ts_ms, log_ret);
                self.log_returns_15m.push(ts_ms, log_ret);
                self.micro_atr = (1.0 - MICRO_ATR_ALPHA) * self.micro_atr + MICRO_ATR_ALPHA * log_ret.abs();

                self.chop_window.push_back((ts_ms, log_ret));
                let floor = ts_ms - 60_000;
                while let Some(&(t, _)) = self.chop_window.front() {
                    if t < floor {
                        self.chop_window.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
        self.last_price = Some(price);
    }

    pub fn snapshot(&mut self, ts_ms: i64) -> RegimeSnapshot {
        let rv1m = self.log_returns_1m.rms();
        self.realized_vol_1m_history.push(ts_ms, rv1m);

        let (chop, trend) = self.chop_and_trendiness();

        RegimeSnapshot {
            realized_vol_1m: rv1m,
            realized_vol_5m: self.log_returns_5m.rms(),
            realized_vol_15m: self.log_returns_15m.rms(),
            vol_of_vol: self.realized_vol_1m_history.stddev(),
            micro_atr: self.micro_atr,
            chop_score: chop,
            trendiness_score: trend,
        }
    }

    /// `chop` is high when signs alternate frequently and net displacement
    /// is small relative to total path length; `trendiness` is the
    /// complement, using |net| / sum(|ret|) over the 60s window.
    fn chop_and_trendiness(&self) -> (f64, f64) {
        if self.chop_window.len() < 2 {
            return (0.0, 0.0);
        }
        let returns: Vec<f64> = self.chop_window.iter().map(|(_, r)| *r).collect();
        let net: f64 = returns.iter().sum();
        let total_abs: f64 = returns.iter().map(|r| r.abs()).sum();
        if total_abs <= f64::EPSILON {
            return (0.0, 0.0);
        }
        let trendiness = (net.abs() / total_abs).clamp(0.0, 1.0);

        let mut sign_changes = 0usize;
        for w in returns.windows(2) {
            if w[0].signum() != 0.0 && w[1].signum() != 0.0 && w[0].signum() != w[1].signum() {
                sign_changes += 1;
            }
        }
        let chop = (sign_changes as f64 / (returns.len() - 1) as f64).clamp(0.0, 1.0);

        (chop, trendiness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trendiness_high_for_monotonic_walk() {
        let mut t = RegimeTracker::new();
        let mut price = 100.0;
        for i in 0..60 {
            price *= 1.0005;
            t.on_price(i * 1_000, price);
        }
        let snap = t.snapshot(60_000);
        assert!(snap.trendiness_score > 0.7);
        assert!(snap.chop_score < 0.5);
    }

    #[test]
    fn chop_high_for_alternating_walk() {
        let mut t = RegimeTracker::new();
        let mut price = 100.0;
        for i in 0..60 {
            price *= if i % 2 == 0 { 1.002 } else { 0.998 };
            t.on_price(i * 1_000, price);
        }
        let snap = t.snapshot(60_000);
        assert!(snap.chop_score > 0.5);
    }

    #[test]
    fn micro_atr_nonnegative_and_reacts_to_moves() {
        let mut t = RegimeTracker::new();
        t.on_price(0, 100.0);
        t.on_price(1_000, 101.0);
        let snap = t.snapshot(1_000);
        assert!(snap.micro_atr > 0.0);
    }
}
