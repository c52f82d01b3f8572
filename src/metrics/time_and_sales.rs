// =============================================================================
// Time & Sales — sliding-window trade-tape aggregate
// =============================================================================

use std::collections::VecDeque;

use crate::types::Side;

const WINDOW_MS: i64 = 1_000;
const BURST_GAP_MS: i64 = 250;

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct TimeAndSalesSnapshot {
    pub prints_per_second: f64,
    pub trade_count: u64,
    pub aggressive_buy_volume: f64,
    pub aggressive_sell_volume: f64,
    pub consecutive_burst_side: Option<Side>,
    pub consecutive_burst_count: u32,
    pub small_trades: u64,
    pub mid_trades: u64,
    pub large_trades: u64,
}

struct Print {
    ts_ms: i64,
    side: Side,
    notional: f64,
}

pub struct TimeAndSales {
    window: VecDeque<Print>,
    quantile_history: VecDeque<f64>,
    last_side: Option<Side>,
    last_ts_ms: i64,
    burst_count: u32,
}

impl Default for TimeAndSales {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeAndSales {
    pub fn new() -> Self {
        Self {
            window: VecDeque::new(),
            quantile_history: VecDeque::with_capacity(500),
            last_side: None,
            last_ts_ms: 0,
            burst_count: 0,
        }
    }

    pub fn on_trade(&mut self, ts_ms: i64, side: Side, notional: f64) {
        self.window.push_back(Print { ts_ms, side, notional });
        let floor = ts_ms - WINDOW_MS;
        while let Some(p) = self.window.front() {
            if p.ts_ms < floor {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if self.last_side == Some(side) && ts_ms - self.last_ts_ms <= BURST_GAP_MS {
            self.burst_count += 1;
        } else {
            self.burst_count = 1;
        }
        self.last_side = Some(side);
        self.last_ts_ms = ts_ms;

        self.quantile_history.push_back(notional);
        while self.quantile_history.len() > 500 {
            self.quantile_history.pop_front();
        }
    }

    fn bucket(&self, notional: f64) -> &'static str {
        if self.quantile_history.len() < 20 {
            return "mid";
        }
        let mut sorted: Vec<f64> = self.quantile_history.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let p33 = sorted[sorted.len() / 3];
        let p66 = sorted[2 * sorted.len() / 3];
        if notional <= p33 {
            "small"
        } else if notional <= p66 {
            "mid"
        } else {
            "large"
        }
    }

    pub fn snapshot(&self) -> TimeAndSalesSnapshot {
        let mut buy_vol = 0.0;
        let mut sell_vol = 0.0;
        let mut small = 0u64;
        let mut mid = 0u64;
        let mut large = 0u64;

        for p in &self.window {
            match p.side {
                Side::Buy => buy_vol += p.notional,
                Side::Sell => sell_vol += p.notional,
            }
            match self.bucket(p.notional) {
                "small" => small += 1,
                "large" => large += 1,
                _ => mid += 1,
            }
        }

        let span_s = (WINDOW_MS as f64 / 1000.0).max(0.001);
        TimeAndSalesSnapshot {
            prints_per_second: self.window.len() as f64 / span_s,
            trade_count: self.window.len() as u64,
            aggressive_buy_volume: buy_vol,
            aggressive_sell_volume: sell_vol,
            consecutive_burst_side: self.last_side,
            consecutive_burst_count: self.burst_count,
            small_trades: small,
            mid_trades: mid,
            large_trades: large,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_per_second_counts_window() {
        let mut tns = TimeAndSales::new();
        for i in 0..10 {
            tns.on_trade(i * 50, Side::Buy, 10.0);
        }
        let snap = tns.snapshot();
        assert_eq!(snap.trade_count, 10);
        assert!((snap.prints_per_second - 10.0).abs() < 1e-9);
    }

    #[test]
    fn consecutive_burst_tracks_same_side_rapid_fire() {
        let mut tns = TimeAndSales::new();
        tns.on_trade(0, Side::Buy, 1.0);
        tns.on_trade(100, Side::Buy, 1.0);
        tns.on_trade(200, Side::Buy, 1.0);
        let snap = tns.snapshot();
        assert_eq!(snap.consecutive_burst_side, Some(Side::Buy));
        assert_eq!(snap.consecutive_burst_count, 3);

        tns.on_trade(2_000, Side::Sell, 1.0);
        let snap = tns.snapshot();
        assert_eq!(snap.consecutive_burst_count, 1);
    }

    #[test]
    fn aggressive_volume_split_by_side() {
        let mut tns = TimeAndSales::new();
        tns.on_trade(0, Side::Buy, 5.0);
        tns.on_trade(10, Side::Sell, 3.0);
        let snap = tns.snapshot();
        assert!((snap.aggressive_buy_volume - 5.0).abs() < 1e-9);
        assert!((snap.aggressive_sell_volume - 3.0).abs() < 1e-9);
    }
}
