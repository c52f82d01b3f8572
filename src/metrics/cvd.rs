// =============================================================================
// CVD — multi-timeframe Cumulative Volume Delta
// =============================================================================
//
// Adapted from the single-timeframe CVD the trade-stream processor used to
// keep inline; here each timeframe gets its own ring of signed trades so the
// window can be read independently without recomputation.
// =============================================================================

use std::collections::VecDeque;

use crate::types::Side;

/// Fixed classification thresholds on |delta|, per §4.3.
const HIGH_VOL_THRESHOLD: f64 = 250_000.0;
const EXTREME_VOL_THRESHOLD: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum DeltaState {
    #[default]
    Normal,
    HighVol,
    Extreme,
}

impl std::fmt::Display for DeltaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Normal => "Normal",
            Self::HighVol => "High Vol",
            Self::Extreme => "Extreme",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct CvdSnapshot {
    pub cvd: f64,
    pub delta: f64,
    pub state: DeltaState,
    pub trade_count: usize,
    pub warmup_pct: f64,
}

struct Timeframe {
    window_ms: i64,
    trades: VecDeque<(i64, f64)>,
    running_sum: f64,
}

impl Timeframe {
    fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            trades: VecDeque::new(),
            running_sum: 0.0,
        }
    }

    fn push(&mut self, ts_ms: i64, signed_qty: f64) {
        self.trades.push_back((ts_ms, signed_qty));
        self.running_sum += signed_qty;
        let floor = ts_ms - self.window_ms;
        while let Some(&(t, q)) = self.trades.front() {
            if t < floor {
                self.running_sum -= q;
                self.trades.pop_front();
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> CvdSnapshot {
        let cvd = self.running_sum;
        let abs = cvd.abs();
        let state = if abs >= EXTREME_VOL_THRESHOLD {
            DeltaState::Extreme
        } else if abs >= HIGH_VOL_THRESHOLD {
            DeltaState::HighVol
        } else {
            DeltaState::Normal
        };
        CvdSnapshot {
            cvd,
            delta: cvd,
            state,
            trade_count: self.trades.len(),
            warmup_pct: 1.0,
        }
    }
}

/// Maintains CVD independently across a fixed set of timeframes (e.g. 1m,
/// 5m, 15m).
pub struct CvdAccumulator {
    timeframes: Vec<(&'static str, Timeframe)>,
}

impl CvdAccumulator {
    pub fn with_timeframes(windows_ms: &[(&'static str, i64)]) -> Self {
        Self {
            timeframes: windows_ms
                .iter()
                .map(|(name, ms)| (*name, Timeframe::new(*ms)))
                .collect(),
        }
    }

    pub fn default_windows() -> Self {
        Self::with_timeframes(&[("1m", 60_000), ("5m", 300_000), ("15m", 900_000)])
    }

    pub fn on_trade(&mut self, ts_ms: i64, side: Side, quantity: f64) {
        let signed = match side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };
        for (_, tf) in &mut self.timeframes {
            tf.push(ts_ms, signed);
        }
    }

    pub fn snapshot(&self, timeframe: &str) -> Option<CvdSnapshot> {
        self.timeframes
            .iter()
            .find(|(name, _)| *name == timeframe)
            .map(|(_, tf)| tf.snapshot())
    }

    pub fn all_snapshots(&self) -> Vec<(&'static str, CvdSnapshot)> {
        self.timeframes.iter().map(|(n, tf)| (*n, tf.snapshot())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cvd_over_window_matches_signed_sum() {
        let mut acc = CvdAccumulator::with_timeframes(&[("1m", 60_000)]);
        for i in 0..60 {
            acc.on_trade(i * 100, Side::Buy, 1.0);
        }
        for i in 0..40 {
            acc.on_trade(6_000 + i * 750, Side::Sell, 1.0);
        }
        let snap = acc.snapshot("1m").unwrap();
        assert!((snap.cvd - 20.0).abs() < 1e-9);
        assert_eq!(snap.state, DeltaState::Normal);
    }

    #[test]
    fn classification_thresholds() {
        let mut acc = CvdAccumulator::with_timeframes(&[("1m", 60_000)]);
        acc.on_trade(0, Side::Buy, 300_000.0);
        assert_eq!(acc.snapshot("1m").unwrap().state, DeltaState::HighVol);
        acc.on_trade(1, Side::Buy, 800_000.0);
        assert_eq!(acc.snapshot("1m").unwrap().state, DeltaState::Extreme);
    }

    #[test]
    fn window_prunes_old_trades() {
        let mut acc = CvdAccumulator::with_timeframes(&[("1m", 60_000)]);
        acc.on_trade(0, Side::Buy, 5.0);
        acc.on_trade(70_000, Side::Sell, 1.0);
        let snap = acc.snapshot("1m").unwrap();
        assert!((snap.cvd - (-1.0)).abs() < 1e-9);
    }
}
