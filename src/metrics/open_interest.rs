// =============================================================================
// Open interest — participation / liquidation-cascade signal
// =============================================================================
//
// The REST fetch that produces raw open-interest readings is outside this
// crate's scope; this tracker only consumes the numeric series and derives
// the hourly change, directional signal, and liquidation-block flag the way
// the legacy OI tracker did.

use std::collections::VecDeque;

const OI_DROP_BLOCK_THRESHOLD_PCT: f64 = -10.0;
const HISTORY_WINDOW_MS: i64 = 3_600_000;

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct OpenInterestSnapshot {
    pub current_oi: f64,
    pub oi_change_1h_pct: f64,
    pub signal: f64,
    pub block_trading: bool,
}

pub struct OpenInterestTracker {
    history: VecDeque<(i64, f64)>,
}

impl Default for OpenInterestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenInterestTracker {
    pub fn new() -> Self {
        Self {
            history: VecDeque::new(),
        }
    }

    pub fn on_sample(&mut self, ts_ms: i64, current_oi: f64) -> OpenInterestSnapshot {
        self.history.push_back((ts_ms, current_oi));
        let floor = ts_ms - HISTORY_WINDOW_MS;
        while let Some(&(t, _)) = self.history.front() {
            if t < floor {
                self.history.pop_front();
            } else {
                break;
            }
        }

        let oi_change_1h_pct = match self.history.front() {
            Some(&(_, oldest)) if oldest.abs() > f64::EPSILON => {
                (current_oi - oldest) / oldest * 100.0
            }
            _ => 0.0,
        };

        let block_trading = oi_change_1h_pct <= OI_DROP_BLOCK_THRESHOLD_PCT;
        let signal = if block_trading {
            -1.0
        } else {
            (oi_change_1h_pct / 10.0).clamp(-1.0, 1.0)
        };

        OpenInterestSnapshot {
            current_oi,
            oi_change_1h_pct,
            signal,
            block_trading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_oi_produces_no_signal() {
        let mut t = OpenInterestTracker::new();
        t.on_sample(0, 1_000_000.0);
        let snap = t.on_sample(60_000, 1_000_000.0);
        assert!((snap.oi_change_1h_pct).abs() < 1e-9);
        assert!(!snap.block_trading);
    }

    #[test]
    fn sharp_drop_blocks_trading() {
        let mut t = OpenInterestTracker::new();
        t.on_sample(0, 1_000_000.0);
        let snap = t.on_sample(1_800_000, 850_000.0);
        assert!(snap.block_trading);
        assert!(snap.signal < 0.0);
    }

    #[test]
    fn history_window_drops_old_samples() {
        let mut t = OpenInterestTracker::new();
        t.on_sample(0, 1_000_000.0);
        let snap = t.on_sample(HISTORY_WINDOW_MS + 1_000, 1_100_000.0);
        // the t=0 sample fell outside the 1h window, so change is computed
        // against itself and reports 0%.
        assert!((snap.oi_change_1h_pct).abs() < 1e-9);
    }
}
