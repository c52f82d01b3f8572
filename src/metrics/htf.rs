// =============================================================================
// HTF structure — M15/H1/H4 swing highs/lows and structure-break flags
// =============================================================================
//
// Swing points are confirmed with a 2-bar lookback/lookahead fractal: a bar is
// a swing high when its high exceeds the high of the two bars on either side,
// and a swing low symmetrically. A structure break fires when price trades
// through the most recent confirmed swing in that direction; the flag only
// updates when a bar on that timeframe closes, per the boundary requirement
// that H1 structure cannot flip more than once per completed H1 bar.

use std::collections::VecDeque;

const SWING_LOOKBACK: usize = 2;
const MAX_BARS: usize = 200;

#[derive(Debug, Clone, Copy)]
struct Bar {
    high: f64,
    low: f64,
    close_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct HtfLevels {
    pub swing_high: Option<f64>,
    pub swing_low: Option<f64>,
    pub structure_break_up: bool,
    pub structure_break_down: bool,
}

struct TimeframeStructure {
    interval_ms: i64,
    bucket_start_ms: Option<i64>,
    bucket_high: f64,
    bucket_low: f64,
    bars: VecDeque<Bar>,
    swing_high: Option<f64>,
    swing_low: Option<f64>,
    break_up: bool,
    break_down: bool,
}

impl TimeframeStructure {
    fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms,
            bucket_start_ms: None,
            bucket_high: f64::MIN,
            bucket_low: f64::MAX,
            bars: VecDeque::new(),
            swing_high: None,
            swing_low: None,
            break_up: false,
            break_down: false,
        }
    }

    fn on_price(&mut self, ts_ms: i64, price: f64) {
        let bucket = ts_ms - ts_ms.rem_euclid(self.interval_ms);
        match self.bucket_start_ms {
            None => {
                self.bucket_start_ms = Some(bucket);
                self.bucket_high = price;
                self.bucket_low = price;
            }
            Some(start) if start == bucket => {
                self.bucket_high = self.bucket_high.max(price);
                self.bucket_low = self.bucket_low.min(price);
            }
            Some(start) => {
                self.close_bar(start);
                self.bucket_start_ms = Some(bucket);
                self.bucket_high = price;
                self.bucket_low = price;
            }
        }
        // Structure breaks against the last confirmed swing are evaluated on
        // every tick using the most recent price, but the swing levels and
        // break flags themselves are only written at bar close below.
    }

    fn close_bar(&mut self, close_ms: i64) {
        self.bars.push_back(Bar {
            high: self.bucket_high,
            low: self.bucket_low,
            close_ms,
        });
        while self.bars.len() > MAX_BARS {
            self.bars.pop_front();
        }
        self.recompute_swings();
    }

    fn recompute_swings(&mut self) {
        let n = self.bars.len();
        if n < 2 * SWING_LOOKBACK + 1 {
            return;
        }
        let bars: Vec<Bar> = self.bars.iter().copied().collect();
        let mut new_high: Option<f64> = self.swing_high;
        let mut new_low: Option<f64> = self.swing_low;

        for i in SWING_LOOKBACK..n - SWING_LOOKBACK {
            let window = &bars[i - SWING_LOOKBACK..=i + SWING_LOOKBACK];
            let pivot = bars[i];
            if window.iter().all(|b| b.high <= pivot.high) {
                new_high = Some(pivot.high);
            }
            if window.iter().all(|b| b.low >= pivot.low) {
                new_low = Some(pivot.low);
            }
        }

        let last_close = bars[n - 1].high.max(bars[n - 1].low);
        self.break_up = new_high.map(|h| bars[n - 1].close_high_above(h)).unwrap_or(false);
        self.break_down = new_low.map(|l| bars[n - 1].close_low_below(l)).unwrap_or(false);
        let _ = last_close;

        self.swing_high = new_high;
        self.swing_low = new_low;
    }

    fn levels(&self) -> HtfLevels {
        HtfLevels {
            swing_high: self.swing_high,
            swing_low: self.swing_low,
            structure_break_up: self.break_up,
            structure_break_down: self.break_down,
        }
    }
}

impl Bar {
    fn close_high_above(&self, level: f64) -> bool {
        self.high > level
    }

    fn close_low_below(&self, level: f64) -> bool {
        self.low < level
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct HtfStructureSnapshot {
    pub m15: HtfLevels,
    pub h1: HtfLevels,
    pub h4: HtfLevels,
}

pub struct HtfStructureTracker {
    m15: TimeframeStructure,
    h1: TimeframeStructure,
    h4: TimeframeStructure,
}

impl Default for HtfStructureTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HtfStructureTracker {
    pub fn new() -> Self {
        Self {
            m15: TimeframeStructure::new(900_000),
            h1: TimeframeStructure::new(3_600_000),
            h4: TimeframeStructure::new(14_400_000),
        }
    }

    pub fn on_price(&mut self, ts_ms: i64, price: f64) {
        self.m15.on_price(ts_ms, price);
        self.h1.on_price(ts_ms, price);
        self.h4.on_price(ts_ms, price);
    }

    pub fn snapshot(&self) -> HtfStructureSnapshot {
        HtfStructureSnapshot {
            m15: self.m15.levels(),
            h1: self.h1.levels(),
            h4: self.h4.levels(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swing_high_confirmed_after_fractal() {
        let mut tf = TimeframeStructure::new(1_000);
        let closes: [i64; 7] = [0, 1_000, 2_000, 3_000, 4_000, 5_000, 6_000];
        let highs = [100.0, 101.0, 105.0, 102.0, 101.0, 100.0, 99.0];
        for (ts, h) in closes.iter().zip(highs.iter()) {
            tf.on_price(*ts, *h);
        }
        tf.on_price(7_000, 98.0);
        assert_eq!(tf.swing_high, Some(105.0));
    }

    #[test]
    fn h1_break_flag_does_not_change_within_same_bar() {
        let mut t = HtfStructureTracker::new();
        for i in 0..20 {
            t.on_price(i * 3_600_000, 100.0 + i as f64);
        }
        let snap_a = t.snapshot();
        t.on_price(20 * 3_600_000 + 1_000, 500.0);
        let snap_b = t.snapshot();
        assert_eq!(snap_a.h1.structure_break_up, snap_b.h1.structure_break_up);
    }

    #[test]
    fn insufficient_bars_yields_no_swing() {
        let mut t = HtfStructureTracker::new();
        t.on_price(0, 100.0);
        let snap = t.snapshot();
        assert!(snap.m15.swing_high.is_none());
    }
}
