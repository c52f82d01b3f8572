// =============================================================================
// LegacyCalculator — OBI (weighted/deep/divergence), deltaZ, cvdSlope
// =============================================================================

use crate::rolling::{RegressionWindow, WindowStats};

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct LegacySnapshot {
    pub obi_weighted: f64,
    pub obi_deep: f64,
    pub obi_divergence: f64,
    pub delta_z: f64,
    pub cvd_slope: f64,
}

pub struct LegacyCalculator {
    delta_history: WindowStats,
    cvd_slope_window: RegressionWindow,
    last: LegacySnapshot,
}

impl Default for LegacyCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl LegacyCalculator {
    pub fn new() -> Self {
        Self {
            delta_history: WindowStats::new(60_000),
            cvd_slope_window: RegressionWindow::new(60),
            last: LegacySnapshot::default(),
        }
    }

    /// `top10_bid_vol`/`top10_ask_vol` are the summed quantities of the top
    /// 10 book levels per side; `top50_*` the same over the top 50.
    pub fn on_depth(
        &mut self,
        top10_bid_vol: f64,
        top10_ask_vol: f64,
        top50_bid_vol: f64,
        top50_ask_vol: f64,
    ) -> (f64, f64, f64) {
        let obi_weighted = obi(top10_bid_vol, top10_ask_vol);
        let obi_deep = obi(top50_bid_vol, top50_ask_vol);
        let obi_divergence = (obi_weighted - obi_deep).clamp(-2.0, 2.0);
        self.last.obi_weighted = obi_weighted;
        self.last.obi_deep = obi_deep;
        self.last.obi_divergence = obi_divergence;
        (obi_weighted, obi_deep, obi_divergence)
    }

    /// Push the latest 1s signed trade-flow delta; returns the z-score of
    /// `delta` against the last 60 samples.
    pub fn on_delta_sample(&mut self, ts_ms: i64, delta: f64) -> f64 {
        let z = self.delta_history.z_score(delta);
        self.delta_history.push(ts_ms, delta);
        self.last.delta_z = z;
        z
    }

    /// Push the latest session-CVD value; returns the OLS slope of the last
    /// 60 samples.
    pub fn on_cvd_sample(&mut self, cvd: f64) -> f64 {
        self.cvd_slope_window.push(cvd);
        let slope = self.cvd_slope_window.slope();
        self.last.cvd_slope = slope;
        slope
    }

    /// Last-computed {obiWeighted, obiDeep, obiDivergence, deltaZ, cvdSlope}.
    pub fn snapshot(&self) -> LegacySnapshot {
        self.last
    }
}

fn obi(bid_vol: f64, ask_vol: f64) -> f64 {
    let total = bid_vol + ask_vol;
    if total <= f64::EPSILON {
        return 0.0;
    }
    ((bid_vol - ask_vol) / total).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obi_favors_heavier_side() {
        let mut calc = LegacyCalculator::new();
        let (w, _, _) = calc.on_depth(100.0, 50.0, 400.0, 400.0);
        assert!(w > 0.0);
        assert!(w <= 1.0);
    }

    #[test]
    fn obi_divergence_bounded() {
        let mut calc = LegacyCalculator::new();
        let (_, _, div) = calc.on_depth(100.0, 0.0, 50.0, 50.0);
        assert!(div >= -2.0 && div <= 2.0);
    }

    #[test]
    fn cvd_slope_increasing_series() {
        let mut calc = LegacyCalculator::new();
        let mut slope = 0.0;
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            slope = calc.on_cvd_sample(v);
        }
        assert!(slope > 0.0);
    }

    #[test]
    fn delta_z_zero_when_no_history() {
        let mut calc = LegacyCalculator::new();
        let z = calc.on_delta_sample(0, 5.0);
        assert_eq!(z, 0.0);
    }
}
