// =============================================================================
// Derivatives family — perp basis and liquidation-proxy
// =============================================================================

use crate::rolling::WindowStats;

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct DerivativesSnapshot {
    pub basis: f64,
    pub basis_z_score: f64,
    pub liquidation_proxy: f64,
}

const LIQUIDATION_DECAY_HALF_LIFE_MS: f64 = 15_000.0;

pub struct DerivativesTracker {
    basis_history: WindowStats,
    liquidation_proxy: f64,
    last_update_ms: i64,
    last_basis: f64,
    last_basis_z: f64,
}

impl Default for DerivativesTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DerivativesTracker {
    pub fn new() -> Self {
        Self {
            basis_history: WindowStats::new(3_600_000),
            liquidation_proxy: 0.0,
            last_update_ms: 0,
            last_basis: 0.0,
            last_basis_z: 0.0,
        }
    }

    pub fn on_mark(&mut self, ts_ms: i64, perp: f64, index: f64) -> (f64, f64) {
        if index <= f64::EPSILON {
            return (0.0, 0.0);
        }
        let basis = (perp - index) / index;
        let z = self.basis_history.z_score(basis);
        self.basis_history.push(ts_ms, basis);
        self.last_basis = basis;
        self.last_basis_z = z;
        (basis, z)
    }

    /// Accumulates when a large trade occurred recently and open interest
    /// dropped by at least `oi_drop_threshold` (a negative fraction),
    /// decaying exponentially otherwise.
    pub fn on_tick(&mut self, ts_ms: i64, large_trade_recent: bool, oi_change_pct: f64, oi_drop_threshold: f64) -> f64 {
        let dt = (ts_ms - self.last_update_ms).max(0) as f64;
        if dt > 0.0 {
            self.liquidation_proxy *= 0.5_f64.powf(dt / LIQUIDATION_DECAY_HALF_LIFE_MS);
        }
        self.last_update_ms = ts_ms;

        if large_trade_recent && oi_change_pct <= oi_drop_threshold {
            self.liquidation_proxy = (self.liquidation_proxy + 1.0).min(10.0);
        }
        self.liquidation_proxy
    }

    pub fn snapshot(&self) -> DerivativesSnapshot {
        DerivativesSnapshot {
            basis: self.last_basis,
            basis_z_score: self.last_basis_z,
            liquidation_proxy: self.liquidation_proxy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_sign_matches_premium() {
        let mut t = DerivativesTracker::new();
        let (basis, _) = t.on_mark(0, 101.0, 100.0);
        assert!(basis > 0.0);
        let (basis, _) = t.on_mark(1, 99.0, 100.0);
        assert!(basis < 0.0);
    }

    #[test]
    fn liquidation_proxy_accumulates_on_oi_drop_with_large_trade() {
        let mut t = DerivativesTracker::new();
        let v = t.on_tick(0, true, -0.05, -0.03);
        assert!(v > 0.0);
    }

    #[test]
    fn liquidation_proxy_decays_without_trigger() {
        let mut t = DerivativesTracker::new();
        t.on_tick(0, true, -0.05, -0.03);
        let decayed = t.on_tick(30_000, false, 0.0, -0.03);
        assert!(decayed < 1.0);
    }
}
