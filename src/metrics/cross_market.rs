// =============================================================================
// Cross-market — beta regressions against BTC/ETH, spot-perp divergence
// =============================================================================

use crate::rolling::RegressionWindow;

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct CrossMarketSnapshot {
    pub beta_btc: f64,
    pub beta_eth: f64,
    pub spot_perp_divergence: f64,
    pub imbalance_10_diff: f64,
}

pub struct CrossMarketTracker {
    enabled: bool,
    symbol_returns: RegressionWindow,
    btc_returns: RegressionWindow,
    eth_returns: RegressionWindow,
}

impl CrossMarketTracker {
    pub fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            symbol_returns: RegressionWindow::new(capacity),
            btc_returns: RegressionWindow::new(capacity),
            eth_returns: RegressionWindow::new(capacity),
        }
    }

    pub fn on_returns(&mut self, symbol_log_return: f64, btc_log_return: f64, eth_log_return: f64) {
        if !self.enabled {
            return;
        }
        self.symbol_returns.push(symbol_log_return);
        self.btc_returns.push(btc_log_return);
        self.eth_returns.push(eth_log_return);
    }

    pub fn snapshot(&self, spot_price: f64, perp_price: f64, symbol_imbalance_10: f64, spot_imbalance_10: f64) -> Option<CrossMarketSnapshot> {
        if !self.enabled {
            return None;
        }
        let beta_btc = self.symbol_returns.beta_against(&self.btc_returns.values());
        let beta_eth = self.symbol_returns.beta_against(&self.eth_returns.values());

        let divergence = if spot_price > f64::EPSILON {
            (perp_price - spot_price) / spot_price
        } else {
            0.0
        };

        Some(CrossMarketSnapshot {
            beta_btc,
            beta_eth,
            spot_perp_divergence: divergence,
            imbalance_10_diff: symbol_imbalance_10 - spot_imbalance_10,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tracker_returns_none() {
        let t = CrossMarketTracker::new(false, 10);
        assert!(t.snapshot(100.0, 101.0, 0.1, 0.0).is_none());
    }

    #[test]
    fn spot_perp_divergence_sign() {
        let t = CrossMarketTracker::new(true, 10);
        let snap = t.snapshot(100.0, 105.0, 0.0, 0.0).unwrap();
        assert!(snap.spot_perp_divergence > 0.0);
    }
}
