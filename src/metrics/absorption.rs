// =============================================================================
// Absorption — large trades against a stable top-level size
// =============================================================================
//
// A resting level "absorbs" aggressive flow when a large trade prints
// against it but the level's displayed size does not collapse afterward
// (a passive participant is refilling as fast as it gets hit). This tracks
// the ratio of trade notional to a rolling average and the level-size delta
// immediately after the trade, accumulating a magnitude + signed side for
// the most recent absorber.
// =============================================================================

use std::collections::VecDeque;

use crate::types::Side;

const LARGE_TRADE_MULTIPLE: f64 = 2.0;
const STABLE_LEVEL_DEPLETION_MAX: f64 = 0.3;
const HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct AbsorptionState {
    pub detected: bool,
    pub side: Option<Side>,
    pub strength: f64,
    pub volume_ratio: f64,
}

pub struct AbsorptionAccumulator {
    trade_notional_history: VecDeque<f64>,
    last: AbsorptionState,
}

impl Default for AbsorptionAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl AbsorptionAccumulator {
    pub fn new() -> Self {
        Self {
            trade_notional_history: VecDeque::with_capacity(HISTORY),
            last: AbsorptionState::default(),
        }
    }

    fn avg_notional(&self) -> f64 {
        if self.trade_notional_history.is_empty() {
            return 0.0;
        }
        self.trade_notional_history.iter().sum::<f64>() / self.trade_notional_history.len() as f64
    }

    /// True if `notional` clears the same large-trade multiple this
    /// accumulator requires before it will flag absorption at all. Lets a
    /// caller reuse the "large trade" judgment for other signals (e.g.
    /// resiliency's drop detector) without duplicating the threshold.
    pub fn is_large_trade(&self, notional: f64) -> bool {
        let avg = self.avg_notional();
        avg > f64::EPSILON && notional / avg >= LARGE_TRADE_MULTIPLE
    }

    /// Observe a trade plus the opposing-side top-of-book quantity before and
    /// after the trade printed, per the spec's "large trade against stable
    /// top-level size" definition.
    pub fn on_trade(&mut self, side: Side, notional: f64, level_qty_before: f64, level_qty_after: f64) {
        let avg = self.avg_notional();

        self.trade_notional_history.push_back(notional);
        while self.trade_notional_history.len() > HISTORY {
            self.trade_notional_history.pop_front();
        }

        if avg < f64::EPSILON {
            return;
        }

        let volume_ratio = notional / avg;
        if volume_ratio < LARGE_TRADE_MULTIPLE || level_qty_before < f64::EPSILON {
            return;
        }

        let depletion = (level_qty_before - level_qty_after).max(0.0) / level_qty_before;
        if depletion > STABLE_LEVEL_DEPLETION_MAX {
            return;
        }

        let strength = ((volume_ratio / 4.0).min(1.0) * (1.0 - depletion)).clamp(0.0, 1.0);
        self.last = AbsorptionState {
            detected: true,
            side: Some(side),
            strength,
            volume_ratio,
        };
    }

    pub fn state(&self) -> AbsorptionState {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_trade_against_stable_level_is_absorption() {
        let mut acc = AbsorptionAccumulator::new();
        for _ in 0..10 {
            acc.on_trade(Side::Buy, 10.0, 1000.0, 999.0);
        }
        acc.on_trade(Side::Buy, 50.0, 1000.0, 980.0);
        let s = acc.state();
        assert!(s.detected);
        assert_eq!(s.side, Some(Side::Buy));
        assert!(s.strength > 0.0);
    }

    #[test]
    fn large_trade_that_depletes_level_is_not_absorption() {
        let mut acc = AbsorptionAccumulator::new();
        for _ in 0..10 {
            acc.on_trade(Side::Sell, 10.0, 1000.0, 999.0);
        }
        acc.on_trade(Side::Sell, 50.0, 1000.0, 200.0);
        assert!(!acc.state().detected);
    }

    #[test]
    fn small_trade_never_detected() {
        let mut acc = AbsorptionAccumulator::new();
        for _ in 0..10 {
            acc.on_trade(Side::Buy, 10.0, 1000.0, 999.0);
        }
        acc.on_trade(Side::Buy, 11.0, 1000.0, 999.0);
        assert!(!acc.state().detected);
    }
}
