// =============================================================================
// AdvancedMicrostructureMetrics — liquidity family
// =============================================================================
//
// microPrice, imbalance curve, book slope/convexity, wall score, void-gap,
// expected slippage, resiliency, effective/realized spread. Operates on a
// plain top-of-book snapshot (price, qty pairs best-first per side) so it
// has no dependency on `OrderBook`'s internal representation.
// =============================================================================

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct LiquiditySnapshot {
    pub micro_price: f64,
    pub imbalance_1: f64,
    pub imbalance_5: f64,
    pub imbalance_10: f64,
    pub imbalance_20: f64,
    pub imbalance_50: f64,
    pub bid_slope: f64,
    pub ask_slope: f64,
    pub convexity: f64,
    pub wall_score: f64,
    pub void_gap: f64,
    pub expected_slippage_buy: f64,
    pub expected_slippage_sell: f64,
    pub effective_spread: f64,
    /// Ticks until depth recovered past threshold after a large-trade drop;
    /// `None` while idle or still watching. See `Resiliency::on_depth_sample`.
    pub resiliency: Option<i64>,
    pub realized_spread: f64,
}

/// `bids`/`asks` are best-first (price, qty), at least the top 50 levels.
pub fn compute_liquidity_snapshot(bids: &[(f64, f64)], asks: &[(f64, f64)], base_qty: f64) -> LiquiditySnapshot {
    let (best_bid_p, best_bid_q) = bids.first().copied().unwrap_or((0.0, 0.0));
    let (best_ask_p, best_ask_q) = asks.first().copied().unwrap_or((0.0, 0.0));

    let micro_price = if best_bid_q + best_ask_q > f64::EPSILON {
        (best_ask_p * best_bid_q + best_bid_p * best_ask_q) / (best_bid_q + best_ask_q)
    } else {
        (best_bid_p + best_ask_p) / 2.0
    };

    LiquiditySnapshot {
        micro_price,
        imbalance_1: imbalance_at(bids, asks, 1),
        imbalance_5: imbalance_at(bids, asks, 5),
        imbalance_10: imbalance_at(bids, asks, 10),
        imbalance_20: imbalance_at(bids, asks, 20),
        imbalance_50: imbalance_at(bids, asks, 50),
        bid_slope: book_slope(bids),
        ask_slope: book_slope(asks),
        convexity: (book_convexity(bids) + book_convexity(asks)) / 2.0,
        wall_score: wall_score(bids) - wall_score(asks),
        void_gap: (void_gap(bids) + void_gap(asks)) / 2.0,
        expected_slippage_buy: expected_slippage(asks, base_qty, best_ask_p),
        expected_slippage_sell: expected_slippage(bids, base_qty, best_bid_p),
        effective_spread: 0.0,
        resiliency: None,
        realized_spread: 0.0,
    }
}

fn imbalance_at(bids: &[(f64, f64)], asks: &[(f64, f64)], levels: usize) -> f64 {
    let bid_vol: f64 = bids.iter().take(levels).map(|(_, q)| q).sum();
    let ask_vol: f64 = asks.iter().take(levels).map(|(_, q)| q).sum();
    let total = bid_vol + ask_vol;
    if total <= f64::EPSILON {
        return 0.5;
    }
    bid_vol / total
}

/// OLS slope of cumulative depth vs normalized distance-from-best over the
/// top 20 levels.
fn book_slope(levels: &[(f64, f64)]) -> f64 {
    let n = levels.len().min(20);
    if n < 2 {
        return 0.0;
    }
    let best = levels[0].0;
    if best.abs() <= f64::EPSILON {
        return 0.0;
    }
    let mut cum = 0.0;
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    for (price, qty) in &levels[..n] {
        cum += qty;
        xs.push((price - best).abs() / best);
        ys.push(cum);
    }
    ols_slope(&xs, &ys)
}

fn cumulative_depth(levels: &[(f64, f64)], n: usize) -> f64 {
    levels.iter().take(n).map(|(_, q)| q).sum()
}

fn book_convexity(levels: &[(f64, f64)]) -> f64 {
    let d5 = cumulative_depth(levels, 5);
    let d20 = cumulative_depth(levels, 20);
    let d50 = cumulative_depth(levels, 50);
    if d50.abs() <= f64::EPSILON {
        return 0.0;
    }
    ((d50 - d20) - (d20 - d5)) / d50.abs()
}

fn wall_score(levels: &[(f64, f64)]) -> f64 {
    let n = levels.len().min(20);
    if n < 2 {
        return 0.0;
    }
    let sizes: Vec<f64> = levels[..n].iter().map(|(_, q)| *q).collect();
    let mean = sizes.iter().sum::<f64>() / n as f64;
    let var = sizes.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
    let sd = var.sqrt();
    if sd <= f64::EPSILON {
        return 0.0;
    }
    sizes.iter().map(|s| (s - mean) / sd).fold(f64::MIN, f64::max)
}

fn void_gap(levels: &[(f64, f64)]) -> f64 {
    let n = levels.len().min(20);
    if n < 3 {
        return 0.0;
    }
    let mut gaps: Vec<f64> = levels[..n]
        .windows(2)
        .map(|w| (w[1].0 - w[0].0).abs())
        .collect();
    gaps.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = gaps[gaps.len() / 2];
    let max_gap = gaps.iter().copied().fold(0.0, f64::max);
    if median <= f64::EPSILON {
        return 0.0;
    }
    max_gap / median - 1.0
}

/// Simulated expected slippage for a fixed base quantity walked against the
/// book, expressed as a fraction of the touch price.
fn expected_slippage(levels: &[(f64, f64)], base_qty: f64, touch_price: f64) -> f64 {
    if base_qty <= f64::EPSILON || touch_price <= f64::EPSILON || levels.is_empty() {
        return 0.0;
    }
    let mut remaining = base_qty;
    let mut notional = 0.0;
    for (price, qty) in levels {
        let take = remaining.min(*qty);
        notional += take * price;
        remaining -= take;
        if remaining <= f64::EPSILON {
            break;
        }
    }
    if remaining > f64::EPSILON {
        // Book too thin to fill; charge the worst seen price for the rest.
        let worst = levels.last().map(|(p, _)| *p).unwrap_or(touch_price);
        notional += remaining * worst;
    }
    let avg_fill = notional / base_qty;
    (avg_fill - touch_price).abs() / touch_price
}

fn ols_slope(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
    }
    if var_x <= f64::EPSILON {
        return 0.0;
    }
    cov / var_x
}

/// Effective spread: 2*|tradePrice - mid|/mid.
pub fn effective_spread(trade_price: f64, mid: f64) -> f64 {
    if mid <= f64::EPSILON {
        return 0.0;
    }
    2.0 * (trade_price - mid).abs() / mid
}

/// Realized spread: sampled `realized_spread_delay_ms` after the trade,
/// signed by aggressor side (positive quantity means price moved in favor of
/// the passive side).
pub fn realized_spread(trade_price: f64, mid_at_delay: f64, is_buy_aggressor: bool) -> f64 {
    let signed = if is_buy_aggressor {
        mid_at_delay - trade_price
    } else {
        trade_price - mid_at_delay
    };
    2.0 * signed / trade_price.max(f64::EPSILON)
}

/// Tracks depth-recovery resiliency: after a large trade coincides with a
/// deep drop in depth, measures ticks until depth recovers.
pub struct Resiliency {
    drop_threshold_pct: f64,
    recovery_threshold_pct: f64,
    watching_since_ms: Option<i64>,
    depth_before_drop: f64,
    history: VecDeque<(i64, f64)>,
}

impl Resiliency {
    pub fn new(drop_threshold_pct: f64, recovery_threshold_pct: f64) -> Self {
        Self {
            drop_threshold_pct,
            recovery_threshold_pct,
            watching_since_ms: None,
            depth_before_drop: 0.0,
            history: VecDeque::new(),
        }
    }

    /// Returns `Some(recovery_ms)` once depth has recovered past the
    /// recovery threshold; `None` while still watching or idle.
    pub fn on_depth_sample(&mut self, ts_ms: i64, total_depth: f64, large_trade_recent: bool) -> Option<i64> {
        self.history.push_back((ts_ms, total_depth));
        while self.history.len() > 2 {
            self.history.pop_front();
        }

        if self.watching_since_ms.is_none() {
            if let Some(&(_, prev_depth)) = self.history.front() {
                if prev_depth > f64::EPSILON {
                    let drop = (prev_depth - total_depth) / prev_depth;
                    if drop >= self.drop_threshold_pct && large_trade_recent {
                        self.watching_since_ms = Some(ts_ms);
                        self.depth_before_drop = prev_depth;
                    }
                }
            }
            return None;
        }

        if self.depth_before_drop > f64::EPSILON {
            let recovered = total_depth / self.depth_before_drop;
            if recovered >= self.recovery_threshold_pct {
                let start = self.watching_since_ms.take().unwrap();
                return Some(ts_ms - start);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
        let bids = vec![(100.0, 5.0), (99.5, 4.0), (99.0, 3.0), (98.5, 2.0), (98.0, 1.0)];
        let asks = vec![(100.5, 5.0), (101.0, 4.0), (101.5, 3.0), (102.0, 2.0), (102.5, 1.0)];
        (bids, asks)
    }

    #[test]
    fn micro_price_between_best_bid_and_ask() {
        let (bids, asks) = book();
        let snap = compute_liquidity_snapshot(&bids, &asks, 1.0);
        assert!(snap.micro_price > bids[0].0 && snap.micro_price < asks[0].0);
    }

    #[test]
    fn imbalance_one_reflects_top_of_book() {
        let (bids, asks) = book();
        let snap = compute_liquidity_snapshot(&bids, &asks, 1.0);
        assert!((snap.imbalance_1 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn expected_slippage_zero_for_tiny_order() {
        let (_, asks) = book();
        let slip = expected_slippage(&asks, 0.001, asks[0].0);
        assert!(slip.abs() < 1e-9);
    }

    #[test]
    fn effective_and_realized_spread_signs() {
        assert!(effective_spread(101.0, 100.0) > 0.0);
        assert!(realized_spread(100.0, 99.0, true) < 0.0);
        assert!(realized_spread(100.0, 101.0, false) < 0.0);
    }

    #[test]
    fn resiliency_detects_drop_and_recovery() {
        let mut r = Resiliency::new(0.3, 0.9);
        r.on_depth_sample(0, 1000.0, false);
        r.on_depth_sample(100, 600.0, true);
        let recovered = r.on_depth_sample(5_000, 950.0, false);
        assert_eq!(recovered, Some(4_900));
    }
}
