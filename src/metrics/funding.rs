// =============================================================================
// Funding rate — contrarian bias signal from perpetual funding
// =============================================================================
//
// As with open interest, the REST fetch is out of scope; this module only
// carries forward the contrarian interpretation the legacy funding monitor
// applied to a fetched rate.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum FundingBias {
    #[default]
    Neutral,
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct FundingSnapshot {
    pub rate: f64,
    pub rate_pct: f64,
    pub signal: f64,
    pub bias: FundingBias,
    pub next_funding_time_ms: i64,
}

pub fn interpret_funding(rate: f64, next_funding_time_ms: i64) -> FundingSnapshot {
    let rate_pct = rate * 100.0;

    let (signal, bias) = if rate_pct > 0.05 {
        (-0.8, FundingBias::Bearish)
    } else if rate_pct > 0.03 {
        (-0.4, FundingBias::Bearish)
    } else if rate_pct < -0.05 {
        (0.9, FundingBias::Bullish)
    } else if rate_pct < -0.03 {
        (0.5, FundingBias::Bullish)
    } else if rate_pct > 0.01 {
        (-0.1, FundingBias::Neutral)
    } else if rate_pct < -0.01 {
        (0.2, FundingBias::Neutral)
    } else {
        (0.0, FundingBias::Neutral)
    };

    FundingSnapshot {
        rate,
        rate_pct,
        signal,
        bias,
        next_funding_time_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extreme_positive_funding_is_bearish_contrarian() {
        let snap = interpret_funding(0.0006, 0);
        assert_eq!(snap.bias, FundingBias::Bearish);
        assert!(snap.signal < 0.0);
    }

    #[test]
    fn extreme_negative_funding_is_bullish_contrarian() {
        let snap = interpret_funding(-0.0006, 0);
        assert_eq!(snap.bias, FundingBias::Bullish);
        assert!(snap.signal > 0.0);
    }

    #[test]
    fn near_zero_funding_is_neutral() {
        let snap = interpret_funding(0.00001, 0);
        assert_eq!(snap.bias, FundingBias::Neutral);
    }
}
