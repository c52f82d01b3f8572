// =============================================================================
// Concrete REST snapshot fetcher — GET .../depth?symbol=S&limit=1000
// =============================================================================
//
// The one concrete network adapter this crate ships: everything else behind
// `SnapshotFetcher`/`BundleBroadcaster` is a trait boundary the caller fills
// in, but the snapshot fetch is simple enough (one unsigned GET, parsed into
// the same `DepthSnapshot` shape the book already expects) that shipping a
// real implementation costs little and keeps the REST error-handling path
// exercised. Mirrors the request/response idiom of the old REST client: build
// the URL, `.context(...)` every fallible step, read rate-limit headers.
// =============================================================================

use anyhow::Context;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::feed::{SnapshotFetchError, SnapshotFetcher};
use crate::types::{DepthSnapshot, PriceLevel};

pub struct RestSnapshotFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl RestSnapshotFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn binance_futures() -> Self {
        Self::new("https://fapi.binance.com/fapi/v1")
    }

    fn parse_levels(raw: &[[String; 2]]) -> anyhow::Result<Vec<PriceLevel>> {
        raw.iter()
            .map(|[price, qty]| {
                let price: Decimal = price.parse().context("bad price in depth level")?;
                let quantity: Decimal = qty.parse().context("bad quantity in depth level")?;
                Ok(PriceLevel::new(price, quantity))
            })
            .collect()
    }
}

#[derive(serde::Deserialize)]
struct RawSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[async_trait::async_trait]
impl SnapshotFetcher for RestSnapshotFetcher {
    async fn fetch_snapshot(&self, symbol: &str) -> Result<DepthSnapshot, SnapshotFetchError> {
        let url = format!("{}/depth?symbol={symbol}&limit=1000", self.base_url);
        debug!(url = %url, symbol, "requesting depth snapshot");

        let response = self.client.get(&url).send().await.map_err(|e| SnapshotFetchError {
            status: e.status().map(|s| s.as_u16()),
            retry_after_ms: None,
            message: format!("snapshot request failed: {e}"),
        })?;

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 418 {
            let retry_after_ms = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1_000);
            warn!(symbol, status = status.as_u16(), ?retry_after_ms, "snapshot fetch rate-limited");
            return Err(SnapshotFetchError {
                status: Some(status.as_u16()),
                retry_after_ms,
                message: "rate limited".to_string(),
            });
        }
        if !status.is_success() {
            return Err(SnapshotFetchError {
                status: Some(status.as_u16()),
                retry_after_ms: None,
                message: format!("unexpected status {status}"),
            });
        }

        let raw: RawSnapshot = response.json().await.map_err(|e| SnapshotFetchError {
            status: None,
            retry_after_ms: None,
            message: format!("failed to parse snapshot body: {e}"),
        })?;

        let bids = Self::parse_levels(&raw.bids).map_err(|e| SnapshotFetchError {
            status: None,
            retry_after_ms: None,
            message: e.to_string(),
        })?;
        let asks = Self::parse_levels(&raw.asks).map_err(|e| SnapshotFetchError {
            status: None,
            retry_after_ms: None,
            message: e.to_string(),
        })?;

        Ok(DepthSnapshot {
            symbol: symbol.to_string(),
            last_update_id: raw.last_update_id,
            bids,
            asks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_levels() {
        let raw = [["100.5".to_string(), "1.25".to_string()]];
        let levels = RestSnapshotFetcher::parse_levels(&raw).unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].price.to_string(), "100.5");
    }

    #[test]
    fn rejects_malformed_price() {
        let raw = [["not-a-number".to_string(), "1.0".to_string()]];
        assert!(RestSnapshotFetcher::parse_levels(&raw).is_err());
    }
}
