// =============================================================================
// Shared wire-level and book-level types
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which side of the book or which side of a trade's aggressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// A single price/quantity level. Quantity of zero means "delete this level"
/// when applied as part of a depth diff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }

    pub fn is_delete(&self) -> bool {
        self.quantity.is_zero()
    }
}

/// A depth-diff event as received from the exchange's diff-stream, per the
/// wire format in the external interfaces section: {U, u, pu?, b, a, E/T}.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthDiff {
    pub symbol: String,
    /// First update id covered by this event.
    pub first_update_id: u64,
    /// Final update id covered by this event.
    pub final_update_id: u64,
    /// Previous event's final update id, when the venue sends it.
    #[serde(default)]
    pub prev_final_update_id: Option<u64>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub event_time_ms: i64,
    #[serde(default)]
    pub receipt_time_ms: i64,
}

/// A single executed trade print from the aggregate-trade stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TradePrint {
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: Side,
    pub event_time_ms: i64,
}

/// A REST depth-snapshot response: {lastUpdateId, bids, asks}.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub symbol: String,
    pub last_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// The item type carried by a symbol's `SequencedEventQueue`. The WebSocket
/// demuxer enqueues raw wire events in arrival order; the consumer task
/// drains them one at a time into the book and metric pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
    Depth(DepthDiff),
    Trade(TradePrint),
    MarkPrice { mark: Decimal, index: Decimal, event_time_ms: i64 },
    Liquidation { side: Side, price: Decimal, quantity: Decimal, event_time_ms: i64 },
}

/// Whether the engine is live, paused, or fully killed. Mirrors the
/// kill-switch / execution-enabled operational inputs from the external
/// interfaces section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}
