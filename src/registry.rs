// =============================================================================
// SymbolRegistry — per-symbol subsystem ownership
// =============================================================================
//
// Aurora's AppState held one giant struct of Arc<RwLock<_>> subsystems keyed
// implicitly by "the whole engine only trades one account". Here every
// subsystem is per-symbol, so the registry keys that same ownership pattern
// by symbol: each `SymbolEntry` bundles the book, feed controller, metric
// pipeline, orchestrator, and event queue that symbol owns, and the registry
// is just a `RwLock<HashMap<String, Arc<SymbolEntry>>>` guarding the
// membership set (the auto-scaler adds/removes symbols; everything else only
// ever reads a clone of the Arc it already has).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::book::OrderBook;
use crate::config::{OrchestratorV1Params, RuntimeConfig};
use crate::feed::FeedController;
use crate::metrics::MetricPipeline;
use crate::orchestrator::OrchestratorV1;
use crate::queue::SequencedEventQueue;
use crate::types::MarketEvent;

/// Everything one symbol needs to run independently of every other symbol.
/// `book`, `metrics`, and `orchestrator` are single-writer (the symbol's own
/// consumer task), so they sit behind `Mutex` rather than `RwLock` — there is
/// never a reader that doesn't also need to be the sole writer at that
/// instant.
pub struct SymbolEntry {
    pub symbol: String,
    pub queue: SequencedEventQueue<MarketEvent>,
    pub feed: FeedController,
    pub book: Mutex<OrderBook>,
    pub metrics: Mutex<MetricPipeline>,
    pub orchestrator: Mutex<OrchestratorV1>,
    /// Wall-clock start, used to derive `bars_loaded_1m` for the
    /// orchestrator's readiness check until a real bar-builder exists.
    pub started_at_ms: i64,
}

impl SymbolEntry {
    pub fn new(symbol: impl Into<String>, config: &RuntimeConfig, orchestrator_params: OrchestratorV1Params) -> Self {
        let symbol = symbol.into();
        Self {
            queue: SequencedEventQueue::new(symbol.clone(), config.event_queue_bound),
            feed: FeedController::new(
                symbol.clone(),
                config.snapshot_min_interval_ms,
                config.max_backoff_ms,
                config.live_snapshot_fresh_ms,
            ),
            book: Mutex::new(OrderBook::new(symbol.clone())),
            metrics: Mutex::new(MetricPipeline::new(symbol.clone(), false)),
            orchestrator: Mutex::new(OrchestratorV1::new(symbol.clone(), orchestrator_params)),
            started_at_ms: crate::feed::now_ms(),
            symbol,
        }
    }

    /// Minutes elapsed since this symbol's subsystems started, used as a
    /// stand-in for "1m bars loaded" until a real bar-builder exists.
    pub fn bars_loaded_1m(&self, now_ms: i64) -> u32 {
        ((now_ms - self.started_at_ms).max(0) / 60_000) as u32
    }
}

/// Central per-engine registry. Mirrors `AppState`'s role of "the one thing
/// every async task holds an `Arc` to" but scoped to symbol membership: state
/// version counter for the dashboard feed, the symbol map itself, and the
/// shared runtime config every symbol's entry was built from.
pub struct SymbolRegistry {
    pub state_version: AtomicU64,
    pub runtime_config: RwLock<RuntimeConfig>,
    symbols: RwLock<HashMap<String, Arc<SymbolEntry>>>,
}

impl SymbolRegistry {
    pub fn new(config: RuntimeConfig) -> Self {
        let mut symbols = HashMap::new();
        for symbol in &config.symbols {
            symbols.insert(
                symbol.clone(),
                Arc::new(SymbolEntry::new(symbol.clone(), &config, config.orchestrator.clone())),
            );
        }
        Self {
            state_version: AtomicU64::new(1),
            runtime_config: RwLock::new(config),
            symbols: RwLock::new(symbols),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<SymbolEntry>> {
        self.symbols.read().get(symbol).cloned()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.read().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<Arc<SymbolEntry>> {
        self.symbols.read().values().cloned().collect()
    }

    /// Adds a symbol to the active set (auto-scaler scale-up). No-op if
    /// already present.
    pub fn add_symbol(&self, symbol: impl Into<String>) {
        let symbol = symbol.into();
        let config = self.runtime_config.read();
        let mut symbols = self.symbols.write();
        symbols
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(SymbolEntry::new(symbol, &config, config.orchestrator.clone())));
        drop(symbols);
        drop(config);
        self.increment_version();
    }

    /// Removes a symbol from the active set (auto-scaler scale-down). The
    /// `Arc` may still be held by an in-flight consumer task; removal only
    /// affects future lookups.
    pub fn remove_symbol(&self, symbol: &str) {
        self.symbols.write().remove(symbol);
        self.increment_version();
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_entry_per_configured_symbol() {
        let mut config = RuntimeConfig::default();
        config.symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let registry = SymbolRegistry::new(config);
        assert_eq!(registry.symbols().len(), 2);
        assert!(registry.get("BTCUSDT").is_some());
        assert!(registry.get("SOLUSDT").is_none());
    }

    #[test]
    fn add_and_remove_symbol_updates_membership_and_version() {
        let mut config = RuntimeConfig::default();
        config.symbols = vec!["BTCUSDT".to_string()];
        let registry = SymbolRegistry::new(config);
        let v0 = registry.current_state_version();
        registry.add_symbol("ETHUSDT");
        assert!(registry.get("ETHUSDT").is_some());
        assert!(registry.current_state_version() > v0);
        registry.remove_symbol("ETHUSDT");
        assert!(registry.get("ETHUSDT").is_none());
    }
}
