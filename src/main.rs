// =============================================================================
// OrchestratorV1 — Main Entry Point
// =============================================================================
//
// Wires together the feed/book/metric/orchestrator subsystems covered by this
// crate. The WebSocket multiplexer, REST snapshot transport, and outbound
// broadcast transport are external collaborators (see `feed::SnapshotFetcher`
// / `feed::BundleBroadcaster`) — this entry point only starts the per-symbol
// consumer tasks that drain each `SequencedEventQueue`, apply events to the
// book, feed the metric pipeline, and evaluate the orchestrator.
// =============================================================================

mod book;
mod config;
mod errors;
mod feed;
mod metrics;
mod orchestrator;
mod queue;
mod registry;
mod rolling;
mod types;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::RuntimeConfig;
use crate::feed::{BundleBroadcaster, DecisionSink, RestSnapshotFetcher, SnapshotFetcher, WATCHDOG_INTERVAL_MS};
use crate::orchestrator::{OrchestratorInput, PositionSnapshot};
use crate::registry::SymbolRegistry;
use crate::types::{MarketEvent, TradingMode};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// No-op broadcaster used when no outbound transport has been wired in.
/// Logs at debug level so a running engine with nothing downstream doesn't
/// silently look dead.
struct NullBroadcaster;

#[async_trait::async_trait]
impl BundleBroadcaster for NullBroadcaster {
    async fn broadcast(&self, bundle: &crate::metrics::MetricBundle) {
        tracing::debug!(symbol = %bundle.symbol, "metric bundle produced (no broadcaster configured)");
    }
}

/// No-op decision sink used when no execution/dashboard layer has been
/// wired in. Logs at debug level so a dry-run engine's decisions are still
/// observable in the log stream.
struct NullDecisionSink;

#[async_trait::async_trait]
impl DecisionSink for NullDecisionSink {
    async fn on_decision(&self, symbol: &str, decision: &crate::orchestrator::Decision) {
        tracing::debug!(symbol, intent = ?decision.intent, blocked_reason = ?decision.blocked_reason, "orchestrator decision (no sink configured)");
    }
}

/// Drives one symbol's consumer task: drain the queue in arrival order,
/// apply each event to the book/metric pipeline, then evaluate the
/// orchestrator and broadcast the resulting bundle. Per §5, all metric
/// writes and decision evaluations for a symbol are serialized here.
async fn run_symbol_consumer(
    entry: Arc<registry::SymbolEntry>,
    broadcaster: Arc<dyn BundleBroadcaster>,
    decision_sink: Arc<dyn DecisionSink>,
    registry: Arc<SymbolRegistry>,
) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(50));
    loop {
        interval.tick().await;
        let events = entry.queue.drain();
        if events.is_empty() {
            continue;
        }

        for event in events {
            let ts = now_ms();
            match event {
                MarketEvent::Depth(diff) => {
                    let mut book = entry.book.lock();
                    let is_crossed_before = book.is_crossed();
                    let result = book.apply_depth_update(diff);
                    let (top_bids, top_asks) = book.top_n(50);
                    drop(book);

                    if result.gap_detected {
                        let fault = crate::errors::FeedFault::new(
                            crate::errors::FeedErrorKind::SequenceGap,
                            format!("{} depth update sequence gap", entry.symbol),
                        );
                        warn!(symbol = %entry.symbol, fault = %fault, "depth fault");
                    }
                    if is_crossed_before {
                        let fault = crate::errors::FeedFault::new(
                            crate::errors::FeedErrorKind::IntegrityViolation,
                            format!("{} book crossed before applying update", entry.symbol),
                        );
                        warn!(symbol = %entry.symbol, fault = %fault, "depth fault");
                    }

                    let mut metrics = entry.metrics.lock();
                    metrics.on_depth_event(
                        ts,
                        &result,
                        &top_bids,
                        &top_asks,
                        is_crossed_before,
                        1.0,
                        0.0,
                    );
                }
                MarketEvent::Trade(trade) => {
                    entry.metrics.lock().on_trade(&trade);
                }
                MarketEvent::MarkPrice { mark, index, event_time_ms } => {
                    use rust_decimal::prelude::ToPrimitive;
                    entry.metrics.lock().on_mark(
                        event_time_ms,
                        mark.to_f64().unwrap_or(0.0),
                        index.to_f64().unwrap_or(0.0),
                    );
                }
                MarketEvent::Liquidation { quantity, event_time_ms, .. } => {
                    use rust_decimal::prelude::ToPrimitive;
                    let qty = quantity.to_f64().unwrap_or(0.0);
                    entry.metrics.lock().on_liquidation_tick(event_time_ms, qty > 0.0, 0.0, 0.0);
                }
            }
        }

        let snapshot_oi = crate::metrics::open_interest::OpenInterestSnapshot::default();
        let ts = now_ms();
        let bundle = {
            let mut metrics = entry.metrics.lock();
            metrics.snapshot(ts, snapshot_oi, 0.0, 0.0)
        };
        broadcaster.broadcast(&bundle).await;

        let (trading_mode, execution_enabled) = {
            let config = registry.runtime_config.read();
            (config.trading_mode, config.execution_enabled)
        };
        let dry_run = trading_mode != TradingMode::Live;
        let execution_enabled = execution_enabled && trading_mode == TradingMode::Live;
        let input = OrchestratorInput::from_bundle(
            &bundle,
            ts,
            dry_run,
            execution_enabled,
            entry.bars_loaded_1m(ts),
            None,
            PositionSnapshot::default(),
            false,
            false,
        );
        let decision = entry.orchestrator.lock().evaluate(&input);
        decision_sink.on_decision(&entry.symbol, &decision).await;
    }
}

/// Periodically refreshes a symbol's book from a REST snapshot, honoring the
/// feed controller's throttle and backoff. Runs independently of the event
/// consumer task so a slow or failing snapshot fetch never blocks ingestion.
async fn run_snapshot_refresher(
    entry: Arc<registry::SymbolEntry>,
    fetcher: Arc<dyn SnapshotFetcher>,
) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(500));
    loop {
        interval.tick().await;
        let ts = now_ms();
        if !entry.feed.may_request_snapshot(ts) {
            continue;
        }
        entry.feed.record_snapshot_request(ts);
        match fetcher.fetch_snapshot(&entry.symbol).await {
            Ok(snapshot) => {
                let result = entry.book.lock().apply_snapshot(&snapshot);
                entry.feed.record_snapshot_applied(now_ms());
                debug!(symbol = %entry.symbol, applied_count = result.applied_count, "snapshot refreshed");
                if result.gap_detected {
                    let fault = crate::errors::FeedFault::new(
                        crate::errors::FeedErrorKind::SequenceGap,
                        format!("{} snapshot applied after a sequence gap", entry.symbol),
                    );
                    warn!(symbol = %entry.symbol, fault = %fault, "snapshot fault");
                }
            }
            Err(e) => {
                let mut fault = crate::errors::FeedFault::new(crate::errors::FeedErrorKind::TransientNetwork, e.message.clone());
                if let Some(retry_after_ms) = e.retry_after_ms {
                    fault = fault.with_retry_after(retry_after_ms);
                }
                let delay_ms = entry.feed.record_snapshot_failure(e.status);
                warn!(symbol = %entry.symbol, status = ?e.status, delay_ms, fault = %fault, "snapshot fetch failed");
            }
        }
    }
}

/// 1 Hz liveness watchdog: samples each symbol's live/dead state and feeds
/// the registry's auto-scaler so the active symbol set can grow or shrink
/// with aggregate feed health.
async fn run_liveness_watchdog(registry: Arc<SymbolRegistry>, scaler: Arc<crate::feed::AutoScaler>) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(WATCHDOG_INTERVAL_MS as u64));
    loop {
        interval.tick().await;
        let ts = now_ms();
        let entries = registry.entries();
        if entries.is_empty() {
            continue;
        }
        let live_count = entries
            .iter()
            .filter(|e| e.feed.check_liveness(ts, e.book.lock().ui_state()))
            .count();
        let aggregate_pct = live_count as f64 / entries.len() as f64 * 100.0;
        match scaler.decide(ts, aggregate_pct) {
            crate::feed::ScaleDecision::Hold => {}
            crate::feed::ScaleDecision::ScaleUp => {
                info!(aggregate_pct, "auto-scaler: feed health strong, eligible to scale up")
            }
            crate::feed::ScaleDecision::ScaleDown => {
                warn!(aggregate_pct, "auto-scaler: feed health degraded, shedding symbols")
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("OrchestratorV1 starting up");

    let mut config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // SAFETY: never start executing orders on boot; operators flip this on
    // explicitly once the feed has proven live.
    config.trading_mode = TradingMode::Paused;

    if let Ok(syms) = std::env::var("ORCHESTRATOR_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if config.symbols.is_empty() {
        config.symbols = vec!["BTCUSDT".into(), "ETHUSDT".into()];
    }

    info!(symbols = ?config.symbols, trading_mode = %config.trading_mode, "configured symbols");

    let scaler = Arc::new(crate::feed::AutoScaler::new(
        config.auto_scale_live_down_pct,
        config.auto_scale_live_up_pct,
        config.auto_scale_hold_ms,
    ));

    let registry = Arc::new(SymbolRegistry::new(config));
    let broadcaster: Arc<dyn BundleBroadcaster> = Arc::new(NullBroadcaster);
    let decision_sink: Arc<dyn DecisionSink> = Arc::new(NullDecisionSink);
    let snapshot_fetcher: Arc<dyn SnapshotFetcher> = Arc::new(RestSnapshotFetcher::binance_futures());

    for entry in registry.entries() {
        let broadcaster = broadcaster.clone();
        let decision_sink = decision_sink.clone();
        let fetcher = snapshot_fetcher.clone();
        let registry_for_consumer = registry.clone();
        tokio::spawn(run_symbol_consumer(entry.clone(), broadcaster, decision_sink, registry_for_consumer));
        tokio::spawn(run_snapshot_refresher(entry, fetcher));
    }
    tokio::spawn(run_liveness_watchdog(registry.clone(), scaler));

    info!(count = registry.symbols().len(), "per-symbol consumer tasks launched");
    info!("all subsystems running — press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    if let Err(e) = registry.runtime_config.read().save("runtime_config.json") {
        tracing::error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("OrchestratorV1 shut down complete");
    Ok(())
}
