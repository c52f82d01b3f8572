// =============================================================================
// Runtime configuration — hot-reloadable engine settings with atomic save
// =============================================================================
//
// Every tunable the feed controller and OrchestratorV1 read lives here, so
// the engine can be reconfigured without a restart. Persistence uses an
// atomic tmp + rename pattern to avoid corruption on crash. All fields carry
// a serde default so that adding a field never breaks loading an older
// config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::TradingMode;

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
}

fn default_snapshot_min_interval_ms() -> u64 {
    2_000
}
fn default_depth_queue_max() -> usize {
    2_000
}
fn default_depth_lag_max_ms() -> i64 {
    5_000
}
fn default_live_snapshot_fresh_ms() -> i64 {
    10_000
}
fn default_min_resync_interval_ms() -> i64 {
    3_000
}
fn default_grace_period_ms() -> i64 {
    5_000
}
fn default_depth_levels() -> u32 {
    20
}
fn default_ws_update_speed_ms() -> u32 {
    100
}
fn default_auto_scale_min_symbols() -> usize {
    5
}
fn default_auto_scale_live_down_pct() -> f64 {
    0.70
}
fn default_auto_scale_live_up_pct() -> f64 {
    0.97
}
fn default_auto_scale_hold_ms() -> i64 {
    300_000
}
fn default_strategy_eval_min_interval_ms() -> i64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    60_000
}
fn default_event_queue_bound() -> usize {
    5_000
}

/// `OrchestratorV1Params` — the frozen decision-engine configuration table
/// referenced throughout §4.4. Grouped by the gate/sub-state-machine they
/// feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorV1Params {
    // Readiness
    #[serde(default = "default_min_bars")]
    pub min_bars: u32,
    #[serde(default = "default_min_pps")]
    pub min_pps: f64,

    // Gate A
    #[serde(default = "default_trendiness_min")]
    pub trendiness_min: f64,
    #[serde(default = "default_chop_max")]
    pub chop_max: f64,
    #[serde(default = "default_vol_of_vol_max")]
    pub vol_of_vol_max: f64,
    #[serde(default = "default_spread_pct_max")]
    pub spread_pct_max: f64,
    #[serde(default = "default_oi_drop_block")]
    pub oi_drop_block: f64,

    // Gate B
    #[serde(default = "default_delta_z_min_abs")]
    pub delta_z_min_abs: f64,
    #[serde(default = "default_cvd_slope_min_abs")]
    pub cvd_slope_min_abs: f64,
    #[serde(default = "default_obi_support_min_abs")]
    pub obi_support_min_abs: f64,
    #[serde(default)]
    pub cross_market_veto_enabled: bool,

    // Gate C
    #[serde(default = "default_vwap_distance_max_pct")]
    pub vwap_distance_max_pct: f64,
    #[serde(default = "default_max_realized_vol_1m")]
    pub max_realized_vol_1m: f64,

    // Hysteresis
    #[serde(default = "default_consecutive_gate_ticks")]
    pub consecutive_gate_ticks: u32,
    #[serde(default = "default_entry_confirmations")]
    pub entry_confirmations: u32,
    #[serde(default = "default_min_flip_interval_ms")]
    pub min_flip_interval_ms: i64,

    // Impulse
    #[serde(default = "default_min_abs_delta_z")]
    pub min_abs_delta_z: f64,

    // Chase / fallback
    #[serde(default = "default_chase_max_seconds")]
    pub chase_max_seconds: i64,
    #[serde(default = "default_max_reprices")]
    pub max_reprices: u32,
    #[serde(default = "default_reprice_interval_ms")]
    pub reprice_interval_ms: i64,
    #[serde(default = "default_fallback_max_notional_pct")]
    pub fallback_max_notional_pct: f64,

    // Entry order emission
    #[serde(default = "default_layer_one_notional_pct")]
    pub layer_one_notional_pct: f64,
    #[serde(default = "default_layer_two_notional_pct")]
    pub layer_two_notional_pct: f64,
    #[serde(default)]
    pub entry_post_only: bool,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: i64,

    // Adds
    #[serde(default = "default_add1_atr_multiple")]
    pub add1_atr_multiple: f64,
    #[serde(default = "default_add2_atr_multiple")]
    pub add2_atr_multiple: f64,
    #[serde(default = "default_add_qty_factor")]
    pub add_qty_factor: f64,
    #[serde(default = "default_max_adds")]
    pub max_adds: u32,
    #[serde(default = "default_add_min_interval_ms")]
    pub add_min_interval_ms: i64,

    // Exit risk
    #[serde(default = "default_exit_trendiness_min")]
    pub exit_trendiness_min: f64,
    #[serde(default = "default_exit_chop_max")]
    pub exit_chop_max: f64,
    #[serde(default = "default_exit_integrity_fail_level")]
    pub exit_integrity_fail_level: u32,
    #[serde(default = "default_exit_maker_attempts")]
    pub exit_maker_attempts: u32,
    #[serde(default = "default_exit_maker_ttl_ms")]
    pub exit_maker_ttl_ms: i64,
}

fn default_min_bars() -> u32 {
    20
}
fn default_min_pps() -> f64 {
    1.0
}
fn default_trendiness_min() -> f64 {
    0.15
}
fn default_chop_max() -> f64 {
    0.6
}
fn default_vol_of_vol_max() -> f64 {
    0.5
}
fn default_spread_pct_max() -> f64 {
    0.0015
}
fn default_oi_drop_block() -> f64 {
    -0.08
}
fn default_delta_z_min_abs() -> f64 {
    1.0
}
fn default_cvd_slope_min_abs() -> f64 {
    0.05
}
fn default_obi_support_min_abs() -> f64 {
    0.1
}
fn default_vwap_distance_max_pct() -> f64 {
    0.004
}
fn default_max_realized_vol_1m() -> f64 {
    0.02
}
fn default_consecutive_gate_ticks() -> u32 {
    3
}
fn default_entry_confirmations() -> u32 {
    2
}
fn default_min_flip_interval_ms() -> i64 {
    30_000
}
fn default_min_abs_delta_z() -> f64 {
    1.5
}
fn default_chase_max_seconds() -> i64 {
    15
}
fn default_max_reprices() -> u32 {
    6
}
fn default_reprice_interval_ms() -> i64 {
    2_500
}
fn default_fallback_max_notional_pct() -> f64 {
    0.25
}
fn default_layer_one_notional_pct() -> f64 {
    0.6
}
fn default_layer_two_notional_pct() -> f64 {
    0.4
}
fn default_cooldown_ms() -> i64 {
    20_000
}
fn default_add1_atr_multiple() -> f64 {
    1.0
}
fn default_add2_atr_multiple() -> f64 {
    2.0
}
fn default_add_qty_factor() -> f64 {
    0.5
}
fn default_max_adds() -> u32 {
    2
}
fn default_add_min_interval_ms() -> i64 {
    15_000
}
fn default_exit_trendiness_min() -> f64 {
    0.05
}
fn default_exit_chop_max() -> f64 {
    0.8
}
fn default_exit_integrity_fail_level() -> u32 {
    2
}
fn default_exit_maker_attempts() -> u32 {
    2
}
fn default_exit_maker_ttl_ms() -> i64 {
    4_000
}

impl Default for OrchestratorV1Params {
    fn default() -> Self {
        Self {
            min_bars: default_min_bars(),
            min_pps: default_min_pps(),
            trendiness_min: default_trendiness_min(),
            chop_max: default_chop_max(),
            vol_of_vol_max: default_vol_of_vol_max(),
            spread_pct_max: default_spread_pct_max(),
            oi_drop_block: default_oi_drop_block(),
            delta_z_min_abs: default_delta_z_min_abs(),
            cvd_slope_min_abs: default_cvd_slope_min_abs(),
            obi_support_min_abs: default_obi_support_min_abs(),
            cross_market_veto_enabled: false,
            vwap_distance_max_pct: default_vwap_distance_max_pct(),
            max_realized_vol_1m: default_max_realized_vol_1m(),
            consecutive_gate_ticks: default_consecutive_gate_ticks(),
            entry_confirmations: default_entry_confirmations(),
            min_flip_interval_ms: default_min_flip_interval_ms(),
            min_abs_delta_z: default_min_abs_delta_z(),
            chase_max_seconds: default_chase_max_seconds(),
            max_reprices: default_max_reprices(),
            reprice_interval_ms: default_reprice_interval_ms(),
            fallback_max_notional_pct: default_fallback_max_notional_pct(),
            layer_one_notional_pct: default_layer_one_notional_pct(),
            layer_two_notional_pct: default_layer_two_notional_pct(),
            entry_post_only: true,
            cooldown_ms: default_cooldown_ms(),
            add1_atr_multiple: default_add1_atr_multiple(),
            add2_atr_multiple: default_add2_atr_multiple(),
            add_qty_factor: default_add_qty_factor(),
            max_adds: default_max_adds(),
            add_min_interval_ms: default_add_min_interval_ms(),
            exit_trendiness_min: default_exit_trendiness_min(),
            exit_chop_max: default_exit_chop_max(),
            exit_integrity_fail_level: default_exit_integrity_fail_level(),
            exit_maker_attempts: default_exit_maker_attempts(),
            exit_maker_ttl_ms: default_exit_maker_ttl_ms(),
        }
    }
}

/// Top-level runtime configuration for the feed controller and orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Kill-switch: forces `intent=HOLD` on every symbol when not `Live`.
    #[serde(default)]
    pub trading_mode: TradingMode,

    /// Suppresses order emission while metrics keep flowing.
    #[serde(default = "default_true")]
    pub execution_enabled: bool,

    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_snapshot_min_interval_ms")]
    pub snapshot_min_interval_ms: u64,
    #[serde(default = "default_depth_queue_max")]
    pub depth_queue_max: usize,
    #[serde(default = "default_depth_lag_max_ms")]
    pub depth_lag_max_ms: i64,
    #[serde(default = "default_live_snapshot_fresh_ms")]
    pub live_snapshot_fresh_ms: i64,
    #[serde(default = "default_min_resync_interval_ms")]
    pub min_resync_interval_ms: i64,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: i64,
    #[serde(default = "default_depth_levels")]
    pub depth_levels: u32,
    #[serde(default = "default_ws_update_speed_ms")]
    pub ws_update_speed_ms: u32,
    #[serde(default = "default_auto_scale_min_symbols")]
    pub auto_scale_min_symbols: usize,
    #[serde(default = "default_auto_scale_live_down_pct")]
    pub auto_scale_live_down_pct: f64,
    #[serde(default = "default_auto_scale_live_up_pct")]
    pub auto_scale_live_up_pct: f64,
    #[serde(default = "default_auto_scale_hold_ms")]
    pub auto_scale_hold_ms: i64,
    #[serde(default = "default_strategy_eval_min_interval_ms")]
    pub strategy_eval_min_interval_ms: i64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_event_queue_bound")]
    pub event_queue_bound: usize,

    #[serde(default)]
    pub orchestrator: OrchestratorV1Params,
}

fn default_true() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            execution_enabled: true,
            symbols: default_symbols(),
            snapshot_min_interval_ms: default_snapshot_min_interval_ms(),
            depth_queue_max: default_depth_queue_max(),
            depth_lag_max_ms: default_depth_lag_max_ms(),
            live_snapshot_fresh_ms: default_live_snapshot_fresh_ms(),
            min_resync_interval_ms: default_min_resync_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
            depth_levels: default_depth_levels(),
            ws_update_speed_ms: default_ws_update_speed_ms(),
            auto_scale_min_symbols: default_auto_scale_min_symbols(),
            auto_scale_live_down_pct: default_auto_scale_live_down_pct(),
            auto_scale_live_up_pct: default_auto_scale_live_up_pct(),
            auto_scale_hold_ms: default_auto_scale_hold_ms(),
            strategy_eval_min_interval_ms: default_strategy_eval_min_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            event_queue_bound: default_event_queue_bound(),
            orchestrator: OrchestratorV1Params::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        info!(path = %path.display(), symbols = ?config.symbols, trading_mode = %config.trading_mode, "runtime config loaded");
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialise runtime config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.symbols.len(), 2);
        assert!(cfg.execution_enabled);
        assert_eq!(cfg.orchestrator.consecutive_gate_ticks, 3);
        assert_eq!(cfg.orchestrator.max_reprices, 6);
        assert!((cfg.orchestrator.fallback_max_notional_pct - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.orchestrator.min_bars, 20);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trading_mode": "Live", "symbols": ["ETHUSDT"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Live);
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.orchestrator.max_adds, 2);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.orchestrator.chase_max_seconds, cfg2.orchestrator.chase_max_seconds);
    }

}
