// =============================================================================
// OrchestratorV1 — pure decision function: (metric bundle, prior state) -> Decision
// =============================================================================
//
// Everything here is driven once per tick by the symbol's MetricPipeline
// output. The orchestrator never touches the network, never mutates the
// book, and never submits an order itself — it only returns a `Decision`
// describing what the caller should do; order-submission outcomes (fills,
// post-only rejects, cancel/replace) come back in on the *next* tick's
// `OrchestratorInput` as plain counters.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::OrchestratorV1Params;
use crate::metrics::MetricBundle;
use crate::types::Side;

/// What action, if any, the caller should take this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    Hold,
    Entry,
    Add,
    ExitRisk,
    ExitFlip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtrSource {
    MicroAtr,
    BackfillAtr,
    Unknown,
}

/// Priority-ordered reasons a timed-out chase failed to fall back to a taker
/// entry. Order matters: `blocked_reason` always reports the *first* of
/// these (in this order) that applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackBlockedReason {
    ImpulseFalse,
    GatesFalse,
    NoTimeout,
    DryRunBlock,
    ConfigBlock,
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub reason: Option<String>,
    pub checks: std::collections::BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ImpulseChecks {
    pub prints_per_second: bool,
    pub delta_z: bool,
    pub spread: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ImpulseResult {
    pub passed: bool,
    pub checks: ImpulseChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddStep {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AddStatus {
    pub triggered: bool,
    pub step: Option<AddStep>,
    pub threshold_price: f64,
    pub gate_passed: bool,
    pub rate_limit_passed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitRiskStatus {
    pub triggered: bool,
    pub triggered_this_tick: bool,
    pub reason: Option<String>,
    pub maker_attempts_used: u32,
    pub taker_used: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PositionMirror {
    pub is_open: bool,
    pub side: Option<Side>,
    pub qty: f64,
    pub entry_vwap: f64,
    pub base_qty: f64,
    pub adds_used: u32,
    pub last_add_ts: i64,
    pub cooldown_until_ts: i64,
    pub atr3m: f64,
    pub atr_source: Option<AtrSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Maker,
    TakerEntryFallback,
    TakerExitRisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRole {
    Entry,
    Add,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: String,
    pub kind: OrderKind,
    pub side: Side,
    pub role: OrderRole,
    pub notional_pct: f64,
    pub qty: f64,
    pub price: Option<f64>,
    pub post_only: bool,
    pub reprice_attempt: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChaseState {
    pub active: bool,
    pub started_at_ms: i64,
    pub expires_at_ms: i64,
    pub reprice_ms: i64,
    pub max_reprices: u32,
    pub reprices_used: u32,
    pub chase_max_seconds: i64,
    pub ttl_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decision {
    pub intent: Intent,
    pub side: Option<Side>,
    pub readiness: Readiness,
    pub gate_a: GateResult,
    pub gate_b: GateResult,
    pub gate_c: GateResult,
    pub impulse: ImpulseResult,
    pub add: AddStatus,
    pub exit_risk: ExitRiskStatus,
    pub position: PositionMirror,
    pub orders: Vec<OrderIntent>,
    pub chase: ChaseState,
    pub blocked_reason: Option<FallbackBlockedReason>,
    pub exit_on_flip_count: u32,
    pub reversal_attempted: u32,
    pub reversal_blocked: u32,
    pub reversal_converted: u32,
}

impl Default for Intent {
    fn default() -> Self {
        Intent::Hold
    }
}

/// Caller-supplied position snapshot; the orchestrator mirrors it back but
/// never mutates it — execution outcomes feed back in on the next tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionSnapshot {
    pub is_open: bool,
    pub side: Option<Side>,
    pub qty: f64,
    pub entry_vwap: f64,
    pub base_qty: f64,
    pub adds_used: u32,
    pub last_add_ts: i64,
    pub cooldown_until_ts: i64,
}

/// Everything `OrchestratorV1::evaluate` needs for one tick, assembled by
/// the caller from the symbol's `MetricBundle` plus position/BTC context.
#[derive(Debug, Clone)]
pub struct OrchestratorInput {
    pub now_ms: i64,
    pub dry_run: bool,
    pub execution_enabled: bool,

    pub bars_loaded_1m: u32,
    pub prints_per_second: f64,

    pub trendiness_score: f64,
    pub chop_score: f64,
    pub vol_of_vol: f64,
    pub spread_pct: f64,
    pub oi_change_pct: f64,

    pub delta_z: f64,
    pub cvd_slope: f64,
    pub obi_weighted: f64,
    /// `Some(false)` means BTC regime contradicts the candidate side; `None`
    /// when cross-market veto is not active.
    pub btc_regime_supports: Option<bool>,

    pub price: f64,
    pub session_vwap: f64,
    pub realized_vol_1m: f64,

    pub atr3m: f64,
    pub atr_source: AtrSource,
    /// 0 = OK, 1 = DEGRADED, 2 = CRITICAL.
    pub integrity_level: u32,

    pub position: PositionSnapshot,

    pub fill_confirmed: bool,
    pub post_only_reject: bool,
}

impl OrchestratorInput {
    /// Builds one tick's input from a symbol's `MetricBundle` plus the
    /// context the metric pipeline itself never has: a caller-supplied
    /// position snapshot, the operational kill-switch/dry-run flags, and
    /// BTC cross-market support when the veto is active.
    #[allow(clippy::too_many_arguments)]
    pub fn from_bundle(
        bundle: &MetricBundle,
        now_ms: i64,
        dry_run: bool,
        execution_enabled: bool,
        bars_loaded_1m: u32,
        btc_regime_supports: Option<bool>,
        position: PositionSnapshot,
        fill_confirmed: bool,
        post_only_reject: bool,
    ) -> Self {
        let price = bundle.mid;
        let oi_change_pct = bundle.open_interest.oi_change_1h_pct / 100.0;
        Self {
            now_ms,
            dry_run,
            execution_enabled,
            bars_loaded_1m,
            prints_per_second: bundle.time_and_sales.prints_per_second,
            trendiness_score: bundle.regime.trendiness_score,
            chop_score: bundle.regime.chop_score,
            vol_of_vol: bundle.regime.vol_of_vol,
            spread_pct: bundle.spread_pct,
            oi_change_pct,
            delta_z: bundle.legacy.delta_z,
            cvd_slope: bundle.legacy.cvd_slope,
            obi_weighted: bundle.legacy.obi_weighted,
            btc_regime_supports,
            price,
            session_vwap: bundle.session_vwap.map(|v| v.value).unwrap_or(price),
            realized_vol_1m: bundle.regime.realized_vol_1m,
            atr3m: bundle.regime.micro_atr,
            atr_source: AtrSource::MicroAtr,
            integrity_level: match bundle.integrity {
                crate::metrics::IntegrityLevel::Ok => 0,
                crate::metrics::IntegrityLevel::Degraded => 1,
                crate::metrics::IntegrityLevel::Critical => 2,
            },
            position,
            fill_confirmed,
            post_only_reject,
        }
    }
}

/// Per-symbol orchestrator state. One instance per symbol; `evaluate` is the
/// only public entry point and is meant to be called exactly once per tick.
pub struct OrchestratorV1 {
    symbol: String,
    params: OrchestratorV1Params,

    delta_z_ewma: Option<f64>,
    obi_ewma: Option<f64>,
    cvd_slope_history: VecDeque<f64>,

    consecutive_gate_ticks: u32,
    candidate_side: Option<Side>,
    entry_confirmations_done: u32,
    last_flip_ts: i64,

    chase: ChaseState,
    chase_side: Option<Side>,

    exit_on_flip_count: u32,
    reversal_attempted: u32,
    reversal_blocked: u32,
    reversal_converted: u32,

    next_order_seq: u64,
}

const EWMA_ALPHA: f64 = 0.3;

impl OrchestratorV1 {
    pub fn new(symbol: impl Into<String>, params: OrchestratorV1Params) -> Self {
        Self {
            symbol: symbol.into(),
            params,
            delta_z_ewma: None,
            obi_ewma: None,
            cvd_slope_history: VecDeque::new(),
            consecutive_gate_ticks: 0,
            candidate_side: None,
            entry_confirmations_done: 0,
            last_flip_ts: i64::MIN,
            chase: ChaseState::default(),
            chase_side: None,
            exit_on_flip_count: 0,
            reversal_attempted: 0,
            reversal_blocked: 0,
            reversal_converted: 0,
            next_order_seq: 0,
        }
    }

    fn next_order_id(&mut self, role: &str) -> String {
        self.next_order_seq += 1;
        format!("{}-{}-{}", self.symbol, role, self.next_order_seq)
    }

    fn smoothed_delta_z(&mut self, raw: f64) -> f64 {
        let v = match self.delta_z_ewma {
            Some(prev) => EWMA_ALPHA * raw + (1.0 - EWMA_ALPHA) * prev,
            None => raw,
        };
        self.delta_z_ewma = Some(v);
        v
    }

    fn smoothed_obi(&mut self, raw: f64) -> f64 {
        let v = match self.obi_ewma {
            Some(prev) => EWMA_ALPHA * raw + (1.0 - EWMA_ALPHA) * prev,
            None => raw,
        };
        self.obi_ewma = Some(v);
        v
    }

    fn median_cvd_slope(&mut self, raw: f64) -> f64 {
        self.cvd_slope_history.push_back(raw);
        while self.cvd_slope_history.len() > 3 {
            self.cvd_slope_history.pop_front();
        }
        let mut sorted: Vec<f64> = self.cvd_slope_history.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        sorted[sorted.len() / 2]
    }

    fn readiness(&self, input: &OrchestratorInput) -> Readiness {
        let mut reasons = Vec::new();
        if input.bars_loaded_1m < self.params.min_bars {
            reasons.push(format!(
                "barsLoaded1m {} < minBars {}",
                input.bars_loaded_1m, self.params.min_bars
            ));
        }
        if input.prints_per_second < self.params.min_pps {
            reasons.push(format!(
                "printsPerSecond {:.3} < minPps {:.3}",
                input.prints_per_second, self.params.min_pps
            ));
        }
        Readiness {
            ready: reasons.is_empty(),
            reasons,
        }
    }

    fn gate_a(&self, input: &OrchestratorInput) -> GateResult {
        let mut checks = std::collections::BTreeMap::new();
        let regime_ok = input.trendiness_score >= self.params.trendiness_min
            && input.chop_score <= self.params.chop_max
            && input.vol_of_vol <= self.params.vol_of_vol_max;
        let spread_ok = input.spread_pct <= self.params.spread_pct_max;
        let oi_ok = input.oi_change_pct >= self.params.oi_drop_block;

        checks.insert("regime".to_string(), regime_ok);
        checks.insert("spread".to_string(), spread_ok);
        checks.insert("openInterest".to_string(), oi_ok);

        let passed = regime_ok && spread_ok && oi_ok;
        let reason = if passed {
            None
        } else if !regime_ok {
            Some("regime outside bounds".to_string())
        } else if !spread_ok {
            Some("spread too wide".to_string())
        } else {
            Some("open interest collapse".to_string())
        };
        GateResult { passed, reason, checks }
    }

    fn gate_b(
        &self,
        input: &OrchestratorInput,
        candidate_side: Option<Side>,
        smoothed_delta_z: f64,
        smoothed_obi: f64,
        median_cvd_slope: f64,
    ) -> GateResult {
        let mut checks = std::collections::BTreeMap::new();
        let Some(side) = candidate_side else {
            checks.insert("candidateSide".to_string(), false);
            return GateResult {
                passed: false,
                reason: Some("no directional candidate".to_string()),
                checks,
            };
        };

        let signed = |v: f64| match side {
            Side::Buy => v,
            Side::Sell => -v,
        };

        let delta_z_ok = signed(smoothed_delta_z) >= self.params.delta_z_min_abs;
        let cvd_slope_ok = signed(median_cvd_slope) >= self.params.cvd_slope_min_abs;
        let obi_ok = signed(smoothed_obi) >= self.params.obi_support_min_abs;
        let cross_market_ok = if self.params.cross_market_veto_enabled {
            input.btc_regime_supports.unwrap_or(true)
        } else {
            true
        };

        checks.insert("deltaZ".to_string(), delta_z_ok);
        checks.insert("cvdSlope".to_string(), cvd_slope_ok);
        checks.insert("obi".to_string(), obi_ok);
        checks.insert("crossMarket".to_string(), cross_market_ok);

        let passed = delta_z_ok && cvd_slope_ok && obi_ok && cross_market_ok;
        let reason = if passed {
            None
        } else if !cross_market_ok {
            Some("BTC regime vetoes candidate side".to_string())
        } else {
            Some("directional flow insufficient".to_string())
        };
        GateResult { passed, reason, checks }
    }

    fn gate_c(&self, input: &OrchestratorInput) -> GateResult {
        let mut checks = std::collections::BTreeMap::new();
        let vwap_distance_pct = if input.session_vwap > f64::EPSILON {
            (input.price - input.session_vwap).abs() / input.session_vwap
        } else {
            0.0
        };
        let location_ok = vwap_distance_pct <= self.params.vwap_distance_max_pct;
        let vol_ok = input.realized_vol_1m <= self.params.max_realized_vol_1m;

        checks.insert("location".to_string(), location_ok);
        checks.insert("realizedVol".to_string(), vol_ok);

        let passed = location_ok && vol_ok;
        let reason = if passed {
            None
        } else if !location_ok {
            Some("price too far from session VWAP".to_string())
        } else {
            Some("realized volatility too high".to_string())
        };
        GateResult { passed, reason, checks }
    }

    fn impulse(&self, input: &OrchestratorInput) -> ImpulseResult {
        let checks = ImpulseChecks {
            prints_per_second: input.prints_per_second >= self.params.min_pps,
            delta_z: input.delta_z.abs() >= self.params.min_abs_delta_z,
            spread: input.spread_pct <= self.params.spread_pct_max,
        };
        ImpulseResult {
            passed: checks.prints_per_second && checks.delta_z && checks.spread,
            checks,
        }
    }

    /// Pure function: `(metric bundle, prior state) -> Decision`. Mutates
    /// only the orchestrator's own internal hysteresis/chase bookkeeping —
    /// never external state.
    pub fn evaluate(&mut self, input: &OrchestratorInput) -> Decision {
        let readiness = self.readiness(input);

        let smoothed_delta_z = self.smoothed_delta_z(input.delta_z);
        let smoothed_obi = self.smoothed_obi(input.obi_weighted);
        let median_cvd_slope = self.median_cvd_slope(input.cvd_slope);

        let candidate_side = if smoothed_delta_z > 0.0 {
            Some(Side::Buy)
        } else if smoothed_delta_z < 0.0 {
            Some(Side::Sell)
        } else {
            None
        };

        let gate_a = self.gate_a(input);
        let gate_b = self.gate_b(input, candidate_side, smoothed_delta_z, smoothed_obi, median_cvd_slope);
        let gate_c = self.gate_c(input);
        let all_gates_passed = gate_a.passed && gate_b.passed && gate_c.passed;
        let impulse = self.impulse(input);

        // Hysteresis bookkeeping.
        if all_gates_passed && readiness.ready && candidate_side.is_some() && candidate_side == self.candidate_side {
            self.consecutive_gate_ticks += 1;
        } else if all_gates_passed && readiness.ready && candidate_side.is_some() {
            self.candidate_side = candidate_side;
            self.consecutive_gate_ticks = 1;
            self.entry_confirmations_done = 0;
        } else {
            self.consecutive_gate_ticks = 0;
            self.entry_confirmations_done = 0;
            self.candidate_side = None;
        }

        let hysteresis_satisfied = self.consecutive_gate_ticks >= self.params.consecutive_gate_ticks;
        if hysteresis_satisfied {
            self.entry_confirmations_done = (self.entry_confirmations_done + 1).min(self.params.entry_confirmations);
        }
        let entry_candidate = hysteresis_satisfied
            && self.entry_confirmations_done >= self.params.entry_confirmations
            && candidate_side.is_some();

        let position = input.position;
        let mut orders = Vec::new();
        let mut intent = Intent::Hold;
        let mut side = None;
        let mut add = AddStatus::default();
        let mut exit_risk = ExitRiskStatus::default();
        let mut blocked_reason = None;

        let kill_switch_blocked = !input.execution_enabled;

        // --- Exit-risk: regime break, flow flip, or integrity failure. ---
        if position.is_open {
            let pos_side = position.side.unwrap_or(Side::Buy);
            let regime_break = input.trendiness_score < self.params.exit_trendiness_min
                || input.chop_score > self.params.exit_chop_max;
            let signed_obi = match pos_side {
                Side::Buy => smoothed_obi,
                Side::Sell => -smoothed_obi,
            };
            let flow_flip = signed_obi < 0.0 || input.delta_z.abs() >= self.params.delta_z_min_abs && input.delta_z.signum() != sign_for(pos_side);
            let integrity_fail = input.integrity_level >= self.params.exit_integrity_fail_level;

            if regime_break || flow_flip || integrity_fail {
                exit_risk.triggered = true;
                exit_risk.triggered_this_tick = true;
                exit_risk.reason = Some(if integrity_fail {
                    "integrity level breached exit threshold".to_string()
                } else if regime_break {
                    "regime broke down".to_string()
                } else {
                    "directional flow flipped against position".to_string()
                });

                let taker_needed = impulse.passed && candidate_side == Some(pos_side.opposite());
                if taker_needed || self.params.exit_maker_attempts == 0 {
                    exit_risk.taker_used = true;
                    intent = Intent::ExitRisk;
                    side = Some(pos_side);
                    orders.push(OrderIntent {
                        id: self.next_order_id("exit-taker"),
                        kind: OrderKind::TakerExitRisk,
                        side: pos_side.opposite(),
                        role: OrderRole::Exit,
                        notional_pct: 1.0,
                        qty: position.qty,
                        price: None,
                        post_only: false,
                        reprice_attempt: 0,
                    });
                } else {
                    exit_risk.maker_attempts_used = self.params.exit_maker_attempts.min(1);
                    intent = Intent::ExitRisk;
                    side = Some(pos_side);
                    orders.push(OrderIntent {
                        id: self.next_order_id("exit-maker"),
                        kind: OrderKind::Maker,
                        side: pos_side.opposite(),
                        role: OrderRole::Exit,
                        notional_pct: 1.0,
                        qty: position.qty,
                        price: Some(input.price),
                        post_only: true,
                        reprice_attempt: 0,
                    });
                }
            }
        }

        // --- Exit-on-flip: reversal candidate survives hysteresis while a position is open. ---
        if intent == Intent::Hold && position.is_open && entry_candidate {
            if let (Some(pos_side), Some(cand)) = (position.side, candidate_side) {
                if cand != pos_side {
                    self.reversal_attempted += 1;
                    if input.now_ms < position.cooldown_until_ts {
                        self.reversal_blocked += 1;
                    } else {
                        self.reversal_converted += 1;
                        self.exit_on_flip_count += 1;
                        intent = Intent::ExitFlip;
                        side = Some(pos_side);
                        orders.push(OrderIntent {
                            id: self.next_order_id("exit-flip"),
                            kind: OrderKind::TakerExitRisk,
                            side: pos_side.opposite(),
                            role: OrderRole::Exit,
                            notional_pct: 1.0,
                            qty: position.qty,
                            price: None,
                            post_only: false,
                            reprice_attempt: 0,
                        });
                    }
                }
            }
        }

        // --- Adds: position open, price moved in favor by add-K-ATR, flow still aligned. ---
        if intent == Intent::Hold && position.is_open && position.adds_used < self.params.max_adds {
            let pos_side = position.side.unwrap_or(Side::Buy);
            let next_step = if position.adds_used == 0 { AddStep::One } else { AddStep::Two };
            let multiple = match next_step {
                AddStep::One => self.params.add1_atr_multiple,
                AddStep::Two => self.params.add2_atr_multiple,
            };
            let threshold_price = match pos_side {
                Side::Buy => position.entry_vwap + multiple * input.atr3m,
                Side::Sell => position.entry_vwap - multiple * input.atr3m,
            };
            let price_favorable = match pos_side {
                Side::Buy => input.price >= threshold_price,
                Side::Sell => input.price <= threshold_price,
            };
            let signed_obi = match pos_side {
                Side::Buy => smoothed_obi,
                Side::Sell => -smoothed_obi,
            };
            let gate_passed = signed_obi >= self.params.obi_support_min_abs
                && input.oi_change_pct >= self.params.oi_drop_block;
            let rate_limit_passed = input.now_ms - position.last_add_ts >= self.params.add_min_interval_ms;

            add = AddStatus {
                triggered: price_favorable && gate_passed && rate_limit_passed,
                step: Some(next_step),
                threshold_price,
                gate_passed,
                rate_limit_passed,
            };

            if add.triggered && !kill_switch_blocked {
                intent = Intent::Add;
                side = Some(pos_side);
                let qty = position.base_qty * self.params.add_qty_factor;
                orders.push(OrderIntent {
                    id: self.next_order_id("add"),
                    kind: OrderKind::Maker,
                    side: pos_side,
                    role: OrderRole::Add,
                    notional_pct: self.params.layer_one_notional_pct,
                    qty,
                    price: Some(input.price),
                    post_only: self.params.entry_post_only,
                    reprice_attempt: 0,
                });
            }
        }

        // --- Chase/fallback state machine (single outstanding chase). ---
        if !self.chase.active && entry_candidate && !position.is_open && intent == Intent::Hold {
            self.chase = ChaseState {
                active: true,
                started_at_ms: input.now_ms,
                expires_at_ms: input.now_ms + self.params.chase_max_seconds * 1_000,
                reprice_ms: self.params.reprice_interval_ms,
                max_reprices: self.params.max_reprices,
                reprices_used: 0,
                chase_max_seconds: self.params.chase_max_seconds,
                ttl_ms: self.params.reprice_interval_ms,
            };
            self.chase_side = candidate_side;
        }

        if self.chase.active {
            let elapsed_s = (input.now_ms - self.chase.started_at_ms) / 1_000;
            let timed_out = elapsed_s >= self.params.chase_max_seconds || self.chase.reprices_used >= self.params.max_reprices;
            let fallback_ready =
                timed_out && impulse.passed && entry_candidate && !kill_switch_blocked && input.execution_enabled;

            if input.fill_confirmed {
                self.chase = ChaseState::default();
                self.chase_side = None;
            } else if fallback_ready {
                let fallback_side = self.chase_side.unwrap_or(Side::Buy);
                intent = Intent::Entry;
                side = Some(fallback_side);
                orders.push(OrderIntent {
                    id: self.next_order_id("entry-fallback"),
                    kind: OrderKind::TakerEntryFallback,
                    side: fallback_side,
                    role: OrderRole::Entry,
                    notional_pct: self.params.fallback_max_notional_pct,
                    qty: position.base_qty.max(1.0) * self.params.fallback_max_notional_pct,
                    price: None,
                    post_only: false,
                    reprice_attempt: 0,
                });
                self.chase = ChaseState::default();
                self.chase_side = None;
            } else {
                // Priority order matches `FallbackBlockedReason`'s own declared
                // order: the first applicable reason wins even when several
                // conditions are simultaneously true.
                blocked_reason = Some(if !impulse.passed {
                    FallbackBlockedReason::ImpulseFalse
                } else if !entry_candidate {
                    FallbackBlockedReason::GatesFalse
                } else if !timed_out {
                    FallbackBlockedReason::NoTimeout
                } else if input.dry_run {
                    FallbackBlockedReason::DryRunBlock
                } else if kill_switch_blocked {
                    FallbackBlockedReason::ConfigBlock
                } else {
                    FallbackBlockedReason::Other
                });

                if timed_out {
                    self.chase = ChaseState::default();
                    self.chase_side = None;
                } else if input.now_ms - self.chase.started_at_ms >= self.chase.reprices_used as i64 * self.chase.reprice_ms {
                    self.chase.reprices_used += 1;
                }
            }
        }

        // --- Order emission for a fresh ENTRY (no active chase yet covered this). ---
        if intent == Intent::Hold
            && entry_candidate
            && !position.is_open
            && !kill_switch_blocked
            && input.now_ms >= position.cooldown_until_ts
            && candidate_side.is_some()
        {
            let entry_side = candidate_side.unwrap();
            intent = Intent::Entry;
            side = Some(entry_side);
            self.last_flip_ts = input.now_ms;
            orders.push(OrderIntent {
                id: self.next_order_id("entry-1"),
                kind: OrderKind::Maker,
                side: entry_side,
                role: OrderRole::Entry,
                notional_pct: self.params.layer_one_notional_pct,
                qty: position.base_qty.max(1.0) * self.params.layer_one_notional_pct,
                price: Some(input.price),
                post_only: self.params.entry_post_only,
                reprice_attempt: 0,
            });
            orders.push(OrderIntent {
                id: self.next_order_id("entry-2"),
                kind: OrderKind::Maker,
                side: entry_side,
                role: OrderRole::Entry,
                notional_pct: self.params.layer_two_notional_pct,
                qty: position.base_qty.max(1.0) * self.params.layer_two_notional_pct,
                price: Some(input.price),
                post_only: self.params.entry_post_only,
                reprice_attempt: 0,
            });
        }

        if kill_switch_blocked {
            intent = Intent::Hold;
            side = None;
            orders.clear();
        }

        let position_mirror = PositionMirror {
            is_open: position.is_open,
            side: position.side,
            qty: position.qty,
            entry_vwap: position.entry_vwap,
            base_qty: position.base_qty,
            adds_used: position.adds_used,
            last_add_ts: position.last_add_ts,
            cooldown_until_ts: position.cooldown_until_ts,
            atr3m: input.atr3m,
            atr_source: Some(input.atr_source),
        };

        Decision {
            intent,
            side,
            readiness,
            gate_a,
            gate_b,
            gate_c,
            impulse,
            add,
            exit_risk,
            position: position_mirror,
            orders,
            chase: self.chase.clone(),
            blocked_reason,
            exit_on_flip_count: self.exit_on_flip_count,
            reversal_attempted: self.reversal_attempted,
            reversal_blocked: self.reversal_blocked,
            reversal_converted: self.reversal_converted,
        }
    }
}

fn sign_for(side: Side) -> f64 {
    match side {
        Side::Buy => 1.0,
        Side::Sell => -1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> OrchestratorInput {
        OrchestratorInput {
            now_ms: 0,
            dry_run: false,
            execution_enabled: true,
            bars_loaded_1m: 25,
            prints_per_second: 5.0,
            trendiness_score: 0.5,
            chop_score: 0.1,
            vol_of_vol: 0.1,
            spread_pct: 0.0001,
            oi_change_pct: 0.0,
            delta_z: 2.0,
            cvd_slope: 1.0,
            obi_weighted: 0.5,
            btc_regime_supports: None,
            price: 100.0,
            session_vwap: 100.0,
            realized_vol_1m: 0.001,
            atr3m: 1.0,
            atr_source: AtrSource::MicroAtr,
            integrity_level: 0,
            position: PositionSnapshot::default(),
            fill_confirmed: false,
            post_only_reject: false,
        }
    }

    #[test]
    fn readiness_fails_below_min_bars() {
        let mut orc = OrchestratorV1::new("BTCUSDT", OrchestratorV1Params::default());
        let mut input = base_input();
        input.bars_loaded_1m = 1;
        let d = orc.evaluate(&input);
        assert!(!d.readiness.ready);
        assert!(!d.readiness.reasons.is_empty());
    }

    #[test]
    fn entry_emitted_after_hysteresis_confirms_candidate() {
        let mut orc = OrchestratorV1::new("BTCUSDT", OrchestratorV1Params::default());
        let input = base_input();
        let mut last = orc.evaluate(&input);
        for _ in 0..6 {
            last = orc.evaluate(&input);
        }
        assert_eq!(last.intent, Intent::Entry);
        assert_eq!(last.side, Some(Side::Buy));
        assert_eq!(last.orders.len(), 2);
    }

    #[test]
    fn kill_switch_forces_hold() {
        let mut orc = OrchestratorV1::new("BTCUSDT", OrchestratorV1Params::default());
        let mut input = base_input();
        input.execution_enabled = false;
        let d = orc.evaluate(&input);
        assert_eq!(d.intent, Intent::Hold);
        assert!(d.orders.is_empty());
    }

    #[test]
    fn exit_risk_triggers_on_integrity_failure() {
        let mut orc = OrchestratorV1::new("BTCUSDT", OrchestratorV1Params::default());
        let mut input = base_input();
        input.position = PositionSnapshot {
            is_open: true,
            side: Some(Side::Buy),
            qty: 1.0,
            entry_vwap: 100.0,
            base_qty: 1.0,
            adds_used: 0,
            last_add_ts: 0,
            cooldown_until_ts: 0,
        };
        input.integrity_level = 2;
        let d = orc.evaluate(&input);
        assert!(d.exit_risk.triggered);
        assert_eq!(d.intent, Intent::ExitRisk);
    }

    /// Drives a fresh orchestrator through enough good-condition ticks to
    /// start a chase (candidate confirmed, no position open yet).
    fn start_chase(orc: &mut OrchestratorV1, input: &OrchestratorInput) {
        for _ in 0..5 {
            orc.evaluate(input);
        }
    }

    #[test]
    fn fallback_blocked_reason_prefers_impulse_false_over_gates_dryrun_and_config() {
        let mut orc = OrchestratorV1::new("BTCUSDT", OrchestratorV1Params::default());
        let mut input = base_input();
        start_chase(&mut orc, &input);

        // Timed out, impulse false, gates false (readiness drags down with
        // impulse), dry_run true, and execution disabled — all at once.
        input.now_ms = 20_000;
        input.prints_per_second = 0.0;
        input.dry_run = true;
        input.execution_enabled = false;
        let d = orc.evaluate(&input);
        assert_eq!(d.blocked_reason, Some(FallbackBlockedReason::ImpulseFalse));
    }

    #[test]
    fn fallback_blocked_reason_prefers_gates_false_over_dryrun_and_config() {
        let mut orc = OrchestratorV1::new("BTCUSDT", OrchestratorV1Params::default());
        let mut input = base_input();
        start_chase(&mut orc, &input);

        // Timed out, impulse still passes (pps/deltaZ/spread untouched), but
        // gate A's regime check fails — and dry_run/config are also true.
        input.now_ms = 20_000;
        input.trendiness_score = 0.0;
        input.dry_run = true;
        input.execution_enabled = false;
        let d = orc.evaluate(&input);
        assert_eq!(d.blocked_reason, Some(FallbackBlockedReason::GatesFalse));
    }

    #[test]
    fn fallback_blocked_reason_prefers_no_timeout_over_dryrun_and_config() {
        let mut orc = OrchestratorV1::new("BTCUSDT", OrchestratorV1Params::default());
        let mut input = base_input();
        start_chase(&mut orc, &input);

        // Not timed out yet, but dry_run/config would both otherwise apply.
        input.now_ms = 500;
        input.dry_run = true;
        input.execution_enabled = false;
        let d = orc.evaluate(&input);
        assert_eq!(d.blocked_reason, Some(FallbackBlockedReason::NoTimeout));
    }

    #[test]
    fn fallback_blocked_reason_prefers_dryrun_over_config() {
        let mut orc = OrchestratorV1::new("BTCUSDT", OrchestratorV1Params::default());
        let mut input = base_input();
        start_chase(&mut orc, &input);

        // Timed out, impulse and gates still satisfied, both dry_run and
        // kill-switch block would apply — dry_run must win.
        input.now_ms = 20_000;
        input.dry_run = true;
        input.execution_enabled = false;
        let d = orc.evaluate(&input);
        assert_eq!(d.blocked_reason, Some(FallbackBlockedReason::DryRunBlock));
    }
}
