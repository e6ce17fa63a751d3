//! Strategy Engine: state machine and per-tick loop (spec.md §4.4, §4.5).
//!
//! Grounded on `original_source/backend/app/engine/strategy_engine.py`
//! (state machine, loop ordering) and teacher's `main.rs`/
//! `execution.rs::MmExecutionEngine` for the `Arc<Mutex<_>>` + spawned-task
//! idiom.
//!
//! Note (DESIGN.md Open Question 3): the historical `readonly` warm-up
//! state is not implemented; `start` goes straight to `running`.

use crate::adaptive::AdaptiveController;
use crate::as_model::{compute_quote, AsModelInputs};
use crate::config::RuntimeConfig;
use crate::events::{AlertLevel, AlertSink, DedupeAlertService, Event, EventBus};
use crate::exchange::{ExchangeAdapter, OrderError};
use crate::flattener::{self, FlattenerConfig};
use crate::hysteresis::{self, HysteresisInputs};
use crate::monitoring::MonitoringAggregator;
use crate::reconciler::{
    self, apply_tick_guard, decide_side_action, generate_client_order_id, infer_price_tick,
    quantize_size, ReconcileAction, ReconcilerConfig,
};
use crate::risk_guard::{RiskGuard, RiskInput};
use crate::types::{EngineMode, EngineState, OrderSnapshot, Side};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    MarketData,
    OrderId,
    Auth,
    Unknown,
}

fn classify_error(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("auth") || lower.contains("unauthorized") {
        ErrorCategory::Auth
    } else if lower.contains("order") || lower.contains("id") {
        ErrorCategory::OrderId
    } else if lower.contains("market") || lower.contains("book") || lower.contains("snapshot") {
        ErrorCategory::MarketData
    } else {
        ErrorCategory::Unknown
    }
}

pub struct StrategyEngine<A: ExchangeAdapter, S: AlertSink> {
    adapter: RwLock<Arc<A>>,
    config: RwLock<RuntimeConfig>,
    state: Mutex<EngineState>,
    adaptive: Mutex<AdaptiveController>,
    risk_guard: Mutex<RiskGuard>,
    monitoring: Mutex<MonitoringAggregator>,
    bus: Arc<EventBus>,
    alerts: Arc<DedupeAlertService<S>>,
    stop_flag: Arc<tokio::sync::Notify>,
    loop_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<A: ExchangeAdapter + 'static, S: AlertSink + 'static> StrategyEngine<A, S> {
    pub fn new(
        adapter: Arc<A>,
        config: RuntimeConfig,
        bus: Arc<EventBus>,
        alerts: Arc<DedupeAlertService<S>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            adapter: RwLock::new(adapter),
            config: RwLock::new(config.clone()),
            state: Mutex::new(EngineState::default()),
            adaptive: Mutex::new(AdaptiveController::new(config.as_sigma)),
            risk_guard: Mutex::new(RiskGuard::new()),
            monitoring: Mutex::new(MonitoringAggregator::new(now)),
            bus,
            alerts,
            stop_flag: Arc::new(tokio::sync::Notify::new()),
            loop_handle: Mutex::new(None),
        }
    }

    pub async fn status(&self) -> EngineState {
        self.state.lock().await.clone()
    }

    pub async fn update_config(&self, config: RuntimeConfig) -> Result<(), crate::config::ConfigError> {
        config.validate()?;
        *self.config.write().await = config;
        Ok(())
    }

    /// Adapter replacement is allowed only in idle or halted mode
    /// (spec.md §5); resets `exchange_connected`.
    pub async fn replace_adapter(&self, adapter: Arc<A>) -> Result<(), String> {
        let mode = self.state.lock().await.mode;
        if mode == EngineMode::Running {
            return Err("cannot replace adapter while running".to_string());
        }
        *self.adapter.write().await = adapter;
        self.state.lock().await.exchange_connected = false;
        Ok(())
    }

    /// `start` is idempotent while running; transitions idle -> running.
    pub async fn start(self: &Arc<Self>) {
        {
            let state = self.state.lock().await;
            if state.mode == EngineMode::Running {
                return;
            }
        }

        let adapter = self.adapter.read().await.clone();
        match adapter.ping().await {
            Ok(true) => {}
            _ => {
                let mut state = self.state.lock().await;
                state.mode = EngineMode::Halted;
                state.kill_reason = Some("exchange unreachable".to_string());
                self.bus.publish(Event::Engine {
                    status: "halted".to_string(),
                    reason: state.kill_reason.clone(),
                    mode: "halted".to_string(),
                });
                return;
            }
        }

        {
            let mut state = self.state.lock().await;
            *state = EngineState {
                mode: EngineMode::Running,
                engine_started_at: Some(Utc::now()),
                exchange_connected: true,
                ..EngineState::default()
            };
        }
        self.alerts.send(
            AlertLevel::Info,
            "ENGINE_START",
            "engine started",
            None,
            0.0,
        );
        self.bus.publish(Event::Engine {
            status: "started".to_string(),
            reason: None,
            mode: "running".to_string(),
        });

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.run_loop().await });
        *self.loop_handle.lock().await = Some(handle);
    }

    /// Safe to call re-entrantly; does not cancel self.
    pub async fn stop(self: &Arc<Self>, reason: &str) {
        let was_running = {
            let state = self.state.lock().await;
            state.mode == EngineMode::Running
        };

        if was_running {
            self.stop_flag.notify_waiters();
            if let Some(handle) = self.loop_handle.lock().await.take() {
                if !handle.is_finished() {
                    handle.abort();
                }
            }
        }

        let adapter = self.adapter.read().await.clone();
        let flatten_cfg = {
            let cfg = self.config.read().await;
            FlattenerConfig {
                close_position_epsilon_base: cfg.close_position_epsilon_base,
                close_retry_base_delay_sec: cfg.close_retry_base_delay_sec,
                close_retry_max_delay_sec: cfg.close_retry_max_delay_sec,
            }
        };
        let symbol = self.config.read().await.symbol.clone();
        flattener::flatten(adapter.as_ref(), &symbol, &flatten_cfg, &self.bus, &self.alerts).await;

        let mut state = self.state.lock().await;
        state.mode = EngineMode::Idle;
        self.bus.publish(Event::Engine {
            status: "stopped".to_string(),
            reason: Some(reason.to_string()),
            mode: "idle".to_string(),
        });
        self.alerts.send(AlertLevel::Info, "ENGINE_STOP", reason, None, 0.0);
    }

    /// Risk-trip or startup-failure transition; cancel_all + flatten then
    /// halted.
    pub async fn halt(self: &Arc<Self>, kill_reason: &str) {
        self.stop_flag.notify_waiters();
        if let Some(handle) = self.loop_handle.lock().await.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }

        let adapter = self.adapter.read().await.clone();
        let flatten_cfg = {
            let cfg = self.config.read().await;
            FlattenerConfig {
                close_position_epsilon_base: cfg.close_position_epsilon_base,
                close_retry_base_delay_sec: cfg.close_retry_base_delay_sec,
                close_retry_max_delay_sec: cfg.close_retry_max_delay_sec,
            }
        };
        let symbol = self.config.read().await.symbol.clone();
        flattener::flatten(adapter.as_ref(), &symbol, &flatten_cfg, &self.bus, &self.alerts).await;

        let mut state = self.state.lock().await;
        state.mode = EngineMode::Halted;
        state.kill_reason = Some(kill_reason.to_string());
        self.bus.publish(Event::Engine {
            status: "halted".to_string(),
            reason: Some(kill_reason.to_string()),
            mode: "halted".to_string(),
        });
        self.alerts.send(
            AlertLevel::Critical,
            "KILL_SWITCH",
            kill_reason,
            None,
            0.0,
        );
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            let tick_start = Instant::now();
            let should_halt = self.run_tick().await;

            if let Some(reason) = should_halt {
                self.halt(&reason).await;
                return;
            }

            let interval = self.config.read().await.quote_interval_sec.clamp(0.2, 10.0);
            let elapsed = tick_start.elapsed().as_secs_f64();
            let sleep_for = (interval - elapsed).max(0.01);

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs_f64(sleep_for)) => {}
                _ = self.stop_flag.notified() => return,
            }
        }
    }

    /// Runs one tick per spec.md §4.5's 15-step ordering. Returns
    /// `Some(reason)` when a risk trip should transition the engine to
    /// halted.
    async fn run_tick(&self) -> Option<String> {
        let cfg = self.config.read().await.clone();
        let adapter = self.adapter.read().await.clone();

        {
            let mut adaptive = self.adaptive.lock().await;
            adaptive.set_windows(cfg.sigma_window_sec, cfg.quote_interval_sec);
            adaptive.set_sigma_baseline(cfg.as_sigma);
        }

        let market = match adapter.fetch_market_snapshot(&cfg.symbol).await {
            Ok(m) => m,
            Err(e) => return self.record_loop_error(&e).await,
        };

        let funds_fut = adapter.fetch_account_funds();
        let position_fut = adapter.fetch_position(&cfg.symbol);
        let (funds, position) = tokio::join!(funds_fut, position_fut);
        let funds = match funds {
            Ok(f) => f,
            Err(e) => return self.record_loop_error(&e).await,
        };
        let position = match position {
            Ok(p) => p,
            Err(e) => return self.record_loop_error(&e).await,
        };

        {
            let mut state = self.state.lock().await;
            if state.initial_equity.is_none() {
                state.initial_equity = Some(funds.equity);
                state.peak_equity = Some(funds.equity);
            }
            let today = Utc::now().date_naive();
            if state.equity_day != Some(today) {
                state.day_start_equity = Some(funds.equity);
                state.equity_day = Some(today);
            }
        }

        let (sigma, sigma_zscore) = {
            let mut adaptive = self.adaptive.lock().await;
            adaptive.update(market.mid, market.depth_score, market.trade_intensity)
        };
        let (depth_factor, intensity_factor, size_factor) = {
            let adaptive = self.adaptive.lock().await;
            (
                adaptive.depth_factor(),
                adaptive.intensity_factor(),
                adaptive.quote_size_factor(),
            )
        };

        let capacity = (funds.free * cfg.effective_leverage).max(1e-9);
        let inventory_cap_notional = if cfg.max_inventory_notional_pct > 0.0 {
            capacity * cfg.max_inventory_notional_pct
        } else {
            cfg.max_inventory_notional.max(0.0)
        };
        let inventory_cap_base = inventory_cap_notional / market.mid.max(1e-9);

        let min_notional_buffer = market.mid * cfg.min_order_size_base * 1.05;
        let quote_notional = min_notional_buffer.max(
            cfg.max_single_order_notional
                .min(funds.equity * cfg.equity_risk_pct)
                * size_factor,
        );

        let effective_spread_floor = (cfg.min_spread_bps * depth_factor * intensity_factor)
            .clamp(0.1, cfg.max_spread_bps - 0.05);
        let effective_k = (cfg.liquidity_k * depth_factor).clamp(0.5 * cfg.liquidity_k, 2.0 * cfg.liquidity_k);

        let mut decision = compute_quote(&AsModelInputs {
            mid: market.mid,
            sigma,
            inventory_base: position.base_position,
            max_inventory_base: inventory_cap_base,
            base_gamma: cfg.base_gamma,
            gamma_min: cfg.gamma_min,
            gamma_max: cfg.gamma_max,
            liquidity_k: effective_k,
            horizon_sec: cfg.order_ttl_sec,
            min_spread_bps: effective_spread_floor,
            max_spread_bps: cfg.max_spread_bps,
            quote_size_notional: quote_notional,
        });
        if decision.quote_size_base < cfg.min_order_size_base {
            decision.quote_size_base = cfg.min_order_size_base;
        }

        let tick = infer_price_tick(market.best_bid, market.best_ask);
        let (bid_price, ask_price) = apply_tick_guard(decision.bid_price, decision.ask_price, tick);
        decision.bid_price = bid_price;
        decision.ask_price = ask_price;

        let mode_now = self.state.lock().await.inventory_side_mode;
        let new_mode = hysteresis::update_side_mode(
            mode_now,
            HysteresisInputs {
                inventory_notional: position.notional,
                capacity,
                trigger: cfg.max_inventory_equity_ratio,
                recover: cfg.single_side_recover_ratio,
            },
        );
        self.state.lock().await.inventory_side_mode = new_mode;
        let (want_buy, want_sell) = reconciler::desired_sides(new_mode);

        let running = self.state.lock().await.mode == EngineMode::Running;
        let mut reconciled_orders: Vec<OrderSnapshot> = Vec::new();
        let mut requote_reason: Option<String> = None;
        let mut open_order_ages_sec: Vec<f64> = Vec::new();
        let mut open_order_age_buy_sec: Option<f64> = None;
        let mut open_order_age_sell_sec: Option<f64> = None;

        if running {
            let open_orders = match adapter.fetch_open_orders(&cfg.symbol).await {
                Ok(orders) => orders,
                Err(e) => return self.record_loop_error(&e).await,
            };
            let latest_buy = open_orders
                .iter()
                .filter(|o| o.side == Side::Buy)
                .max_by_key(|o| o.created_at);
            let latest_sell = open_orders
                .iter()
                .filter(|o| o.side == Side::Sell)
                .max_by_key(|o| o.created_at);

            let age_now = Utc::now();
            open_order_ages_sec = open_orders
                .iter()
                .map(|o| (age_now - o.created_at).num_milliseconds() as f64 / 1000.0)
                .collect();
            open_order_age_buy_sec =
                latest_buy.map(|o| (age_now - o.created_at).num_milliseconds() as f64 / 1000.0);
            open_order_age_sell_sec =
                latest_sell.map(|o| (age_now - o.created_at).num_milliseconds() as f64 / 1000.0);

            let recon_cfg = ReconcilerConfig {
                order_ttl_sec: cfg.order_ttl_sec,
                requote_threshold_bps: cfg.requote_threshold_bps,
                requote_size_threshold_ratio: cfg.requote_size_threshold_ratio,
                min_order_age_before_requote_sec: cfg.min_order_age_before_requote_sec,
            };
            let now = Utc::now();

            for (side, existing, price, desired) in [
                (Side::Buy, latest_buy, decision.bid_price, want_buy),
                (Side::Sell, latest_sell, decision.ask_price, want_sell),
            ] {
                let action = decide_side_action(
                    side,
                    existing,
                    price,
                    decision.quote_size_base,
                    desired,
                    &recon_cfg,
                    now,
                );
                match action {
                    ReconcileAction::Place { reason } | ReconcileAction::Replace { reason } => {
                        requote_reason = Some(reason.clone());
                        let constraints = match adapter.instrument_constraints(&cfg.symbol).await {
                            Ok(c) => c,
                            Err(e) => return self.record_loop_error(&e).await,
                        };
                        let size = match quantize_size(decision.quote_size_base, &constraints) {
                            Ok(s) => s,
                            Err(_) => {
                                log::error!("reconciler: quantized size non-positive, aborting order");
                                continue;
                            }
                        };
                        let client_order_id = generate_client_order_id(side);
                        match adapter
                            .place_limit_order(&cfg.symbol, side, price, size, true, &client_order_id)
                            .await
                        {
                            Ok(order) => reconciled_orders.push(order),
                            Err(e) => {
                                log::warn!("reconciler: place_limit_order failed: {e}");
                                continue;
                            }
                        }
                        if let Some(existing) = existing {
                            if matches!(action, ReconcileAction::Replace { .. }) {
                                let _ = adapter.cancel_order(&cfg.symbol, &existing.order_id).await;
                            }
                        }
                    }
                    ReconcileAction::Cancel { reason } => {
                        requote_reason = Some(reason);
                        if let Some(existing) = existing {
                            let _ = adapter.cancel_order(&cfg.symbol, &existing.order_id).await;
                            self.monitoring.lock().await.record_cancel(now);
                        }
                    }
                    ReconcileAction::Noop => {}
                }
            }
        }

        let recent_trades = adapter
            .fetch_recent_trades(&cfg.symbol, 50)
            .await
            .unwrap_or_default();
        self.monitoring.lock().await.record_new_trades(&recent_trades);

        let drawdown_pct = {
            let mut guard = self.risk_guard.lock().await;
            guard.update_drawdown(funds.equity)
        };
        {
            let mut state = self.state.lock().await;
            state.peak_equity = Some(self.risk_guard.lock().await.peak_equity());
            state.last_heartbeat_at = Some(Utc::now());
        }

        let state_snapshot = self.state.lock().await.clone();
        let summary = self.monitoring.lock().await.update_tick(
            Utc::now(),
            market.mid,
            decision.bid_price,
            decision.ask_price,
            decision.spread_bps,
            sigma,
            sigma_zscore,
            position.base_position,
            position.notional,
            funds.equity,
            drawdown_pct,
            decision.quote_size_base,
            decision.quote_size_notional,
            &open_order_ages_sec,
            open_order_age_buy_sec,
            open_order_age_sell_sec,
            requote_reason.clone(),
            format!("{:?}", state_snapshot.mode).to_lowercase(),
            state_snapshot.consecutive_failures,
        );

        self.bus.publish(Event::Tick {
            summary: serde_json::to_value(&summary).unwrap_or(serde_json::Value::Null),
            open_orders: serde_json::to_value(
                reconciled_orders
                    .iter()
                    .map(|o| o.order_id.clone())
                    .collect::<Vec<_>>(),
            )
            .unwrap_or(serde_json::Value::Null),
            diagnostics: serde_json::json!({ "trade_count": recent_trades.len() }),
        });

        if cfg.tg_heartbeat_enabled {
            self.alerts.send(
                AlertLevel::Info,
                "HEARTBEAT",
                "engine heartbeat",
                Some("heartbeat"),
                cfg.tg_heartbeat_interval_sec,
            );
        }

        let risk_result = {
            let mut guard = self.risk_guard.lock().await;
            guard.evaluate(RiskInput {
                consecutive_failures: state_snapshot.consecutive_failures,
                max_consecutive_failures: cfg.max_consecutive_failures,
                equity: funds.equity,
                sigma_zscore,
                volatility_kill_zscore: cfg.volatility_kill_zscore,
                drawdown_kill_pct: cfg.drawdown_kill_pct,
            })
        };

        if risk_result.triggered {
            return risk_result.reason;
        }
        None
    }

    async fn record_loop_error(&self, err: &OrderError) -> Option<String> {
        let message = err.to_string();
        let category = classify_error(&message);
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;
        state.last_error = Some(message.clone());
        state.exchange_connected = !matches!(category, ErrorCategory::Auth);
        let consecutive_failures = state.consecutive_failures;
        drop(state);

        self.bus.publish(Event::Error {
            message: message.clone(),
            category: format!("{category:?}").to_lowercase(),
            consecutive_failures,
        });
        self.alerts.send(
            AlertLevel::Warning,
            "ENGINE_ERROR",
            &message,
            Some(&format!("error:{category:?}")),
            60.0,
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LoggingAlertSink;
    use crate::exchange::SimExchangeAdapter;

    fn engine() -> Arc<StrategyEngine<SimExchangeAdapter, LoggingAlertSink>> {
        let adapter = Arc::new(SimExchangeAdapter::new(100.0, 1000.0));
        let bus = Arc::new(EventBus::new());
        let alerts = Arc::new(DedupeAlertService::new(LoggingAlertSink));
        Arc::new(StrategyEngine::new(adapter, RuntimeConfig::default(), bus, alerts))
    }

    #[test]
    fn test_classify_error_categories() {
        assert_eq!(classify_error("auth token expired"), ErrorCategory::Auth);
        assert_eq!(classify_error("order_id not found"), ErrorCategory::OrderId);
        assert_eq!(classify_error("market snapshot stale"), ErrorCategory::MarketData);
        assert_eq!(classify_error("boom"), ErrorCategory::Unknown);
    }

    #[tokio::test]
    async fn test_start_transitions_idle_to_running() {
        let engine = engine();
        engine.start().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(engine.status().await.mode, EngineMode::Running);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let engine = engine();
        engine.start().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        engine.start().await;
        assert_eq!(engine.status().await.mode, EngineMode::Running);
    }

    #[tokio::test]
    async fn test_stop_returns_engine_to_idle() {
        let engine = engine();
        engine.start().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        engine.stop("test stop").await;
        assert_eq!(engine.status().await.mode, EngineMode::Idle);
    }

    #[tokio::test]
    async fn test_halt_sets_kill_reason() {
        let engine = engine();
        engine.start().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        engine.halt("risk trip: test").await;
        let state = engine.status().await;
        assert_eq!(state.mode, EngineMode::Halted);
        assert_eq!(state.kill_reason.as_deref(), Some("risk trip: test"));
    }

    #[tokio::test]
    async fn test_replace_adapter_rejected_while_running() {
        let engine = engine();
        engine.start().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let new_adapter = Arc::new(SimExchangeAdapter::new(200.0, 2000.0));
        let result = engine.replace_adapter(new_adapter).await;
        assert!(result.is_err());
    }
}
