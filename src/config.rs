//! Canonical runtime tunables (spec.md §6), validated once at construction
//! and re-read by the loop every tick rather than cached module-globally.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    pub symbol: String,

    pub equity_risk_pct: f64,
    pub max_inventory_notional: f64,
    pub max_inventory_notional_pct: f64,
    pub max_inventory_equity_ratio: f64,
    pub single_side_recover_ratio: f64,
    pub effective_leverage: f64,
    pub max_single_order_notional: f64,
    pub min_order_size_base: f64,

    pub min_spread_bps: f64,
    pub max_spread_bps: f64,
    pub requote_threshold_bps: f64,
    pub requote_size_threshold_ratio: f64,
    pub order_ttl_sec: f64,
    pub quote_interval_sec: f64,
    pub min_order_age_before_requote_sec: f64,

    pub sigma_window_sec: f64,
    pub base_gamma: f64,
    pub gamma_min: f64,
    pub gamma_max: f64,
    pub liquidity_k: f64,
    pub as_sigma: f64,

    pub drawdown_kill_pct: f64,
    pub volatility_kill_zscore: f64,
    pub max_consecutive_failures: u32,

    pub tg_heartbeat_enabled: bool,
    pub tg_heartbeat_interval_sec: f64,

    pub close_retry_base_delay_sec: f64,
    pub close_retry_max_delay_sec: f64,
    pub close_position_epsilon_base: f64,
}

#[derive(Debug)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid runtime config: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC_Perp".to_string(),
            equity_risk_pct: 0.02,
            max_inventory_notional: 5_000.0,
            max_inventory_notional_pct: 0.0,
            max_inventory_equity_ratio: 0.6,
            single_side_recover_ratio: 0.45,
            effective_leverage: 3.0,
            max_single_order_notional: 500.0,
            min_order_size_base: 0.001,
            min_spread_bps: 4.0,
            max_spread_bps: 60.0,
            requote_threshold_bps: 3.0,
            requote_size_threshold_ratio: 0.2,
            order_ttl_sec: 45.0,
            quote_interval_sec: 1.0,
            min_order_age_before_requote_sec: 1.5,
            sigma_window_sec: 120.0,
            base_gamma: 0.12,
            gamma_min: 0.02,
            gamma_max: 0.8,
            liquidity_k: 1.5,
            as_sigma: 0.001,
            drawdown_kill_pct: 8.0,
            volatility_kill_zscore: 4.0,
            max_consecutive_failures: 6,
            tg_heartbeat_enabled: true,
            tg_heartbeat_interval_sec: 300.0,
            close_retry_base_delay_sec: 1.0,
            close_retry_max_delay_sec: 30.0,
            close_position_epsilon_base: 0.0001,
        }
    }
}

impl RuntimeConfig {
    /// Enforces the bounds spec.md requires at construction time; returns
    /// a typed error rather than panicking or silently clamping.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_spread_bps < self.min_spread_bps {
            return Err(ConfigError(format!(
                "max_spread_bps ({}) must be >= min_spread_bps ({})",
                self.max_spread_bps, self.min_spread_bps
            )));
        }
        if self.quote_interval_sec < 0.2 || self.quote_interval_sec > 10.0 {
            return Err(ConfigError(format!(
                "quote_interval_sec ({}) must be within [0.2, 10]",
                self.quote_interval_sec
            )));
        }
        if self.gamma_max < self.gamma_min {
            return Err(ConfigError("gamma_max must be >= gamma_min".to_string()));
        }
        if self.single_side_recover_ratio > self.max_inventory_equity_ratio {
            return Err(ConfigError(
                "single_side_recover_ratio must be <= max_inventory_equity_ratio".to_string(),
            ));
        }
        if self.symbol.trim().is_empty() {
            return Err(ConfigError("symbol must not be empty".to_string()));
        }
        Ok(())
    }

    /// Builds a `RuntimeConfig` from environment variables (loaded via
    /// `dotenvy` in `main`), falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("MM_SYMBOL") {
            cfg.symbol = v;
        }
        macro_rules! env_f64 {
            ($var:literal, $field:ident) => {
                if let Ok(v) = std::env::var($var) {
                    cfg.$field = v
                        .parse()
                        .map_err(|_| ConfigError(format!("{} must be a number", $var)))?;
                }
            };
        }
        env_f64!("MM_EQUITY_RISK_PCT", equity_risk_pct);
        env_f64!("MM_MAX_INVENTORY_NOTIONAL", max_inventory_notional);
        env_f64!("MM_MAX_INVENTORY_EQUITY_RATIO", max_inventory_equity_ratio);
        env_f64!("MM_QUOTE_INTERVAL_SEC", quote_interval_sec);
        env_f64!("MM_DRAWDOWN_KILL_PCT", drawdown_kill_pct);
        cfg.validate()?;
        Ok(cfg)
    }
}
