//! Goal/profile/strategy knob sets, each mapping deterministically onto a
//! full `RuntimeConfig` (SPEC_FULL.md §4.10).
//!
//! Grounded on `original_source/backend/app/services/goal_mapper.py`,
//! `profile_mapper.py`, `strategy_mapper.py`.

use crate::config::RuntimeConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskProfile {
    Safe,
    Balanced,
    Throughput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalConfig {
    pub principal_usdt: f64,
    pub target_hourly_notional: f64,
    pub risk_profile: RiskProfile,
}

struct ProfilePreset {
    quote_interval_sec: f64,
    min_spread_bps: f64,
    max_spread_bps: f64,
    drawdown_kill_pct: f64,
    equity_risk_pct: f64,
}

fn preset_for(profile: RiskProfile) -> ProfilePreset {
    match profile {
        RiskProfile::Safe => ProfilePreset {
            quote_interval_sec: 2.0,
            min_spread_bps: 8.0,
            max_spread_bps: 80.0,
            drawdown_kill_pct: 5.0,
            equity_risk_pct: 0.01,
        },
        RiskProfile::Balanced => ProfilePreset {
            quote_interval_sec: 1.0,
            min_spread_bps: 4.0,
            max_spread_bps: 60.0,
            drawdown_kill_pct: 8.0,
            equity_risk_pct: 0.02,
        },
        RiskProfile::Throughput => ProfilePreset {
            quote_interval_sec: 0.5,
            min_spread_bps: 2.0,
            max_spread_bps: 40.0,
            drawdown_kill_pct: 12.0,
            equity_risk_pct: 0.035,
        },
    }
}

/// Single-order notional factor scaling with the ratio of the desired
/// hourly notional throughput to the principal, mirroring
/// `_PROFILE_SINGLE_NOTIONAL_FACTOR` in `goal_mapper.py`.
fn single_order_notional_factor(goal: &GoalConfig) -> f64 {
    if goal.principal_usdt <= 0.0 {
        return 1.0;
    }
    (goal.target_hourly_notional / goal.principal_usdt).clamp(0.05, 1.0)
}

pub fn goal_to_runtime_config(goal: &GoalConfig, base: &RuntimeConfig) -> RuntimeConfig {
    let preset = preset_for(goal.risk_profile);
    let mut cfg = base.clone();
    cfg.quote_interval_sec = preset.quote_interval_sec;
    cfg.min_spread_bps = preset.min_spread_bps;
    cfg.max_spread_bps = preset.max_spread_bps;
    cfg.drawdown_kill_pct = preset.drawdown_kill_pct;
    cfg.equity_risk_pct = preset.equity_risk_pct;
    cfg.max_single_order_notional =
        goal.principal_usdt * single_order_notional_factor(goal);
    cfg
}

/// Inverse of `goal_to_runtime_config`, for display: reconstructs the
/// nearest `GoalConfig` a `RuntimeConfig` could have come from. The risk
/// profile is recovered by nearest-preset match on `quote_interval_sec`;
/// `principal_usdt` isn't retained by `RuntimeConfig`, so the caller
/// supplies it (e.g. from the account's current equity).
pub fn runtime_to_goal_config(cfg: &RuntimeConfig, principal_usdt: f64) -> GoalConfig {
    let risk_profile = [RiskProfile::Safe, RiskProfile::Balanced, RiskProfile::Throughput]
        .into_iter()
        .min_by(|&a, &b| {
            let da = (preset_for(a).quote_interval_sec - cfg.quote_interval_sec).abs();
            let db = (preset_for(b).quote_interval_sec - cfg.quote_interval_sec).abs();
            da.partial_cmp(&db).unwrap()
        })
        .unwrap_or(RiskProfile::Balanced);

    let target_hourly_notional = if principal_usdt > 0.0 {
        (cfg.max_single_order_notional / principal_usdt).clamp(0.05, 1.0) * principal_usdt
    } else {
        0.0
    };

    GoalConfig {
        principal_usdt,
        target_hourly_notional,
        risk_profile,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub aggressiveness: f64,
    pub inventory_tolerance: f64,
    pub risk_threshold: f64,
}

fn to_ratio(score_0_100: f64) -> f64 {
    (score_0_100 / 100.0).clamp(0.0, 1.0)
}

fn lerp(low: f64, high: f64, ratio: f64) -> f64 {
    low + (high - low) * ratio
}

fn inverse_lerp(low: f64, high: f64, value: f64) -> f64 {
    if (high - low).abs() < 1e-12 {
        return 0.0;
    }
    ((value - low) / (high - low)).clamp(0.0, 1.0)
}

pub fn profile_to_runtime_config(profile: &ProfileConfig, base: &RuntimeConfig) -> RuntimeConfig {
    let mut cfg = base.clone();
    let aggressiveness = to_ratio(profile.aggressiveness);
    let inventory_tolerance = to_ratio(profile.inventory_tolerance);
    let risk_threshold = to_ratio(profile.risk_threshold);

    cfg.min_spread_bps = lerp(10.0, 2.0, aggressiveness);
    cfg.max_spread_bps = lerp(40.0, 100.0, aggressiveness);
    cfg.equity_risk_pct = lerp(0.005, 0.04, aggressiveness);
    cfg.max_inventory_equity_ratio = lerp(0.2, 0.9, inventory_tolerance);
    cfg.single_side_recover_ratio =
        (cfg.max_inventory_equity_ratio * 0.75).min(cfg.max_inventory_equity_ratio);
    cfg.drawdown_kill_pct = lerp(3.0, 15.0, risk_threshold);
    cfg.volatility_kill_zscore = lerp(2.5, 6.0, risk_threshold);
    cfg
}

/// Inverse of `profile_to_runtime_config`, for display. Reads `aggressiveness`
/// back off `min_spread_bps` since that lerp uses the widest input range of
/// the three knobs it sets.
pub fn runtime_to_profile_config(cfg: &RuntimeConfig) -> ProfileConfig {
    ProfileConfig {
        aggressiveness: inverse_lerp(10.0, 2.0, cfg.min_spread_bps) * 100.0,
        inventory_tolerance: inverse_lerp(0.2, 0.9, cfg.max_inventory_equity_ratio) * 100.0,
        risk_threshold: inverse_lerp(3.0, 15.0, cfg.drawdown_kill_pct) * 100.0,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub as_gamma: f64,
    pub as_sigma: f64,
    pub as_liquidity_k: f64,
    pub max_drawdown_pct: f64,
    pub max_inventory_equity_ratio: f64,
}

pub fn strategy_to_runtime_config(strategy: &StrategyConfig, base: &RuntimeConfig) -> RuntimeConfig {
    let mut cfg = base.clone();
    cfg.base_gamma = strategy.as_gamma;
    cfg.as_sigma = strategy.as_sigma;
    cfg.liquidity_k = strategy.as_liquidity_k;
    cfg.drawdown_kill_pct = strategy.max_drawdown_pct;
    cfg.max_inventory_equity_ratio = strategy.max_inventory_equity_ratio;
    cfg.single_side_recover_ratio =
        (strategy.max_inventory_equity_ratio * 0.75).clamp(0.0, strategy.max_inventory_equity_ratio);
    cfg
}

/// Exact inverse of `strategy_to_runtime_config`: every `StrategyConfig`
/// field maps onto a `RuntimeConfig` field one-to-one (unlike the goal and
/// profile mappings, which fan out onto several derived fields).
pub fn runtime_to_strategy_config(cfg: &RuntimeConfig) -> StrategyConfig {
    StrategyConfig {
        as_gamma: cfg.base_gamma,
        as_sigma: cfg.as_sigma,
        as_liquidity_k: cfg.liquidity_k,
        max_drawdown_pct: cfg.drawdown_kill_pct,
        max_inventory_equity_ratio: cfg.max_inventory_equity_ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_mapping_scales_spread_with_profile() {
        let base = RuntimeConfig::default();
        let safe = goal_to_runtime_config(
            &GoalConfig {
                principal_usdt: 1000.0,
                target_hourly_notional: 500.0,
                risk_profile: RiskProfile::Safe,
            },
            &base,
        );
        let throughput = goal_to_runtime_config(
            &GoalConfig {
                principal_usdt: 1000.0,
                target_hourly_notional: 500.0,
                risk_profile: RiskProfile::Throughput,
            },
            &base,
        );
        assert!(safe.min_spread_bps > throughput.min_spread_bps);
        assert!(safe.validate().is_ok());
        assert!(throughput.validate().is_ok());
    }

    #[test]
    fn test_profile_mapping_monotonic_in_aggressiveness() {
        let base = RuntimeConfig::default();
        let calm = profile_to_runtime_config(
            &ProfileConfig {
                aggressiveness: 0.0,
                inventory_tolerance: 50.0,
                risk_threshold: 50.0,
            },
            &base,
        );
        let bold = profile_to_runtime_config(
            &ProfileConfig {
                aggressiveness: 100.0,
                inventory_tolerance: 50.0,
                risk_threshold: 50.0,
            },
            &base,
        );
        assert!(bold.min_spread_bps < calm.min_spread_bps);
        assert!(bold.equity_risk_pct > calm.equity_risk_pct);
        assert!(calm.validate().is_ok());
        assert!(bold.validate().is_ok());
    }

    #[test]
    fn test_strategy_mapping_derives_recover_ratio() {
        let base = RuntimeConfig::default();
        let strategy = StrategyConfig {
            as_gamma: 0.2,
            as_sigma: 0.001,
            as_liquidity_k: 1.0,
            max_drawdown_pct: 10.0,
            max_inventory_equity_ratio: 0.8,
        };
        let cfg = strategy_to_runtime_config(&strategy, &base);
        assert!((cfg.single_side_recover_ratio - 0.6).abs() < 1e-9);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_runtime_to_goal_config_recovers_risk_profile() {
        let base = RuntimeConfig::default();
        let goal = GoalConfig {
            principal_usdt: 1000.0,
            target_hourly_notional: 500.0,
            risk_profile: RiskProfile::Throughput,
        };
        let cfg = goal_to_runtime_config(&goal, &base);
        let recovered = runtime_to_goal_config(&cfg, goal.principal_usdt);
        assert_eq!(recovered.risk_profile, RiskProfile::Throughput);
    }

    #[test]
    fn test_runtime_to_profile_config_is_monotonic_inverse() {
        let base = RuntimeConfig::default();
        let bold = profile_to_runtime_config(
            &ProfileConfig {
                aggressiveness: 100.0,
                inventory_tolerance: 50.0,
                risk_threshold: 50.0,
            },
            &base,
        );
        let recovered = runtime_to_profile_config(&bold);
        assert!((recovered.aggressiveness - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_runtime_to_strategy_config_is_exact_inverse() {
        let base = RuntimeConfig::default();
        let strategy = StrategyConfig {
            as_gamma: 0.2,
            as_sigma: 0.001,
            as_liquidity_k: 1.0,
            max_drawdown_pct: 10.0,
            max_inventory_equity_ratio: 0.8,
        };
        let cfg = strategy_to_runtime_config(&strategy, &base);
        let recovered = runtime_to_strategy_config(&cfg);
        assert_eq!(recovered.as_gamma, strategy.as_gamma);
        assert_eq!(recovered.max_inventory_equity_ratio, strategy.max_inventory_equity_ratio);
    }
}
