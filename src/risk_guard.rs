//! Drawdown tracking and kill-switch trip evaluation (spec.md §4.7).
//!
//! Grounded on `original_source/backend/app/engine/risk_guard.py`
//! (trip order) and teacher's `risk.rs` (struct shape, `Serialize` derive,
//! `log::warn!`/`log::error!` call sites).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskInput {
    pub consecutive_failures: u32,
    pub max_consecutive_failures: u32,
    pub equity: f64,
    pub sigma_zscore: f64,
    pub volatility_kill_zscore: f64,
    pub drawdown_kill_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskResult {
    pub triggered: bool,
    pub reason: Option<String>,
    pub drawdown_pct: f64,
    pub peak_equity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RiskGuard {
    peak_equity: f64,
}

impl RiskGuard {
    pub fn new() -> Self {
        Self { peak_equity: 0.0 }
    }

    /// Updates the running peak monotonically and returns the current
    /// drawdown percentage (never negative).
    pub fn update_drawdown(&mut self, equity: f64) -> f64 {
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        ((self.peak_equity - equity) / self.peak_equity * 100.0).max(0.0)
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    /// Trip conditions, first match wins: failures -> drawdown -> volatility.
    pub fn evaluate(&mut self, input: RiskInput) -> RiskResult {
        let drawdown_pct = self.update_drawdown(input.equity);

        if input.consecutive_failures >= input.max_consecutive_failures {
            log::error!(
                "RISK: consecutive failures {} >= limit {}",
                input.consecutive_failures,
                input.max_consecutive_failures
            );
            return RiskResult {
                triggered: true,
                reason: Some(format!(
                    "consecutive_failures {} >= {}",
                    input.consecutive_failures, input.max_consecutive_failures
                )),
                drawdown_pct,
                peak_equity: self.peak_equity,
            };
        }

        if drawdown_pct >= input.drawdown_kill_pct {
            log::error!(
                "RISK: drawdown {:.2}% >= kill threshold {:.2}%",
                drawdown_pct,
                input.drawdown_kill_pct
            );
            return RiskResult {
                triggered: true,
                reason: Some(format!(
                    "drawdown {:.2}% >= {:.2}%",
                    drawdown_pct, input.drawdown_kill_pct
                )),
                drawdown_pct,
                peak_equity: self.peak_equity,
            };
        }

        if input.sigma_zscore.abs() >= input.volatility_kill_zscore {
            log::warn!(
                "RISK: |sigma z-score| {:.2} >= kill threshold {:.2}",
                input.sigma_zscore.abs(),
                input.volatility_kill_zscore
            );
            return RiskResult {
                triggered: true,
                reason: Some(format!(
                    "|sigma_zscore| {:.2} >= {:.2}",
                    input.sigma_zscore.abs(),
                    input.volatility_kill_zscore
                )),
                drawdown_pct,
                peak_equity: self.peak_equity,
            };
        }

        RiskResult {
            triggered: false,
            reason: None,
            drawdown_pct,
            peak_equity: self.peak_equity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input(equity: f64) -> RiskInput {
        RiskInput {
            consecutive_failures: 0,
            max_consecutive_failures: 6,
            equity,
            sigma_zscore: 0.0,
            volatility_kill_zscore: 4.0,
            drawdown_kill_pct: 8.0,
        }
    }

    #[test]
    fn test_s5_drawdown_trip_sequence() {
        let mut guard = RiskGuard::new();
        let equities = [1000.0, 1100.0, 990.0];

        let r1 = guard.evaluate(base_input(equities[0]));
        assert!(!r1.triggered);
        let r2 = guard.evaluate(base_input(equities[1]));
        assert!(!r2.triggered);
        let r3 = guard.evaluate(base_input(equities[2]));
        assert!(r3.triggered);
        assert!(r3.reason.unwrap().contains("10.00"));
    }

    #[test]
    fn test_drawdown_never_negative() {
        let mut guard = RiskGuard::new();
        guard.update_drawdown(100.0);
        let d = guard.update_drawdown(150.0);
        assert!(d >= 0.0);
    }

    #[test]
    fn test_trip_order_failures_before_drawdown() {
        let mut guard = RiskGuard::new();
        guard.update_drawdown(1000.0);
        let mut input = base_input(500.0);
        input.consecutive_failures = 10;
        let result = guard.evaluate(input);
        assert!(result.triggered);
        assert!(result.reason.unwrap().contains("consecutive_failures"));
    }

    #[test]
    fn test_trip_order_drawdown_before_volatility() {
        let mut guard = RiskGuard::new();
        guard.update_drawdown(1000.0);
        let mut input = base_input(900.0);
        input.sigma_zscore = 10.0;
        let result = guard.evaluate(input);
        assert!(result.triggered);
        assert!(result.reason.unwrap().contains("drawdown"));
    }

    #[test]
    fn test_volatility_trip_when_only_sigma_breaches() {
        let mut guard = RiskGuard::new();
        guard.update_drawdown(1000.0);
        let mut input = base_input(1000.0);
        input.sigma_zscore = -5.0;
        let result = guard.evaluate(input);
        assert!(result.triggered);
        assert!(result.reason.unwrap().contains("sigma_zscore"));
    }
}
