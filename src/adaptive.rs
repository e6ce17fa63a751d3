//! Rolling volatility, depth and intensity signals (spec.md §4.1).
//!
//! Formulas and constants ground-truthed against
//! `original_source/backend/app/engine/adaptive.py`.

use std::collections::VecDeque;

const LAMBDA: f64 = 0.94;

#[derive(Debug, Clone)]
pub struct AdaptiveController {
    returns: VecDeque<f64>,
    depth_scores: VecDeque<f64>,
    intensities: VecDeque<f64>,
    sigma_history: VecDeque<f64>,
    last_mid: f64,

    sigma_window_sec: f64,
    interval_sec: f64,
    fallback_sigma: f64,

    max_buffer_len: usize,
}

impl AdaptiveController {
    pub fn new(fallback_sigma: f64) -> Self {
        Self {
            returns: VecDeque::new(),
            depth_scores: VecDeque::new(),
            intensities: VecDeque::new(),
            sigma_history: VecDeque::new(),
            last_mid: 0.0,
            sigma_window_sec: 120.0,
            interval_sec: 1.0,
            fallback_sigma: if fallback_sigma > 0.0 { fallback_sigma } else { 0.001 },
            max_buffer_len: 4096,
        }
    }

    /// Tunes the windows used by `current_sigma`/`sigma_zscore`; called once
    /// per tick from the loop with the latest RuntimeConfig values.
    pub fn set_windows(&mut self, sigma_window_sec: f64, interval_sec: f64) {
        self.sigma_window_sec = sigma_window_sec.max(1.0);
        self.interval_sec = interval_sec.max(0.05);
    }

    pub fn set_sigma_baseline(&mut self, fallback_sigma: f64) {
        if fallback_sigma > 0.0 {
            self.fallback_sigma = fallback_sigma;
        }
    }

    fn window_len(&self) -> usize {
        (self.sigma_window_sec / self.interval_sec.max(0.05)).round().max(1.0) as usize
    }

    fn push_bounded(buf: &mut VecDeque<f64>, value: f64, cap: usize) {
        buf.push_back(value);
        while buf.len() > cap {
            buf.pop_front();
        }
    }

    /// Appends one observation and returns the freshly recomputed
    /// `(sigma, z)` pair.
    pub fn update(&mut self, mid: f64, depth: f64, intensity: f64) -> (f64, f64) {
        if self.last_mid > 0.0 && mid > 0.0 {
            let r = (mid / self.last_mid).ln();
            Self::push_bounded(&mut self.returns, r, self.max_buffer_len);
        }
        if mid > 0.0 {
            self.last_mid = mid;
        }
        Self::push_bounded(&mut self.depth_scores, depth, self.max_buffer_len);
        Self::push_bounded(&mut self.intensities, intensity, self.max_buffer_len);

        let sigma = self.current_sigma();
        Self::push_bounded(&mut self.sigma_history, sigma, self.max_buffer_len);
        let z = self.sigma_zscore();
        (sigma, z)
    }

    /// EWMA of squared log-returns over the most recent window, per
    /// spec.md §4.1. Fewer than 4 returns yields the configured fallback.
    pub fn current_sigma(&self) -> f64 {
        if self.returns.len() < 4 {
            return self.fallback_sigma;
        }
        let n = self.window_len().clamp(10, 600);
        let start = self.returns.len().saturating_sub(n);
        let window: Vec<f64> = self.returns.iter().skip(start).copied().collect();

        let mut v = window[0] * window[0];
        for r in window.iter().skip(1) {
            v = LAMBDA * v + (1.0 - LAMBDA) * r * r;
        }
        v.sqrt().max(1e-6)
    }

    /// Standardized deviation of current sigma from its rolling mean.
    pub fn sigma_zscore(&self) -> f64 {
        let n = self.window_len().clamp(10, 600);
        let m = (3 * n).clamp(20, 2000);
        if self.sigma_history.len() < 20 {
            return 0.0;
        }
        let start = self.sigma_history.len().saturating_sub(m);
        let window: Vec<f64> = self.sigma_history.iter().skip(start).copied().collect();

        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let variance =
            window.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / window.len() as f64;
        let std = variance.sqrt();
        if std < 1e-12 {
            return 0.0;
        }
        let current = *self.sigma_history.back().unwrap();
        (current - mean) / std
    }

    pub fn depth_factor(&self) -> f64 {
        if self.depth_scores.is_empty() {
            return 1.0;
        }
        let avg = self.depth_scores.iter().sum::<f64>() / self.depth_scores.len() as f64;
        let cur = *self.depth_scores.back().unwrap();
        if avg <= 0.0 {
            return 1.0;
        }
        (1.2 - 0.35 * (cur / avg - 1.0)).clamp(0.7, 1.8)
    }

    pub fn intensity_factor(&self) -> f64 {
        if self.intensities.is_empty() {
            return 1.0;
        }
        let avg = self.intensities.iter().sum::<f64>() / self.intensities.len() as f64;
        let cur = *self.intensities.back().unwrap();
        if avg <= 0.0 {
            return 1.0;
        }
        (1.15 - 0.25 * (cur / avg - 1.0)).clamp(0.7, 1.6)
    }

    pub fn quote_size_factor(&self) -> f64 {
        let sigma = self.current_sigma();
        if sigma > self.fallback_sigma {
            (1.0 / (sigma / self.fallback_sigma).sqrt()).clamp(0.2, 1.0)
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_sigma_with_few_observations() {
        let mut ctrl = AdaptiveController::new(0.001);
        ctrl.update(100.0, 1.0, 1.0);
        ctrl.update(100.1, 1.0, 1.0);
        assert_eq!(ctrl.current_sigma(), 0.001);
    }

    #[test]
    fn test_sigma_rises_with_volatile_returns() {
        let mut calm = AdaptiveController::new(0.001);
        let mut volatile = AdaptiveController::new(0.001);
        let mut mid = 100.0;
        for _ in 0..20 {
            mid *= 1.0001;
            calm.update(mid, 1.0, 1.0);
        }
        let mut mid2 = 100.0;
        let mut sign = 1.0;
        for _ in 0..20 {
            mid2 *= 1.0 + sign * 0.02;
            sign *= -1.0;
            volatile.update(mid2, 1.0, 1.0);
        }
        assert!(volatile.current_sigma() > calm.current_sigma());
    }

    #[test]
    fn test_zscore_zero_before_enough_history() {
        let mut ctrl = AdaptiveController::new(0.001);
        for i in 0..10 {
            ctrl.update(100.0 + i as f64, 1.0, 1.0);
        }
        assert_eq!(ctrl.sigma_zscore(), 0.0);
    }

    #[test]
    fn test_depth_factor_bounds() {
        let mut ctrl = AdaptiveController::new(0.001);
        for _ in 0..5 {
            ctrl.update(100.0, 10.0, 1.0);
        }
        ctrl.update(100.0, 0.0001, 1.0);
        let f = ctrl.depth_factor();
        assert!(f >= 0.7 && f <= 1.8);
    }

    #[test]
    fn test_quote_size_factor_shrinks_under_high_sigma() {
        let mut ctrl = AdaptiveController::new(0.001);
        ctrl.set_sigma_baseline(0.001);
        let mut mid = 100.0;
        let mut sign = 1.0;
        for _ in 0..30 {
            mid *= 1.0 + sign * 0.05;
            sign *= -1.0;
            ctrl.update(mid, 1.0, 1.0);
        }
        assert!(ctrl.quote_size_factor() <= 1.0);
        assert!(ctrl.quote_size_factor() >= 0.2);
    }
}
