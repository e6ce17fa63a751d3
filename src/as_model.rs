//! Avellaneda-Stoikov reservation price / half-spread (spec.md §4.2).
//!
//! Pure function, no I/O. Constants ground-truthed against
//! `original_source/backend/app/engine/as_model.py`.

const SIGMA_REF: f64 = 0.003;

#[derive(Debug, Clone, Copy)]
pub struct AsModelInputs {
    pub mid: f64,
    pub sigma: f64,
    pub inventory_base: f64,
    pub max_inventory_base: f64,
    pub base_gamma: f64,
    pub gamma_min: f64,
    pub gamma_max: f64,
    pub liquidity_k: f64,
    pub horizon_sec: f64,
    pub min_spread_bps: f64,
    pub max_spread_bps: f64,
    pub quote_size_notional: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuoteDecision {
    pub bid_price: f64,
    pub ask_price: f64,
    pub quote_size_base: f64,
    pub quote_size_notional: f64,
    pub spread_bps: f64,
    pub gamma: f64,
    pub reservation_price: f64,
}

/// Computes bid/ask/size from market and risk inputs per the 7-step
/// recipe in spec.md §4.2.
pub fn compute_quote(i: &AsModelInputs) -> QuoteDecision {
    let gamma_raw = i.base_gamma * (1.0 + (i.sigma / SIGMA_REF.max(1e-9)).min(3.0));
    let gamma = gamma_raw.clamp(i.gamma_min, i.gamma_max);

    let inventory_ratio = if i.max_inventory_base > 0.0 {
        (i.inventory_base / i.max_inventory_base).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    let horizon = i.horizon_sec.max(1.0);
    let reservation_shift = inventory_ratio * gamma * i.sigma.powi(2) * horizon;
    let reservation_price = i.mid * (1.0 - reservation_shift);

    let raw_half_spread = (gamma * i.sigma.powi(2) * i.horizon_sec) / 2.0
        + (1.0 / gamma) * (1.0 + gamma / i.liquidity_k.max(1e-6)).ln();
    let raw_spread_bps = (raw_half_spread * 2.0 * 10_000.0).max(0.1);
    let spread_bps = raw_spread_bps.clamp(i.min_spread_bps, i.max_spread_bps);

    let spread_abs = reservation_price * spread_bps / 10_000.0;
    let bid_price = (reservation_price - spread_abs / 2.0).max(0.0001);
    let ask_price = (reservation_price + spread_abs / 2.0).max(bid_price + 0.0001);

    let quote_size_base = i.quote_size_notional / i.mid.max(1e-9);

    QuoteDecision {
        bid_price,
        ask_price,
        quote_size_base,
        quote_size_notional: i.quote_size_notional,
        spread_bps,
        gamma,
        reservation_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s1_inputs() -> AsModelInputs {
        AsModelInputs {
            mid: 100.0,
            sigma: 0.002,
            inventory_base: 0.0,
            max_inventory_base: 10.0,
            base_gamma: 0.12,
            gamma_min: 0.02,
            gamma_max: 0.8,
            liquidity_k: 1.5,
            horizon_sec: 15.0,
            min_spread_bps: 4.0,
            max_spread_bps: 60.0,
            quote_size_notional: 100.0,
        }
    }

    #[test]
    fn test_s1_as_neutral_quote() {
        let decision = compute_quote(&s1_inputs());
        assert!(decision.bid_price < decision.ask_price);
        assert!(decision.bid_price > 0.0 && decision.ask_price > 0.0);
        assert!(decision.spread_bps >= 4.0 && decision.spread_bps <= 60.0);
        assert!((decision.quote_size_base - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_s2_inventory_bias_shifts_reservation_down() {
        let neutral = compute_quote(&s1_inputs());
        let mut biased_inputs = s1_inputs();
        biased_inputs.inventory_base = 5.0;
        let biased = compute_quote(&biased_inputs);
        assert!(biased.reservation_price < neutral.reservation_price);
    }

    #[test]
    fn test_spread_respects_configured_bounds() {
        let mut inputs = s1_inputs();
        inputs.sigma = 10.0;
        inputs.max_spread_bps = 20.0;
        let decision = compute_quote(&inputs);
        assert!(decision.spread_bps <= 20.0);
    }

    #[test]
    fn test_negative_inventory_biases_reservation_upward() {
        let neutral = compute_quote(&s1_inputs());
        let mut inputs = s1_inputs();
        inputs.inventory_base = -5.0;
        let decision = compute_quote(&inputs);
        assert!(decision.reservation_price > neutral.reservation_price);
    }

    #[test]
    fn test_bid_below_ask_across_random_inputs() {
        let cases = [
            (50.0, 0.0001, 0.0),
            (50_000.0, 0.05, 9.9),
            (1.0, 0.5, -9.9),
        ];
        for (mid, sigma, inventory_base) in cases {
            let mut inputs = s1_inputs();
            inputs.mid = mid;
            inputs.sigma = sigma;
            inputs.inventory_base = inventory_base;
            let decision = compute_quote(&inputs);
            assert!(decision.bid_price < decision.ask_price);
            assert!(decision.bid_price > 0.0);
        }
    }
}
