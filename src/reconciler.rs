//! Order reconciler: per-side replace/cancel decisions, post-only tick
//! guard, size quantization, client-order-id generation (spec.md §4.3).

use crate::as_model::QuoteDecision;
use crate::types::{InstrumentConstraints, InventorySideMode, OrderSnapshot, Side};
use chrono::{DateTime, Utc};
use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    Place { reason: String },
    Replace { reason: String },
    Cancel { reason: String },
    Noop,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub order_ttl_sec: f64,
    pub requote_threshold_bps: f64,
    pub requote_size_threshold_ratio: f64,
    pub min_order_age_before_requote_sec: f64,
}

/// Generates a purely-numeric client order id: side digit, ms-epoch,
/// 4-digit zero-padded random suffix, per spec.md §4.3.
pub fn generate_client_order_id(side: Side) -> String {
    let prefix = match side {
        Side::Buy => "1",
        Side::Sell => "2",
    };
    let ms = Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("{prefix}{ms:016}{suffix:04}")
}

fn order_age_sec(order: &OrderSnapshot, now: DateTime<Utc>) -> f64 {
    (now - order.created_at).num_milliseconds() as f64 / 1000.0
}

/// Decides the action for one side given the current live order (if any)
/// and the desired quote. `desired` is false when the side is blocked by
/// inventory side-mode hysteresis.
pub fn decide_side_action(
    side: Side,
    existing: Option<&OrderSnapshot>,
    desired_price: f64,
    desired_size: f64,
    desired: bool,
    cfg: &ReconcilerConfig,
    now: DateTime<Utc>,
) -> ReconcileAction {
    let label = side.as_str();

    if !desired {
        return match existing {
            Some(_) => ReconcileAction::Cancel {
                reason: format!("inventory-exit-{label}"),
            },
            None => ReconcileAction::Noop,
        };
    }

    let Some(order) = existing else {
        return ReconcileAction::Place {
            reason: format!("missing-side-{label}"),
        };
    };

    let age = order_age_sec(order, now);
    let ttl_expired = age > cfg.order_ttl_sec;
    let price_dev = ((desired_price - order.price).abs() / order.price.max(1e-9)) * 10_000.0
        > cfg.requote_threshold_bps;
    let size_dev = (desired_size - order.size).abs()
        / desired_size.abs().max(order.size.abs()).max(1e-9)
        > cfg.requote_size_threshold_ratio;

    if ttl_expired {
        return ReconcileAction::Replace {
            reason: "ttl-expired".to_string(),
        };
    }

    if (price_dev || size_dev) && age >= cfg.min_order_age_before_requote_sec {
        let reason = if price_dev {
            format!("price-deviation-{label}")
        } else {
            format!("size-deviation-{label}")
        };
        return ReconcileAction::Replace { reason };
    }

    ReconcileAction::Noop
}

/// Post-only tick guard: clamps bid/ask and rounds to the inferred tick so
/// bid < ask by one tick after rounding.
pub fn apply_tick_guard(bid: f64, ask: f64, price_tick: f64) -> (f64, f64) {
    let tick = price_tick.max(0.0001);
    let mut bid = bid.min(ask - tick);
    let mut ask = ask.max(bid + tick);

    bid = (bid / tick).floor() * tick;
    ask = (ask / tick).ceil() * tick;

    if ask - bid < tick {
        ask = bid + tick;
    }
    (bid, ask)
}

/// Infers the price tick from the max decimal places of bid/ask, floored
/// at 0.0001.
pub fn infer_price_tick(best_bid: f64, best_ask: f64) -> f64 {
    fn decimals(x: f64) -> u32 {
        let s = format!("{x:.8}");
        let trimmed = s.trim_end_matches('0');
        match trimmed.split_once('.') {
            Some((_, frac)) => frac.len() as u32,
            None => 0,
        }
    }
    let d = decimals(best_bid).max(decimals(best_ask)).min(8);
    (10f64.powi(-(d as i32))).max(0.0001)
}

#[derive(Debug, Clone)]
pub enum QuantizeError {
    NonPositiveResult,
}

/// Floors `raw_size` to the nearest multiple of `size_step`; bumps up to
/// the least multiple of `size_step` >= `min_size` if below the floor.
pub fn quantize_size(
    raw_size: f64,
    constraints: &InstrumentConstraints,
) -> Result<f64, QuantizeError> {
    let step = constraints.size_step.max(1e-12);
    let mut size = (raw_size / step).floor() * step;
    if size < constraints.min_size {
        size = (constraints.min_size / step).ceil() * step;
    }
    if size <= 0.0 {
        return Err(QuantizeError::NonPositiveResult);
    }
    Ok(size)
}

pub fn desired_sides(mode: InventorySideMode) -> (bool, bool) {
    match mode {
        InventorySideMode::None => (true, true),
        InventorySideMode::OnlyBuy => (true, false),
        InventorySideMode::OnlySell => (false, true),
    }
}

pub fn decision_to_sides(decision: &QuoteDecision) -> (f64, f64) {
    (decision.bid_price, decision.ask_price)
}
