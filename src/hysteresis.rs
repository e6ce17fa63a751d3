//! Inventory side-mode hysteresis (spec.md §4.6).

use crate::types::InventorySideMode;

#[derive(Debug, Clone, Copy)]
pub struct HysteresisInputs {
    pub inventory_notional: f64,
    pub capacity: f64,
    pub trigger: f64,
    pub recover: f64,
}

/// Applies the hysteresis transitions in order: sign-flip override first,
/// then recover, then trigger. Returns the new mode.
pub fn update_side_mode(current: InventorySideMode, inputs: HysteresisInputs) -> InventorySideMode {
    let usage = inputs.inventory_notional.abs() / inputs.capacity.max(1e-9);
    let recover = inputs.recover.min(inputs.trigger);

    let mode = match current {
        InventorySideMode::OnlySell if inputs.inventory_notional < 0.0 => InventorySideMode::OnlyBuy,
        InventorySideMode::OnlyBuy if inputs.inventory_notional > 0.0 => InventorySideMode::OnlySell,
        other => other,
    };

    if mode != InventorySideMode::None && usage <= recover {
        return InventorySideMode::None;
    }

    if mode == InventorySideMode::None && usage >= inputs.trigger {
        return if inputs.inventory_notional > 0.0 {
            InventorySideMode::OnlySell
        } else {
            InventorySideMode::OnlyBuy
        };
    }

    mode
}
