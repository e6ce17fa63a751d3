//! Shared entity types (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid: f64,
    pub depth_score: f64,
    pub trade_intensity: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountFunds {
    pub equity: f64,
    pub free: f64,
    pub used: f64,
    /// Enumerates which venue fields were used to derive `equity` when it
    /// isn't reported directly (spec.md §3).
    pub source: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub base_position: f64,
    pub notional: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub order_id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSnapshot {
    pub trade_id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    /// Signed: negative = rebate, positive = cost.
    pub fee: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InstrumentConstraints {
    pub min_size: f64,
    pub size_step: f64,
    pub tick_size: f64,
    pub base_decimals: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineMode {
    Idle,
    Running,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventorySideMode {
    None,
    OnlyBuy,
    OnlySell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub mode: EngineMode,
    pub kill_reason: Option<String>,
    pub last_error: Option<String>,
    pub exchange_connected: bool,
    pub consecutive_failures: u32,
    pub initial_equity: Option<f64>,
    pub day_start_equity: Option<f64>,
    pub equity_day: Option<chrono::NaiveDate>,
    pub peak_equity: Option<f64>,
    pub inventory_side_mode: InventorySideMode,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub engine_started_at: Option<DateTime<Utc>>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            mode: EngineMode::Idle,
            kill_reason: None,
            last_error: None,
            exchange_connected: false,
            consecutive_failures: 0,
            initial_equity: None,
            day_start_equity: None,
            equity_day: None,
            peak_equity: None,
            inventory_side_mode: InventorySideMode::None,
            last_heartbeat_at: None,
            engine_started_at: None,
        }
    }
}
