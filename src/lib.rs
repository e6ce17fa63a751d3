pub mod adaptive;
pub mod as_model;
pub mod config;
pub mod config_mapping;
pub mod decimal;
pub mod events;
pub mod exchange;
pub mod flattener;
pub mod hysteresis;
pub mod monitoring;
pub mod reconciler;
pub mod risk_guard;
pub mod strategy_engine;
pub mod types;
