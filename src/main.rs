use mm_engine::config::RuntimeConfig;
use mm_engine::events::{DedupeAlertService, EventBus, LoggingAlertSink};
use mm_engine::exchange::SimExchangeAdapter;
use mm_engine::strategy_engine::StrategyEngine;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match RuntimeConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("startup: invalid runtime config: {e}");
            std::process::exit(1);
        }
    };
    log::info!("starting engine for symbol {}", config.symbol);

    let adapter = Arc::new(SimExchangeAdapter::new(100.0, 10_000.0));
    let bus = Arc::new(EventBus::new());
    let alerts = Arc::new(DedupeAlertService::new(LoggingAlertSink));

    let engine = Arc::new(StrategyEngine::new(adapter, config, bus, alerts));
    engine.start().await;

    tokio::signal::ctrl_c().await.ok();
    log::info!("shutdown signal received, stopping engine");
    engine.stop("shutdown signal").await;
}
