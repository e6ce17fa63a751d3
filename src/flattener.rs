//! Shutdown flattener: retry-driven taker close with dust handling
//! (spec.md §4.8).
//!
//! Grounded on `original_source/backend/app/exchange/mock_grvt.py` (dust
//! simulation) and `base.py` (`flatten_position_taker` contract); retry
//! backoff idiom from teacher's `execution.rs::flush_orphaned_positions`.

use crate::events::{AlertLevel, AlertSink, DedupeAlertService, Event, EventBus};
use crate::exchange::{ExchangeAdapter, OrderError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlattenOutcome {
    Done { dust: bool, min_close_size: Option<f64> },
}

pub struct FlattenerConfig {
    pub close_position_epsilon_base: f64,
    pub close_retry_base_delay_sec: f64,
    pub close_retry_max_delay_sec: f64,
}

/// Runs the flattener to completion: cancel-all (log-and-swallow), then
/// loop fetch-position / attempt-flatten until dust or the position is
/// within epsilon of zero. No upper retry bound.
pub async fn flatten<A: ExchangeAdapter + ?Sized, S: AlertSink>(
    adapter: &A,
    symbol: &str,
    cfg: &FlattenerConfig,
    bus: &EventBus,
    alerts: &DedupeAlertService<S>,
) -> FlattenOutcome {
    if let Err(e) = adapter.cancel_all_orders(symbol).await {
        log::warn!("flattener: cancel_all_orders failed, continuing: {e}");
    }

    let mut delay = cfg.close_retry_base_delay_sec.max(0.01);

    loop {
        let position = match adapter.fetch_position(symbol).await {
            Ok(p) => p,
            Err(e) => {
                log::warn!("flattener: fetch_position failed, retrying: {e}");
                bus.publish(Event::CloseRetry);
                tokio::time::sleep(std::time::Duration::from_secs_f64(
                    delay.min(cfg.close_retry_max_delay_sec),
                ))
                .await;
                delay = (delay * 2.0).min(cfg.close_retry_max_delay_sec);
                continue;
            }
        };

        if position.base_position.abs() <= cfg.close_position_epsilon_base {
            bus.publish(Event::CloseDone {
                dust: false,
                min_close_size: None,
            });
            return FlattenOutcome::Done {
                dust: false,
                min_close_size: None,
            };
        }

        bus.publish(Event::CloseAttempt);
        match adapter.flatten_position_taker(symbol).await {
            Ok(()) => {
                // Loop again; next fetch_position will confirm closure or
                // report a residual dust amount.
                continue;
            }
            Err(OrderError::Dust { min_close_size }) => {
                bus.publish(Event::CloseDone {
                    dust: true,
                    min_close_size: Some(min_close_size),
                });
                return FlattenOutcome::Done {
                    dust: true,
                    min_close_size: Some(min_close_size),
                };
            }
            Err(e) => {
                log::warn!("flattener: flatten_position_taker failed, retrying: {e}");
                bus.publish(Event::CloseRetry);
                alerts.send(
                    AlertLevel::Warning,
                    "POSITION_FLATTEN_RETRY",
                    &format!("flatten retry after error: {e}"),
                    None,
                    60.0,
                );
                tokio::time::sleep(std::time::Duration::from_secs_f64(
                    delay.min(cfg.close_retry_max_delay_sec),
                ))
                .await;
                delay = (delay * 2.0).min(cfg.close_retry_max_delay_sec);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LoggingAlertSink;
    use crate::exchange::SimExchangeAdapter;

    fn cfg() -> FlattenerConfig {
        FlattenerConfig {
            close_position_epsilon_base: 0.0001,
            close_retry_base_delay_sec: 0.01,
            close_retry_max_delay_sec: 0.05,
        }
    }

    #[tokio::test]
    async fn test_flatten_no_position_returns_done_immediately() {
        let adapter = SimExchangeAdapter::new(100.0, 1000.0);
        let bus = EventBus::new();
        let alerts = DedupeAlertService::new(LoggingAlertSink);
        let outcome = flatten(&adapter, "BTC_Perp", &cfg(), &bus, &alerts).await;
        assert_eq!(
            outcome,
            FlattenOutcome::Done {
                dust: false,
                min_close_size: None
            }
        );
    }

    #[tokio::test]
    async fn test_s7_flatten_dust_after_one_attempt() {
        let adapter = SimExchangeAdapter::new(100.0, 1000.0).with_position(0.4);
        let bus = EventBus::new();
        let alerts = DedupeAlertService::new(LoggingAlertSink);
        let outcome = flatten(&adapter, "BTC_Perp", &cfg(), &bus, &alerts).await;
        assert_eq!(
            outcome,
            FlattenOutcome::Done {
                dust: true,
                min_close_size: Some(1.0)
            }
        );
    }
}
