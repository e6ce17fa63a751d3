//! Monitoring aggregator: summary metrics, bounded series, session totals
//! (SPEC_FULL.md §4.9).
//!
//! Grounded on `original_source/backend/app/services/monitoring.py`
//! (`MonitoringService`, `_percentile`, `_open_order_ages`, rolling
//! 1-minute windows) and `schemas.py::MetricsSummary`'s field list.

use crate::types::TradeSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const DEFAULT_MAX_POINTS: usize = 2_000;
const ROLLING_WINDOW_SEC: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub timestamp: DateTime<Utc>,
    pub mid_price: f64,
    pub spread_bps: f64,
    pub distance_bid_bps: f64,
    pub distance_ask_bps: f64,
    pub sigma: f64,
    pub sigma_zscore: f64,
    pub inventory_base: f64,
    pub inventory_notional: f64,
    pub equity: f64,
    pub pnl: f64,
    pub pnl_total: f64,
    pub pnl_daily: f64,
    pub drawdown_pct: f64,
    pub quote_size_base: f64,
    pub quote_size_notional: f64,
    pub run_duration_sec: f64,
    pub total_trade_count: u64,
    pub total_volume: f64,
    pub total_fee: f64,
    pub maker_fill_count_1m: u64,
    pub cancel_count_1m: u64,
    pub fill_to_cancel_ratio: f64,
    pub time_in_book_p50_sec: f64,
    pub time_in_book_p90_sec: f64,
    pub open_order_age_buy_sec: Option<f64>,
    pub open_order_age_sell_sec: Option<f64>,
    pub requote_reason: Option<String>,
    pub mode: String,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy)]
struct TimestampedEvent {
    at: DateTime<Utc>,
}

pub struct MonitoringAggregator {
    max_points: usize,
    series: VecDeque<MetricsSummary>,
    fills: VecDeque<TimestampedEvent>,
    cancels: VecDeque<TimestampedEvent>,
    total_trade_count: u64,
    total_volume: f64,
    total_fee: f64,
    last_trade_at: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
    initial_equity: Option<f64>,
    day_start_equity: Option<f64>,
}

impl MonitoringAggregator {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            max_points: DEFAULT_MAX_POINTS,
            series: VecDeque::new(),
            fills: VecDeque::new(),
            cancels: VecDeque::new(),
            total_trade_count: 0,
            total_volume: 0.0,
            total_fee: 0.0,
            last_trade_at: None,
            started_at,
            initial_equity: None,
            day_start_equity: None,
        }
    }

    pub fn record_cancel(&mut self, at: DateTime<Utc>) {
        self.cancels.push_back(TimestampedEvent { at });
        self.trim_rolling(at);
    }

    pub fn record_fill(&mut self, at: DateTime<Utc>, volume: f64, fee: f64) {
        self.fills.push_back(TimestampedEvent { at });
        self.total_trade_count += 1;
        self.total_volume += volume;
        self.total_fee += fee;
        self.trim_rolling(at);
    }

    /// Folds in trades the adapter reports as newly seen since the last
    /// call, keyed by `created_at` ordering (the adapter returns trades in
    /// chronological order). Avoids double-counting trades that are still
    /// within the adapter's `fetch_recent_trades` window on a later tick.
    pub fn record_new_trades(&mut self, trades: &[TradeSnapshot]) {
        for trade in trades {
            if self.last_trade_at.map_or(true, |last| trade.created_at > last) {
                self.record_fill(trade.created_at, trade.size, trade.fee);
                self.last_trade_at = Some(trade.created_at);
            }
        }
    }

    fn trim_rolling(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(ROLLING_WINDOW_SEC);
        while self.fills.front().is_some_and(|e| e.at < cutoff) {
            self.fills.pop_front();
        }
        while self.cancels.front().is_some_and(|e| e.at < cutoff) {
            self.cancels.pop_front();
        }
    }

    /// Ceil-based rank percentile over the sorted sample, matching the
    /// original's `_percentile`.
    fn percentile(sorted: &[f64], pct: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
        let idx = rank.clamp(1, sorted.len()) - 1;
        sorted[idx]
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_tick(
        &mut self,
        now: DateTime<Utc>,
        mid_price: f64,
        bid_price: f64,
        ask_price: f64,
        spread_bps: f64,
        sigma: f64,
        sigma_zscore: f64,
        inventory_base: f64,
        inventory_notional: f64,
        equity: f64,
        drawdown_pct: f64,
        quote_size_base: f64,
        quote_size_notional: f64,
        open_order_ages_sec: &[f64],
        open_order_age_buy_sec: Option<f64>,
        open_order_age_sell_sec: Option<f64>,
        requote_reason: Option<String>,
        mode: String,
        consecutive_failures: u32,
    ) -> MetricsSummary {
        if self.initial_equity.is_none() {
            self.initial_equity = Some(equity);
        }
        if self.day_start_equity.is_none() {
            self.day_start_equity = Some(equity);
        }
        let initial_equity = self.initial_equity.unwrap_or(equity);
        let day_start_equity = self.day_start_equity.unwrap_or(equity);

        let mut sorted_ages: Vec<f64> = open_order_ages_sec.to_vec();
        sorted_ages.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let cancel_count_1m = self.cancels.len() as u64;
        let maker_fill_count_1m = self.fills.len() as u64;
        let fill_to_cancel_ratio = maker_fill_count_1m as f64 / (cancel_count_1m.max(1) as f64);

        let summary = MetricsSummary {
            timestamp: now,
            mid_price,
            spread_bps,
            distance_bid_bps: ((mid_price - bid_price) / mid_price.max(1e-9)) * 10_000.0,
            distance_ask_bps: ((ask_price - mid_price) / mid_price.max(1e-9)) * 10_000.0,
            sigma,
            sigma_zscore,
            inventory_base,
            inventory_notional,
            equity,
            pnl: equity - initial_equity,
            pnl_total: equity - initial_equity,
            pnl_daily: equity - day_start_equity,
            drawdown_pct,
            quote_size_base,
            quote_size_notional,
            run_duration_sec: (now - self.started_at).num_milliseconds() as f64 / 1000.0,
            total_trade_count: self.total_trade_count,
            total_volume: self.total_volume,
            total_fee: self.total_fee,
            maker_fill_count_1m,
            cancel_count_1m,
            fill_to_cancel_ratio,
            time_in_book_p50_sec: Self::percentile(&sorted_ages, 50.0),
            time_in_book_p90_sec: Self::percentile(&sorted_ages, 90.0),
            open_order_age_buy_sec,
            open_order_age_sell_sec,
            requote_reason,
            mode,
            consecutive_failures,
        };

        self.series.push_back(summary.clone());
        while self.series.len() > self.max_points {
            self.series.pop_front();
        }
        summary
    }

    pub fn latest(&self) -> Option<&MetricsSummary> {
        self.series.back()
    }

    pub fn history(&self) -> impl Iterator<Item = &MetricsSummary> {
        self.series.iter()
    }
}
