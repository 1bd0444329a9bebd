#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use replaytrader::domain::asset_data::{AssetSeries, build_unified_timeline};
use replaytrader::domain::backtest::{BacktestConfig, BacktestResult, run_backtest};
pub use replaytrader::domain::bar::Bar;
use replaytrader::domain::error::ReplayError;
use replaytrader::domain::ledger::{FixedFraction, RiskBased, Sizing};
use replaytrader::domain::metrics::{Metrics, PairResult};
use replaytrader::domain::signal::Thresholds;
use replaytrader::domain::strategy::{EntryOrder, PriceOffset, Sides, Strategy, StrategyKind};
use replaytrader::ports::data_port::DataPort;
use replaytrader::ports::report_port::ReportPort;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, asset: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(asset.to_string(), bars);
        self
    }

    pub fn with_error(mut self, asset: &str, reason: &str) -> Self {
        self.errors.insert(asset.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        asset: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<Bar>, ReplayError> {
        if let Some(reason) = self.errors.get(asset) {
            return Err(ReplayError::Data {
                reason: reason.clone(),
            });
        }
        let bars = self.data.get(asset).ok_or_else(|| ReplayError::NoData {
            asset: asset.to_string(),
        })?;
        Ok(bars
            .iter()
            .filter(|b| start.is_none_or(|s| b.timestamp >= s))
            .filter(|b| end.is_none_or(|e| b.timestamp <= e))
            .cloned()
            .collect())
    }

    fn list_assets(&self) -> Result<Vec<String>, ReplayError> {
        let mut assets: Vec<String> = self.data.keys().cloned().collect();
        assets.sort();
        Ok(assets)
    }

    fn get_data_range(
        &self,
        asset: &str,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, ReplayError> {
        match self.data.get(asset) {
            Some(bars) if !bars.is_empty() => {
                let min = bars.iter().map(|b| b.timestamp).min().unwrap();
                let max = bars.iter().map(|b| b.timestamp).max().unwrap();
                Ok(Some((min, max, bars.len())))
            }
            _ => Ok(None),
        }
    }
}

/// Records every report it is asked to write.
#[derive(Default)]
pub struct MockReportPort {
    pub written: RefCell<Vec<(PathBuf, usize, f64)>>,
}

impl ReportPort for MockReportPort {
    fn write(
        &self,
        result: &BacktestResult,
        metrics: &Metrics,
        _pairs: &[PairResult],
        output_dir: &Path,
    ) -> Result<(), ReplayError> {
        self.written.borrow_mut().push((
            output_dir.to_path_buf(),
            result.trades.len(),
            metrics.final_equity,
        ));
        Ok(())
    }
}

/// Hourly timestamps from 2024-01-01 00:00.
pub fn ts(i: usize) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + chrono::Duration::hours(i as i64)
}

/// Bar at step `i` with explicit range and oscillator, volatility 1.0.
pub fn make_bar(i: usize, osc: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp: ts(i),
        open: close,
        high,
        low,
        close,
        volume: 1_000.0,
        oscillator: Some(osc),
        volatility: Some(1.0),
    }
}

/// A quiet bar around `close` that triggers nothing on its own.
pub fn flat_bar(i: usize, osc: f64, close: f64) -> Bar {
    make_bar(i, osc, close + 0.1, close - 0.1, close)
}

pub fn make_series(asset: &str, bars: Vec<Bar>) -> AssetSeries {
    AssetSeries::new(asset.to_string(), bars).unwrap()
}

pub fn mean_reversion(name: &str, entry: EntryOrder) -> Strategy {
    Strategy {
        name: name.to_string(),
        kind: StrategyKind::MeanReversion,
        sides: Sides::Both,
        thresholds: Thresholds {
            low: 30.0,
            high: 70.0,
        },
        entry,
        stop_loss: PriceOffset::Percent(2.0),
        take_profit: PriceOffset::Percent(4.0),
        invalidation: None,
        max_hold_bars: None,
        fee_pct: 0.0,
    }
}

pub fn limit(offset_pct: f64, max_wait_bars: usize) -> EntryOrder {
    EntryOrder::Limit {
        offset: PriceOffset::Percent(offset_pct),
        max_wait_bars,
    }
}

pub fn swing(name: &str, entry: EntryOrder, invalidation_pct: f64) -> Strategy {
    Strategy {
        kind: StrategyKind::Swing,
        invalidation: Some(PriceOffset::Percent(invalidation_pct)),
        ..mean_reversion(name, entry)
    }
}

pub fn fixed_config(initial_capital: f64, base_fraction: f64) -> BacktestConfig {
    BacktestConfig {
        start: None,
        end: None,
        initial_capital,
        sizing: Sizing::FixedFraction(FixedFraction { base_fraction }),
        cap_exposure: true,
        max_stop_distance_pct: 20.0,
        close_at_end: false,
        stop_after: None,
    }
}

pub fn risk_config(initial_capital: f64, risk_pct: f64, cap_exposure: bool) -> BacktestConfig {
    BacktestConfig {
        sizing: Sizing::RiskBased(RiskBased {
            risk_pct,
            max_leverage: None,
        }),
        cap_exposure,
        ..fixed_config(initial_capital, 1.0)
    }
}

pub fn replay(assets: &[AssetSeries], strategies: &[Strategy], config: &BacktestConfig) -> BacktestResult {
    let timeline = build_unified_timeline(assets);
    run_backtest(assets, &timeline, strategies, config)
}
