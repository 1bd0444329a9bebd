//! CSV report adapter implementing ReportPort.
//!
//! Writes one file per table into the output directory:
//! `trades.csv`, `equity.csv`, `orders.csv`, `pairs.csv`, `diagnostics.csv`
//! and a two-column `summary.csv`.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::ReplayError;
use crate::domain::metrics::{Metrics, PairResult};
use crate::ports::report_port::ReportPort;

pub const TRADES_FILE: &str = "trades.csv";
pub const EQUITY_FILE: &str = "equity.csv";
pub const ORDERS_FILE: &str = "orders.csv";
pub const PAIRS_FILE: &str = "pairs.csv";
pub const DIAGNOSTICS_FILE: &str = "diagnostics.csv";
pub const SUMMARY_FILE: &str = "summary.csv";

#[derive(Debug, Default)]
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn report_err(path: &Path, e: impl std::fmt::Display) -> ReplayError {
    ReplayError::Report {
        reason: format!("{}: {}", path.display(), e),
    }
}

/// Serializes `rows` with a header derived from `T`. An empty table still
/// gets its header when `header` is given.
fn write_rows<T: Serialize>(path: &Path, rows: &[T], header: &[&str]) -> Result<(), ReplayError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!rows.is_empty())
        .from_path(path)
        .map_err(|e| report_err(path, e))?;
    if rows.is_empty() {
        wtr.write_record(header).map_err(|e| report_err(path, e))?;
    }
    for row in rows {
        wtr.serialize(row).map_err(|e| report_err(path, e))?;
    }
    wtr.flush().map_err(|e| report_err(path, e))
}

fn summary_rows(result: &BacktestResult, metrics: &Metrics) -> Vec<(&'static str, String)> {
    let mut rows = vec![
        ("initial_capital", format!("{:.2}", result.initial_capital)),
        ("final_equity", format!("{:.2}", metrics.final_equity)),
        ("total_return_pct", format!("{:.4}", metrics.total_return_pct)),
        ("max_drawdown_pct", format!("{:.4}", metrics.max_drawdown)),
        ("return_dd_ratio", format!("{:.4}", metrics.return_dd_ratio)),
        ("win_rate_pct", format!("{:.2}", metrics.win_rate)),
        ("profit_factor", format!("{:.4}", metrics.profit_factor)),
        ("trade_count", metrics.trade_count.to_string()),
        ("trades_won", metrics.trades_won.to_string()),
        ("trades_lost", metrics.trades_lost.to_string()),
        ("avg_win", format!("{:.2}", metrics.avg_win)),
        ("avg_loss", format!("{:.2}", metrics.avg_loss)),
        ("largest_win", format!("{:.2}", metrics.largest_win)),
        ("largest_loss", format!("{:.2}", metrics.largest_loss)),
        ("avg_bars_held", format!("{:.2}", metrics.avg_bars_held)),
        ("steps_processed", result.steps_processed.to_string()),
        ("liquidated", metrics.liquidated.to_string()),
    ];
    if let Some(liq) = &result.liquidation {
        rows.push(("liquidation_trade_index", liq.trade_index.to_string()));
        rows.push(("liquidation_time", liq.timestamp.to_string()));
    }
    rows
}

impl ReportPort for CsvReportAdapter {
    fn write(
        &self,
        result: &BacktestResult,
        metrics: &Metrics,
        pairs: &[PairResult],
        output_dir: &Path,
    ) -> Result<(), ReplayError> {
        fs::create_dir_all(output_dir).map_err(|e| report_err(output_dir, e))?;

        write_rows(
            &output_dir.join(TRADES_FILE),
            &result.trades,
            &[
                "asset",
                "strategy",
                "direction",
                "entry_time",
                "exit_time",
                "entry_price",
                "exit_price",
                "exit_reason",
                "pnl_pct",
                "pnl_usd",
                "notional",
                "bars_held",
            ],
        )?;
        write_rows(
            &output_dir.join(EQUITY_FILE),
            result.equity_curve.points(),
            &["timestamp", "equity", "peak", "drawdown_pct"],
        )?;
        write_rows(
            &output_dir.join(ORDERS_FILE),
            &result.orders,
            &[
                "asset",
                "strategy",
                "direction",
                "signal_time",
                "resolved_time",
                "limit_price",
                "bars_waited",
                "outcome",
            ],
        )?;
        write_rows(
            &output_dir.join(PAIRS_FILE),
            pairs,
            &["strategy", "asset", "trade_count", "wins", "win_rate", "total_pnl_usd"],
        )?;
        write_rows(
            &output_dir.join(DIAGNOSTICS_FILE),
            std::slice::from_ref(&result.diagnostics),
            &[],
        )?;

        let path = output_dir.join(SUMMARY_FILE);
        let mut wtr = csv::Writer::from_path(&path).map_err(|e| report_err(&path, e))?;
        wtr.write_record(["metric", "value"])
            .map_err(|e| report_err(&path, e))?;
        for (key, value) in summary_rows(result, metrics) {
            wtr.write_record([key, value.as_str()])
                .map_err(|e| report_err(&path, e))?;
        }
        wtr.flush().map_err(|e| report_err(&path, e))
    }
}
