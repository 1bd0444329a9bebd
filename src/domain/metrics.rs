//! Equity curve, drawdown and summary statistics.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

use super::position::Trade;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
    /// Running maximum of equity up to and including this point.
    pub peak: f64,
    /// (equity - peak) / peak * 100, always <= 0.
    pub drawdown_pct: f64,
}

/// Append-only equity curve: one initial point, then one per closed trade.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquityCurve {
    points: Vec<EquityPoint>,
}

impl EquityCurve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, timestamp: NaiveDateTime, equity: f64) -> &EquityPoint {
        let peak = match self.points.last() {
            Some(prev) => prev.peak.max(equity),
            None => equity,
        };
        let drawdown_pct = if peak > 0.0 {
            ((equity - peak) / peak * 100.0).min(0.0)
        } else {
            0.0
        };
        self.points.push(EquityPoint {
            timestamp,
            equity,
            peak,
            drawdown_pct,
        });
        &self.points[self.points.len() - 1]
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn initial_equity(&self) -> Option<f64> {
        self.points.first().map(|p| p.equity)
    }

    pub fn final_equity(&self) -> Option<f64> {
        self.points.last().map(|p| p.equity)
    }

    /// Most negative drawdown on the curve, 0 for an empty or rising curve.
    pub fn max_drawdown(&self) -> f64 {
        self.points
            .iter()
            .map(|p| p.drawdown_pct)
            .fold(0.0, f64::min)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return_pct: f64,
    pub max_drawdown: f64,
    pub return_dd_ratio: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trade_count: usize,
    pub liquidated: bool,
    pub final_equity: f64,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_bars_held: f64,
}

impl Metrics {
    pub fn compute(curve: &EquityCurve, trades: &[Trade], liquidated: bool) -> Self {
        let initial = curve.initial_equity().unwrap_or(0.0);
        let final_equity = curve.final_equity().unwrap_or(initial);

        let total_return_pct = if initial > 0.0 {
            (final_equity - initial) / initial * 100.0
        } else {
            0.0
        };

        let max_drawdown = curve.max_drawdown();
        let return_dd_ratio = if max_drawdown == 0.0 {
            0.0
        } else {
            total_return_pct / max_drawdown.abs()
        };

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_bars = 0usize;

        for trade in trades {
            let pnl = trade.pnl_usd;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            }
            total_bars += trade.bars_held;
        }

        let trade_count = trades.len();
        let win_rate = if trade_count > 0 {
            trades_won as f64 / trade_count as f64 * 100.0
        } else {
            0.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else {
            0.0
        };

        let avg_win = if trades_won > 0 {
            total_wins / trades_won as f64
        } else {
            0.0
        };
        let avg_loss = if trades_lost > 0 {
            total_losses / trades_lost as f64
        } else {
            0.0
        };
        let avg_bars_held = if trade_count > 0 {
            total_bars as f64 / trade_count as f64
        } else {
            0.0
        };

        Metrics {
            total_return_pct,
            max_drawdown,
            return_dd_ratio,
            win_rate,
            profit_factor,
            trade_count,
            liquidated,
            final_equity,
            trades_won,
            trades_lost,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_bars_held,
        }
    }
}

/// Per (strategy, asset) breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairResult {
    pub strategy: String,
    pub asset: String,
    pub trade_count: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_pnl_usd: f64,
}

impl PairResult {
    /// Sorted by strategy then asset.
    pub fn compute_per_pair(trades: &[Trade]) -> Vec<PairResult> {
        let mut groups: BTreeMap<(&str, &str), (usize, usize, f64)> = BTreeMap::new();
        for trade in trades {
            let entry = groups
                .entry((trade.strategy.as_str(), trade.asset.as_str()))
                .or_insert((0, 0, 0.0));
            entry.0 += 1;
            if trade.pnl_usd > 0.0 {
                entry.1 += 1;
            }
            entry.2 += trade.pnl_usd;
        }

        groups
            .into_iter()
            .map(|((strategy, asset), (count, wins, pnl))| PairResult {
                strategy: strategy.to_string(),
                asset: asset.to_string(),
                trade_count: count,
                wins,
                win_rate: wins as f64 / count as f64 * 100.0,
                total_pnl_usd: pnl,
            })
            .collect()
    }
}
