//! Open positions, exit evaluation and closed-trade records.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

use super::bar::Bar;
use super::ledger::PositionId;
use super::signal::Direction;

/// Exit checks a strategy can enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitRule {
    StopLoss,
    TakeProfit,
    OppositeSignal,
    TimeLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExitReason {
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(rename = "TP")]
    TakeProfit,
    #[serde(rename = "OPPOSITE")]
    OppositeSignal,
    #[serde(rename = "TIME")]
    TimeExit,
    #[serde(rename = "END")]
    EndOfData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "SL",
            ExitReason::TakeProfit => "TP",
            ExitReason::OppositeSignal => "OPPOSITE",
            ExitReason::TimeExit => "TIME",
            ExitReason::EndOfData => "END",
        };
        write!(f, "{s}")
    }
}

/// |entry - stop| / entry * 100. Non-finite when entry is not positive.
pub fn stop_distance_pct(entry_price: f64, stop_loss: f64) -> f64 {
    if entry_price <= 0.0 {
        return f64::NAN;
    }
    (entry_price - stop_loss).abs() / entry_price * 100.0
}

/// Directional price return in percent, before fees.
pub fn gross_pnl_pct(direction: Direction, entry_price: f64, exit_price: f64) -> f64 {
    match direction {
        Direction::Long => (exit_price - entry_price) / entry_price * 100.0,
        Direction::Short => (entry_price - exit_price) / entry_price * 100.0,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: PositionId,
    pub asset: String,
    pub strategy: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub notional: f64,
    /// Bar index within the asset series of the fill bar.
    pub opened_at: usize,
    pub entry_time: NaiveDateTime,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.direction == Direction::Long
    }

    pub fn stop_breached(&self, bar: &Bar) -> bool {
        if self.is_long() {
            bar.low <= self.stop_loss
        } else {
            bar.high >= self.stop_loss
        }
    }

    pub fn target_reached(&self, bar: &Bar) -> bool {
        if self.is_long() {
            bar.high >= self.take_profit
        } else {
            bar.low <= self.take_profit
        }
    }

    /// Walks `rules` in order and returns the first exit that triggers on
    /// `bar`, with its fill price.
    ///
    /// `opposite_signal` is whether the strategy's detector fired in the
    /// opposite direction on this bar.
    pub fn check_exit(
        &self,
        bar: &Bar,
        index: usize,
        rules: &[ExitRule],
        opposite_signal: bool,
        max_hold_bars: Option<usize>,
    ) -> Option<(ExitReason, f64)> {
        rules.iter().find_map(|rule| match rule {
            ExitRule::StopLoss if self.stop_breached(bar) => {
                Some((ExitReason::StopLoss, self.stop_loss))
            }
            ExitRule::TakeProfit if self.target_reached(bar) => {
                Some((ExitReason::TakeProfit, self.take_profit))
            }
            ExitRule::OppositeSignal if opposite_signal => {
                Some((ExitReason::OppositeSignal, bar.close))
            }
            ExitRule::TimeLimit => match max_hold_bars {
                Some(limit) if index.saturating_sub(self.opened_at) >= limit => {
                    Some((ExitReason::TimeExit, bar.close))
                }
                _ => None,
            },
            _ => None,
        })
    }

    /// Net return in percent after subtracting the round-trip fee.
    pub fn net_pnl_pct(&self, exit_price: f64, fee_pct: f64) -> f64 {
        gross_pnl_pct(self.direction, self.entry_price, exit_price) - fee_pct
    }

    pub fn into_trade(
        self,
        exit_time: NaiveDateTime,
        exit_index: usize,
        exit_price: f64,
        exit_reason: ExitReason,
        pnl_pct: f64,
        pnl_usd: f64,
    ) -> Trade {
        Trade {
            asset: self.asset,
            strategy: self.strategy,
            direction: self.direction,
            entry_time: self.entry_time,
            exit_time,
            entry_price: self.entry_price,
            exit_price,
            exit_reason,
            pnl_pct,
            pnl_usd,
            notional: self.notional,
            bars_held: exit_index.saturating_sub(self.opened_at),
        }
    }
}

/// Immutable record of a closed position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub asset: String,
    pub strategy: String,
    pub direction: Direction,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub entry_price: f64,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub pnl_pct: f64,
    pub pnl_usd: f64,
    pub notional: f64,
    pub bars_held: usize,
}
