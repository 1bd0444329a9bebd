//! Threshold-crossing signal detection.
//!
//! Detection is a pure function of two consecutive bars of the same asset.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

use super::bar::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Oscillator bounds. A long fires on an upward cross of `low`, a short on
/// a downward cross of `high`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub timestamp: NaiveDateTime,
    pub asset: String,
    pub strategy: String,
    pub direction: Direction,
    pub reference_price: f64,
    pub reference_volatility: Option<f64>,
}

/// Outcome of looking at one bar pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detection {
    Signal(Direction),
    Nothing,
    /// The oscillator is undefined on one of the two bars.
    DataGap,
}

/// prev < low <= curr is LONG, prev > high >= curr is SHORT.
pub fn detect_crossing(prev: &Bar, curr: &Bar, thresholds: &Thresholds) -> Detection {
    let (Some(p), Some(c)) = (prev.oscillator, curr.oscillator) else {
        return Detection::DataGap;
    };
    if !p.is_finite() || !c.is_finite() {
        return Detection::DataGap;
    }

    if p < thresholds.low && c >= thresholds.low {
        Detection::Signal(Direction::Long)
    } else if p > thresholds.high && c <= thresholds.high {
        Detection::Signal(Direction::Short)
    } else {
        Detection::Nothing
    }
}

impl Signal {
    /// Captures the signal bar's close and volatility as references.
    pub fn from_bar(asset: &str, strategy: &str, direction: Direction, bar: &Bar) -> Self {
        Signal {
            timestamp: bar.timestamp,
            asset: asset.to_string(),
            strategy: strategy.to_string(),
            direction,
            reference_price: bar.close,
            reference_volatility: bar.volatility,
        }
    }
}
