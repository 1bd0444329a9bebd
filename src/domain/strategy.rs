//! Strategy configuration and the per-variant trading capability.
//!
//! Every strategy runs through the same replay engine. What differs between
//! variants is captured by [`StrategyLogic`]: how a signal is detected, where
//! the protective levels sit, and which exit rules apply in which order.

use std::fmt;

use super::bar::Bar;
use super::position::{ExitRule, stop_distance_pct};
use super::signal::{Detection, Direction, Signal, Thresholds, detect_crossing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Fades oscillator extremes and also exits when the opposite extreme
    /// is crossed.
    MeanReversion,
    /// Swing entries: the pending order is abandoned if price runs away
    /// past the invalidation level before filling.
    Swing,
}

impl StrategyKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "mean_reversion" | "meanreversion" => Some(StrategyKind::MeanReversion),
            "swing" => Some(StrategyKind::Swing),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::MeanReversion => write!(f, "mean_reversion"),
            StrategyKind::Swing => write!(f, "swing"),
        }
    }
}

/// A price distance, either a percentage of the reference price or a
/// multiple of the bar's volatility value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceOffset {
    Percent(f64),
    VolatilityMultiple(f64),
}

impl PriceOffset {
    /// Absolute distance in price units. `None` when a volatility multiple
    /// is requested but the volatility is undefined.
    pub fn distance(&self, price: f64, volatility: Option<f64>) -> Option<f64> {
        match *self {
            PriceOffset::Percent(pct) => Some(price * pct / 100.0),
            PriceOffset::VolatilityMultiple(mult) => volatility
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v * mult),
        }
    }
}

impl fmt::Display for PriceOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceOffset::Percent(p) => write!(f, "{p}%"),
            PriceOffset::VolatilityMultiple(m) => write!(f, "{m}x volatility"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryOrder {
    /// Fill at the signal bar's close.
    Market,
    /// Rest a limit order `offset` away from the reference price.
    Limit {
        offset: PriceOffset,
        max_wait_bars: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sides {
    Both,
    LongOnly,
    ShortOnly,
}

impl Sides {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "both" => Some(Sides::Both),
            "long" => Some(Sides::LongOnly),
            "short" => Some(Sides::ShortOnly),
            _ => None,
        }
    }

    pub fn allows(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Sides::Both, _) | (Sides::LongOnly, Direction::Long) | (Sides::ShortOnly, Direction::Short)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Strategy {
    pub name: String,
    pub kind: StrategyKind,
    pub sides: Sides,
    pub thresholds: Thresholds,
    pub entry: EntryOrder,
    pub stop_loss: PriceOffset,
    pub take_profit: PriceOffset,
    pub invalidation: Option<PriceOffset>,
    pub max_hold_bars: Option<usize>,
    /// Round-trip fee as a percentage of notional.
    pub fee_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopTake {
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// Everything needed to place an order for a signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryPlan {
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub stop_distance_pct: f64,
    pub invalidation_level: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum PlanRejection {
    #[error("volatility undefined on the signal bar")]
    MissingVolatility,
    #[error("stop distance {pct:.4}% outside (0, {ceiling}%)")]
    InvalidStopDistance { pct: f64, ceiling: f64 },
}

pub trait StrategyLogic {
    fn detect_signal(&self, prev: &Bar, curr: &Bar) -> Detection;

    fn compute_stop_take(
        &self,
        entry_price: f64,
        direction: Direction,
        volatility: Option<f64>,
    ) -> Option<StopTake>;

    /// Exit rules in evaluation order; the first one that triggers wins.
    fn exit_priority(&self) -> &'static [ExitRule];
}

const MEAN_REVERSION_EXITS: [ExitRule; 4] = [
    ExitRule::StopLoss,
    ExitRule::TakeProfit,
    ExitRule::OppositeSignal,
    ExitRule::TimeLimit,
];

const SWING_EXITS: [ExitRule; 3] = [ExitRule::StopLoss, ExitRule::TakeProfit, ExitRule::TimeLimit];

impl StrategyLogic for Strategy {
    fn detect_signal(&self, prev: &Bar, curr: &Bar) -> Detection {
        detect_crossing(prev, curr, &self.thresholds)
    }

    fn compute_stop_take(
        &self,
        entry_price: f64,
        direction: Direction,
        volatility: Option<f64>,
    ) -> Option<StopTake> {
        let sl = self.stop_loss.distance(entry_price, volatility)?;
        let tp = self.take_profit.distance(entry_price, volatility)?;
        let sign = direction.sign();
        Some(StopTake {
            stop_loss: entry_price - sign * sl,
            take_profit: entry_price + sign * tp,
        })
    }

    fn exit_priority(&self) -> &'static [ExitRule] {
        match self.kind {
            StrategyKind::MeanReversion => &MEAN_REVERSION_EXITS,
            StrategyKind::Swing => &SWING_EXITS,
        }
    }
}

impl Strategy {
    pub fn is_market(&self) -> bool {
        matches!(self.entry, EntryOrder::Market)
    }

    /// Resolves entry, stop, take and invalidation levels for a signal and
    /// checks the stop distance against `max_stop_distance_pct`.
    pub fn plan_entry(
        &self,
        signal: &Signal,
        max_stop_distance_pct: f64,
    ) -> Result<EntryPlan, PlanRejection> {
        let reference = signal.reference_price;
        let volatility = signal.reference_volatility;
        let sign = signal.direction.sign();

        let entry_price = match self.entry {
            EntryOrder::Market => reference,
            EntryOrder::Limit { offset, .. } => {
                let distance = offset
                    .distance(reference, volatility)
                    .ok_or(PlanRejection::MissingVolatility)?;
                reference - sign * distance
            }
        };

        let levels = self
            .compute_stop_take(entry_price, signal.direction, volatility)
            .ok_or(PlanRejection::MissingVolatility)?;

        let invalidation_level = match (self.kind, self.invalidation) {
            (StrategyKind::Swing, Some(offset)) => {
                let distance = offset
                    .distance(reference, volatility)
                    .ok_or(PlanRejection::MissingVolatility)?;
                Some(reference + sign * distance)
            }
            _ => None,
        };

        let pct = stop_distance_pct(entry_price, levels.stop_loss);
        if !(pct.is_finite() && pct > 0.0 && pct < max_stop_distance_pct) {
            return Err(PlanRejection::InvalidStopDistance {
                pct,
                ceiling: max_stop_distance_pct,
            });
        }

        Ok(EntryPlan {
            entry_price,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
            stop_distance_pct: pct,
            invalidation_level,
        })
    }
}
