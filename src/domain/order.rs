//! Pending limit orders and their state machine.
//!
//! `PENDING_LIMIT -> FILLED | EXPIRED | INVALIDATED`. On each bar after
//! placement the fill condition is checked first, then invalidation, then
//! expiry.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::bar::Bar;
use super::signal::{Direction, Signal};
use super::strategy::EntryPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    PendingLimit,
    Filled,
    Expired,
    Invalidated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub signal: Signal,
    pub limit_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub stop_distance_pct: f64,
    /// Bar index of the signal bar.
    pub placed_at: usize,
    /// `placed_at + max_wait_bars`.
    pub expiry: usize,
    pub invalidation_level: Option<f64>,
}

impl PendingOrder {
    pub fn new(signal: Signal, plan: &EntryPlan, placed_at: usize, max_wait_bars: usize) -> Self {
        PendingOrder {
            signal,
            limit_price: plan.entry_price,
            stop_loss: plan.stop_loss,
            take_profit: plan.take_profit,
            stop_distance_pct: plan.stop_distance_pct,
            placed_at,
            expiry: placed_at + max_wait_bars,
            invalidation_level: plan.invalidation_level,
        }
    }

    pub fn direction(&self) -> Direction {
        self.signal.direction
    }

    /// The levels this order was placed with.
    pub fn plan(&self) -> EntryPlan {
        EntryPlan {
            entry_price: self.limit_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            stop_distance_pct: self.stop_distance_pct,
            invalidation_level: self.invalidation_level,
        }
    }

    fn touches_limit(&self, bar: &Bar) -> bool {
        match self.direction() {
            Direction::Long => bar.low <= self.limit_price,
            Direction::Short => bar.high >= self.limit_price,
        }
    }

    fn ran_past_invalidation(&self, bar: &Bar) -> bool {
        match (self.invalidation_level, self.direction()) {
            (Some(level), Direction::Long) => bar.high >= level,
            (Some(level), Direction::Short) => bar.low <= level,
            (None, _) => false,
        }
    }

    /// Evaluates the order against the bar at `index`.
    pub fn step(&self, bar: &Bar, index: usize) -> OrderState {
        if self.touches_limit(bar) {
            OrderState::Filled
        } else if self.ran_past_invalidation(bar) {
            OrderState::Invalidated
        } else if index > self.expiry {
            OrderState::Expired
        } else {
            OrderState::PendingLimit
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("a pending order for {strategy}/{asset} is already outstanding")]
pub struct PlaceRejected {
    pub strategy: String,
    pub asset: String,
}

/// Holds at most one pending order for one (strategy, asset) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderSlot {
    pending: Option<PendingOrder>,
}

impl OrderSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingOrder> {
        self.pending.as_ref()
    }

    /// Places `order` unless one is already outstanding, in which case the
    /// new order is dropped and the existing one is left untouched.
    pub fn place(&mut self, order: PendingOrder) -> Result<(), PlaceRejected> {
        if self.pending.is_some() {
            return Err(PlaceRejected {
                strategy: order.signal.strategy,
                asset: order.signal.asset,
            });
        }
        self.pending = Some(order);
        Ok(())
    }

    /// Advances the outstanding order by one bar. Terminal states remove the
    /// order from the slot and hand it back.
    pub fn step(&mut self, bar: &Bar, index: usize) -> Option<(OrderState, PendingOrder)> {
        let state = self.pending.as_ref()?.step(bar, index);
        match state {
            OrderState::PendingLimit => None,
            terminal => self.pending.take().map(|order| (terminal, order)),
        }
    }

    /// Removes the outstanding order without resolving it.
    pub fn cancel(&mut self) -> Option<PendingOrder> {
        self.pending.take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OrderOutcome {
    Filled,
    Expired,
    Invalidated,
    /// Still pending when the replay ended or halted.
    Cancelled,
    /// Filled, but the ledger refused the capital.
    SkippedNoCapital,
}

/// Log entry written once per placed limit order when it leaves the book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRecord {
    pub asset: String,
    pub strategy: String,
    pub direction: Direction,
    pub signal_time: NaiveDateTime,
    pub resolved_time: NaiveDateTime,
    pub limit_price: f64,
    pub bars_waited: usize,
    pub outcome: OrderOutcome,
}

impl OrderRecord {
    pub fn new(
        order: &PendingOrder,
        resolved_time: NaiveDateTime,
        resolved_index: usize,
        outcome: OrderOutcome,
    ) -> Self {
        OrderRecord {
            asset: order.signal.asset.clone(),
            strategy: order.signal.strategy.clone(),
            direction: order.direction(),
            signal_time: order.signal.timestamp,
            resolved_time,
            limit_price: order.limit_price,
            bars_waited: resolved_index.saturating_sub(order.placed_at),
            outcome,
        }
    }
}
