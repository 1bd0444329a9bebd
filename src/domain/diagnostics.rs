//! Counters for conditions that skip work without stopping the replay.

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub bars_processed: usize,
    pub data_gaps: usize,
    pub signals_detected: usize,
    pub signals_filtered_side: usize,
    pub signals_dropped_pending: usize,
    pub signals_dropped_in_position: usize,
    pub rejected_stop_distance: usize,
    pub rejected_missing_volatility: usize,
    pub orders_placed: usize,
    pub orders_filled: usize,
    pub orders_expired: usize,
    pub orders_invalidated: usize,
    pub orders_cancelled: usize,
    pub skipped_no_capital: usize,
    pub positions_opened: usize,
    pub positions_closed: usize,
    pub open_positions_at_end: usize,
}

impl Diagnostics {
    /// Every signal is accounted for exactly once.
    pub fn signals_accounted(&self) -> usize {
        self.signals_filtered_side
            + self.signals_dropped_pending
            + self.signals_dropped_in_position
            + self.rejected_stop_distance
            + self.rejected_missing_volatility
            + self.orders_placed
            + self.market_entries()
    }

    /// Signals that went straight to a market fill attempt.
    pub fn market_entries(&self) -> usize {
        (self.positions_opened + self.skipped_no_capital).saturating_sub(self.orders_filled)
    }

    /// Non-zero counters as `(name, value)` pairs, for console output.
    pub fn nonzero(&self) -> Vec<(&'static str, usize)> {
        [
            ("data_gaps", self.data_gaps),
            ("signals_filtered_side", self.signals_filtered_side),
            ("signals_dropped_pending", self.signals_dropped_pending),
            ("signals_dropped_in_position", self.signals_dropped_in_position),
            ("rejected_stop_distance", self.rejected_stop_distance),
            ("rejected_missing_volatility", self.rejected_missing_volatility),
            ("orders_expired", self.orders_expired),
            ("orders_invalidated", self.orders_invalidated),
            ("orders_cancelled", self.orders_cancelled),
            ("skipped_no_capital", self.skipped_no_capital),
            ("open_positions_at_end", self.open_positions_at_end),
        ]
        .into_iter()
        .filter(|(_, v)| *v > 0)
        .collect()
    }
}
