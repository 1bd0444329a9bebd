//! Price bar with pre-attached indicator values.

use chrono::NaiveDateTime;

/// One OHLCV bar. Indicator values are computed upstream; `None` marks a
/// gap (warm-up period or missing data).
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Bounded momentum oscillator, e.g. RSI.
    pub oscillator: Option<f64>,
    /// Volatility measure in price units, e.g. ATR.
    pub volatility: Option<f64>,
}
