//! Data access port trait.

use crate::domain::bar::Bar;
use crate::domain::error::ReplayError;
use chrono::NaiveDateTime;

pub trait DataPort {
    /// Bars for `asset` within the optional inclusive window, sorted by
    /// timestamp.
    fn fetch_bars(
        &self,
        asset: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<Bar>, ReplayError>;

    fn list_assets(&self) -> Result<Vec<String>, ReplayError>;

    /// First timestamp, last timestamp and bar count, or `None` if the asset
    /// has no bars.
    fn get_data_range(
        &self,
        asset: &str,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, ReplayError>;
}
