//! Report generation port trait.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::ReplayError;
use crate::domain::metrics::{Metrics, PairResult};
use std::path::Path;

/// Port for writing backtest reports.
pub trait ReportPort {
    fn write(
        &self,
        result: &BacktestResult,
        metrics: &Metrics,
        pairs: &[PairResult],
        output_dir: &Path,
    ) -> Result<(), ReplayError>;
}
