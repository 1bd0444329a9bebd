//! Per-asset bar series and the unified replay timeline.

use crate::domain::bar::Bar;
use crate::domain::error::ReplayError;
use chrono::NaiveDateTime;
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

#[derive(Debug, Clone)]
pub struct AssetSeries {
    pub asset: String,
    pub bars: Vec<Bar>,
    /// Bars sharing a timestamp occupy one contiguous range.
    pub timestamp_index: HashMap<NaiveDateTime, Range<usize>>,
}

impl AssetSeries {
    /// Builds the series, rejecting bars whose timestamps go backwards.
    /// Repeated timestamps are kept in input order.
    pub fn new(asset: String, bars: Vec<Bar>) -> Result<Self, ReplayError> {
        if let Some(pos) = bars
            .windows(2)
            .position(|w| w[1].timestamp < w[0].timestamp)
        {
            return Err(ReplayError::UnorderedBars {
                asset,
                index: pos + 1,
            });
        }

        let mut timestamp_index: HashMap<NaiveDateTime, Range<usize>> = HashMap::new();
        for (i, bar) in bars.iter().enumerate() {
            timestamp_index
                .entry(bar.timestamp)
                .and_modify(|range| range.end = i + 1)
                .or_insert(i..i + 1);
        }

        Ok(Self {
            asset,
            bars,
            timestamp_index,
        })
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    /// Indices of every bar stamped `timestamp`; empty if there are none.
    pub fn bar_indices(&self, timestamp: NaiveDateTime) -> Range<usize> {
        self.timestamp_index
            .get(&timestamp)
            .cloned()
            .unwrap_or(0..0)
    }

    pub fn last_index(&self) -> Option<usize> {
        self.bars.len().checked_sub(1)
    }
}

pub fn build_unified_timeline(assets: &[AssetSeries]) -> Vec<NaiveDateTime> {
    let unique: BTreeSet<NaiveDateTime> = assets
        .iter()
        .flat_map(|a| a.bars.iter().map(|bar| bar.timestamp))
        .collect();
    unique.into_iter().collect()
}
