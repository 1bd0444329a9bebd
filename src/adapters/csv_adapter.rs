//! CSV file data adapter.
//!
//! One file per asset, `<base_path>/<ASSET>.csv`, with the header
//! `timestamp,open,high,low,close,volume,oscillator,volatility`. Empty
//! indicator cells load as `None`.

use crate::domain::bar::Bar;
use crate::domain::config_validation::parse_timestamp;
use crate::domain::error::ReplayError;
use crate::ports::data_port::DataPort;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct BarRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    oscillator: Option<f64>,
    #[serde(default)]
    volatility: Option<f64>,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, asset: &str) -> PathBuf {
        self.base_path.join(format!("{asset}.csv"))
    }

    fn read_all(&self, asset: &str) -> Result<Vec<Bar>, ReplayError> {
        let path = self.csv_path(asset);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ReplayError::NoData {
                asset: asset.to_string(),
            },
            _ => ReplayError::Data {
                reason: format!("failed to read {}: {}", path.display(), e),
            },
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for (line, result) in rdr.deserialize::<BarRow>().enumerate() {
            let row = result.map_err(|e| ReplayError::Data {
                reason: format!("{}: CSV parse error: {}", path.display(), e),
            })?;
            let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| ReplayError::Data {
                reason: format!(
                    "{}: invalid timestamp '{}' on data row {}",
                    path.display(),
                    row.timestamp,
                    line + 1
                ),
            })?;
            bars.push(Bar {
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume.unwrap_or(0.0),
                oscillator: row.oscillator.filter(|v| v.is_finite()),
                volatility: row.volatility.filter(|v| v.is_finite()),
            });
        }

        Ok(bars)
    }
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        asset: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<Bar>, ReplayError> {
        let mut bars = self.read_all(asset)?;
        bars.retain(|b| start.is_none_or(|s| b.timestamp >= s) && end.is_none_or(|e| b.timestamp <= e));
        Ok(bars)
    }

    fn list_assets(&self) -> Result<Vec<String>, ReplayError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| ReplayError::Data {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut assets = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ReplayError::Data {
                reason: format!("directory entry error: {}", e),
            })?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(asset) = name_str.strip_suffix(".csv") {
                assets.push(asset.to_string());
            }
        }

        assets.sort();
        Ok(assets)
    }

    fn get_data_range(
        &self,
        asset: &str,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, ReplayError> {
        let bars = match self.read_all(asset) {
            Ok(bars) => bars,
            Err(ReplayError::NoData { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp, bars.len())),
            _ => None,
        })
    }
}
