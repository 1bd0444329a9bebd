//! Domain error types.

/// Top-level error type for replaytrader.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("no data for {asset}")]
    NoData { asset: String },

    #[error("bars for {asset} are out of order at index {index}")]
    UnorderedBars { asset: String, index: usize },

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReplayError {
    pub fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        ReplayError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing(section: &str, key: &str) -> Self {
        ReplayError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<&ReplayError> for std::process::ExitCode {
    fn from(err: &ReplayError) -> Self {
        let code: u8 = match err {
            ReplayError::Io(_) => 1,
            ReplayError::ConfigParse { .. }
            | ReplayError::ConfigMissing { .. }
            | ReplayError::ConfigInvalid { .. } => 2,
            ReplayError::Data { .. } => 3,
            ReplayError::NoData { .. } | ReplayError::UnorderedBars { .. } => 5,
            ReplayError::Report { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_invalid_message_names_section_and_key() {
        let err = ReplayError::invalid("backtest", "risk_pct", "must be positive");
        assert_eq!(
            err.to_string(),
            "invalid config value [backtest] risk_pct: must be positive"
        );
    }

    #[test]
    fn config_missing_message() {
        let err = ReplayError::missing("strategy.rsi", "low_threshold");
        assert_eq!(
            err.to_string(),
            "missing config key [strategy.rsi] low_threshold"
        );
    }

    #[test]
    fn unordered_bars_message() {
        let err = ReplayError::UnorderedBars {
            asset: "BTCUSDT".into(),
            index: 3,
        };
        assert_eq!(err.to_string(), "bars for BTCUSDT are out of order at index 3");
    }
}
