//! Configuration validation.
//!
//! Validates every field before a replay runs. The parsing helpers here are
//! shared with the CLI builders so a config that validates always builds.

use crate::domain::error::ReplayError;
use crate::domain::strategy::{PriceOffset, Sides, StrategyKind};
use crate::ports::config_port::ConfigPort;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;

pub const BACKTEST: &str = "backtest";

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), ReplayError> {
    validate_initial_capital(config)?;
    validate_window(config)?;
    parse_assets(config)?;
    validate_sizing(config)?;
    validate_stop_ceiling(config)?;
    Ok(())
}

/// Validates every strategy section. At least one is required.
pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), ReplayError> {
    let sections = strategy_sections(config);
    if sections.is_empty() {
        return Err(ReplayError::missing("strategy", "kind"));
    }
    let mut names = HashSet::new();
    for section in &sections {
        validate_strategy_section(config, section)?;
        let name = strategy_name(config, section);
        if !names.insert(name.clone()) {
            return Err(ReplayError::invalid(section, "name", format!("duplicate strategy name {name}")));
        }
    }
    Ok(())
}

/// `[strategy]` and `[strategy.<name>]` sections in file order.
pub fn strategy_sections(config: &dyn ConfigPort) -> Vec<String> {
    config
        .sections()
        .into_iter()
        .filter(|s| s == "strategy" || s.starts_with("strategy."))
        .collect()
}

/// `[strategy.<name>]` is named by its suffix; a plain `[strategy]` uses its
/// `name` key.
pub fn strategy_name(config: &dyn ConfigPort, section: &str) -> String {
    match section.strip_prefix("strategy.") {
        Some(suffix) if !suffix.trim().is_empty() => suffix.trim().to_string(),
        _ => config
            .get_string(section, "name")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "default".to_string()),
    }
}

pub fn validate_strategy_section(config: &dyn ConfigPort, section: &str) -> Result<(), ReplayError> {
    let kind = parse_kind(config, section)?;
    parse_sides(config, section)?;
    validate_thresholds(config, section)?;
    validate_entry(config, section)?;

    require_offset(config, section, "stop_loss")?;
    require_offset(config, section, "take_profit")?;

    let invalidation = parse_offset(config, section, "invalidation")?;
    match (kind, invalidation) {
        (StrategyKind::Swing, None) => {
            return Err(ReplayError::missing(section, "invalidation_pct"));
        }
        (StrategyKind::MeanReversion, Some(_)) => {
            return Err(ReplayError::invalid(
                section,
                "invalidation_pct",
                "invalidation only applies to swing strategies",
            ));
        }
        _ => {}
    }

    if let Some(hold) = parse_count(config, section, "max_hold_bars")? {
        if hold == 0 {
            return Err(ReplayError::invalid(section, "max_hold_bars", "max_hold_bars must be at least 1"));
        }
    }

    let fee = parse_number(config, section, "fee_pct")?.unwrap_or(0.0);
    if fee < 0.0 {
        return Err(ReplayError::invalid(section, "fee_pct", "fee_pct must be non-negative"));
    }
    Ok(())
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), ReplayError> {
    match parse_number(config, BACKTEST, "initial_capital")? {
        None => Err(ReplayError::missing(BACKTEST, "initial_capital")),
        Some(v) if v <= 0.0 => Err(ReplayError::invalid(
            BACKTEST,
            "initial_capital",
            "initial_capital must be positive",
        )),
        Some(_) => Ok(()),
    }
}

fn validate_window(config: &dyn ConfigPort) -> Result<(), ReplayError> {
    let start = parse_optional_timestamp(config, BACKTEST, "start")?;
    let end = parse_optional_timestamp(config, BACKTEST, "end")?;
    if let (Some(s), Some(e)) = (start, end) {
        if s >= e {
            return Err(ReplayError::invalid(BACKTEST, "start", "start must be before end"));
        }
    }
    Ok(())
}

fn validate_sizing(config: &dyn ConfigPort) -> Result<(), ReplayError> {
    let mode = config
        .get_string(BACKTEST, "sizing")
        .unwrap_or_else(|| "fixed_fraction".to_string());
    match mode.trim().to_lowercase().as_str() {
        "fixed_fraction" => {
            let fraction = parse_number(config, BACKTEST, "base_fraction")?
                .ok_or_else(|| ReplayError::missing(BACKTEST, "base_fraction"))?;
            if fraction <= 0.0 || fraction > 1.0 {
                return Err(ReplayError::invalid(
                    BACKTEST,
                    "base_fraction",
                    "base_fraction must be in (0, 1]",
                ));
            }
        }
        "risk_based" => {
            let risk = parse_number(config, BACKTEST, "risk_pct")?
                .ok_or_else(|| ReplayError::missing(BACKTEST, "risk_pct"))?;
            if risk <= 0.0 || risk >= 100.0 {
                return Err(ReplayError::invalid(BACKTEST, "risk_pct", "risk_pct must be in (0, 100)"));
            }
            if let Some(lev) = parse_number(config, BACKTEST, "max_leverage")? {
                if lev <= 0.0 {
                    return Err(ReplayError::invalid(
                        BACKTEST,
                        "max_leverage",
                        "max_leverage must be positive",
                    ));
                }
            }
        }
        other => {
            return Err(ReplayError::invalid(
                BACKTEST,
                "sizing",
                format!("unknown sizing mode '{other}', expected fixed_fraction or risk_based"),
            ));
        }
    }
    Ok(())
}

fn validate_stop_ceiling(config: &dyn ConfigPort) -> Result<(), ReplayError> {
    if let Some(v) = parse_number(config, BACKTEST, "max_stop_distance_pct")? {
        if v <= 0.0 || v > 100.0 {
            return Err(ReplayError::invalid(
                BACKTEST,
                "max_stop_distance_pct",
                "max_stop_distance_pct must be in (0, 100]",
            ));
        }
    }
    Ok(())
}

fn validate_thresholds(config: &dyn ConfigPort, section: &str) -> Result<(), ReplayError> {
    let low = parse_number(config, section, "low_threshold")?
        .ok_or_else(|| ReplayError::missing(section, "low_threshold"))?;
    let high = parse_number(config, section, "high_threshold")?
        .ok_or_else(|| ReplayError::missing(section, "high_threshold"))?;
    if low >= high {
        return Err(ReplayError::invalid(
            section,
            "high_threshold",
            "high_threshold must exceed low_threshold",
        ));
    }
    Ok(())
}

fn validate_entry(config: &dyn ConfigPort, section: &str) -> Result<(), ReplayError> {
    let is_limit = parse_order_type(config, section)?;
    let offset = parse_offset(config, section, "offset")?;
    let wait = parse_count(config, section, "max_wait_bars")?;

    if is_limit {
        if offset.is_none() {
            return Err(ReplayError::missing(section, "offset_pct"));
        }
        match wait {
            None => return Err(ReplayError::missing(section, "max_wait_bars")),
            Some(0) => {
                return Err(ReplayError::invalid(
                    section,
                    "max_wait_bars",
                    "max_wait_bars must be at least 1",
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn require_offset(config: &dyn ConfigPort, section: &str, stem: &str) -> Result<PriceOffset, ReplayError> {
    let offset = parse_offset(config, section, stem)?
        .ok_or_else(|| ReplayError::missing(section, &format!("{stem}_pct")))?;
    let value = match offset {
        PriceOffset::Percent(v) | PriceOffset::VolatilityMultiple(v) => v,
    };
    if value <= 0.0 {
        return Err(ReplayError::invalid(section, &format!("{stem}_pct"), format!("{stem} must be positive")));
    }
    Ok(offset)
}

pub fn parse_kind(config: &dyn ConfigPort, section: &str) -> Result<StrategyKind, ReplayError> {
    let raw = config
        .get_string(section, "kind")
        .ok_or_else(|| ReplayError::missing(section, "kind"))?;
    StrategyKind::parse(&raw).ok_or_else(|| {
        ReplayError::invalid(section, "kind", format!("unknown kind '{raw}', expected mean_reversion or swing"))
    })
}

pub fn parse_sides(config: &dyn ConfigPort, section: &str) -> Result<Sides, ReplayError> {
    match config.get_string(section, "sides") {
        None => Ok(Sides::Both),
        Some(raw) => Sides::parse(&raw).ok_or_else(|| {
            ReplayError::invalid(section, "sides", format!("unknown sides '{raw}', expected both, long or short"))
        }),
    }
}

/// Returns true for limit orders. Defaults to limit.
pub fn parse_order_type(config: &dyn ConfigPort, section: &str) -> Result<bool, ReplayError> {
    match config.get_string(section, "order_type") {
        None => Ok(true),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "limit" => Ok(true),
            "market" => Ok(false),
            other => Err(ReplayError::invalid(
                section,
                "order_type",
                format!("unknown order_type '{other}', expected limit or market"),
            )),
        },
    }
}

/// Reads `<stem>_pct` or `<stem>_vol`. Setting both is an error.
pub fn parse_offset(
    config: &dyn ConfigPort,
    section: &str,
    stem: &str,
) -> Result<Option<PriceOffset>, ReplayError> {
    let pct_key = format!("{stem}_pct");
    let vol_key = format!("{stem}_vol");
    let pct = parse_number(config, section, &pct_key)?;
    let vol = parse_number(config, section, &vol_key)?;
    match (pct, vol) {
        (Some(_), Some(_)) => Err(ReplayError::invalid(
            section,
            &pct_key,
            format!("set only one of {pct_key} and {vol_key}"),
        )),
        (Some(p), None) => Ok(Some(PriceOffset::Percent(p))),
        (None, Some(v)) => Ok(Some(PriceOffset::VolatilityMultiple(v))),
        (None, None) => Ok(None),
    }
}

/// Parses an optional float. Present but unparseable is an error.
pub fn parse_number(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, ReplayError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| ReplayError::invalid(section, key, format!("'{raw}' is not a number"))),
    }
}

pub fn parse_count(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<usize>, ReplayError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ReplayError::invalid(section, key, format!("'{raw}' is not a whole number"))),
    }
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or `YYYY-MM-DD`
/// (midnight).
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

pub fn parse_optional_timestamp(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<NaiveDateTime>, ReplayError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_timestamp(&raw).map(Some).ok_or_else(|| {
            ReplayError::invalid(
                section,
                key,
                format!("invalid {key} '{raw}', expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"),
            )
        }),
    }
}

/// Comma-separated, upper-cased, non-empty and unique.
pub fn parse_assets(config: &dyn ConfigPort) -> Result<Vec<String>, ReplayError> {
    let raw = config
        .get_string(BACKTEST, "assets")
        .ok_or_else(|| ReplayError::missing(BACKTEST, "assets"))?;
    let assets: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if assets.is_empty() {
        return Err(ReplayError::invalid(BACKTEST, "assets", "at least one asset is required"));
    }
    let mut seen = HashSet::new();
    for asset in &assets {
        if !seen.insert(asset.as_str()) {
            return Err(ReplayError::invalid(BACKTEST, "assets", format!("duplicate asset {asset}")));
        }
    }
    Ok(assets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    const VALID: &str = "\
[backtest]
initial_capital = 10000
start = 2024-01-01
end = 2024-06-30
assets = btcusdt, ETHUSDT
sizing = risk_based
risk_pct = 1.0
max_leverage = 3
max_stop_distance_pct = 20

[strategy.mr]
kind = mean_reversion
low_threshold = 30
high_threshold = 70
order_type = limit
offset_pct = 0.5
max_wait_bars = 8
stop_loss_pct = 2
take_profit_pct = 4
max_hold_bars = 48
fee_pct = 0.1

[strategy.swing]
kind = swing
sides = long
low_threshold = 40
high_threshold = 60
order_type = market
stop_loss_vol = 1.5
take_profit_vol = 3
invalidation_vol = 1
";

    fn adapter(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn with(replace: &str, by: &str) -> FileConfigAdapter {
        assert!(VALID.contains(replace), "fixture lacks {replace}");
        adapter(&VALID.replacen(replace, by, 1))
    }

    fn assert_invalid_key(result: Result<(), ReplayError>, expected_key: &str) {
        match result {
            Err(ReplayError::ConfigInvalid { key, .. }) | Err(ReplayError::ConfigMissing { key, .. }) => {
                assert_eq!(key, expected_key)
            }
            other => panic!("expected config error for {expected_key}, got {other:?}"),
        }
    }

    #[test]
    fn valid_config_passes() {
        let cfg = adapter(VALID);
        validate_backtest_config(&cfg).unwrap();
        validate_strategy_config(&cfg).unwrap();
    }

    #[test]
    fn strategy_sections_keep_file_order() {
        let cfg = adapter(VALID);
        assert_eq!(strategy_sections(&cfg), vec!["strategy.mr", "strategy.swing"]);
        assert_eq!(strategy_name(&cfg, "strategy.swing"), "swing");
    }

    #[test]
    fn plain_strategy_section_uses_name_key() {
        let cfg = adapter("[strategy]\nname = Fade\n");
        assert_eq!(strategy_name(&cfg, "strategy"), "Fade");
        let unnamed = adapter("[strategy]\nkind = swing\n");
        assert_eq!(strategy_name(&unnamed, "strategy"), "default");
    }

    #[test]
    fn assets_are_uppercased() {
        let cfg = adapter(VALID);
        assert_eq!(parse_assets(&cfg).unwrap(), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn duplicate_assets_rejected() {
        let cfg = with("assets = btcusdt, ETHUSDT", "assets = BTC, btc");
        assert_invalid_key(validate_backtest_config(&cfg), "assets");
    }

    #[test]
    fn non_positive_capital_rejected() {
        let cfg = with("initial_capital = 10000", "initial_capital = 0");
        assert_invalid_key(validate_backtest_config(&cfg), "initial_capital");
    }

    #[test]
    fn missing_capital_rejected() {
        let cfg = with("initial_capital = 10000\n", "");
        assert!(matches!(
            validate_backtest_config(&cfg),
            Err(ReplayError::ConfigMissing { .. })
        ));
    }

    #[test]
    fn window_must_be_ordered() {
        let cfg = with("end = 2024-06-30", "end = 2023-06-30");
        assert_invalid_key(validate_backtest_config(&cfg), "start");
    }

    #[test]
    fn bad_timestamp_rejected() {
        let cfg = with("start = 2024-01-01", "start = January");
        assert_invalid_key(validate_backtest_config(&cfg), "start");
    }

    #[test]
    fn risk_pct_range() {
        let cfg = with("risk_pct = 1.0", "risk_pct = 100");
        assert_invalid_key(validate_backtest_config(&cfg), "risk_pct");
    }

    #[test]
    fn fixed_fraction_requires_base_fraction() {
        let cfg = with("sizing = risk_based", "sizing = fixed_fraction");
        assert_invalid_key(validate_backtest_config(&cfg), "base_fraction");
    }

    #[test]
    fn unknown_sizing_rejected() {
        let cfg = with("sizing = risk_based", "sizing = kelly");
        assert_invalid_key(validate_backtest_config(&cfg), "sizing");
    }

    #[test]
    fn thresholds_must_be_ordered() {
        let cfg = with("high_threshold = 70", "high_threshold = 20");
        assert_invalid_key(validate_strategy_config(&cfg), "high_threshold");
    }

    #[test]
    fn limit_order_requires_offset() {
        let cfg = with("offset_pct = 0.5\n", "");
        assert_invalid_key(validate_strategy_config(&cfg), "offset_pct");
    }

    #[test]
    fn zero_wait_rejected() {
        let cfg = with("max_wait_bars = 8", "max_wait_bars = 0");
        assert_invalid_key(validate_strategy_config(&cfg), "max_wait_bars");
    }

    #[test]
    fn both_offset_forms_rejected() {
        let cfg = with("stop_loss_pct = 2", "stop_loss_pct = 2\nstop_loss_vol = 1");
        assert_invalid_key(validate_strategy_config(&cfg), "stop_loss_pct");
    }

    #[test]
    fn swing_requires_invalidation() {
        let cfg = with("invalidation_vol = 1\n", "");
        assert_invalid_key(validate_strategy_config(&cfg), "invalidation_pct");
    }

    #[test]
    fn mean_reversion_rejects_invalidation() {
        let cfg = with("fee_pct = 0.1", "fee_pct = 0.1\ninvalidation_pct = 2");
        assert_invalid_key(validate_strategy_config(&cfg), "invalidation_pct");
    }

    #[test]
    fn unknown_kind_rejected() {
        let cfg = with("kind = swing", "kind = breakout");
        assert_invalid_key(validate_strategy_config(&cfg), "kind");
    }

    #[test]
    fn non_numeric_value_rejected() {
        let cfg = with("fee_pct = 0.1", "fee_pct = cheap");
        assert_invalid_key(validate_strategy_config(&cfg), "fee_pct");
    }

    #[test]
    fn no_strategy_sections_rejected() {
        let cfg = adapter("[backtest]\ninitial_capital = 1\n");
        assert!(validate_strategy_config(&cfg).is_err());
    }

    #[test]
    fn timestamp_formats() {
        let midnight = parse_timestamp("2024-03-01").unwrap();
        assert_eq!(midnight.to_string(), "2024-03-01 00:00:00");
        assert!(parse_timestamp("2024-03-01 12:30:00").is_some());
        assert!(parse_timestamp("2024-03-01T12:30:00").is_some());
        assert!(parse_timestamp("03/01/2024").is_none());
    }
}
