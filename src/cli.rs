//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::asset_data::{AssetSeries, build_unified_timeline};
use crate::domain::backtest::{self as backtest_engine, BacktestConfig, BacktestResult};
use crate::domain::config_validation::{
    BACKTEST, parse_assets, parse_count, parse_kind, parse_number, parse_offset,
    parse_optional_timestamp, parse_order_type, parse_sides, strategy_name, strategy_sections,
    validate_backtest_config, validate_strategy_config,
};
use crate::domain::error::ReplayError;
use crate::domain::ledger::{FixedFraction, RiskBased, Sizing};
use crate::domain::metrics::{Metrics, PairResult};
use crate::domain::signal::Thresholds;
use crate::domain::strategy::{EntryOrder, Strategy};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

pub const DEFAULT_MAX_STOP_DISTANCE_PCT: f64 = 20.0;
pub const DEFAULT_REPORT_DIR: &str = "report";

#[derive(Parser, Debug)]
#[command(name = "replaytrader", about = "Deterministic bar-replay backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory holding `<ASSET>.csv` files; overrides `data_dir`
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Report directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Process at most this many timeline steps
        #[arg(long)]
        stop_after: Option<usize>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a configuration and print the parsed strategies
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show data range for configured assets
    Info {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        asset: Option<String>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            data_dir,
            output,
            stop_after,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&config)
            } else {
                run_backtest(&config, data_dir.as_deref(), output.as_deref(), stop_after)
            }
        }
        Command::Validate { config } => run_validate(&config),
        Command::Info {
            config,
            asset,
            data_dir,
        } => run_info(&config, asset.as_deref(), data_dir.as_deref()),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = ReplayError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn fail(e: &ReplayError) -> ExitCode {
    eprintln!("error: {e}");
    e.into()
}

/// Loads and fully validates a config file.
fn load_validated(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    eprintln!("Loading config from {}", path.display());
    let adapter = load_config(path)?;
    validate_backtest_config(&adapter).map_err(|e| fail(&e))?;
    validate_strategy_config(&adapter).map_err(|e| fail(&e))?;
    Ok(adapter)
}

fn run_backtest(
    config_path: &Path,
    data_dir: Option<&Path>,
    output: Option<&Path>,
    stop_after: Option<usize>,
) -> ExitCode {
    let adapter = match load_validated(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let built = build_backtest_config(&adapter).and_then(|mut bt| {
        bt.stop_after = stop_after;
        let strategies = build_strategies(&adapter)?;
        let assets = parse_assets(&adapter)?;
        Ok((bt, strategies, assets))
    });
    let (bt_config, strategies, assets) = match built {
        Ok(parts) => parts,
        Err(e) => return fail(&e),
    };

    let data_port = CsvAdapter::new(resolve_data_dir(data_dir, &adapter));
    let report_port = CsvReportAdapter::new();
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_DIR));

    match run_backtest_pipeline(
        &data_port,
        &report_port,
        &strategies,
        &bt_config,
        &assets,
        &output,
    ) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

pub fn resolve_data_dir(data_dir: Option<&Path>, config: &dyn ConfigPort) -> PathBuf {
    match data_dir {
        Some(dir) => dir.to_path_buf(),
        None => config
            .get_string(BACKTEST, "data_dir")
            .map(|s| PathBuf::from(s.trim()))
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, ReplayError> {
    let initial_capital = parse_number(adapter, BACKTEST, "initial_capital")?
        .ok_or_else(|| ReplayError::missing(BACKTEST, "initial_capital"))?;

    let mode = adapter
        .get_string(BACKTEST, "sizing")
        .unwrap_or_else(|| "fixed_fraction".to_string());
    let sizing = match mode.trim().to_lowercase().as_str() {
        "risk_based" => Sizing::RiskBased(RiskBased {
            risk_pct: parse_number(adapter, BACKTEST, "risk_pct")?
                .ok_or_else(|| ReplayError::missing(BACKTEST, "risk_pct"))?,
            max_leverage: parse_number(adapter, BACKTEST, "max_leverage")?,
        }),
        "fixed_fraction" => Sizing::FixedFraction(FixedFraction {
            base_fraction: parse_number(adapter, BACKTEST, "base_fraction")?
                .ok_or_else(|| ReplayError::missing(BACKTEST, "base_fraction"))?,
        }),
        other => {
            return Err(ReplayError::invalid(
                BACKTEST,
                "sizing",
                format!("unknown sizing mode '{other}'"),
            ));
        }
    };

    Ok(BacktestConfig {
        start: parse_optional_timestamp(adapter, BACKTEST, "start")?,
        end: parse_optional_timestamp(adapter, BACKTEST, "end")?,
        initial_capital,
        sizing,
        cap_exposure: adapter.get_bool(BACKTEST, "cap_exposure", true),
        max_stop_distance_pct: parse_number(adapter, BACKTEST, "max_stop_distance_pct")?
            .unwrap_or(DEFAULT_MAX_STOP_DISTANCE_PCT),
        close_at_end: adapter.get_bool(BACKTEST, "close_at_end", true),
        stop_after: None,
    })
}

pub fn build_strategy(adapter: &dyn ConfigPort, section: &str) -> Result<Strategy, ReplayError> {
    let missing = |key: &str| ReplayError::missing(section, key);

    let entry = if parse_order_type(adapter, section)? {
        EntryOrder::Limit {
            offset: parse_offset(adapter, section, "offset")?.ok_or_else(|| missing("offset_pct"))?,
            max_wait_bars: parse_count(adapter, section, "max_wait_bars")?
                .ok_or_else(|| missing("max_wait_bars"))?,
        }
    } else {
        EntryOrder::Market
    };

    Ok(Strategy {
        name: strategy_name(adapter, section),
        kind: parse_kind(adapter, section)?,
        sides: parse_sides(adapter, section)?,
        thresholds: Thresholds {
            low: parse_number(adapter, section, "low_threshold")?
                .ok_or_else(|| missing("low_threshold"))?,
            high: parse_number(adapter, section, "high_threshold")?
                .ok_or_else(|| missing("high_threshold"))?,
        },
        entry,
        stop_loss: parse_offset(adapter, section, "stop_loss")?
            .ok_or_else(|| missing("stop_loss_pct"))?,
        take_profit: parse_offset(adapter, section, "take_profit")?
            .ok_or_else(|| missing("take_profit_pct"))?,
        invalidation: parse_offset(adapter, section, "invalidation")?,
        max_hold_bars: parse_count(adapter, section, "max_hold_bars")?,
        fee_pct: parse_number(adapter, section, "fee_pct")?.unwrap_or(0.0),
    })
}

/// One strategy per `[strategy...]` section, in file order.
pub fn build_strategies(adapter: &dyn ConfigPort) -> Result<Vec<Strategy>, ReplayError> {
    strategy_sections(adapter)
        .iter()
        .map(|section| build_strategy(adapter, section))
        .collect()
}

/// Fetches and orders bars for every asset. Assets without data are
/// skipped with a warning; having none at all is an error.
pub fn load_assets(
    data_port: &dyn DataPort,
    assets: &[String],
    bt_config: &BacktestConfig,
) -> Result<Vec<AssetSeries>, ReplayError> {
    let mut loaded = Vec::with_capacity(assets.len());
    for asset in assets {
        let bars = match data_port.fetch_bars(asset, bt_config.start, bt_config.end) {
            Ok(bars) => bars,
            Err(ReplayError::NoData { .. }) => {
                warn!(asset = %asset, "no data file, skipping");
                eprintln!("warning: skipping {asset} (no data)");
                continue;
            }
            Err(e) => return Err(e),
        };
        if bars.is_empty() {
            warn!(asset = %asset, "no bars in window, skipping");
            eprintln!("warning: skipping {asset} (no bars in window)");
            continue;
        }
        loaded.push(AssetSeries::new(asset.clone(), bars)?);
    }

    if loaded.is_empty() {
        return Err(ReplayError::NoData {
            asset: assets.join(","),
        });
    }
    Ok(loaded)
}

pub fn print_summary(result: &BacktestResult, metrics: &Metrics, pairs: &[PairResult]) {
    eprintln!("\n=== Aggregate Results ===");
    eprintln!("Final Equity:     {:.2}", metrics.final_equity);
    eprintln!("Total Return:     {:.2}%", metrics.total_return_pct);
    eprintln!("Max Drawdown:     {:.2}%", metrics.max_drawdown);
    eprintln!("Return/DD:        {:.2}", metrics.return_dd_ratio);
    eprintln!("Total Trades:     {}", metrics.trade_count);
    eprintln!("Win Rate:         {:.1}%", metrics.win_rate);
    eprintln!("Profit Factor:    {:.2}", metrics.profit_factor);
    eprintln!("Avg Bars Held:    {:.1}", metrics.avg_bars_held);

    if let Some(liq) = &result.liquidation {
        eprintln!(
            "LIQUIDATED at {} (trade #{})",
            liq.timestamp,
            liq.trade_index + 1
        );
    }

    if !pairs.is_empty() {
        eprintln!("\n=== Per-Pair Summary ===");
        for p in pairs {
            let pnl_sign = if p.total_pnl_usd >= 0.0 { "+" } else { "" };
            eprintln!(
                "  {}/{}:  {} trades, {:.1}% win rate, {}${:.2}",
                p.strategy, p.asset, p.trade_count, p.win_rate, pnl_sign, p.total_pnl_usd,
            );
        }
    }

    let counters = result.diagnostics.nonzero();
    if !counters.is_empty() {
        eprintln!("\n=== Diagnostics ===");
        for (name, value) in counters {
            eprintln!("  {name}: {value}");
        }
    }
}

pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    report_port: &dyn ReportPort,
    strategies: &[Strategy],
    bt_config: &BacktestConfig,
    assets: &[String],
    output: &Path,
) -> Result<BacktestResult, ReplayError> {
    let series = load_assets(data_port, assets, bt_config)?;
    let timeline = build_unified_timeline(&series);

    eprintln!(
        "Running backtest: {} strategies x {} assets",
        strategies.len(),
        series.len()
    );
    eprintln!("  Processing: {} timestamps", timeline.len());

    let result = backtest_engine::run_backtest(&series, &timeline, strategies, bt_config);
    let metrics = result.metrics();
    let pairs = PairResult::compute_per_pair(&result.trades);

    print_summary(&result, &metrics, &pairs);

    report_port.write(&result, &metrics, &pairs, output)?;
    eprintln!("\nReport written to: {}", output.display());
    Ok(result)
}

fn print_strategies(strategies: &[Strategy]) {
    for s in strategies {
        eprintln!("\n[{}] {}", s.name, s.kind);
        eprintln!("  sides:       {:?}", s.sides);
        eprintln!(
            "  thresholds:  low {} / high {}",
            s.thresholds.low, s.thresholds.high
        );
        match s.entry {
            EntryOrder::Market => eprintln!("  entry:       market"),
            EntryOrder::Limit {
                offset,
                max_wait_bars,
            } => eprintln!("  entry:       limit {offset} away, wait {max_wait_bars} bars"),
        }
        eprintln!("  stop loss:   {}", s.stop_loss);
        eprintln!("  take profit: {}", s.take_profit);
        if let Some(inv) = s.invalidation {
            eprintln!("  invalidate:  {inv}");
        }
        if let Some(hold) = s.max_hold_bars {
            eprintln!("  max hold:    {hold} bars");
        }
        eprintln!("  fee:         {}%", s.fee_pct);
    }
}

pub fn run_dry_run(config_path: &Path) -> ExitCode {
    let adapter = match load_validated(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    eprintln!("Config validated successfully");

    let (bt_config, strategies, assets) = match build_backtest_config(&adapter)
        .and_then(|bt| Ok((bt, build_strategies(&adapter)?, parse_assets(&adapter)?)))
    {
        Ok(parts) => parts,
        Err(e) => return fail(&e),
    };

    eprintln!("\nBacktest:");
    eprintln!("  initial capital: {:.2}", bt_config.initial_capital);
    eprintln!("  sizing:          {:?}", bt_config.sizing);
    eprintln!("  cap exposure:    {}", bt_config.cap_exposure);
    eprintln!("  close at end:    {}", bt_config.close_at_end);
    eprintln!("  assets:          {}", assets.join(", "));
    eprintln!("  data dir:        {}", resolve_data_dir(None, &adapter).display());

    print_strategies(&strategies);

    eprintln!("\nDry run complete: configuration is valid");
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    let adapter = match load_validated(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    match build_strategies(&adapter) {
        Ok(strategies) => {
            print_strategies(&strategies);
            eprintln!("\nConfiguration is valid.");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_info(config_path: &Path, asset: Option<&str>, data_dir: Option<&Path>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let data_port = CsvAdapter::new(resolve_data_dir(data_dir, &config));

    let assets = match asset {
        Some(a) => vec![a.trim().to_uppercase()],
        None => match parse_assets(&config).or_else(|_| data_port.list_assets()) {
            Ok(a) => a,
            Err(e) => return fail(&e),
        },
    };

    for a in &assets {
        match data_port.get_data_range(a) {
            Ok(Some((first, last, count))) => {
                println!("{}: {} bars, {} to {}", a, count, first, last);
            }
            Ok(None) => eprintln!("{}: no data found", a),
            Err(e) => eprintln!("error reading {}: {}", a, e),
        }
    }
    ExitCode::SUCCESS
}
