//! Backtest engine and event loop.
//!
//! One parameterised replay drives every (strategy, asset) lane over the
//! unified timeline. Each timeline step runs three phases across all lanes:
//!
//! 1. exits of open positions,
//! 2. pending limit orders (fill, invalidation, expiry),
//! 3. signal detection and new entries.
//!
//! All exits for a timestamp are therefore booked before any entry for the
//! same timestamp, so capital released by a close is available to an entry
//! on the same bar. Bars that repeat a timestamp within one asset are
//! replayed in input order: the phases run once per rank, where rank `r`
//! is the `r`-th bar each asset has at that timestamp. The capital ledger is owned by the replay and only ever
//! mutated through `&mut`, which keeps every sizing decision linearised.

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use super::asset_data::AssetSeries;
use super::bar::Bar;
use super::diagnostics::Diagnostics;
use super::ledger::{CapitalLedger, PositionSizer, Sizing};
use super::metrics::{EquityCurve, Metrics};
use super::order::{OrderOutcome, OrderRecord, OrderSlot, OrderState, PendingOrder};
use super::position::{ExitReason, ExitRule, Position, Trade, gross_pnl_pct};
use super::signal::{Detection, Direction, Signal};
use super::strategy::{EntryOrder, EntryPlan, PlanRejection, Strategy, StrategyLogic};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub initial_capital: f64,
    pub sizing: Sizing,
    /// Reject entries that would lock more than current equity.
    pub cap_exposure: bool,
    /// Stop distances above this percentage are rejected.
    pub max_stop_distance_pct: f64,
    /// Close positions still open on the last processed bar.
    pub close_at_end: bool,
    /// Process at most this many timeline steps.
    pub stop_after: Option<usize>,
}

impl BacktestConfig {
    pub fn in_window(&self, ts: NaiveDateTime) -> bool {
        self.start.is_none_or(|s| ts >= s) && self.end.is_none_or(|e| ts <= e)
    }
}

/// Where and when the ledger hit zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Liquidation {
    /// Index into `BacktestResult::trades` of the liquidating trade.
    pub trade_index: usize,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    pub equity_curve: EquityCurve,
    pub orders: Vec<OrderRecord>,
    pub diagnostics: Diagnostics,
    pub liquidation: Option<Liquidation>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub steps_processed: usize,
}

impl BacktestResult {
    pub fn is_liquidated(&self) -> bool {
        self.liquidation.is_some()
    }

    pub fn metrics(&self) -> Metrics {
        Metrics::compute(&self.equity_curve, &self.trades, self.is_liquidated())
    }
}

struct Lane<'a> {
    strategy: &'a Strategy,
    series: &'a AssetSeries,
    slot: OrderSlot,
    position: Option<Position>,
}

impl<'a> Lane<'a> {
    /// The `rank`-th bar stamped `ts`.
    fn bar_at(&self, ts: NaiveDateTime, rank: usize) -> Option<(usize, &'a Bar)> {
        let series: &'a AssetSeries = self.series;
        let range = series.bar_indices(ts);
        let idx = range.start + rank;
        range.contains(&idx).then(|| (idx, &series.bars[idx]))
    }

    /// Latest bar at or before `ts`.
    fn last_bar_until(&self, ts: NaiveDateTime) -> Option<(usize, &'a Bar)> {
        let series: &'a AssetSeries = self.series;
        let n = series.bars.partition_point(|b| b.timestamp <= ts);
        let idx = n.checked_sub(1)?;
        Some((idx, &series.bars[idx]))
    }

    fn asset(&self) -> &str {
        &self.series.asset
    }
}

/// Shared replay state: everything except the lanes themselves.
struct Book<'c> {
    config: &'c BacktestConfig,
    ledger: CapitalLedger,
    trades: Vec<Trade>,
    curve: EquityCurve,
    orders: Vec<OrderRecord>,
    diagnostics: Diagnostics,
    liquidation: Option<Liquidation>,
}

impl Book<'_> {
    /// Sizes and opens a position from `plan`. Returns false if the ledger
    /// refused the capital.
    fn open(
        &mut self,
        lane: &mut Lane<'_>,
        signal: &Signal,
        plan: &EntryPlan,
        idx: usize,
        ts: NaiveDateTime,
    ) -> bool {
        let notional = self
            .config
            .sizing
            .notional(self.ledger.equity(), plan.stop_distance_pct);

        match self.ledger.reserve(notional) {
            Ok(id) => {
                debug!(
                    strategy = %signal.strategy,
                    asset = %signal.asset,
                    direction = %signal.direction,
                    entry = plan.entry_price,
                    notional,
                    "position opened"
                );
                lane.position = Some(Position {
                    id,
                    asset: signal.asset.clone(),
                    strategy: signal.strategy.clone(),
                    direction: signal.direction,
                    entry_price: plan.entry_price,
                    stop_loss: plan.stop_loss,
                    take_profit: plan.take_profit,
                    notional,
                    opened_at: idx,
                    entry_time: ts,
                });
                self.diagnostics.positions_opened += 1;
                true
            }
            Err(e) => {
                warn!(
                    strategy = %signal.strategy,
                    asset = %signal.asset,
                    "entry skipped: {e}"
                );
                self.diagnostics.skipped_no_capital += 1;
                false
            }
        }
    }

    /// Closes the lane's position and books it. Returns true if the close
    /// liquidated the ledger.
    ///
    /// `booked_at` is the replay step that books the close; it stamps the
    /// equity point and differs from `exit_time` only for end-of-run closes.
    fn close(
        &mut self,
        lane: &mut Lane<'_>,
        exit: (usize, &Bar),
        exit_price: f64,
        reason: ExitReason,
        booked_at: NaiveDateTime,
    ) -> bool {
        let Some(position) = lane.position.take() else {
            return false;
        };
        let (idx, bar) = exit;
        let fee_pct = lane.strategy.fee_pct;
        let gross = gross_pnl_pct(position.direction, position.entry_price, exit_price);

        let Some(settlement) = self.ledger.settle(position.id, gross, fee_pct) else {
            warn!(id = position.id.0, "closing a position the ledger does not know");
            return false;
        };

        debug!(
            strategy = %position.strategy,
            asset = %position.asset,
            reason = %reason,
            exit = exit_price,
            pnl_usd = settlement.pnl_usd,
            equity = settlement.equity_after,
            "position closed"
        );

        let net_pct = position.net_pnl_pct(exit_price, fee_pct);
        let trade = position.into_trade(
            bar.timestamp,
            idx,
            exit_price,
            reason,
            net_pct,
            settlement.pnl_usd,
        );
        self.trades.push(trade);
        self.curve.push(booked_at, settlement.equity_after);
        self.diagnostics.positions_closed += 1;

        if settlement.liquidated {
            let trade_index = self.trades.len() - 1;
            warn!(trade_index, timestamp = %booked_at, "equity exhausted, ledger liquidated");
            self.liquidation = Some(Liquidation {
                trade_index,
                timestamp: booked_at,
            });
        }
        settlement.liquidated
    }

    fn handle_signal(
        &mut self,
        lane: &mut Lane<'_>,
        direction: Direction,
        bar: &Bar,
        idx: usize,
        ts: NaiveDateTime,
    ) {
        let strategy = lane.strategy;
        self.diagnostics.signals_detected += 1;

        if !strategy.sides.allows(direction) {
            self.diagnostics.signals_filtered_side += 1;
            return;
        }
        if lane.position.is_some() {
            debug!(strategy = %strategy.name, asset = lane.asset(), "signal dropped: position open");
            self.diagnostics.signals_dropped_in_position += 1;
            return;
        }
        if lane.slot.is_pending() {
            debug!(strategy = %strategy.name, asset = lane.asset(), "signal dropped: order pending");
            self.diagnostics.signals_dropped_pending += 1;
            return;
        }

        let signal = Signal::from_bar(lane.asset(), &strategy.name, direction, bar);
        let plan = match strategy.plan_entry(&signal, self.config.max_stop_distance_pct) {
            Ok(plan) => plan,
            Err(PlanRejection::MissingVolatility) => {
                self.diagnostics.rejected_missing_volatility += 1;
                self.diagnostics.data_gaps += 1;
                return;
            }
            Err(e @ PlanRejection::InvalidStopDistance { .. }) => {
                warn!(strategy = %strategy.name, asset = lane.asset(), "signal rejected: {e}");
                self.diagnostics.rejected_stop_distance += 1;
                return;
            }
        };

        match strategy.entry {
            EntryOrder::Market => {
                self.open(lane, &signal, &plan, idx, ts);
            }
            EntryOrder::Limit { max_wait_bars, .. } => {
                let order = PendingOrder::new(signal, &plan, idx, max_wait_bars);
                debug!(
                    strategy = %strategy.name,
                    asset = lane.asset(),
                    limit = order.limit_price,
                    expiry = order.expiry,
                    "limit order placed"
                );
                match lane.slot.place(order) {
                    Ok(()) => self.diagnostics.orders_placed += 1,
                    Err(e) => {
                        debug!("signal dropped: {e}");
                        self.diagnostics.signals_dropped_pending += 1;
                    }
                }
            }
        }
    }
}

struct Replay<'a> {
    lanes: Vec<Lane<'a>>,
    assets: &'a [AssetSeries],
    book: Book<'a>,
}

impl<'a> Replay<'a> {
    fn new(assets: &'a [AssetSeries], strategies: &'a [Strategy], config: &'a BacktestConfig) -> Self {
        let lanes = strategies
            .iter()
            .flat_map(|strategy| {
                assets.iter().map(move |series| Lane {
                    strategy,
                    series,
                    slot: OrderSlot::new(),
                    position: None,
                })
            })
            .collect();

        Replay {
            lanes,
            assets,
            book: Book {
                config,
                ledger: CapitalLedger::new(config.initial_capital, config.cap_exposure),
                trades: Vec::new(),
                curve: EquityCurve::new(),
                orders: Vec::new(),
                diagnostics: Diagnostics::default(),
                liquidation: None,
            },
        }
    }

    /// Runs one timeline step. Returns true if the run must halt.
    fn step(&mut self, ts: NaiveDateTime) -> bool {
        let counts: Vec<usize> = self.assets.iter().map(|a| a.bar_indices(ts).len()).collect();
        let depth = counts.iter().copied().max().unwrap_or(0);
        self.book.diagnostics.bars_processed += counts.iter().sum::<usize>();

        for rank in 0..depth {
            if self.exit_phase(ts, rank) {
                return true;
            }
            self.order_phase(ts, rank);
            self.signal_phase(ts, rank);
        }
        false
    }

    fn exit_phase(&mut self, ts: NaiveDateTime, rank: usize) -> bool {
        let close_at_end = self.book.config.close_at_end;

        for lane in self.lanes.iter_mut() {
            let Some((idx, bar)) = lane.bar_at(ts, rank) else {
                continue;
            };
            let Some(position) = lane.position.as_ref() else {
                continue;
            };
            if idx <= position.opened_at {
                continue;
            }

            let strategy = lane.strategy;
            let rules = strategy.exit_priority();
            let opposite = rules.contains(&ExitRule::OppositeSignal)
                && matches!(
                    strategy.detect_signal(&lane.series.bars[idx - 1], bar),
                    Detection::Signal(d) if d == position.direction.opposite()
                );

            let exit = position
                .check_exit(bar, idx, rules, opposite, strategy.max_hold_bars)
                .or_else(|| {
                    (close_at_end && lane.series.last_index() == Some(idx))
                        .then_some((ExitReason::EndOfData, bar.close))
                });

            if let Some((reason, price)) = exit {
                if self.book.close(lane, (idx, bar), price, reason, ts) {
                    return true;
                }
            }
        }
        false
    }

    fn order_phase(&mut self, ts: NaiveDateTime, rank: usize) {
        for lane in self.lanes.iter_mut() {
            let Some((idx, bar)) = lane.bar_at(ts, rank) else {
                continue;
            };
            let Some((state, order)) = lane.slot.step(bar, idx) else {
                continue;
            };

            let outcome = match state {
                OrderState::Filled => {
                    self.book.diagnostics.orders_filled += 1;
                    if self.book.open(lane, &order.signal, &order.plan(), idx, ts) {
                        OrderOutcome::Filled
                    } else {
                        OrderOutcome::SkippedNoCapital
                    }
                }
                OrderState::Expired => {
                    debug!(strategy = %order.signal.strategy, asset = lane.asset(), "limit order expired");
                    self.book.diagnostics.orders_expired += 1;
                    OrderOutcome::Expired
                }
                OrderState::Invalidated => {
                    debug!(strategy = %order.signal.strategy, asset = lane.asset(), "limit order invalidated");
                    self.book.diagnostics.orders_invalidated += 1;
                    OrderOutcome::Invalidated
                }
                OrderState::PendingLimit => continue,
            };
            self.book
                .orders
                .push(OrderRecord::new(&order, ts, idx, outcome));
        }
    }

    fn signal_phase(&mut self, ts: NaiveDateTime, rank: usize) {
        for lane in self.lanes.iter_mut() {
            let Some((idx, bar)) = lane.bar_at(ts, rank) else {
                continue;
            };
            if idx == 0 {
                continue;
            }
            let prev = &lane.series.bars[idx - 1];
            match lane.strategy.detect_signal(prev, bar) {
                Detection::Signal(direction) => {
                    self.book.handle_signal(lane, direction, bar, idx, ts);
                }
                Detection::DataGap => self.book.diagnostics.data_gaps += 1,
                Detection::Nothing => {}
            }
        }
    }

    fn finish(mut self, last_step: Option<NaiveDateTime>, steps_processed: usize) -> BacktestResult {
        if let Some(end) = last_step {
            if self.book.liquidation.is_none() && self.book.config.close_at_end {
                for lane in self.lanes.iter_mut() {
                    if lane.position.is_none() {
                        continue;
                    }
                    let Some((idx, bar)) = lane.last_bar_until(end) else {
                        continue;
                    };
                    if self
                        .book
                        .close(lane, (idx, bar), bar.close, ExitReason::EndOfData, end)
                    {
                        break;
                    }
                }
            }

            for lane in self.lanes.iter_mut() {
                let Some(order) = lane.slot.cancel() else {
                    continue;
                };
                let idx = lane
                    .last_bar_until(end)
                    .map_or(order.placed_at, |(idx, _)| idx);
                self.book.diagnostics.orders_cancelled += 1;
                self.book
                    .orders
                    .push(OrderRecord::new(&order, end, idx, OrderOutcome::Cancelled));
            }
        }

        let book = self.book;
        let mut ledger = book.ledger;
        let mut diagnostics = book.diagnostics;
        diagnostics.open_positions_at_end = ledger.abandon_all();

        info!(
            trades = book.trades.len(),
            final_equity = ledger.equity(),
            liquidated = book.liquidation.is_some(),
            "replay finished"
        );

        BacktestResult {
            trades: book.trades,
            equity_curve: book.curve,
            orders: book.orders,
            diagnostics,
            liquidation: book.liquidation,
            initial_capital: ledger.initial_equity(),
            final_equity: ledger.equity(),
            steps_processed,
        }
    }
}

/// Replays `timeline` over every (strategy, asset) pair.
///
/// Lanes are ordered strategy-major in the order given, which fixes the
/// processing order within each phase and makes the run deterministic.
pub fn run_backtest(
    assets: &[AssetSeries],
    timeline: &[NaiveDateTime],
    strategies: &[Strategy],
    config: &BacktestConfig,
) -> BacktestResult {
    let mut replay = Replay::new(assets, strategies, config);
    let limit = config.stop_after.unwrap_or(usize::MAX);

    info!(
        assets = assets.len(),
        strategies = strategies.len(),
        steps = timeline.len(),
        "starting replay"
    );

    let mut window = timeline.iter().copied().filter(|ts| config.in_window(*ts)).peekable();
    if let Some(origin) = window.peek().copied().or(config.start) {
        replay.book.curve.push(origin, config.initial_capital);
    }

    let mut last_step = None;
    let mut steps = 0usize;
    for ts in window.take(limit) {
        last_step = Some(ts);
        steps += 1;
        if replay.step(ts) {
            break;
        }
    }

    replay.finish(last_step, steps)
}
