//! Capital ledger and position sizing.
//!
//! The ledger is the single authority for equity. Every lane of the replay
//! reserves and settles capital through one `&mut CapitalLedger`, so all
//! reads of available capital and all mutations are serialised by the
//! borrow checker rather than by shared mutable state.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionId(pub u64);

/// Computes the notional for a new position.
pub trait PositionSizer {
    fn notional(&self, equity: f64, stop_distance_pct: f64) -> f64;
}

/// `equity * base_fraction`, independent of the stop.
///
/// Does not account for concurrent exposure; divide `base_fraction` by the
/// expected number of simultaneous positions to cap total exposure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedFraction {
    pub base_fraction: f64,
}

impl PositionSizer for FixedFraction {
    fn notional(&self, equity: f64, _stop_distance_pct: f64) -> f64 {
        equity * self.base_fraction
    }
}

/// `(equity * risk_pct) / stop_distance_pct`, so a stop-out costs
/// `risk_pct` of equity before fees. Optionally capped at
/// `equity * max_leverage`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskBased {
    pub risk_pct: f64,
    pub max_leverage: Option<f64>,
}

impl PositionSizer for RiskBased {
    fn notional(&self, equity: f64, stop_distance_pct: f64) -> f64 {
        if !(stop_distance_pct > 0.0) {
            return 0.0;
        }
        let raw = equity * self.risk_pct / stop_distance_pct;
        match self.max_leverage {
            Some(lev) => raw.min(equity * lev),
            None => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sizing {
    FixedFraction(FixedFraction),
    RiskBased(RiskBased),
}

impl PositionSizer for Sizing {
    fn notional(&self, equity: f64, stop_distance_pct: f64) -> f64 {
        match self {
            Sizing::FixedFraction(s) => s.notional(equity, stop_distance_pct),
            Sizing::RiskBased(s) => s.notional(equity, stop_distance_pct),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    Active,
    /// Equity hit zero. Terminal for the run.
    Liquidated,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum LedgerRejection {
    #[error("ledger is liquidated")]
    Liquidated,
    #[error("no capital: requested {requested:.2}, available {available:.2}")]
    NoCapital { requested: f64, available: f64 },
    #[error("notional {0} is not positive")]
    NonPositiveNotional(f64),
}

/// Result of settling a closed position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settlement {
    pub notional: f64,
    pub fees: f64,
    pub pnl_usd: f64,
    pub equity_after: f64,
    pub liquidated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapitalLedger {
    equity: f64,
    initial_equity: f64,
    locked: BTreeMap<PositionId, f64>,
    capped: bool,
    state: LedgerState,
    next_id: u64,
}

impl CapitalLedger {
    /// `capped` enforces `sum(locked) <= equity` on every reservation.
    pub fn new(initial_equity: f64, capped: bool) -> Self {
        CapitalLedger {
            equity: initial_equity,
            initial_equity,
            locked: BTreeMap::new(),
            capped,
            state: LedgerState::Active,
            next_id: 1,
        }
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn initial_equity(&self) -> f64 {
        self.initial_equity
    }

    pub fn locked_total(&self) -> f64 {
        self.locked.values().sum()
    }

    pub fn available(&self) -> f64 {
        self.equity - self.locked_total()
    }

    pub fn open_count(&self) -> usize {
        self.locked.len()
    }

    pub fn state(&self) -> LedgerState {
        self.state
    }

    pub fn is_liquidated(&self) -> bool {
        self.state == LedgerState::Liquidated
    }

    /// Locks `notional` for a new position and hands out its id.
    pub fn reserve(&mut self, notional: f64) -> Result<PositionId, LedgerRejection> {
        if self.is_liquidated() {
            return Err(LedgerRejection::Liquidated);
        }
        if !(notional > 0.0) || !notional.is_finite() {
            return Err(LedgerRejection::NonPositiveNotional(notional));
        }
        if self.capped {
            let available = self.available();
            if available - notional < 0.0 {
                return Err(LedgerRejection::NoCapital {
                    requested: notional,
                    available,
                });
            }
        }

        let id = PositionId(self.next_id);
        self.next_id += 1;
        self.locked.insert(id, notional);
        Ok(id)
    }

    /// Releases the lock for `id` and books the result.
    ///
    /// `equity += notional * gross_pnl_pct / 100 - notional * fee_pct / 100`.
    /// If that takes equity to zero or below, equity is clamped at zero, the
    /// booked pnl is reduced to exactly the equity lost, and the ledger
    /// becomes liquidated. Returns `None` for an unknown id.
    pub fn settle(&mut self, id: PositionId, gross_pnl_pct: f64, fee_pct: f64) -> Option<Settlement> {
        let notional = self.locked.remove(&id)?;
        let fees = notional * fee_pct / 100.0;
        let mut pnl_usd = notional * gross_pnl_pct / 100.0 - fees;

        let mut liquidated = false;
        if self.equity + pnl_usd <= 0.0 {
            pnl_usd = -self.equity;
            self.equity = 0.0;
            self.state = LedgerState::Liquidated;
            liquidated = true;
        } else {
            self.equity += pnl_usd;
        }

        Some(Settlement {
            notional,
            fees,
            pnl_usd,
            equity_after: self.equity,
            liquidated,
        })
    }

    /// Drops every remaining lock without booking anything. Used when the
    /// run halts on liquidation. Returns how many locks were dropped.
    pub fn abandon_all(&mut self) -> usize {
        let n = self.locked.len();
        self.locked.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fixed_fraction_ignores_stop() {
        let sizer = FixedFraction { base_fraction: 0.25 };
        assert_relative_eq!(sizer.notional(1000.0, 1.0), 250.0);
        assert_relative_eq!(sizer.notional(1000.0, 9.0), 250.0);
    }

    #[test]
    fn risk_based_sizing_example() {
        let sizer = RiskBased {
            risk_pct: 5.0,
            max_leverage: None,
        };
        assert_relative_eq!(sizer.notional(100.0, 2.0), 250.0);
    }

    #[test]
    fn risk_based_respects_leverage_cap() {
        let sizer = RiskBased {
            risk_pct: 5.0,
            max_leverage: Some(2.0),
        };
        assert_relative_eq!(sizer.notional(100.0, 2.0), 200.0);
        assert_relative_eq!(sizer.notional(100.0, 10.0), 50.0);
    }

    #[test]
    fn risk_based_zero_stop_sizes_nothing() {
        let sizer = RiskBased {
            risk_pct: 1.0,
            max_leverage: None,
        };
        assert_eq!(sizer.notional(100.0, 0.0), 0.0);
    }

    #[test]
    fn sizing_dispatches() {
        let fixed = Sizing::FixedFraction(FixedFraction { base_fraction: 0.5 });
        let risk = Sizing::RiskBased(RiskBased {
            risk_pct: 1.0,
            max_leverage: None,
        });
        assert_relative_eq!(fixed.notional(200.0, 4.0), 100.0);
        assert_relative_eq!(risk.notional(200.0, 4.0), 50.0);
    }

    #[test]
    fn stop_loss_costs_risk_pct() {
        let sizer = RiskBased {
            risk_pct: 5.0,
            max_leverage: None,
        };
        let mut ledger = CapitalLedger::new(100.0, false);
        let notional = sizer.notional(ledger.equity(), 2.0);
        let id = ledger.reserve(notional).unwrap();
        let s = ledger.settle(id, -2.0, 0.0).unwrap();
        assert_relative_eq!(s.pnl_usd, -5.0, epsilon = 1e-9);
        assert_relative_eq!(ledger.equity(), 95.0, epsilon = 1e-9);
        assert!(!s.liquidated);
        assert_eq!(ledger.open_count(), 0);
    }

    #[test]
    fn reserve_locks_and_settle_releases() {
        let mut ledger = CapitalLedger::new(1000.0, true);
        let a = ledger.reserve(400.0).unwrap();
        let b = ledger.reserve(300.0).unwrap();
        assert_ne!(a, b);
        assert_relative_eq!(ledger.locked_total(), 700.0);
        assert_relative_eq!(ledger.available(), 300.0);

        let s = ledger.settle(a, 10.0, 0.0).unwrap();
        assert_relative_eq!(s.pnl_usd, 40.0);
        assert_relative_eq!(ledger.equity(), 1040.0);
        assert_relative_eq!(ledger.available(), 740.0);
    }

    #[test]
    fn fees_reduce_pnl() {
        let mut ledger = CapitalLedger::new(1000.0, true);
        let id = ledger.reserve(500.0).unwrap();
        let s = ledger.settle(id, 2.0, 0.2).unwrap();
        assert_relative_eq!(s.fees, 1.0);
        assert_relative_eq!(s.pnl_usd, 9.0);
        assert_relative_eq!(ledger.equity(), 1009.0);
    }

    #[test]
    fn capped_ledger_rejects_overcommit() {
        let mut ledger = CapitalLedger::new(1000.0, true);
        ledger.reserve(800.0).unwrap();
        let err = ledger.reserve(300.0).unwrap_err();
        assert!(matches!(err, LedgerRejection::NoCapital { .. }));
        assert_eq!(ledger.open_count(), 1);
    }

    #[test]
    fn uncapped_ledger_allows_overcommit() {
        let mut ledger = CapitalLedger::new(1000.0, false);
        ledger.reserve(800.0).unwrap();
        assert!(ledger.reserve(800.0).is_ok());
        assert!(ledger.available() < 0.0);
    }

    #[test]
    fn exact_fill_of_capital_is_allowed() {
        let mut ledger = CapitalLedger::new(1000.0, true);
        assert!(ledger.reserve(1000.0).is_ok());
        assert_relative_eq!(ledger.available(), 0.0);
    }

    #[test]
    fn non_positive_notional_rejected() {
        let mut ledger = CapitalLedger::new(1000.0, true);
        assert!(matches!(
            ledger.reserve(0.0),
            Err(LedgerRejection::NonPositiveNotional(_))
        ));
        assert!(ledger.reserve(f64::NAN).is_err());
    }

    #[test]
    fn catastrophic_loss_liquidates_and_clamps() {
        let mut ledger = CapitalLedger::new(100.0, false);
        let id = ledger.reserve(1000.0).unwrap();
        let s = ledger.settle(id, -15.0, 0.0).unwrap();
        assert!(s.liquidated);
        assert_relative_eq!(s.pnl_usd, -100.0);
        assert_eq!(ledger.equity(), 0.0);
        assert_eq!(ledger.state(), LedgerState::Liquidated);
        assert_eq!(ledger.reserve(10.0), Err(LedgerRejection::Liquidated));
    }

    #[test]
    fn settle_unknown_id_is_none() {
        let mut ledger = CapitalLedger::new(100.0, true);
        assert!(ledger.settle(PositionId(42), 1.0, 0.0).is_none());
    }

    #[test]
    fn abandon_all_drops_locks() {
        let mut ledger = CapitalLedger::new(100.0, false);
        ledger.reserve(10.0).unwrap();
        ledger.reserve(20.0).unwrap();
        assert_eq!(ledger.abandon_all(), 2);
        assert_eq!(ledger.locked_total(), 0.0);
        assert_relative_eq!(ledger.equity(), 100.0);
    }
}
