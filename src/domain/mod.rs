//! Core domain types and logic.

pub mod bar;
pub mod asset_data;
pub mod signal;
pub mod strategy;
pub mod order;
pub mod position;
pub mod ledger;
pub mod metrics;
pub mod diagnostics;
pub mod backtest;
pub mod config_validation;
pub mod error;
