//! Core domain types and logic.

pub mod ohlcv;
pub mod position;
pub mod script;
pub mod script_parser;
pub mod indicator;
pub mod signal;
pub mod execution;
pub mod metrics;
pub mod backtest;
pub mod config_validation;
pub mod error;
