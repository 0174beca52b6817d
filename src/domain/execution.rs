//! Trade simulation.
//!
//! Replays the per-bar signals in order, filling at the signal bar's close.
//! Exits are applied before entries on the same bar, at most one position is
//! open at a time, and realized capital never goes negative.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::debug;

use super::ohlcv::Bar;
use super::position::{Position, Side, Trade, serialize_iso_date};
use super::script::SizePolicy;
use super::signal::{BarSignal, EntrySignal};

/// Capital, sizing and commission parameters for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub initial_capital: f64,
    pub position_size_pct: f64,
    pub commission_pct: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            initial_capital: 10_000.0,
            position_size_pct: 100.0,
            commission_pct: 0.1,
        }
    }
}

/// Cooperative cancellation flag, checked between bars.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Commission on a fill: trade_value * pct / 100.
pub fn calculate_commission(trade_value: f64, config: &ExecutionConfig) -> f64 {
    trade_value * config.commission_pct / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Sizing produced zero or negative units.
    NoApplicableSize,
    /// Notional or commission exceeds available capital.
    InsufficientCapital,
    /// Settling the exit would leave negative capital; the position stays open.
    CapitalWouldGoNegative,
}

/// A non-fatal per-bar anomaly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSignal {
    #[serde(rename = "date", serialize_with = "serialize_iso_date")]
    pub timestamp: NaiveDateTime,
    pub side: Side,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryResult {
    Entered { size: f64, commission: f64 },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitResult {
    Closed(Trade),
    Skipped(SkipReason),
}

/// Realized capital, the open position and the ledger.
#[derive(Debug, Clone)]
pub struct Account {
    pub capital: f64,
    pub position: Option<Position>,
    pub trades: Vec<Trade>,
    /// Initial capital, then capital after each closed trade.
    pub capital_curve: Vec<f64>,
}

impl Account {
    pub fn new(initial_capital: f64) -> Self {
        Account {
            capital: initial_capital,
            position: None,
            trades: Vec::new(),
            capital_curve: vec![initial_capital],
        }
    }

    /// Open a position at `price`.
    ///
    /// Percent sizing takes `pct` of current capital as notional; unit sizing
    /// uses `units * price`. The entry commission leaves capital immediately.
    pub fn enter(
        &mut self,
        side: Side,
        size: SizePolicy,
        price: f64,
        timestamp: NaiveDateTime,
        config: &ExecutionConfig,
    ) -> EntryResult {
        let notional = match size {
            SizePolicy::Default => self.capital * config.position_size_pct / 100.0,
            SizePolicy::Percent(pct) => self.capital * pct / 100.0,
            SizePolicy::Units(units) => units * price,
        };
        if price <= 0.0 || notional <= 0.0 || !notional.is_finite() {
            return EntryResult::Skipped(SkipReason::NoApplicableSize);
        }

        let commission = calculate_commission(notional, config);
        if notional > self.capital || commission > self.capital {
            return EntryResult::Skipped(SkipReason::InsufficientCapital);
        }

        let units = notional / price;
        self.capital -= commission;
        self.position = Some(Position {
            side,
            entry_time: timestamp,
            entry_price: price,
            size: units,
            entry_commission: commission,
        });

        EntryResult::Entered {
            size: units,
            commission,
        }
    }

    /// Close the open position at `price`.
    pub fn exit(
        &mut self,
        price: f64,
        timestamp: NaiveDateTime,
        config: &ExecutionConfig,
    ) -> Option<ExitResult> {
        let position = self.position.as_ref()?;

        let exit_commission = calculate_commission(position.size * price, config);
        let profit_amount = position.unrealized_pnl(price) - exit_commission;
        if self.capital + profit_amount < 0.0 {
            return Some(ExitResult::Skipped(SkipReason::CapitalWouldGoNegative));
        }

        let entry_notional = position.size * position.entry_price;
        let trade = Trade {
            id: self.trades.len() + 1,
            entry_time: position.entry_time,
            exit_time: timestamp,
            side: position.side,
            entry_price: position.entry_price,
            exit_price: price,
            profit_percent: profit_amount * 100.0 / entry_notional,
            profit_amount,
            size: position.size,
        };

        self.capital += profit_amount;
        self.capital_curve.push(self.capital);
        self.trades.push(trade.clone());
        self.position = None;
        Some(ExitResult::Closed(trade))
    }
}

/// Everything a simulation produced.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub trades: Vec<Trade>,
    pub open_position: Option<Position>,
    pub ending_capital: f64,
    pub capital_curve: Vec<f64>,
    pub skipped: Vec<SkippedSignal>,
    /// True when the run was cancelled before the last bar.
    pub partial: bool,
}

fn wants_exit(signal: &BarSignal, side: Side) -> bool {
    match side {
        Side::Long => signal.exit_long,
        Side::Short => signal.exit_short,
    }
}

/// Replay `signals` over `bars`.
pub fn simulate(
    bars: &[Bar],
    signals: &[BarSignal],
    config: &ExecutionConfig,
    cancel: &CancelToken,
) -> SimulationOutcome {
    let mut account = Account::new(config.initial_capital);
    let mut skipped = Vec::new();
    let mut partial = false;

    for (bar, signal) in bars.iter().zip(signals) {
        if cancel.is_cancelled() {
            debug!(timestamp = %bar.timestamp, "simulation cancelled");
            partial = true;
            break;
        }

        if let Some(side) = account.position.as_ref().map(|p| p.side)
            && wants_exit(signal, side)
        {
            match account.exit(bar.close, bar.timestamp, config) {
                Some(ExitResult::Closed(trade)) => debug!(
                    id = trade.id,
                    side = %trade.side,
                    exit_price = trade.exit_price,
                    profit_amount = trade.profit_amount,
                    "closed position"
                ),
                Some(ExitResult::Skipped(reason)) => {
                    debug!(timestamp = %bar.timestamp, ?reason, "exit skipped");
                    skipped.push(SkippedSignal {
                        timestamp: bar.timestamp,
                        side,
                        reason,
                    });
                }
                None => {}
            }
        }

        if let Some(EntrySignal { side, size }) = signal.entry
            && account.position.is_none()
        {
            match account.enter(side, size, bar.close, bar.timestamp, config) {
                EntryResult::Entered { size, commission } => debug!(
                    timestamp = %bar.timestamp,
                    %side,
                    price = bar.close,
                    size,
                    commission,
                    "opened position"
                ),
                EntryResult::Skipped(reason) => {
                    debug!(timestamp = %bar.timestamp, ?reason, "entry skipped");
                    skipped.push(SkippedSignal {
                        timestamp: bar.timestamp,
                        side,
                        reason,
                    });
                }
            }
        }
    }

    SimulationOutcome {
        trades: account.trades,
        open_position: account.position,
        ending_capital: account.capital,
        capital_curve: account.capital_curve,
        skipped,
        partial,
    }
}
