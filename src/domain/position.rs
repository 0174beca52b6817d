//! Position tracking and the closed-trade record.

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn direction(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("Long"),
            Side::Short => f.write_str("Short"),
        }
    }
}

/// Serialize a timestamp as an ISO-8601 calendar date.
pub fn serialize_iso_date<S: Serializer>(
    timestamp: &NaiveDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&timestamp.date().format("%Y-%m-%d"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub side: Side,
    #[serde(rename = "entry_date", serialize_with = "serialize_iso_date")]
    pub entry_time: NaiveDateTime,
    pub entry_price: f64,
    pub size: f64,
    pub entry_commission: f64,
}

impl Position {
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.size * (price - self.entry_price) * self.side.direction()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub id: usize,
    #[serde(rename = "entry_date", serialize_with = "serialize_iso_date")]
    pub entry_time: NaiveDateTime,
    #[serde(rename = "exit_date", serialize_with = "serialize_iso_date")]
    pub exit_time: NaiveDateTime,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub profit_percent: f64,
    pub profit_amount: f64,
    #[serde(skip)]
    pub size: f64,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.profit_amount > 0.0
    }

    pub fn duration_days(&self) -> f64 {
        (self.exit_time - self.entry_time).num_seconds() as f64 / 86_400.0
    }
}
