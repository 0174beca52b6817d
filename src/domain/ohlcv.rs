//! OHLCV bar representation.

use chrono::NaiveDateTime;
use std::fmt;

use crate::domain::error::PinetraderError;

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A price field of a bar, addressable from scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
    Volume,
    Hl2,
    Hlc3,
    Ohlc4,
}

impl PriceField {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "open" => Some(PriceField::Open),
            "high" => Some(PriceField::High),
            "low" => Some(PriceField::Low),
            "close" => Some(PriceField::Close),
            "volume" => Some(PriceField::Volume),
            "hl2" => Some(PriceField::Hl2),
            "hlc3" => Some(PriceField::Hlc3),
            "ohlc4" => Some(PriceField::Ohlc4),
            _ => None,
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PriceField::Open => "open",
            PriceField::High => "high",
            PriceField::Low => "low",
            PriceField::Close => "close",
            PriceField::Volume => "volume",
            PriceField::Hl2 => "hl2",
            PriceField::Hlc3 => "hlc3",
            PriceField::Ohlc4 => "ohlc4",
        };
        f.write_str(name)
    }
}

impl Bar {
    pub fn price(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
            PriceField::Volume => self.volume,
            PriceField::Hl2 => (self.high + self.low) / 2.0,
            PriceField::Hlc3 => self.typical_price(),
            PriceField::Ohlc4 => (self.open + self.high + self.low + self.close) / 4.0,
        }
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Reject series whose timestamps are not strictly increasing.
pub fn check_ordering(bars: &[Bar]) -> Result<(), PinetraderError> {
    for (i, pair) in bars.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(PinetraderError::UnorderedBars { index: i + 1 });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_bar(day: u32) -> Bar {
        Bar {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close: 105.0,
            volume: 50_000.0,
        }
    }

    #[test]
    fn typical_price() {
        let bar = sample_bar(15);
        let expected = (110.0 + 90.0 + 105.0) / 3.0;
        assert!((bar.typical_price() - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn derived_price_fields() {
        let bar = sample_bar(15);
        assert!((bar.price(PriceField::Hl2) - 100.0).abs() < f64::EPSILON);
        assert!((bar.price(PriceField::Ohlc4) - 101.25).abs() < f64::EPSILON);
        assert!((bar.price(PriceField::Volume) - 50_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn price_field_names_round_trip() {
        for name in ["open", "high", "low", "close", "volume", "hl2", "hlc3", "ohlc4"] {
            let field = PriceField::from_name(name).unwrap();
            assert_eq!(field.to_string(), name);
        }
        assert_eq!(PriceField::from_name("price"), None);
    }

    #[test]
    fn ordering_accepts_increasing() {
        let bars = vec![sample_bar(1), sample_bar(2), sample_bar(3)];
        assert!(check_ordering(&bars).is_ok());
    }

    #[test]
    fn ordering_rejects_duplicate_timestamp() {
        let bars = vec![sample_bar(1), sample_bar(2), sample_bar(2)];
        let err = check_ordering(&bars).unwrap_err();
        assert!(matches!(err, PinetraderError::UnorderedBars { index: 2 }));
    }

    #[test]
    fn ordering_empty_and_single() {
        assert!(check_ordering(&[]).is_ok());
        assert!(check_ordering(&[sample_bar(1)]).is_ok());
    }
}
