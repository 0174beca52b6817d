//! Configuration validation.
//!
//! Checks every run-configuration field before a backtest starts, naming the
//! offending section and key.

use crate::domain::error::PinetraderError;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), PinetraderError> {
    validate_initial_capital(config)?;
    validate_position_size(config)?;
    validate_commission(config)?;
    validate_timeframe(config)?;
    validate_dates(config)?;
    validate_symbols(config)?;
    validate_simulation_mode(config)?;
    Ok(())
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), PinetraderError> {
    require_non_empty(config, "data", "directory")?;
    Ok(())
}

fn invalid(key: &str, reason: impl Into<String>) -> PinetraderError {
    PinetraderError::ConfigInvalid {
        section: "backtest".to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn require_non_empty(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<String, PinetraderError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(PinetraderError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Read a numeric key, distinguishing "absent" from "not a number".
fn read_number(config: &dyn ConfigPort, key: &str) -> Result<Option<f64>, PinetraderError> {
    match config.get_string("backtest", key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| invalid(key, format!("'{}' is not a number", raw.trim()))),
    }
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), PinetraderError> {
    match read_number(config, "initial_capital")? {
        Some(v) if v <= 0.0 || !v.is_finite() => {
            Err(invalid("initial_capital", "initial_capital must be positive"))
        }
        _ => Ok(()),
    }
}

fn validate_position_size(config: &dyn ConfigPort) -> Result<(), PinetraderError> {
    match read_number(config, "position_size")? {
        Some(v) if !(0.0..=100.0).contains(&v) => Err(invalid(
            "position_size",
            "position_size must be a percentage between 0 and 100",
        )),
        _ => Ok(()),
    }
}

fn validate_commission(config: &dyn ConfigPort) -> Result<(), PinetraderError> {
    match read_number(config, "commission_percent")? {
        Some(v) if v < 0.0 || !v.is_finite() => Err(invalid(
            "commission_percent",
            "commission_percent must be non-negative",
        )),
        _ => Ok(()),
    }
}

fn validate_timeframe(config: &dyn ConfigPort) -> Result<(), PinetraderError> {
    match config.get_string("backtest", "timeframe") {
        Some(s) if s.trim().is_empty() || s.contains(['/', '\\']) => {
            Err(invalid("timeframe", "timeframe must be a plain label such as 1D"))
        }
        _ => Ok(()),
    }
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), PinetraderError> {
    let start_str = config.get_string("backtest", "start_date");
    let start_date = match start_str.as_deref() {
        None => {
            return Err(PinetraderError::ConfigMissing {
                section: "backtest".to_string(),
                key: "start_date".to_string(),
            });
        }
        Some(s) => parse_date(s, "start_date")?,
    };

    if let Some(end_str) = config.get_string("backtest", "end_date")
        && !end_str.trim().is_empty()
    {
        let end_date = parse_date(&end_str, "end_date")?;
        if start_date > end_date {
            return Err(invalid("start_date", "start_date must not be after end_date"));
        }
    }
    Ok(())
}

pub fn parse_date(value: &str, field: &str) -> Result<NaiveDate, PinetraderError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| invalid(field, format!("invalid {} format, expected YYYY-MM-DD", field)))
}

fn validate_symbols(config: &dyn ConfigPort) -> Result<(), PinetraderError> {
    let symbols = config.get_string("backtest", "symbols");
    let symbol = config.get_string("backtest", "symbol");

    match (symbols, symbol) {
        (Some(s), _) if s.split(',').any(|p| !p.trim().is_empty()) => Ok(()),
        (_, Some(s)) if !s.trim().is_empty() => Ok(()),
        _ => Err(PinetraderError::ConfigMissing {
            section: "backtest".to_string(),
            key: "symbol".to_string(),
        }),
    }
}

fn validate_simulation_mode(config: &dyn ConfigPort) -> Result<(), PinetraderError> {
    match config.get_string("backtest", "simulation_mode") {
        Some(raw)
            if !matches!(
                raw.trim().to_lowercase().as_str(),
                "true" | "yes" | "1" | "false" | "no" | "0"
            ) =>
        {
            Err(invalid("simulation_mode", "simulation_mode must be true or false"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const BASE: &str = "[backtest]\nsymbol = BTCUSD\nstart_date = 2020-01-01\n";

    fn with(extra: &str) -> FileConfigAdapter {
        make_config(&format!("{}{}", BASE, extra))
    }

    #[test]
    fn valid_backtest_config_passes() {
        let config = make_config(
            r#"
[backtest]
symbols = BTCUSD, ETHUSD
timeframe = 1D
start_date = 2020-01-01
end_date = 2023-12-31
initial_capital = 10000
position_size = 100
commission_percent = 0.1
simulation_mode = true
"#,
        );
        assert!(validate_backtest_config(&config).is_ok());
    }

    #[test]
    fn minimal_config_passes() {
        assert!(validate_backtest_config(&with("")).is_ok());
    }

    #[test]
    fn initial_capital_zero_fails() {
        let err = validate_backtest_config(&with("initial_capital = 0\n")).unwrap_err();
        assert!(
            matches!(err, PinetraderError::ConfigInvalid { key, .. } if key == "initial_capital")
        );
    }

    #[test]
    fn initial_capital_not_a_number_fails() {
        let err = validate_backtest_config(&with("initial_capital = lots\n")).unwrap_err();
        assert!(
            matches!(err, PinetraderError::ConfigInvalid { key, reason, .. } if key == "initial_capital" && reason.contains("lots"))
        );
    }

    #[test]
    fn position_size_above_100_fails() {
        let err = validate_backtest_config(&with("position_size = 150\n")).unwrap_err();
        assert!(
            matches!(err, PinetraderError::ConfigInvalid { key, .. } if key == "position_size")
        );
    }

    #[test]
    fn position_size_zero_passes() {
        assert!(validate_backtest_config(&with("position_size = 0\n")).is_ok());
    }

    #[test]
    fn commission_negative_fails() {
        let err = validate_backtest_config(&with("commission_percent = -0.1\n")).unwrap_err();
        assert!(
            matches!(err, PinetraderError::ConfigInvalid { key, .. } if key == "commission_percent")
        );
    }

    #[test]
    fn timeframe_with_path_separator_fails() {
        let err = validate_backtest_config(&with("timeframe = ../1D\n")).unwrap_err();
        assert!(matches!(err, PinetraderError::ConfigInvalid { key, .. } if key == "timeframe"));
    }

    #[test]
    fn invalid_start_date_format_fails() {
        let config = make_config("[backtest]\nsymbol = X\nstart_date = 2020/01/01\n");
        let err = validate_backtest_config(&config).unwrap_err();
        assert!(matches!(err, PinetraderError::ConfigInvalid { key, .. } if key == "start_date"));
    }

    #[test]
    fn missing_start_date_fails() {
        let config = make_config("[backtest]\nsymbol = X\n");
        let err = validate_backtest_config(&config).unwrap_err();
        assert!(matches!(err, PinetraderError::ConfigMissing { key, .. } if key == "start_date"));
    }

    #[test]
    fn end_date_is_optional() {
        assert!(validate_backtest_config(&with("end_date =\n")).is_ok());
    }

    #[test]
    fn start_date_after_end_date_fails() {
        let err = validate_backtest_config(&with("end_date = 2019-12-31\n")).unwrap_err();
        assert!(matches!(err, PinetraderError::ConfigInvalid { key, .. } if key == "start_date"));
    }

    #[test]
    fn missing_symbol_fails() {
        let config = make_config("[backtest]\nstart_date = 2020-01-01\n");
        let err = validate_backtest_config(&config).unwrap_err();
        assert!(matches!(err, PinetraderError::ConfigMissing { key, .. } if key == "symbol"));
    }

    #[test]
    fn empty_symbols_list_fails() {
        let config = make_config("[backtest]\nsymbols = , ,\nstart_date = 2020-01-01\n");
        assert!(validate_backtest_config(&config).is_err());
    }

    #[test]
    fn simulation_mode_must_be_boolean() {
        let err = validate_backtest_config(&with("simulation_mode = maybe\n")).unwrap_err();
        assert!(
            matches!(err, PinetraderError::ConfigInvalid { key, .. } if key == "simulation_mode")
        );
        assert!(validate_backtest_config(&with("simulation_mode = false\n")).is_ok());
    }

    #[test]
    fn data_directory_required() {
        let err = validate_data_config(&make_config("[data]\n")).unwrap_err();
        assert!(matches!(err, PinetraderError::ConfigMissing { section, key } if section == "data" && key == "directory"));
        assert!(validate_data_config(&make_config("[data]\ndirectory = ./data\n")).is_ok());
    }
}
