//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::domain::backtest::{BacktestConfig, BacktestJob, BacktestResult, CancelToken, run_batch};
use crate::domain::config_validation::{parse_date, validate_backtest_config, validate_data_config};
use crate::domain::error::PinetraderError;
use crate::domain::script::Script;
use crate::domain::script_parser;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::ReportPort;

pub const DEFAULT_TIMEFRAME: &str = "1D";
pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;
pub const DEFAULT_POSITION_SIZE: f64 = 100.0;
pub const DEFAULT_COMMISSION_PERCENT: f64 = 0.1;

#[derive(Parser, Debug)]
#[command(name = "pinetrader", about = "Backtester for Pine-style strategy scripts")]
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
        #[arg(short, long)]
        script: PathBuf,
        /// Write the JSON result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Run a single symbol, overriding the configured list
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Parse a strategy script and list what it declares
    Validate {
        #[arg(short, long)]
        script: PathBuf,
    },
    /// List symbols with bar files for the configured timeframe
    Symbols {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        timeframe: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            script,
            output,
            symbol,
        } => run_backtest(&config, &script, output.as_deref(), symbol.as_deref()),
        Command::Validate { script } => run_validate(&script),
        Command::Symbols { config, timeframe } => run_symbols(&config, timeframe.as_deref()),
    }
}

fn fail(err: &PinetraderError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

/// Read and parse a script, printing parse errors with the offending line.
pub fn load_script(path: &Path) -> Result<Script, ExitCode> {
    let source = fs::read_to_string(path).map_err(|e| {
        eprintln!("error: failed to read {}: {}", path.display(), e);
        ExitCode::from(&PinetraderError::Io(e))
    })?;

    script_parser::parse(&source).map_err(|e| {
        eprintln!("error: {}", e.display_with_context(&source));
        ExitCode::from(&PinetraderError::ScriptParse(e))
    })
}

/// Build the run configuration for one symbol. Expects a config that has
/// already passed `validate_backtest_config`.
pub fn build_backtest_config(
    adapter: &dyn ConfigPort,
    symbol: &str,
) -> Result<BacktestConfig, PinetraderError> {
    let start_str = adapter.get_string("backtest", "start_date").ok_or_else(|| {
        PinetraderError::ConfigMissing {
            section: "backtest".into(),
            key: "start_date".into(),
        }
    })?;
    let start_date = parse_date(&start_str, "start_date")?;
    let end_date = match adapter
        .get_string("backtest", "end_date")
        .filter(|s| !s.trim().is_empty())
    {
        Some(s) => Some(parse_date(&s, "end_date")?),
        None => None,
    };

    Ok(BacktestConfig {
        symbol: symbol.to_string(),
        timeframe: resolve_timeframe(None, adapter),
        start_date,
        end_date,
        initial_capital: adapter.get_double("backtest", "initial_capital", DEFAULT_INITIAL_CAPITAL),
        position_size_pct: adapter.get_double("backtest", "position_size", DEFAULT_POSITION_SIZE),
        commission_pct: adapter.get_double(
            "backtest",
            "commission_percent",
            DEFAULT_COMMISSION_PERCENT,
        ),
    })
}

pub fn resolve_symbols(symbol_override: Option<&str>, config: &dyn ConfigPort) -> Vec<String> {
    if let Some(s) = symbol_override {
        return vec![s.trim().to_string()];
    }

    if let Some(symbols_str) = config.get_string("backtest", "symbols") {
        let symbols: Vec<String> = symbols_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !symbols.is_empty() {
            return symbols;
        }
    }

    config
        .get_string("backtest", "symbol")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .into_iter()
        .collect()
}

pub fn resolve_timeframe(timeframe_override: Option<&str>, config: &dyn ConfigPort) -> String {
    timeframe_override
        .map(str::to_string)
        .or_else(|| config.get_string("backtest", "timeframe"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_TIMEFRAME.to_string())
}

/// Only the simulated execution path exists.
pub fn check_simulation_mode(config: &dyn ConfigPort) -> Result<(), PinetraderError> {
    if config.get_bool("backtest", "simulation_mode", true) {
        Ok(())
    } else {
        Err(PinetraderError::LiveExecutionUnsupported)
    }
}

fn data_directory(config: &dyn ConfigPort) -> Result<PathBuf, PinetraderError> {
    validate_data_config(config)?;
    let dir = config
        .get_string("data", "directory")
        .ok_or_else(|| PinetraderError::ConfigMissing {
            section: "data".into(),
            key: "directory".into(),
        })?;
    Ok(PathBuf::from(dir.trim()))
}

fn run_backtest(
    config_path: &Path,
    script_path: &Path,
    output_path: Option<&Path>,
    symbol_override: Option<&str>,
) -> ExitCode {
    // Stage 1: Load and validate config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Err(e) = validate_backtest_config(&adapter).and_then(|_| check_simulation_mode(&adapter))
    {
        return fail(&e);
    }
    let data_dir = match data_directory(&adapter) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };

    // Stage 2: Parse script
    eprintln!("Loading script from {}", script_path.display());
    let script = match load_script(script_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    if let Some(title) = &script.title {
        eprintln!("Strategy: {}", title);
    }

    // Stage 3: Build one run configuration per symbol
    let symbols = resolve_symbols(symbol_override, &adapter);
    let mut configs = Vec::with_capacity(symbols.len());
    for symbol in &symbols {
        match build_backtest_config(&adapter, symbol) {
            Ok(c) => configs.push(c),
            Err(e) => return fail(&e),
        }
    }

    let data_port = CsvAdapter::new(data_dir);
    run_backtest_pipeline(&data_port, &script, configs, output_path)
}

/// Fetch bars, run every configured symbol and report the results.
///
/// Exits with the code of the first failed run, after writing the report for
/// the runs that succeeded.
pub fn run_backtest_pipeline(
    data_port: &dyn DataPort,
    script: &Script,
    configs: Vec<BacktestConfig>,
    output_path: Option<&Path>,
) -> ExitCode {
    if configs.is_empty() {
        eprintln!("error: no symbols configured");
        return ExitCode::from(2);
    }

    // Stage 4: Fetch bars
    let mut failures: Vec<(String, PinetraderError)> = Vec::new();
    let mut jobs = Vec::with_capacity(configs.len());
    for config in configs {
        match data_port.fetch_bars(&config.symbol, &config.timeframe) {
            Ok(bars) => {
                eprintln!("  {}: {} bars loaded", config.symbol, bars.len());
                jobs.push(BacktestJob { config, bars });
            }
            Err(e) => {
                eprintln!("warning: skipping {} ({})", config.symbol, e);
                failures.push((config.symbol, e));
            }
        }
    }

    // Stage 5: Run
    eprintln!("Running backtest: {} symbols", jobs.len());
    let cancel = CancelToken::new();
    let outcomes = run_batch(script, &jobs, &cancel);

    let mut results: Vec<BacktestResult> = Vec::with_capacity(outcomes.len());
    for (job, outcome) in jobs.iter().zip(outcomes) {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                eprintln!("error: {}: {}", job.config.symbol, e);
                failures.push((job.config.symbol.clone(), e));
            }
        }
    }

    // Stage 6: Summary
    for result in &results {
        print_summary(result);
    }

    // Stage 7: Report
    if !results.is_empty() {
        let reporter = JsonReportAdapter::new();
        let written = match output_path {
            Some(path) => reporter
                .write(&results, &path.display().to_string())
                .map(|_| eprintln!("\nResults written to: {}", path.display())),
            None => reporter.render(&results).map(|json| println!("{}", json)),
        };
        if let Err(e) = written {
            return fail(&e);
        }
    }

    match failures.first() {
        Some((_, e)) => e.into(),
        None => ExitCode::SUCCESS,
    }
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    eprintln!("\n=== {} ({}) ===", result.symbol, result.timeframe);
    if result.partial {
        eprintln!("  (cancelled: partial result)");
    }
    eprintln!("Net Profit:       {:.2}%", m.net_profit_percent);
    eprintln!("Ending Capital:   {:.2}", result.ending_capital);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown_percent);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Total Trades:     {}", m.total_trades);
    eprintln!("Win Rate:         {:.1}%", m.win_rate);
    if m.profit_factor.is_finite() {
        eprintln!("Profit Factor:    {:.2}", m.profit_factor);
    } else {
        eprintln!("Profit Factor:    inf");
    }
    if let Some(pos) = &result.open_position {
        eprintln!("Open Position:    {} @ {:.2}", pos.side, pos.entry_price);
    }
    if !result.skipped_signals.is_empty() {
        eprintln!("Skipped Signals:  {}", result.skipped_signals.len());
    }
    if !result.monthly_returns.is_empty() {
        eprintln!("Monthly Returns:");
        for (month, pct) in &result.monthly_returns {
            eprintln!("  {}:        {:+.2}%", month, pct);
        }
    }
}

fn run_validate(script_path: &Path) -> ExitCode {
    eprintln!("Validating script: {}", script_path.display());
    let script = match load_script(script_path) {
        Ok(s) => s,
        Err(code) => return code,
    };

    if let Some(title) = &script.title {
        eprintln!("\nStrategy: {}", title);
    }

    eprintln!("\nIndicators:");
    for def in script.indicators() {
        eprintln!("  {} = {}", def.name, def.kind);
    }

    let conditions: Vec<&str> = script.conditions().map(|c| c.name.as_str()).collect();
    if !conditions.is_empty() {
        eprintln!("\nConditions: {}", conditions.join(", "));
    }

    eprintln!("\nActions:");
    for action in script.actions() {
        eprintln!("  line {}: {}", action.line, action.intent);
    }

    eprintln!("\nMinimum bars: {}", script.min_bars());
    eprintln!("Script is valid.");
    ExitCode::SUCCESS
}

fn run_symbols(config_path: &Path, timeframe_override: Option<&str>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let data_dir = match data_directory(&config) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };
    let timeframe = resolve_timeframe(timeframe_override, &config);

    let adapter = CsvAdapter::new(data_dir);
    let symbols = match adapter.list_symbols(&timeframe) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    if symbols.is_empty() {
        eprintln!("No symbols found for timeframe {}", timeframe);
    } else {
        for symbol in &symbols {
            println!("{}", symbol);
        }
        eprintln!("{} symbols found", symbols.len());
    }
    ExitCode::SUCCESS
}
