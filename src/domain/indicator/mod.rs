//! Indicator engine.
//!
//! Every declared indicator is computed once over the full bar sequence, in
//! declaration order, before any signal is evaluated:
//! - `Series`: one value per bar, `None` where the value is undefined
//! - `IndicatorTable`: named series aligned by bar index
//! - `compute_indicators`: evaluates a script's indicator statements

pub mod cross;
pub mod ema;
pub mod rsi;
pub mod sma;
pub mod wma;

use std::collections::HashMap;

use crate::domain::ohlcv::Bar;
use crate::domain::script::{IndicatorKind, Script, Source};

#[derive(Debug, Clone, PartialEq)]
pub enum Series {
    Numeric(Vec<Option<f64>>),
    Flag(Vec<Option<bool>>),
}

impl Series {
    pub fn len(&self) -> usize {
        match self {
            Series::Numeric(v) => v.len(),
            Series::Flag(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn numeric_at(&self, index: usize) -> Option<f64> {
        match self {
            Series::Numeric(v) => v.get(index).copied().flatten(),
            Series::Flag(_) => None,
        }
    }

    pub fn flag_at(&self, index: usize) -> Option<bool> {
        match self {
            Series::Flag(v) => v.get(index).copied().flatten(),
            Series::Numeric(_) => None,
        }
    }

    pub fn as_numeric(&self) -> Option<&[Option<f64>]> {
        match self {
            Series::Numeric(v) => Some(v),
            Series::Flag(_) => None,
        }
    }
}

/// Indicator name -> per-bar series, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct IndicatorTable {
    columns: Vec<Series>,
    index: HashMap<String, usize>,
}

impl IndicatorTable {
    pub fn insert(&mut self, name: &str, series: Series) {
        match self.index.get(name) {
            Some(&i) => self.columns[i] = series,
            None => {
                self.index.insert(name.to_string(), self.columns.len());
                self.columns.push(series);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Series> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn column(&self, index: usize) -> Option<&Series> {
        self.columns.get(index)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Apply `calc` to every maximal run of defined values; gaps stay undefined.
pub(crate) fn over_defined_runs<F>(source: &[Option<f64>], calc: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Vec<Option<f64>>,
{
    let mut out = vec![None; source.len()];
    let mut i = 0;
    while i < source.len() {
        if source[i].is_none() {
            i += 1;
            continue;
        }
        let start = i;
        let run: Vec<f64> = source[start..].iter().map_while(|v| *v).collect();
        i = start + run.len();
        for (offset, value) in calc(&run).into_iter().enumerate() {
            out[start + offset] = value;
        }
    }
    out
}

fn resolve_source(source: &Source, bars: &[Bar], table: &IndicatorTable) -> Vec<Option<f64>> {
    match source {
        Source::Price(field) => bars.iter().map(|b| Some(b.price(*field))).collect(),
        Source::Constant(v) => vec![Some(*v); bars.len()],
        Source::Series(name) => table
            .get(name)
            .and_then(Series::as_numeric)
            .map(<[Option<f64>]>::to_vec)
            .unwrap_or_else(|| vec![None; bars.len()]),
    }
}

fn compute_series(kind: &IndicatorKind, bars: &[Bar], table: &IndicatorTable) -> Series {
    match kind {
        IndicatorKind::Sma { source, length } => {
            Series::Numeric(sma::calculate_sma(&resolve_source(source, bars, table), *length))
        }
        IndicatorKind::Ema { source, length } => {
            Series::Numeric(ema::calculate_ema(&resolve_source(source, bars, table), *length))
        }
        IndicatorKind::Wma { source, length } => {
            Series::Numeric(wma::calculate_wma(&resolve_source(source, bars, table), *length))
        }
        IndicatorKind::Rsi { source, length } => {
            Series::Numeric(rsi::calculate_rsi(&resolve_source(source, bars, table), *length))
        }
        IndicatorKind::Crossover { a, b } => Series::Flag(cross::calculate_crossover(
            &resolve_source(a, bars, table),
            &resolve_source(b, bars, table),
        )),
        IndicatorKind::Crossunder { a, b } => Series::Flag(cross::calculate_crossunder(
            &resolve_source(a, bars, table),
            &resolve_source(b, bars, table),
        )),
        IndicatorKind::Constant(v) => Series::Numeric(vec![Some(*v); bars.len()]),
    }
}

/// Compute every indicator the script declares over `bars`.
pub fn compute_indicators(script: &Script, bars: &[Bar]) -> IndicatorTable {
    let mut table = IndicatorTable::default();
    for def in script.indicators() {
        let series = compute_series(&def.kind, bars, &table);
        table.insert(&def.name, series);
    }
    table
}
