//! Strategy script AST.
//!
//! A parsed script is an ordered list of tagged statements:
//! - `IndicatorDef`: a named series computed once over all bars
//! - `ConditionDef`: a named boolean expression evaluated per bar
//! - `ActionDef`: an entry or exit intent bound to a trigger expression

use std::collections::HashMap;
use std::fmt;

use crate::domain::ohlcv::PriceField;
use crate::domain::position::Side;

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub title: Option<String>,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Indicator(IndicatorDef),
    Condition(ConditionDef),
    Action(ActionDef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorDef {
    pub name: String,
    pub kind: IndicatorKind,
    pub line: usize,
}

/// Input series of an indicator.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Price(PriceField),
    Series(String),
    Constant(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorKind {
    Sma { source: Source, length: usize },
    Ema { source: Source, length: usize },
    Wma { source: Source, length: usize },
    Rsi { source: Source, length: usize },
    Crossover { a: Source, b: Source },
    Crossunder { a: Source, b: Source },
    Constant(f64),
}

impl IndicatorKind {
    /// Number of leading bars needed before the first defined value.
    pub fn warmup_window(&self) -> usize {
        match self {
            IndicatorKind::Sma { length, .. }
            | IndicatorKind::Ema { length, .. }
            | IndicatorKind::Wma { length, .. } => *length,
            IndicatorKind::Rsi { length, .. } => length.saturating_add(1),
            IndicatorKind::Crossover { .. } | IndicatorKind::Crossunder { .. } => 2,
            IndicatorKind::Constant(_) => 1,
        }
    }

    pub fn sources(&self) -> Vec<&Source> {
        match self {
            IndicatorKind::Sma { source, .. }
            | IndicatorKind::Ema { source, .. }
            | IndicatorKind::Wma { source, .. }
            | IndicatorKind::Rsi { source, .. } => vec![source],
            IndicatorKind::Crossover { a, b } | IndicatorKind::Crossunder { a, b } => vec![a, b],
            IndicatorKind::Constant(_) => Vec::new(),
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            IndicatorKind::Crossover { .. } | IndicatorKind::Crossunder { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionDef {
    pub name: String,
    pub expr: Expr,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

const EQ_EPSILON: f64 = 1e-9;

impl CmpOp {
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            CmpOp::Gt => left > right,
            CmpOp::Lt => left < right,
            CmpOp::Ge => left >= right,
            CmpOp::Le => left <= right,
            CmpOp::Eq => (left - right).abs() < EQ_EPSILON,
            CmpOp::Ne => (left - right).abs() >= EQ_EPSILON,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Price(PriceField),
    Name(String),
    Neg(Box<Expr>),
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizePolicy {
    /// Use the run's position_size_percent.
    Default,
    /// Percent of current capital.
    Percent(f64),
    /// Fixed number of units.
    Units(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Entry {
        id: String,
        side: Side,
        size: SizePolicy,
    },
    Exit {
        id: String,
        side: Side,
    },
    ExitAll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionDef {
    pub trigger: Expr,
    pub intent: Intent,
    pub line: usize,
}

impl Script {
    pub fn indicators(&self) -> impl Iterator<Item = &IndicatorDef> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Indicator(def) => Some(def),
            _ => None,
        })
    }

    pub fn conditions(&self) -> impl Iterator<Item = &ConditionDef> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Condition(def) => Some(def),
            _ => None,
        })
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionDef> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Action(def) => Some(def),
            _ => None,
        })
    }

    /// Bars needed before every declared indicator can be defined (1 when none).
    ///
    /// An average or RSI over another series starts counting only once that
    /// series is defined, so stacked windows add up: `sma(sma(close, 10), 10)`
    /// needs 19. Crossovers only need both inputs defined.
    pub fn min_bars(&self) -> usize {
        let mut windows: HashMap<&str, usize> = HashMap::new();
        let mut needed = 1;
        for def in self.indicators() {
            let lead = def
                .kind
                .sources()
                .iter()
                .map(|source| match source {
                    Source::Series(name) => windows.get(name.as_str()).copied().unwrap_or(1),
                    Source::Price(_) | Source::Constant(_) => 1,
                })
                .max()
                .unwrap_or(1);
            let window = if def.kind.is_boolean() {
                def.kind.warmup_window().max(lead)
            } else {
                def.kind.warmup_window().saturating_add(lead - 1)
            };
            windows.insert(def.name.as_str(), window);
            needed = needed.max(window);
        }
        needed
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Price(field) => write!(f, "{}", field),
            Source::Series(name) => write!(f, "{}", name),
            Source::Constant(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorKind::Sma { source, length } => write!(f, "sma({},{})", source, length),
            IndicatorKind::Ema { source, length } => write!(f, "ema({},{})", source, length),
            IndicatorKind::Wma { source, length } => write!(f, "wma({},{})", source, length),
            IndicatorKind::Rsi { source, length } => write!(f, "rsi({},{})", source, length),
            IndicatorKind::Crossover { a, b } => write!(f, "crossover({},{})", a, b),
            IndicatorKind::Crossunder { a, b } => write!(f, "crossunder({},{})", a, b),
            IndicatorKind::Constant(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            CmpOp::Gt => ">",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        };
        f.write_str(op)
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        };
        f.write_str(op)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(v) => write!(f, "{}", v),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Price(field) => write!(f, "{}", field),
            Expr::Name(name) => write!(f, "{}", name),
            Expr::Neg(inner) => write!(f, "-{}", inner),
            Expr::Arith { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expr::Compare { op, left, right } => write!(f, "({} {} {})", left, op, right),
            Expr::And(left, right) => write!(f, "({} and {})", left, right),
            Expr::Or(left, right) => write!(f, "({} or {})", left, right),
            Expr::Not(inner) => write!(f, "not {}", inner),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Entry { id, side, size } => {
                write!(f, "entry \"{}\" {}", id, side)?;
                match size {
                    SizePolicy::Default => Ok(()),
                    SizePolicy::Percent(p) => write!(f, " {}%", p),
                    SizePolicy::Units(u) => write!(f, " {} units", u),
                }
            }
            Intent::Exit { id, side } => write!(f, "close \"{}\" {}", id, side),
            Intent::ExitAll => write!(f, "close all"),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Indicator(def) => write!(f, "indicator {} = {}", def.name, def.kind),
            Statement::Condition(def) => write!(f, "condition {} = {}", def.name, def.expr),
            Statement::Action(def) => write!(f, "when {} -> {}", def.trigger, def.intent),
        }
    }
}
