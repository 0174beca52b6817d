//! Per-bar signal evaluation.
//!
//! Condition and trigger expressions are compiled once into a flat postfix
//! program over a fixed instruction set (`Op`), then run by a small stack
//! interpreter for every bar. Values are three-valued: an undefined input
//! makes comparisons undefined, `and`/`or` follow Kleene logic, and a trigger
//! fires only when it is definitely true.

use crate::domain::error::{ParseError, PinetraderError};
use crate::domain::indicator::{IndicatorTable, Series};
use crate::domain::ohlcv::{Bar, PriceField};
use crate::domain::position::Side;
use crate::domain::script::{ArithOp, CmpOp, Expr, Intent, Script, SizePolicy};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    Const(f64),
    Bool(bool),
    Price(PriceField),
    /// Numeric indicator column.
    Column(usize),
    /// Boolean indicator column.
    Flag(usize),
    /// Result of an earlier condition on the same bar.
    Condition(usize),
    Neg,
    Arith(ArithOp),
    Cmp(CmpOp),
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Num(Option<f64>),
    Flag(Option<bool>),
}

impl Value {
    fn num(self) -> Option<f64> {
        match self {
            Value::Num(v) => v,
            Value::Flag(_) => None,
        }
    }

    fn flag(self) -> Option<bool> {
        match self {
            Value::Flag(v) => v,
            Value::Num(_) => None,
        }
    }
}

fn kleene_and(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn kleene_or(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn arith(op: ArithOp, l: f64, r: f64) -> Option<f64> {
    let v = match op {
        ArithOp::Add => l + r,
        ArithOp::Sub => l - r,
        ArithOp::Mul => l * r,
        ArithOp::Div if r == 0.0 => return None,
        ArithOp::Div => l / r,
    };
    v.is_finite().then_some(v)
}

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    ops: Vec<Op>,
}

struct Resolver<'a> {
    table: &'a IndicatorTable,
    conditions: &'a [String],
    line: usize,
}

impl Resolver<'_> {
    fn resolve(&self, name: &str) -> Result<Op, PinetraderError> {
        if let Some(slot) = self.conditions.iter().position(|c| c == name) {
            return Ok(Op::Condition(slot));
        }
        match self.table.column_index(name) {
            Some(i) => match self.table.column(i) {
                Some(Series::Flag(_)) => Ok(Op::Flag(i)),
                _ => Ok(Op::Column(i)),
            },
            None => Err(ParseError::new(self.line, format!("undeclared name '{}'", name)).into()),
        }
    }
}

impl Program {
    fn compile(expr: &Expr, resolver: &Resolver<'_>) -> Result<Self, PinetraderError> {
        let mut ops = Vec::new();
        emit(expr, resolver, &mut ops)?;
        Ok(Self { ops })
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    fn run(&self, ctx: &BarContext<'_>, stack: &mut Vec<Value>) -> Value {
        stack.clear();
        for op in &self.ops {
            let value = match *op {
                Op::Const(v) => Value::Num(Some(v)),
                Op::Bool(b) => Value::Flag(Some(b)),
                Op::Price(field) => Value::Num(Some(ctx.bar.price(field))),
                Op::Column(i) => Value::Num(ctx.table.column(i).and_then(|s| s.numeric_at(ctx.index))),
                Op::Flag(i) => Value::Flag(ctx.table.column(i).and_then(|s| s.flag_at(ctx.index))),
                Op::Condition(slot) => Value::Flag(ctx.conditions.get(slot).copied().flatten()),
                Op::Neg => {
                    let v = pop(stack).num();
                    Value::Num(v.map(|x| -x))
                }
                Op::Not => {
                    let v = pop(stack).flag();
                    Value::Flag(v.map(|b| !b))
                }
                Op::Arith(op) => {
                    let r = pop(stack).num();
                    let l = pop(stack).num();
                    Value::Num(l.zip(r).and_then(|(l, r)| arith(op, l, r)))
                }
                Op::Cmp(op) => {
                    let r = pop(stack).num();
                    let l = pop(stack).num();
                    Value::Flag(l.zip(r).map(|(l, r)| op.apply(l, r)))
                }
                Op::And => {
                    let r = pop(stack).flag();
                    let l = pop(stack).flag();
                    Value::Flag(kleene_and(l, r))
                }
                Op::Or => {
                    let r = pop(stack).flag();
                    let l = pop(stack).flag();
                    Value::Flag(kleene_or(l, r))
                }
            };
            stack.push(value);
        }
        pop(stack)
    }
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().unwrap_or(Value::Flag(None))
}

fn emit(expr: &Expr, resolver: &Resolver<'_>, ops: &mut Vec<Op>) -> Result<(), PinetraderError> {
    match expr {
        Expr::Number(v) => ops.push(Op::Const(*v)),
        Expr::Bool(b) => ops.push(Op::Bool(*b)),
        Expr::Price(field) => ops.push(Op::Price(*field)),
        Expr::Name(name) => ops.push(resolver.resolve(name)?),
        Expr::Neg(inner) => {
            emit(inner, resolver, ops)?;
            ops.push(Op::Neg);
        }
        Expr::Not(inner) => {
            emit(inner, resolver, ops)?;
            ops.push(Op::Not);
        }
        Expr::Arith { op, left, right } => {
            emit(left, resolver, ops)?;
            emit(right, resolver, ops)?;
            ops.push(Op::Arith(*op));
        }
        Expr::Compare { op, left, right } => {
            emit(left, resolver, ops)?;
            emit(right, resolver, ops)?;
            ops.push(Op::Cmp(*op));
        }
        Expr::And(left, right) => {
            emit(left, resolver, ops)?;
            emit(right, resolver, ops)?;
            ops.push(Op::And);
        }
        Expr::Or(left, right) => {
            emit(left, resolver, ops)?;
            emit(right, resolver, ops)?;
            ops.push(Op::Or);
        }
    }
    Ok(())
}

struct BarContext<'a> {
    bar: &'a Bar,
    index: usize,
    table: &'a IndicatorTable,
    conditions: &'a [Option<bool>],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntrySignal {
    pub side: Side,
    pub size: SizePolicy,
}

/// Everything the strategy asks for on one bar.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BarSignal {
    pub exit_long: bool,
    pub exit_short: bool,
    pub entry: Option<EntrySignal>,
}

struct CompiledAction {
    trigger: Program,
    intent: Intent,
}

/// A script's conditions and actions, compiled against an indicator table.
pub struct CompiledScript {
    conditions: Vec<Program>,
    actions: Vec<CompiledAction>,
}

impl CompiledScript {
    pub fn compile(script: &Script, table: &IndicatorTable) -> Result<Self, PinetraderError> {
        let mut condition_names: Vec<String> = Vec::new();
        let mut conditions = Vec::new();
        for def in script.conditions() {
            let resolver = Resolver {
                table,
                conditions: &condition_names,
                line: def.line,
            };
            conditions.push(Program::compile(&def.expr, &resolver)?);
            condition_names.push(def.name.clone());
        }

        let mut actions = Vec::new();
        for def in script.actions() {
            let resolver = Resolver {
                table,
                conditions: &condition_names,
                line: def.line,
            };
            actions.push(CompiledAction {
                trigger: Program::compile(&def.trigger, &resolver)?,
                intent: def.intent.clone(),
            });
        }

        Ok(Self {
            conditions,
            actions,
        })
    }

    pub fn evaluate(&self, bars: &[Bar], table: &IndicatorTable) -> Vec<BarSignal> {
        let mut stack = Vec::new();
        let mut slots: Vec<Option<bool>> = Vec::with_capacity(self.conditions.len());

        bars.iter()
            .enumerate()
            .map(|(index, bar)| {
                slots.clear();
                for program in &self.conditions {
                    let ctx = BarContext {
                        bar,
                        index,
                        table,
                        conditions: &slots,
                    };
                    let value = program.run(&ctx, &mut stack).flag();
                    slots.push(value);
                }

                let ctx = BarContext {
                    bar,
                    index,
                    table,
                    conditions: &slots,
                };
                let mut signal = BarSignal::default();
                for action in &self.actions {
                    if action.trigger.run(&ctx, &mut stack).flag() != Some(true) {
                        continue;
                    }
                    match &action.intent {
                        Intent::Exit { side: Side::Long, .. } => signal.exit_long = true,
                        Intent::Exit { side: Side::Short, .. } => signal.exit_short = true,
                        Intent::ExitAll => {
                            signal.exit_long = true;
                            signal.exit_short = true;
                        }
                        Intent::Entry { side, size, .. } => {
                            if signal.entry.is_none() {
                                signal.entry = Some(EntrySignal {
                                    side: *side,
                                    size: *size,
                                });
                            }
                        }
                    }
                }
                signal
            })
            .collect()
    }
}

/// Evaluate the script's actions on every bar.
pub fn evaluate_signals(
    script: &Script,
    bars: &[Bar],
    table: &IndicatorTable,
) -> Result<Vec<BarSignal>, PinetraderError> {
    let compiled = CompiledScript::compile(script, table)?;
    Ok(compiled.evaluate(bars, table))
}
