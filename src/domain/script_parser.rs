//! Strategy script parser.
//!
//! Line-oriented statement parser with a recursive descent expression parser.
//! Every identifier is resolved and type-checked here, so evaluation never
//! meets an unknown name. Errors carry the 1-based source line.

use std::collections::HashMap;

use crate::domain::error::ParseError;
use crate::domain::ohlcv::PriceField;
use crate::domain::position::Side;
use crate::domain::script::{
    ActionDef, ArithOp, CmpOp, ConditionDef, Expr, IndicatorDef, IndicatorKind, Intent, Script,
    SizePolicy, Source, Statement,
};

const RESERVED: &[&str] = &[
    "and", "or", "not", "true", "false", "if", "else", "for", "while", "var", "na", "strategy",
    "input", "sma", "ema", "wma", "rsi", "crossover", "crossunder", "plot",
];

const TYPE_KEYWORDS: &[&str] = &["float", "int", "bool"];

const COSMETIC_CALLS: &[&str] = &[
    "plot",
    "plotshape",
    "plotchar",
    "bgcolor",
    "hline",
    "fill",
    "alertcondition",
];

const INDICATOR_FUNCTIONS: &[&str] = &["sma", "ema", "wma", "rsi", "crossover", "crossunder"];

/// Largest accepted indicator length.
const MAX_LENGTH: f64 = u32::MAX as f64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    Comma,
    Assign,
    Op(&'static str),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(w) => format!("'{}'", w),
            Token::Number(v) => format!("'{}'", v),
            Token::Str(s) => format!("\"{}\"", s),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
            Token::Assign => "'='".to_string(),
            Token::Op(op) => format!("'{}'", op),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueType {
    Number,
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Symbol {
    Series,
    Constant(f64),
    Flag,
}

impl Symbol {
    fn value_type(self) -> ValueType {
        match self {
            Symbol::Series | Symbol::Constant(_) => ValueType::Number,
            Symbol::Flag => ValueType::Flag,
        }
    }
}

fn indicator_function(name: &str) -> Option<&str> {
    let base = name.strip_prefix("ta.").unwrap_or(name);
    INDICATOR_FUNCTIONS.iter().copied().find(|f| *f == base)
}

fn is_input_function(name: &str) -> bool {
    matches!(name, "input" | "input.int" | "input.float")
}

fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev_slash = false;
    for (i, ch) in line.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => {
                if ch == '"' || ch == '\'' {
                    quote = Some(ch);
                } else if ch == '/' && prev_slash {
                    return &line[..i - 1];
                }
            }
        }
        prev_slash = quote.is_none() && ch == '/';
    }
    line
}

fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn tokenize(text: &str, line: usize) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();

        if ch.is_whitespace() {
            i += 1;
            continue;
        }

        if ch.is_ascii_digit() || (ch == '.' && next.is_some_and(|c| c.is_ascii_digit())) {
            let start = i;
            let mut has_dot = false;
            while let Some(&c) = chars.get(i) {
                if c.is_ascii_digit() {
                    i += 1;
                } else if c == '.' && !has_dot {
                    has_dot = true;
                    i += 1;
                } else {
                    break;
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let value = literal
                .parse::<f64>()
                .map_err(|_| ParseError::new(line, format!("invalid number '{}'", literal)))?;
            tokens.push(Token::Number(value));
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let start = i;
            while let Some(&c) = chars.get(i) {
                let dotted = c == '.'
                    && chars
                        .get(i + 1)
                        .is_some_and(|n| n.is_alphabetic() || *n == '_');
                if c.is_alphanumeric() || c == '_' || dotted {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        if ch == '"' || ch == '\'' {
            let start = i + 1;
            i += 1;
            while chars.get(i).is_some_and(|c| *c != ch) {
                i += 1;
            }
            if i >= chars.len() {
                return Err(ParseError::new(line, "unterminated string literal"));
            }
            tokens.push(Token::Str(chars[start..i].iter().collect()));
            i += 1;
            continue;
        }

        let (token, width) = match (ch, next) {
            ('>', Some('=')) => (Token::Op(">="), 2),
            ('<', Some('=')) => (Token::Op("<="), 2),
            ('=', Some('=')) => (Token::Op("=="), 2),
            ('!', Some('=')) => (Token::Op("!="), 2),
            (':', Some('=')) => {
                return Err(ParseError::new(
                    line,
                    "reassignment with ':=' is not supported",
                ));
            }
            ('>', _) => (Token::Op(">"), 1),
            ('<', _) => (Token::Op("<"), 1),
            ('+', _) => (Token::Op("+"), 1),
            ('-', _) => (Token::Op("-"), 1),
            ('*', _) => (Token::Op("*"), 1),
            ('/', _) => (Token::Op("/"), 1),
            ('=', _) => (Token::Assign, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            ('[', _) => {
                return Err(ParseError::new(
                    line,
                    "history references with '[]' are not supported",
                ));
            }
            _ => {
                return Err(ParseError::new(
                    line,
                    format!("unexpected character '{}'", ch),
                ));
            }
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

#[derive(Debug, Clone)]
enum ArgValue {
    Expr(Expr, ValueType),
    Str(String),
    /// A dotted built-in constant such as `strategy.long`.
    Builtin(String),
}

#[derive(Debug, Clone)]
struct Arg {
    keyword: Option<String>,
    value: ArgValue,
}

struct PendingExit {
    statement: usize,
    id: String,
    line: usize,
}

struct OpenIf {
    condition: Expr,
    indent: usize,
    line: usize,
    body_len: usize,
}

#[derive(Default)]
struct ParserState {
    title: Option<String>,
    declared: bool,
    statements: Vec<Statement>,
    symbols: HashMap<String, Symbol>,
    /// Canonical indicator text -> declared name, for sharing identical calls.
    canonical: HashMap<String, String>,
    entries: HashMap<String, Side>,
    pending_exits: Vec<PendingExit>,
}

impl ParserState {
    fn check_new_name(&self, name: &str, line: usize) -> Result<(), ParseError> {
        if RESERVED.contains(&name) || PriceField::from_name(name).is_some() || name.contains('.')
        {
            return Err(ParseError::new(
                line,
                format!("'{}' is a reserved name", name),
            ));
        }
        if self.symbols.contains_key(name) {
            return Err(ParseError::new(
                line,
                format!("'{}' is already declared", name),
            ));
        }
        Ok(())
    }

    fn declare_indicator(&mut self, name: String, kind: IndicatorKind, line: usize) {
        let symbol = match &kind {
            IndicatorKind::Constant(v) => Symbol::Constant(*v),
            k if k.is_boolean() => Symbol::Flag,
            _ => Symbol::Series,
        };
        self.canonical
            .entry(kind.to_string())
            .or_insert_with(|| name.clone());
        self.symbols.insert(name.clone(), symbol);
        self.statements
            .push(Statement::Indicator(IndicatorDef { name, kind, line }));
    }

    /// Return the name of an existing identical indicator, or declare a new
    /// one named by its canonical text.
    fn intern_indicator(&mut self, kind: IndicatorKind, line: usize) -> String {
        let key = kind.to_string();
        if let Some(existing) = self.canonical.get(&key) {
            return existing.clone();
        }
        self.declare_indicator(key.clone(), kind, line);
        key
    }

    fn parse_statement(
        &mut self,
        tokens: &[Token],
        line: usize,
        indent: usize,
    ) -> Result<Option<OpenIf>, ParseError> {
        match tokens {
            [Token::Ident(word), rest @ ..] if word == "if" => {
                let mut parser = LineParser::new(rest, line, self);
                let (condition, ty) = parser.parse_expr()?;
                parser.expect_end()?;
                require(ty, ValueType::Flag, line, "'if' condition must be boolean")?;
                Ok(Some(OpenIf {
                    condition,
                    indent,
                    line,
                    body_len: 0,
                }))
            }
            [Token::Ident(word), ..] if word.starts_with("strategy.") => {
                self.parse_action(tokens, line, None)?;
                Ok(None)
            }
            [Token::Ident(word), Token::LParen, ..] if word == "strategy" => {
                self.parse_header(tokens, line)?;
                Ok(None)
            }
            [Token::Ident(word), Token::LParen, ..] if COSMETIC_CALLS.contains(&word.as_str()) => {
                Ok(None)
            }
            _ => {
                self.parse_assignment(tokens, line)?;
                Ok(None)
            }
        }
    }

    fn parse_header(&mut self, tokens: &[Token], line: usize) -> Result<(), ParseError> {
        if self.declared {
            return Err(ParseError::new(line, "duplicate strategy() declaration"));
        }
        let title = tokens.iter().find_map(|t| match t {
            Token::Str(s) => Some(s.clone()),
            _ => None,
        });
        self.title = title;
        self.declared = true;
        Ok(())
    }

    fn parse_assignment(&mut self, tokens: &[Token], line: usize) -> Result<(), ParseError> {
        let mut rest = tokens;
        while let [Token::Ident(word), tail @ ..] = rest
            && (word == "var" || TYPE_KEYWORDS.contains(&word.as_str()))
            && matches!(tail.first(), Some(Token::Ident(_)))
        {
            rest = tail;
        }

        let (name, rhs) = match rest {
            [Token::Ident(name), Token::Assign, rhs @ ..] => (name.clone(), rhs),
            [first, ..] => {
                return Err(ParseError::new(
                    line,
                    format!(
                        "expected a declaration, 'if', or strategy call, found {}",
                        first.describe()
                    ),
                ));
            }
            [] => return Err(ParseError::new(line, "empty statement")),
        };
        self.check_new_name(&name, line)?;

        match rhs {
            [] => Err(ParseError::new(line, "missing value after '='")),
            [Token::Number(v)] => {
                self.declare_indicator(name, IndicatorKind::Constant(*v), line);
                Ok(())
            }
            [Token::Op("-"), Token::Number(v)] => {
                self.declare_indicator(name, IndicatorKind::Constant(-*v), line);
                Ok(())
            }
            [Token::Ident(func), Token::LParen, ..] if is_input_function(func) => {
                let mut parser = LineParser::new(rhs, line, self);
                let value = parser.parse_input()?;
                parser.expect_end()?;
                self.declare_indicator(name, IndicatorKind::Constant(value), line);
                Ok(())
            }
            [Token::Ident(func), Token::LParen, ..]
                if indicator_function(func).is_some() && closing_paren(rhs, 1) == Some(rhs.len() - 1) =>
            {
                let mut parser = LineParser::new(rhs, line, self);
                let kind = parser.parse_indicator_call()?;
                parser.expect_end()?;
                self.declare_indicator(name, kind, line);
                Ok(())
            }
            _ => {
                let mut parser = LineParser::new(rhs, line, self);
                let (expr, ty) = parser.parse_expr()?;
                parser.expect_end()?;
                if ty != ValueType::Flag {
                    return Err(ParseError::new(
                        line,
                        format!(
                            "'{}' must be a boolean condition, an indicator call, or a constant",
                            name
                        ),
                    ));
                }
                self.symbols.insert(name.clone(), Symbol::Flag);
                self.statements
                    .push(Statement::Condition(ConditionDef { name, expr, line }));
                Ok(())
            }
        }
    }

    fn parse_action(
        &mut self,
        tokens: &[Token],
        line: usize,
        enclosing: Option<&Expr>,
    ) -> Result<(), ParseError> {
        let (func, args) = {
            let mut parser = LineParser::new(tokens, line, self);
            let func = parser.expect_ident()?;
            let args = parser.parse_call_args()?;
            parser.expect_end()?;
            (func, args)
        };

        let mut when: Option<Expr> = None;
        let mut positional: Vec<ArgValue> = Vec::new();
        let mut keywords: Vec<(String, ArgValue)> = Vec::new();
        for arg in args {
            match arg.keyword {
                Some(k) if k == "when" => match arg.value {
                    ArgValue::Expr(expr, ValueType::Flag) => when = Some(expr),
                    _ => return Err(ParseError::new(line, "'when' must be a boolean condition")),
                },
                Some(k) if k == "comment" || k == "alert_message" => {}
                Some(k) => keywords.push((k, arg.value)),
                None => positional.push(arg.value),
            }
        }

        let trigger = match (enclosing.cloned(), when) {
            (Some(cond), Some(w)) => Expr::And(Box::new(cond), Box::new(w)),
            (Some(cond), None) => cond,
            (None, Some(w)) => w,
            (None, None) => Expr::Bool(true),
        };

        let intent = match func.as_str() {
            "strategy.entry" => {
                let id = string_arg(positional.first(), line, "strategy.entry needs an id")?;
                let mut direction = positional.get(1).cloned();
                let mut size = SizePolicy::Default;
                for (key, value) in keywords {
                    match key.as_str() {
                        "direction" => direction = Some(value),
                        "qty" => {
                            if size != SizePolicy::Default {
                                return Err(ParseError::new(line, "use either qty or qty_percent"));
                            }
                            let units = self.constant_arg(&value, line, "qty")?;
                            if units <= 0.0 {
                                return Err(ParseError::new(line, "qty must be positive"));
                            }
                            size = SizePolicy::Units(units);
                        }
                        "qty_percent" => {
                            if size != SizePolicy::Default {
                                return Err(ParseError::new(line, "use either qty or qty_percent"));
                            }
                            let pct = self.constant_arg(&value, line, "qty_percent")?;
                            if pct <= 0.0 || pct > 100.0 {
                                return Err(ParseError::new(
                                    line,
                                    "qty_percent must be in (0, 100]",
                                ));
                            }
                            size = SizePolicy::Percent(pct);
                        }
                        other => {
                            return Err(ParseError::new(
                                line,
                                format!("unsupported strategy.entry argument '{}'", other),
                            ));
                        }
                    }
                }
                let side = match direction {
                    Some(ArgValue::Builtin(d)) if d == "strategy.long" => Side::Long,
                    Some(ArgValue::Builtin(d)) if d == "strategy.short" => Side::Short,
                    _ => {
                        return Err(ParseError::new(
                            line,
                            "strategy.entry direction must be strategy.long or strategy.short",
                        ));
                    }
                };
                match self.entries.get(&id) {
                    Some(existing) if *existing != side => {
                        return Err(ParseError::new(
                            line,
                            format!("entry id '{}' is used for both long and short", id),
                        ));
                    }
                    _ => {
                        self.entries.insert(id.clone(), side);
                    }
                }
                Intent::Entry { id, side, size }
            }
            "strategy.close" => {
                let id = string_arg(positional.first(), line, "strategy.close needs an entry id")?;
                reject_keywords(&keywords, &func, line)?;
                self.pending_exits.push(PendingExit {
                    statement: self.statements.len(),
                    id: id.clone(),
                    line,
                });
                Intent::Exit {
                    id,
                    side: Side::Long,
                }
            }
            "strategy.close_all" => {
                if !positional.is_empty() {
                    return Err(ParseError::new(
                        line,
                        "strategy.close_all takes no positional arguments",
                    ));
                }
                reject_keywords(&keywords, &func, line)?;
                Intent::ExitAll
            }
            "strategy.exit" | "strategy.order" | "strategy.cancel" | "strategy.cancel_all" => {
                return Err(ParseError::new(
                    line,
                    format!("'{}' is not supported", func),
                ));
            }
            other => {
                return Err(ParseError::new(
                    line,
                    format!("unknown strategy function '{}'", other),
                ));
            }
        };

        self.statements.push(Statement::Action(ActionDef {
            trigger,
            intent,
            line,
        }));
        Ok(())
    }

    fn constant_arg(&self, value: &ArgValue, line: usize, what: &str) -> Result<f64, ParseError> {
        match value {
            ArgValue::Expr(expr, _) => self
                .constant_value(expr)
                .ok_or_else(|| ParseError::new(line, format!("{} must be a constant number", what))),
            _ => Err(ParseError::new(
                line,
                format!("{} must be a constant number", what),
            )),
        }
    }

    fn constant_value(&self, expr: &Expr) -> Option<f64> {
        match expr {
            Expr::Number(v) => Some(*v),
            Expr::Neg(inner) => self.constant_value(inner).map(|v| -v),
            Expr::Name(name) => match self.symbols.get(name) {
                Some(Symbol::Constant(v)) => Some(*v),
                _ => None,
            },
            _ => None,
        }
    }

    fn finish(mut self) -> Result<Script, ParseError> {
        for pending in &self.pending_exits {
            let side = self.entries.get(&pending.id).copied().ok_or_else(|| {
                ParseError::new(
                    pending.line,
                    format!("strategy.close refers to unknown entry id '{}'", pending.id),
                )
            })?;
            if let Some(Statement::Action(ActionDef {
                intent: Intent::Exit { side: s, .. },
                ..
            })) = self.statements.get_mut(pending.statement)
            {
                *s = side;
            }
        }
        Ok(Script {
            title: self.title,
            statements: self.statements,
        })
    }
}

fn require(found: ValueType, expected: ValueType, line: usize, message: &str) -> Result<(), ParseError> {
    if found == expected {
        Ok(())
    } else {
        Err(ParseError::new(line, message))
    }
}

fn string_arg(value: Option<&ArgValue>, line: usize, message: &str) -> Result<String, ParseError> {
    match value {
        Some(ArgValue::Str(s)) => Ok(s.clone()),
        _ => Err(ParseError::new(line, message)),
    }
}

fn reject_keywords(keywords: &[(String, ArgValue)], func: &str, line: usize) -> Result<(), ParseError> {
    match keywords.first() {
        Some((key, _)) => Err(ParseError::new(
            line,
            format!("unsupported {} argument '{}'", func, key),
        )),
        None => Ok(()),
    }
}

/// Index of the parenthesis closing the one at `open`.
fn closing_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

struct LineParser<'t, 's> {
    tokens: &'t [Token],
    pos: usize,
    line: usize,
    state: &'s mut ParserState,
}

impl<'t, 's> LineParser<'t, 's> {
    fn new(tokens: &'t [Token], line: usize, state: &'s mut ParserState) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
            state,
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line, message)
    }

    fn found(&self) -> String {
        self.peek()
            .map(Token::describe)
            .unwrap_or_else(|| "end of line".to_string())
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == keyword)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        match self.peek() {
            Some(token) if token == expected => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(format!(
                "expected {}, found {}",
                expected.describe(),
                self.found()
            ))),
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Ident(w)) => {
                self.pos += 1;
                Ok(w.clone())
            }
            _ => Err(self.error(format!("expected identifier, found {}", self.found()))),
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        if self.pos < self.tokens.len() {
            return Err(self.error(format!("unexpected {} at end of statement", self.found())));
        }
        Ok(())
    }

    fn parse_call_args(&mut self) -> Result<Vec<Arg>, ParseError> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_arg()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                Some(other) => {
                    return Err(self.error(format!(
                        "expected ',' or ')', found {}",
                        other.describe()
                    )));
                }
                None => return Err(self.error("expected ')', found end of line")),
            }
        }
        Ok(args)
    }

    fn parse_arg(&mut self) -> Result<Arg, ParseError> {
        let keyword = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Ident(k)), Some(Token::Assign)) => {
                self.pos += 2;
                Some(k.clone())
            }
            _ => None,
        };
        let value = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Str(s)), _) => {
                self.pos += 1;
                ArgValue::Str(s.clone())
            }
            (Some(Token::Ident(w)), Some(Token::Comma | Token::RParen))
                if w.contains('.') && !self.state.symbols.contains_key(w) =>
            {
                self.pos += 1;
                ArgValue::Builtin(w.clone())
            }
            _ => {
                let (expr, ty) = self.parse_expr()?;
                ArgValue::Expr(expr, ty)
            }
        };
        Ok(Arg { keyword, value })
    }

    /// Default value of `input(14, ...)` or `input.int(defval=14)`.
    fn parse_input(&mut self) -> Result<f64, ParseError> {
        let func = self.expect_ident()?;
        let args = self.parse_call_args()?;
        let default = args
            .iter()
            .find(|a| a.keyword.as_deref() == Some("defval"))
            .or_else(|| args.iter().find(|a| a.keyword.is_none()));
        match default.map(|a| &a.value) {
            Some(ArgValue::Expr(expr, ValueType::Number)) => self
                .state
                .constant_value(expr)
                .ok_or_else(|| self.error(format!("{}() default must be a number", func))),
            _ => Err(self.error(format!("{}() needs a numeric default value", func))),
        }
    }

    fn parse_indicator_call(&mut self) -> Result<IndicatorKind, ParseError> {
        let func = self.expect_ident()?;
        let base = indicator_function(&func)
            .ok_or_else(|| self.error(format!("unknown function '{}'", func)))?;
        let args = self.parse_call_args()?;
        if let Some(arg) = args.iter().find(|a| a.keyword.is_some()) {
            return Err(self.error(format!(
                "{}() does not accept keyword argument '{}'",
                base,
                arg.keyword.as_deref().unwrap_or_default()
            )));
        }
        if args.len() != 2 {
            return Err(self.error(format!(
                "{}() takes 2 arguments, found {}",
                base,
                args.len()
            )));
        }

        match base {
            "crossover" | "crossunder" => {
                let a = self.to_source(&args[0].value, true)?;
                let b = self.to_source(&args[1].value, true)?;
                Ok(if base == "crossover" {
                    IndicatorKind::Crossover { a, b }
                } else {
                    IndicatorKind::Crossunder { a, b }
                })
            }
            _ => {
                let source = self.to_source(&args[0].value, false)?;
                let length = self.to_length(&args[1].value, base)?;
                Ok(match base {
                    "sma" => IndicatorKind::Sma { source, length },
                    "ema" => IndicatorKind::Ema { source, length },
                    "wma" => IndicatorKind::Wma { source, length },
                    _ => IndicatorKind::Rsi { source, length },
                })
            }
        }
    }

    fn to_source(&self, value: &ArgValue, allow_constant: bool) -> Result<Source, ParseError> {
        let expr = match value {
            ArgValue::Expr(expr, _) => expr,
            _ => return Err(self.error("expected a price field, series name, or number")),
        };
        match expr {
            Expr::Price(field) => Ok(Source::Price(*field)),
            Expr::Name(name) => match self.state.symbols.get(name) {
                Some(Symbol::Flag) => Err(self.error(format!(
                    "'{}' is a boolean series; expected a numeric series",
                    name
                ))),
                Some(_) => Ok(Source::Series(name.clone())),
                None => Err(self.error(format!("undeclared name '{}'", name))),
            },
            Expr::Number(v) if allow_constant => Ok(Source::Constant(*v)),
            Expr::Number(_) => Err(self.error("expected a price field or series, found a number")),
            _ => Err(self.error(
                "indicator arguments must be a price field, series name, or number",
            )),
        }
    }

    fn to_length(&self, value: &ArgValue, func: &str) -> Result<usize, ParseError> {
        let length = match value {
            ArgValue::Expr(expr, _) => self.state.constant_value(expr),
            _ => None,
        };
        match length {
            Some(v) if v > MAX_LENGTH => {
                Err(self.error(format!("{}() length {} is too large", func, v)))
            }
            Some(v) if v >= 1.0 && v.fract() == 0.0 => Ok(v as usize),
            _ => Err(self.error(format!("{}() length must be a positive integer", func))),
        }
    }

    fn parse_expr(&mut self) -> Result<(Expr, ValueType), ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<(Expr, ValueType), ParseError> {
        let (mut left, mut ty) = self.parse_and()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let (right, right_ty) = self.parse_and()?;
            require(ty, ValueType::Flag, self.line, "'or' requires boolean operands")?;
            require(right_ty, ValueType::Flag, self.line, "'or' requires boolean operands")?;
            left = Expr::Or(Box::new(left), Box::new(right));
            ty = ValueType::Flag;
        }
        Ok((left, ty))
    }

    fn parse_and(&mut self) -> Result<(Expr, ValueType), ParseError> {
        let (mut left, mut ty) = self.parse_not()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let (right, right_ty) = self.parse_not()?;
            require(ty, ValueType::Flag, self.line, "'and' requires boolean operands")?;
            require(right_ty, ValueType::Flag, self.line, "'and' requires boolean operands")?;
            left = Expr::And(Box::new(left), Box::new(right));
            ty = ValueType::Flag;
        }
        Ok((left, ty))
    }

    fn parse_not(&mut self) -> Result<(Expr, ValueType), ParseError> {
        if self.peek_keyword("not") {
            self.pos += 1;
            let (inner, ty) = self.parse_not()?;
            require(ty, ValueType::Flag, self.line, "'not' requires a boolean operand")?;
            return Ok((Expr::Not(Box::new(inner)), ValueType::Flag));
        }
        self.parse_comparison()
    }

    fn peek_cmp(&self) -> Option<CmpOp> {
        match self.peek() {
            Some(Token::Op(">")) => Some(CmpOp::Gt),
            Some(Token::Op("<")) => Some(CmpOp::Lt),
            Some(Token::Op(">=")) => Some(CmpOp::Ge),
            Some(Token::Op("<=")) => Some(CmpOp::Le),
            Some(Token::Op("==")) => Some(CmpOp::Eq),
            Some(Token::Op("!=")) => Some(CmpOp::Ne),
            _ => None,
        }
    }

    fn parse_comparison(&mut self) -> Result<(Expr, ValueType), ParseError> {
        let (left, ty) = self.parse_additive()?;
        let Some(op) = self.peek_cmp() else {
            return Ok((left, ty));
        };
        self.pos += 1;
        let (right, right_ty) = self.parse_additive()?;
        let message = format!("'{}' compares numbers only", op);
        require(ty, ValueType::Number, self.line, &message)?;
        require(right_ty, ValueType::Number, self.line, &message)?;
        if self.peek_cmp().is_some() {
            return Err(self.error("comparisons cannot be chained; combine them with 'and'"));
        }
        Ok((
            Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ValueType::Flag,
        ))
    }

    fn parse_additive(&mut self) -> Result<(Expr, ValueType), ParseError> {
        let (mut left, mut ty) = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op("+")) => ArithOp::Add,
                Some(Token::Op("-")) => ArithOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let (right, right_ty) = self.parse_term()?;
            require(ty, ValueType::Number, self.line, "arithmetic requires numeric operands")?;
            require(right_ty, ValueType::Number, self.line, "arithmetic requires numeric operands")?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
            ty = ValueType::Number;
        }
        Ok((left, ty))
    }

    fn parse_term(&mut self) -> Result<(Expr, ValueType), ParseError> {
        let (mut left, mut ty) = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op("*")) => ArithOp::Mul,
                Some(Token::Op("/")) => ArithOp::Div,
                _ => break,
            };
            self.pos += 1;
            let (right, right_ty) = self.parse_unary()?;
            require(ty, ValueType::Number, self.line, "arithmetic requires numeric operands")?;
            require(right_ty, ValueType::Number, self.line, "arithmetic requires numeric operands")?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
            ty = ValueType::Number;
        }
        Ok((left, ty))
    }

    fn parse_unary(&mut self) -> Result<(Expr, ValueType), ParseError> {
        if matches!(self.peek(), Some(Token::Op("-"))) {
            self.pos += 1;
            let (inner, ty) = self.parse_unary()?;
            require(ty, ValueType::Number, self.line, "unary '-' requires a number")?;
            let expr = match inner {
                Expr::Number(v) => Expr::Number(-v),
                other => Expr::Neg(Box::new(other)),
            };
            return Ok((expr, ValueType::Number));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<(Expr, ValueType), ParseError> {
        match self.peek() {
            Some(Token::Number(v)) => {
                self.pos += 1;
                Ok((Expr::Number(*v), ValueType::Number))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(word)) => {
                if matches!(self.peek_at(1), Some(Token::LParen)) {
                    return self.parse_call_expr(word);
                }
                self.pos += 1;
                match word.as_str() {
                    "true" => return Ok((Expr::Bool(true), ValueType::Flag)),
                    "false" => return Ok((Expr::Bool(false), ValueType::Flag)),
                    "na" => return Err(self.error("'na' is not supported")),
                    _ => {}
                }
                if let Some(field) = PriceField::from_name(word) {
                    return Ok((Expr::Price(field), ValueType::Number));
                }
                match self.state.symbols.get(word.as_str()) {
                    Some(symbol) => Ok((Expr::Name(word.clone()), symbol.value_type())),
                    None => Err(self.error(format!("undeclared name '{}'", word))),
                }
            }
            _ => Err(self.error(format!("expected expression, found {}", self.found()))),
        }
    }

    fn parse_call_expr(&mut self, func: &str) -> Result<(Expr, ValueType), ParseError> {
        if indicator_function(func).is_none() {
            if is_input_function(func) {
                return Err(self.error(format!(
                    "{}() is only allowed as a declaration value",
                    func
                )));
            }
            return Err(self.error(format!("unknown function '{}'", func)));
        }
        let kind = self.parse_indicator_call()?;
        let ty = if kind.is_boolean() {
            ValueType::Flag
        } else {
            ValueType::Number
        };
        let name = self.state.intern_indicator(kind, self.line);
        Ok((Expr::Name(name), ty))
    }
}

/// Parse script source into statements.
pub fn parse(source: &str) -> Result<Script, ParseError> {
    let mut state = ParserState::default();
    let mut open_if: Option<OpenIf> = None;
    let mut baseline: Option<usize> = None;

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let text = strip_comment(raw);
        if text.trim().is_empty() {
            continue;
        }
        let indent = indentation(text);
        let tokens = tokenize(text.trim(), line)?;

        if let Some(block) = open_if.as_mut()
            && indent > block.indent
        {
            if !matches!(tokens.first(), Some(Token::Ident(w)) if w.starts_with("strategy.")) {
                return Err(ParseError::new(
                    line,
                    "only strategy actions are allowed inside 'if'",
                ));
            }
            state.parse_action(&tokens, line, Some(&block.condition))?;
            block.body_len += 1;
            continue;
        }

        if let Some(block) = open_if.take()
            && block.body_len == 0
        {
            return Err(ParseError::new(block.line, "'if' has no indented body"));
        }

        match baseline {
            None => baseline = Some(indent),
            Some(base) if indent > base => {
                return Err(ParseError::new(line, "unexpected indentation"));
            }
            Some(_) => {}
        }

        open_if = state.parse_statement(&tokens, line, indent)?;
    }

    if let Some(block) = open_if
        && block.body_len == 0
    {
        return Err(ParseError::new(block.line, "'if' has no indented body"));
    }

    state.finish()
}
