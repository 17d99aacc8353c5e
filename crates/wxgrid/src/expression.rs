//! Caller supplied `where` and `stats` fragments.
//!
//! Fragments are parsed into a small AST against a whitelist of column names
//! and functions, then re-emitted as SQL (filters pushed into the store) or
//! evaluated directly over rows (filters applied after reconciliation, and
//! second-pass statistics). Anything outside the grammar is rejected; nothing
//! the caller sends reaches the store verbatim.

use std::{collections::BTreeSet, fmt};
use time::{macros::format_description, Date, PrimitiveDateTime, Time};

use crate::Attribute;

const MAX_FRAGMENT_LEN: usize = 1024;
const MAX_DEPTH: usize = 32;

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("rejected expression `{fragment}`: {reason}")]
pub struct Rejected {
    pub fragment: String,
    pub reason: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    Year,
    Month,
    Day,
    Hour,
    Doy,
    Abs,
}

impl Function {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "year" => Some(Function::Year),
            "month" => Some(Function::Month),
            "day" => Some(Function::Day),
            "hour" => Some(Function::Hour),
            "doy" => Some(Function::Doy),
            "abs" => Some(Function::Abs),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Function::Year => "year",
            Function::Month => "month",
            Function::Day => "day",
            Function::Hour => "hour",
            Function::Doy => "doy",
            Function::Abs => "abs",
        }
    }

    fn sql_name(&self) -> &'static str {
        match self {
            Function::Doy => "dayofyear",
            other => other.name(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Min,
    Max,
    Avg,
    Count,
    Stddev,
}

impl Aggregate {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Aggregate::Sum),
            "min" => Some(Aggregate::Min),
            "max" => Some(Aggregate::Max),
            "avg" => Some(Aggregate::Avg),
            "count" => Some(Aggregate::Count),
            "stddev" => Some(Aggregate::Stddev),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Avg => "avg",
            Aggregate::Count => "count",
            Aggregate::Stddev => "stddev",
        }
    }

    /// Apply to the non-null inputs of a group.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return match self {
                Aggregate::Count => Some(0.0),
                _ => None,
            };
        }
        let n = values.len() as f64;
        match self {
            Aggregate::Sum => Some(values.iter().sum()),
            Aggregate::Min => values.iter().copied().reduce(f64::min),
            Aggregate::Max => values.iter().copied().reduce(f64::max),
            Aggregate::Avg => Some(values.iter().sum::<f64>() / n),
            Aggregate::Count => Some(n),
            Aggregate::Stddev => {
                if values.len() < 2 {
                    return None;
                }
                let mean = values.iter().sum::<f64>() / n;
                let variance =
                    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
                Some(variance.sqrt())
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Column(String),
    Call(Function, Box<Expr>),
    Negate(Box<Expr>),
    Not(Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Between(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// One item of a `stats` fragment, e.g. `sum(precipitation)`.
#[derive(Clone, Debug, PartialEq)]
pub struct StatItem {
    pub aggregate: Aggregate,
    pub expr: Expr,
}

impl StatItem {
    /// Output column name.
    pub fn label(&self) -> String {
        match &self.expr {
            Expr::Column(column) => format!("{}_{}", self.aggregate.name(), column),
            other => format!("{}({})", self.aggregate.name(), other),
        }
    }
}

impl fmt::Display for StatItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.aggregate.name(), self.expr)
    }
}

/// Names and functions a fragment may reference.
#[derive(Clone, Debug)]
pub struct Vocabulary {
    columns: BTreeSet<String>,
    functions: bool,
    text: bool,
}

impl Vocabulary {
    /// Hourly row filters: canonical attributes plus `date`, `lat`, `lon`.
    pub fn filter() -> Self {
        let mut columns: BTreeSet<String> = Attribute::ALL
            .iter()
            .map(|attribute| attribute.name().to_string())
            .collect();
        columns.extend(["date", "lat", "lon"].map(String::from));
        Self {
            columns,
            functions: true,
            text: true,
        }
    }

    /// Bucketed rows, used by second-pass statistics.
    pub fn buckets(columns: impl IntoIterator<Item = String>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
            functions: false,
            text: false,
        }
    }

    fn column(&self, name: &str) -> Option<String> {
        if self.columns.contains(name) {
            return Some(name.to_string());
        }
        // short codes and aliases map onto canonical attribute names
        name.parse::<Attribute>()
            .ok()
            .map(|attribute| attribute.name().to_string())
            .filter(|canonical| self.columns.contains(canonical))
    }
}

pub fn parse_filter(fragment: &str, vocabulary: &Vocabulary) -> Result<Expr, Rejected> {
    let mut parser = Parser::new(fragment, vocabulary)?;
    let expr = parser.expr()?;
    parser.finish()?;
    parser.typed(&expr, Type::Bool)?;
    Ok(expr)
}

pub fn parse_stats(fragment: &str, vocabulary: &Vocabulary) -> Result<Vec<StatItem>, Rejected> {
    let mut parser = Parser::new(fragment, vocabulary)?;
    let mut items = vec![parser.stat_item()?];
    while parser.eat(&Token::Comma) {
        items.push(parser.stat_item()?);
    }
    parser.finish()?;
    for item in &items {
        parser.typed(&item.expr, Type::Number)?;
    }
    Ok(items)
}

/// What an expression evaluates to. Text literals must be dates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Type {
    Number,
    Date,
    Bool,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Number => "a number",
            Type::Date => "a date",
            Type::Bool => "a condition",
        };
        write!(f, "{}", name)
    }
}

fn expect_type(expr: &Expr, wanted: Type) -> Result<(), String> {
    let found = type_of(expr)?;
    if found == wanted {
        Ok(())
    } else {
        Err(format!("`{}` is {}, expected {}", expr, found, wanted))
    }
}

fn type_of(expr: &Expr) -> Result<Type, String> {
    match expr {
        Expr::Number(_) => Ok(Type::Number),
        Expr::Text(text) => match parse_literal_date(text) {
            Some(_) => Ok(Type::Date),
            None => Err(format!("`{}` is not a date", expr)),
        },
        Expr::Column(name) if name == "date" => Ok(Type::Date),
        Expr::Column(_) => Ok(Type::Number),
        Expr::Call(Function::Abs, argument) => {
            expect_type(argument, Type::Number)?;
            Ok(Type::Number)
        }
        Expr::Call(_, argument) => {
            expect_type(argument, Type::Date)?;
            Ok(Type::Number)
        }
        Expr::Negate(inner) => {
            expect_type(inner, Type::Number)?;
            Ok(Type::Number)
        }
        Expr::Not(inner) => {
            expect_type(inner, Type::Bool)?;
            Ok(Type::Bool)
        }
        Expr::Binary(left, op, right) => match op {
            BinaryOp::And | BinaryOp::Or => {
                expect_type(left, Type::Bool)?;
                expect_type(right, Type::Bool)?;
                Ok(Type::Bool)
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                expect_type(left, Type::Number)?;
                expect_type(right, Type::Number)?;
                Ok(Type::Number)
            }
            _ => {
                let operand = comparable(left)?;
                expect_type(right, operand)?;
                Ok(Type::Bool)
            }
        },
        Expr::Between(value, low, high) => {
            let operand = comparable(value)?;
            expect_type(low, operand)?;
            expect_type(high, operand)?;
            Ok(Type::Bool)
        }
    }
}

fn comparable(expr: &Expr) -> Result<Type, String> {
    match type_of(expr)? {
        Type::Bool => Err(format!("`{}` cannot be compared", expr)),
        other => Ok(other),
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Symbol(&'static str),
    LParen,
    RParen,
    Comma,
}

fn tokenize(fragment: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = fragment.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| format!("bad number `{}`", text))?;
            tokens.push(Token::Number(value));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(Token::Ident(word.to_lowercase()));
        } else if c == '\'' {
            let start = i + 1;
            i = start;
            while i < chars.len() && chars[i] != '\'' {
                let d = chars[i];
                if !(d.is_ascii_digit() || matches!(d, '-' | ':' | ' ' | 'T')) {
                    return Err(format!("character `{}` not allowed in a literal", d));
                }
                i += 1;
            }
            if i >= chars.len() {
                return Err("unterminated literal".to_string());
            }
            tokens.push(Token::Text(chars[start..i].iter().collect()));
            i += 1;
        } else {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            let symbol = match two.as_str() {
                "<=" => Some("<="),
                ">=" => Some(">="),
                "<>" => Some("<>"),
                "!=" => Some("!="),
                _ => None,
            };
            if let Some(symbol) = symbol {
                tokens.push(Token::Symbol(symbol));
                i += 2;
                continue;
            }
            let token = match c {
                '=' => Token::Symbol("="),
                '<' => Token::Symbol("<"),
                '>' => Token::Symbol(">"),
                '+' => Token::Symbol("+"),
                '-' => Token::Symbol("-"),
                '*' => Token::Symbol("*"),
                '/' => Token::Symbol("/"),
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                other => return Err(format!("character `{}` not allowed", other)),
            };
            tokens.push(token);
            i += 1;
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    fragment: &'a str,
    vocabulary: &'a Vocabulary,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(fragment: &'a str, vocabulary: &'a Vocabulary) -> Result<Self, Rejected> {
        let reject = |reason: String| Rejected {
            fragment: fragment.to_string(),
            reason,
        };
        if fragment.len() > MAX_FRAGMENT_LEN {
            return Err(reject(format!("longer than {} characters", MAX_FRAGMENT_LEN)));
        }
        let tokens = tokenize(fragment).map_err(reject)?;
        if tokens.is_empty() {
            return Err(reject("empty expression".to_string()));
        }
        Ok(Self {
            fragment,
            vocabulary,
            tokens,
            pos: 0,
            depth: 0,
        })
    }

    fn reject<T>(&self, reason: impl Into<String>) -> Result<T, Rejected> {
        Err(Rejected {
            fragment: self.fragment.to_string(),
            reason: reason.into(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(word)) if word == keyword => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), Rejected> {
        if self.eat(&token) {
            Ok(())
        } else {
            self.reject(format!("expected {:?}", token))
        }
    }

    fn typed(&self, expr: &Expr, wanted: Type) -> Result<(), Rejected> {
        match expect_type(expr, wanted) {
            Ok(()) => Ok(()),
            Err(reason) => self.reject(reason),
        }
    }

    fn finish(&self) -> Result<(), Rejected> {
        match self.peek() {
            None => Ok(()),
            Some(token) => self.reject(format!("unexpected trailing {:?}", token)),
        }
    }

    fn descend(&mut self) -> Result<(), Rejected> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return self.reject("nested too deeply");
        }
        Ok(())
    }

    fn stat_item(&mut self) -> Result<StatItem, Rejected> {
        let Some(Token::Ident(name)) = self.next() else {
            return self.reject("expected an aggregate function");
        };
        let Some(aggregate) = Aggregate::parse(&name) else {
            return self.reject(format!("unknown aggregate `{}`", name));
        };
        self.expect(Token::LParen)?;
        let expr = self.expr()?;
        self.expect(Token::RParen)?;
        Ok(StatItem { aggregate, expr })
    }

    fn expr(&mut self) -> Result<Expr, Rejected> {
        self.descend()?;
        let mut left = self.and()?;
        while self.eat_keyword("or") {
            let right = self.and()?;
            left = Expr::Binary(Box::new(left), BinaryOp::Or, Box::new(right));
        }
        self.depth -= 1;
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, Rejected> {
        let mut left = self.not()?;
        while self.eat_keyword("and") {
            let right = self.not()?;
            left = Expr::Binary(Box::new(left), BinaryOp::And, Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, Rejected> {
        if self.eat_keyword("not") {
            self.descend()?;
            let inner = self.not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, Rejected> {
        let left = self.sum()?;
        if self.eat_keyword("between") {
            let low = self.sum()?;
            if !self.eat_keyword("and") {
                return self.reject("BETWEEN needs AND");
            }
            let high = self.sum()?;
            return Ok(Expr::Between(Box::new(left), Box::new(low), Box::new(high)));
        }
        let op = match self.peek() {
            Some(Token::Symbol("=")) => BinaryOp::Eq,
            Some(Token::Symbol("!=")) | Some(Token::Symbol("<>")) => BinaryOp::NotEq,
            Some(Token::Symbol("<")) => BinaryOp::Lt,
            Some(Token::Symbol("<=")) => BinaryOp::LtEq,
            Some(Token::Symbol(">")) => BinaryOp::Gt,
            Some(Token::Symbol(">=")) => BinaryOp::GtEq,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.sum()?;
        Ok(Expr::Binary(Box::new(left), op, Box::new(right)))
    }

    fn sum(&mut self) -> Result<Expr, Rejected> {
        let mut left = self.product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Symbol("+")) => BinaryOp::Add,
                Some(Token::Symbol("-")) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
    }

    fn product(&mut self) -> Result<Expr, Rejected> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Symbol("*")) => BinaryOp::Mul,
                Some(Token::Symbol("/")) => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, Rejected> {
        if self.eat(&Token::Symbol("-")) {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Negate(Box::new(inner)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr, Rejected> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Text(text)) => {
                if !self.vocabulary.text {
                    return self.reject("literals are not allowed here");
                }
                Ok(Expr::Text(text))
            }
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    let Some(function) = Function::parse(&name)
                        .filter(|f| self.vocabulary.functions || *f == Function::Abs)
                    else {
                        return self.reject(format!("unknown function `{}`", name));
                    };
                    self.pos += 1;
                    let argument = self.expr()?;
                    self.expect(Token::RParen)?;
                    return Ok(Expr::Call(function, Box::new(argument)));
                }
                match self.vocabulary.column(&name) {
                    Some(column) => Ok(Expr::Column(column)),
                    None => self.reject(format!("unknown column `{}`", name)),
                }
            }
            Some(token) => self.reject(format!("unexpected {:?}", token)),
            None => self.reject("unexpected end of expression"),
        }
    }
}

impl Expr {
    /// Fully parenthesized SQL with quoted identifiers.
    pub fn to_sql(&self) -> String {
        self.render(true)
    }

    fn render(&self, quoted: bool) -> String {
        match self {
            Expr::Number(value) => format!("{}", value),
            Expr::Text(text) => format!("'{}'", text),
            Expr::Column(name) if quoted => format!("\"{}\"", name),
            Expr::Column(name) => name.clone(),
            Expr::Call(function, argument) => {
                let name = if quoted {
                    function.sql_name()
                } else {
                    function.name()
                };
                format!("{}({})", name, argument.render(quoted))
            }
            Expr::Negate(inner) => format!("(-{})", inner.render(quoted)),
            Expr::Not(inner) => format!("(NOT {})", inner.render(quoted)),
            Expr::Binary(left, op, right) => format!(
                "({} {} {})",
                left.render(quoted),
                op.symbol(),
                right.render(quoted)
            ),
            Expr::Between(value, low, high) => format!(
                "({} BETWEEN {} AND {})",
                value.render(quoted),
                low.render(quoted),
                high.render(quoted)
            ),
        }
    }

    pub fn columns(&self) -> BTreeSet<String> {
        let mut columns = BTreeSet::new();
        self.collect_columns(&mut columns);
        columns
    }

    fn collect_columns(&self, into: &mut BTreeSet<String>) {
        match self {
            Expr::Column(name) => {
                into.insert(name.clone());
            }
            Expr::Call(_, inner) | Expr::Negate(inner) | Expr::Not(inner) => {
                inner.collect_columns(into)
            }
            Expr::Binary(left, _, right) => {
                left.collect_columns(into);
                right.collect_columns(into);
            }
            Expr::Between(value, low, high) => {
                value.collect_columns(into);
                low.collect_columns(into);
                high.collect_columns(into);
            }
            Expr::Number(_) | Expr::Text(_) => {}
        }
    }

    pub fn eval(&self, scope: &dyn Scope) -> Value {
        match self {
            Expr::Number(value) => Value::Number(*value),
            Expr::Text(text) => Value::Text(text.clone()),
            Expr::Column(name) => scope.column(name),
            Expr::Call(function, argument) => call(*function, argument.eval(scope)),
            Expr::Negate(inner) => match inner.eval(scope) {
                Value::Number(value) => Value::Number(-value),
                _ => Value::Null,
            },
            Expr::Not(inner) => match inner.eval(scope).truth() {
                Some(truth) => Value::Bool(!truth),
                None => Value::Null,
            },
            Expr::Binary(left, op, right) => binary(left.eval(scope), *op, right.eval(scope)),
            Expr::Between(value, low, high) => {
                let value = value.eval(scope);
                let lower = binary(value.clone(), BinaryOp::GtEq, low.eval(scope));
                let upper = binary(value, BinaryOp::LtEq, high.eval(scope));
                binary(lower, BinaryOp::And, upper)
            }
        }
    }

    /// Row filter semantics: only a definite true keeps the row.
    pub fn matches(&self, scope: &dyn Scope) -> bool {
        self.eval(scope).truth() == Some(true)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(false))
    }
}

/// Column lookup used by in-process evaluation.
pub trait Scope {
    fn column(&self, name: &str) -> Value;
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Date(PrimitiveDateTime),
    Bool(bool),
    Null,
}

impl Value {
    pub fn number(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            Value::Bool(truth) => Some(if *truth { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn truth(&self) -> Option<bool> {
        match self {
            Value::Bool(truth) => Some(*truth),
            Value::Number(value) => Some(*value != 0.0),
            _ => None,
        }
    }

    fn as_date(&self) -> Option<PrimitiveDateTime> {
        match self {
            Value::Date(date) => Some(*date),
            Value::Text(text) => parse_literal_date(text),
            _ => None,
        }
    }
}

fn parse_literal_date(text: &str) -> Option<PrimitiveDateTime> {
    let text = text.trim().replace('T', " ");
    let datetime = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let minutes = format_description!("[year]-[month]-[day] [hour]:[minute]");
    let day = format_description!("[year]-[month]-[day]");
    PrimitiveDateTime::parse(&text, &datetime)
        .or_else(|_| PrimitiveDateTime::parse(&text, &minutes))
        .ok()
        .or_else(|| {
            Date::parse(&text, &day)
                .ok()
                .map(|date| PrimitiveDateTime::new(date, Time::MIDNIGHT))
        })
}

fn call(function: Function, argument: Value) -> Value {
    if function == Function::Abs {
        return match argument {
            Value::Number(value) => Value::Number(value.abs()),
            _ => Value::Null,
        };
    }
    let Some(date) = argument.as_date() else {
        return Value::Null;
    };
    let value = match function {
        Function::Year => date.year() as f64,
        Function::Month => u8::from(date.month()) as f64,
        Function::Day => date.day() as f64,
        Function::Hour => date.hour() as f64,
        _ => date.ordinal() as f64,
    };
    Value::Number(value)
}

fn binary(left: Value, op: BinaryOp, right: Value) -> Value {
    match op {
        BinaryOp::And => match (left.truth(), right.truth()) {
            (Some(false), _) | (_, Some(false)) => Value::Bool(false),
            (Some(true), Some(true)) => Value::Bool(true),
            _ => Value::Null,
        },
        BinaryOp::Or => match (left.truth(), right.truth()) {
            (Some(true), _) | (_, Some(true)) => Value::Bool(true),
            (Some(false), Some(false)) => Value::Bool(false),
            _ => Value::Null,
        },
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let (Some(l), Some(r)) = (left.number(), right.number()) else {
                return Value::Null;
            };
            match op {
                BinaryOp::Add => Value::Number(l + r),
                BinaryOp::Sub => Value::Number(l - r),
                BinaryOp::Mul => Value::Number(l * r),
                _ if r == 0.0 => Value::Null,
                _ => Value::Number(l / r),
            }
        }
        _ => {
            let ordering = match (&left, &right) {
                (Value::Date(_), _) | (_, Value::Date(_)) => {
                    match (left.as_date(), right.as_date()) {
                        (Some(l), Some(r)) => l.partial_cmp(&r),
                        _ => None,
                    }
                }
                (Value::Text(l), Value::Text(r)) => l.partial_cmp(r),
                _ => match (left.number(), right.number()) {
                    (Some(l), Some(r)) => l.partial_cmp(&r),
                    _ => None,
                },
            };
            let Some(ordering) = ordering else {
                return Value::Null;
            };
            use std::cmp::Ordering::*;
            Value::Bool(match op {
                BinaryOp::Eq => ordering == Equal,
                BinaryOp::NotEq => ordering != Equal,
                BinaryOp::Lt => ordering == Less,
                BinaryOp::LtEq => ordering != Greater,
                BinaryOp::Gt => ordering == Greater,
                _ => ordering != Less,
            })
        }
    }
}
