//! Interpreter for DynamoDB wire expressions.
//!
//! The in-memory client receives the same ConditionExpression /
//! KeyConditionExpression / FilterExpression / UpdateExpression strings a
//! real table would, with `#name` / `:value` substitutions. This module
//! parses and evaluates them against items.

use std::collections::HashMap;

use crate::client::{NameMap, ValueMap};
use crate::error::{Error, Result};
use crate::types::{compare_values, Item, Value};

/// Expression AST node.
#[derive(Debug, Clone, PartialEq)]
pub enum WireExpr {
    Equal(Box<WireExpr>, Box<WireExpr>),
    NotEqual(Box<WireExpr>, Box<WireExpr>),
    LessThan(Box<WireExpr>, Box<WireExpr>),
    LessThanOrEqual(Box<WireExpr>, Box<WireExpr>),
    GreaterThan(Box<WireExpr>, Box<WireExpr>),
    GreaterThanOrEqual(Box<WireExpr>, Box<WireExpr>),

    Between(Box<WireExpr>, Box<WireExpr>, Box<WireExpr>),
    In(Box<WireExpr>, Vec<WireExpr>),

    And(Box<WireExpr>, Box<WireExpr>),
    Or(Box<WireExpr>, Box<WireExpr>),
    Not(Box<WireExpr>),

    AttributeExists(Path),
    AttributeNotExists(Path),
    AttributeType(Path, Box<WireExpr>),
    BeginsWith(Box<WireExpr>, Box<WireExpr>),
    Contains(Path, Box<WireExpr>),
    Size(Path),

    Path(Path),
    Placeholder(String),
}

/// A document path: name segments (possibly `#aliased`) and list indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub segments: Vec<Seg>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Seg {
    Name(String),
    Index(usize),
}

/// One action of an update expression.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    Set(Path, SetRhs),
    Remove(Path),
    Add(Path, String),
    Delete(Path, String),
}

/// Right-hand side of a SET action.
#[derive(Debug, Clone, PartialEq)]
pub enum SetRhs {
    Operand(SetOperand),
    Plus(SetOperand, SetOperand),
    Minus(SetOperand, SetOperand),
    IfNotExists(Path, Box<SetRhs>),
    ListAppend(Box<SetRhs>, Box<SetRhs>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SetOperand {
    Path(Path),
    Placeholder(String),
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Plus,
    Minus,
    Dot,
    Comma,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    And,
    Or,
    Not,
    Between,
    In,
    Set,
    Remove,
    Add,
    Delete,
    Number(usize),
    Identifier(String),
    NamePlaceholder(String),
    ValuePlaceholder(String),
    Eof,
}

struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    fn tokenize(input: &str) -> Result<Vec<Token>> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn read_identifier(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.current() {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        self.input[start..self.pos].iter().collect()
    }

    fn next_token(&mut self) -> Result<Token> {
        while self.current().is_some_and(|c| c.is_whitespace()) {
            self.advance();
        }

        match self.current() {
            None => Ok(Token::Eof),
            Some('(') => {
                self.advance();
                Ok(Token::LeftParen)
            }
            Some(')') => {
                self.advance();
                Ok(Token::RightParen)
            }
            Some('[') => {
                self.advance();
                Ok(Token::LeftBracket)
            }
            Some(']') => {
                self.advance();
                Ok(Token::RightBracket)
            }
            Some(',') => {
                self.advance();
                Ok(Token::Comma)
            }
            Some('.') => {
                self.advance();
                Ok(Token::Dot)
            }
            Some('+') => {
                self.advance();
                Ok(Token::Plus)
            }
            Some('-') => {
                self.advance();
                Ok(Token::Minus)
            }
            Some('=') => {
                self.advance();
                Ok(Token::Equal)
            }
            Some('<') => {
                self.advance();
                match self.current() {
                    Some('>') => {
                        self.advance();
                        Ok(Token::NotEqual)
                    }
                    Some('=') => {
                        self.advance();
                        Ok(Token::LessThanOrEqual)
                    }
                    _ => Ok(Token::LessThan),
                }
            }
            Some('>') => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    Ok(Token::GreaterThanOrEqual)
                } else {
                    Ok(Token::GreaterThan)
                }
            }
            Some('#') => {
                self.advance();
                let name = self.read_identifier();
                Ok(Token::NamePlaceholder(format!("#{}", name)))
            }
            Some(':') => {
                self.advance();
                let name = self.read_identifier();
                Ok(Token::ValuePlaceholder(format!(":{}", name)))
            }
            Some(c) if c.is_ascii_digit() => {
                let digits = self.read_identifier();
                digits
                    .parse::<usize>()
                    .map(Token::Number)
                    .map_err(|_| invalid(format!("bad list index '{}'", digits)))
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let ident = self.read_identifier();
                Ok(match ident.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "BETWEEN" => Token::Between,
                    "IN" => Token::In,
                    "SET" => Token::Set,
                    "REMOVE" => Token::Remove,
                    "ADD" => Token::Add,
                    "DELETE" => Token::Delete,
                    _ => Token::Identifier(ident),
                })
            }
            Some(c) => Err(invalid(format!("unexpected character '{}'", c))),
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Plan(format!("wire expression: {}", message.into()))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

pub struct WireParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl WireParser {
    /// Parse a condition / filter / key-condition expression.
    pub fn parse_condition(input: &str) -> Result<WireExpr> {
        let mut parser = Self {
            tokens: Lexer::tokenize(input)?,
            pos: 0,
        };
        let expr = parser.or_expr()?;
        parser.expect(Token::Eof)?;
        Ok(expr)
    }

    /// Parse an update expression into its actions.
    pub fn parse_update(input: &str) -> Result<Vec<UpdateAction>> {
        let mut parser = Self {
            tokens: Lexer::tokenize(input)?,
            pos: 0,
        };
        let actions = parser.update_expr()?;
        parser.expect(Token::Eof)?;
        Ok(actions)
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if self.current() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(invalid(format!(
                "expected {:?}, found {:?}",
                expected,
                self.current()
            )))
        }
    }

    fn accept(&mut self, token: Token) -> bool {
        if self.current() == &token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<WireExpr> {
        let mut lhs = self.and_expr()?;
        while self.accept(Token::Or) {
            let rhs = self.and_expr()?;
            lhs = WireExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<WireExpr> {
        let mut lhs = self.not_expr()?;
        while self.accept(Token::And) {
            let rhs = self.not_expr()?;
            lhs = WireExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<WireExpr> {
        if self.accept(Token::Not) {
            let inner = self.not_expr()?;
            return Ok(WireExpr::Not(Box::new(inner)));
        }
        self.condition()
    }

    fn condition(&mut self) -> Result<WireExpr> {
        if self.accept(Token::LeftParen) {
            let inner = self.or_expr()?;
            self.expect(Token::RightParen)?;
            return Ok(inner);
        }

        if let Token::Identifier(name) = self.current().clone() {
            match name.to_ascii_lowercase().as_str() {
                "attribute_exists" => {
                    self.advance();
                    self.expect(Token::LeftParen)?;
                    let path = self.path()?;
                    self.expect(Token::RightParen)?;
                    return Ok(WireExpr::AttributeExists(path));
                }
                "attribute_not_exists" => {
                    self.advance();
                    self.expect(Token::LeftParen)?;
                    let path = self.path()?;
                    self.expect(Token::RightParen)?;
                    return Ok(WireExpr::AttributeNotExists(path));
                }
                "attribute_type" => {
                    self.advance();
                    self.expect(Token::LeftParen)?;
                    let path = self.path()?;
                    self.expect(Token::Comma)?;
                    let tag = self.operand()?;
                    self.expect(Token::RightParen)?;
                    return Ok(WireExpr::AttributeType(path, Box::new(tag)));
                }
                "begins_with" => {
                    self.advance();
                    self.expect(Token::LeftParen)?;
                    let path = self.operand()?;
                    self.expect(Token::Comma)?;
                    let prefix = self.operand()?;
                    self.expect(Token::RightParen)?;
                    return Ok(WireExpr::BeginsWith(Box::new(path), Box::new(prefix)));
                }
                "contains" => {
                    self.advance();
                    self.expect(Token::LeftParen)?;
                    let path = self.path()?;
                    self.expect(Token::Comma)?;
                    let operand = self.operand()?;
                    self.expect(Token::RightParen)?;
                    return Ok(WireExpr::Contains(path, Box::new(operand)));
                }
                _ => {}
            }
        }

        let lhs = self.operand()?;
        self.comparison_tail(lhs)
    }

    fn comparison_tail(&mut self, lhs: WireExpr) -> Result<WireExpr> {
        match self.current().clone() {
            Token::Equal => {
                self.advance();
                let rhs = self.operand()?;
                Ok(WireExpr::Equal(Box::new(lhs), Box::new(rhs)))
            }
            Token::NotEqual => {
                self.advance();
                let rhs = self.operand()?;
                Ok(WireExpr::NotEqual(Box::new(lhs), Box::new(rhs)))
            }
            Token::LessThan => {
                self.advance();
                let rhs = self.operand()?;
                Ok(WireExpr::LessThan(Box::new(lhs), Box::new(rhs)))
            }
            Token::LessThanOrEqual => {
                self.advance();
                let rhs = self.operand()?;
                Ok(WireExpr::LessThanOrEqual(Box::new(lhs), Box::new(rhs)))
            }
            Token::GreaterThan => {
                self.advance();
                let rhs = self.operand()?;
                Ok(WireExpr::GreaterThan(Box::new(lhs), Box::new(rhs)))
            }
            Token::GreaterThanOrEqual => {
                self.advance();
                let rhs = self.operand()?;
                Ok(WireExpr::GreaterThanOrEqual(Box::new(lhs), Box::new(rhs)))
            }
            Token::Between => {
                self.advance();
                let low = self.operand()?;
                self.expect(Token::And)?;
                let high = self.operand()?;
                Ok(WireExpr::Between(
                    Box::new(lhs),
                    Box::new(low),
                    Box::new(high),
                ))
            }
            Token::In => {
                self.advance();
                self.expect(Token::LeftParen)?;
                let mut list = Vec::new();
                loop {
                    list.push(self.operand()?);
                    if !self.accept(Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RightParen)?;
                Ok(WireExpr::In(Box::new(lhs), list))
            }
            other => Err(invalid(format!("expected a comparison, found {:?}", other))),
        }
    }

    fn operand(&mut self) -> Result<WireExpr> {
        match self.current().clone() {
            Token::ValuePlaceholder(name) => {
                self.advance();
                Ok(WireExpr::Placeholder(name))
            }
            Token::Identifier(ref name) if name.eq_ignore_ascii_case("size") => {
                self.advance();
                self.expect(Token::LeftParen)?;
                let path = self.path()?;
                self.expect(Token::RightParen)?;
                Ok(WireExpr::Size(path))
            }
            Token::Identifier(_) | Token::NamePlaceholder(_) => Ok(WireExpr::Path(self.path()?)),
            other => Err(invalid(format!("expected an operand, found {:?}", other))),
        }
    }

    fn path(&mut self) -> Result<Path> {
        let mut segments = Vec::new();
        loop {
            match self.current().clone() {
                Token::Identifier(name) => {
                    self.advance();
                    segments.push(Seg::Name(name));
                }
                Token::NamePlaceholder(name) => {
                    self.advance();
                    segments.push(Seg::Name(name));
                }
                other => return Err(invalid(format!("expected a path segment, found {:?}", other))),
            }
            loop {
                if self.accept(Token::LeftBracket) {
                    match self.current().clone() {
                        Token::Number(index) => {
                            self.advance();
                            self.expect(Token::RightBracket)?;
                            segments.push(Seg::Index(index));
                        }
                        other => {
                            return Err(invalid(format!("expected a list index, found {:?}", other)))
                        }
                    }
                } else {
                    break;
                }
            }
            if !self.accept(Token::Dot) {
                break;
            }
        }
        Ok(Path { segments })
    }

    fn update_expr(&mut self) -> Result<Vec<UpdateAction>> {
        let mut actions = Vec::new();
        while self.current() != &Token::Eof {
            match self.current().clone() {
                Token::Set => {
                    self.advance();
                    loop {
                        let path = self.path()?;
                        self.expect(Token::Equal)?;
                        let rhs = self.set_rhs()?;
                        actions.push(UpdateAction::Set(path, rhs));
                        if !self.accept(Token::Comma) {
                            break;
                        }
                    }
                }
                Token::Remove => {
                    self.advance();
                    loop {
                        actions.push(UpdateAction::Remove(self.path()?));
                        if !self.accept(Token::Comma) {
                            break;
                        }
                    }
                }
                Token::Add => {
                    self.advance();
                    loop {
                        let path = self.path()?;
                        let value = self.value_placeholder()?;
                        actions.push(UpdateAction::Add(path, value));
                        if !self.accept(Token::Comma) {
                            break;
                        }
                    }
                }
                Token::Delete => {
                    self.advance();
                    loop {
                        let path = self.path()?;
                        let value = self.value_placeholder()?;
                        actions.push(UpdateAction::Delete(path, value));
                        if !self.accept(Token::Comma) {
                            break;
                        }
                    }
                }
                other => {
                    return Err(invalid(format!(
                        "expected SET, REMOVE, ADD, or DELETE, found {:?}",
                        other
                    )))
                }
            }
        }
        if actions.is_empty() {
            return Err(invalid("empty update expression"));
        }
        Ok(actions)
    }

    fn value_placeholder(&mut self) -> Result<String> {
        match self.current().clone() {
            Token::ValuePlaceholder(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(invalid(format!(
                "expected a value placeholder, found {:?}",
                other
            ))),
        }
    }

    fn set_operand(&mut self) -> Result<SetOperand> {
        match self.current().clone() {
            Token::ValuePlaceholder(name) => {
                self.advance();
                Ok(SetOperand::Placeholder(name))
            }
            Token::Identifier(_) | Token::NamePlaceholder(_) => Ok(SetOperand::Path(self.path()?)),
            other => Err(invalid(format!(
                "expected a SET operand, found {:?}",
                other
            ))),
        }
    }

    fn set_rhs(&mut self) -> Result<SetRhs> {
        if let Token::Identifier(name) = self.current().clone() {
            match name.to_ascii_lowercase().as_str() {
                "if_not_exists" => {
                    self.advance();
                    self.expect(Token::LeftParen)?;
                    let path = self.path()?;
                    self.expect(Token::Comma)?;
                    let default = self.set_rhs()?;
                    self.expect(Token::RightParen)?;
                    return Ok(SetRhs::IfNotExists(path, Box::new(default)));
                }
                "list_append" => {
                    self.advance();
                    self.expect(Token::LeftParen)?;
                    let first = self.set_rhs()?;
                    self.expect(Token::Comma)?;
                    let second = self.set_rhs()?;
                    self.expect(Token::RightParen)?;
                    return Ok(SetRhs::ListAppend(Box::new(first), Box::new(second)));
                }
                _ => {}
            }
        }

        let lhs = self.set_operand()?;
        if self.accept(Token::Plus) {
            let rhs = self.set_operand()?;
            Ok(SetRhs::Plus(lhs, rhs))
        } else if self.accept(Token::Minus) {
            let rhs = self.set_operand()?;
            Ok(SetRhs::Minus(lhs, rhs))
        } else {
            Ok(SetRhs::Operand(lhs))
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Name/value substitutions for one evaluation.
pub struct EvalContext<'a> {
    pub names: &'a NameMap,
    pub values: &'a ValueMap,
}

impl<'a> EvalContext<'a> {
    pub fn new(names: &'a NameMap, values: &'a ValueMap) -> Self {
        Self { names, values }
    }

    fn resolve_name<'b>(&'b self, name: &'b str) -> &'b str {
        if name.starts_with('#') {
            self.names.get(name).map(String::as_str).unwrap_or(name)
        } else {
            name
        }
    }

    fn resolve_value(&self, placeholder: &str) -> Result<&Value> {
        self.values
            .get(placeholder)
            .ok_or_else(|| invalid(format!("unbound value placeholder '{}'", placeholder)))
    }
}

/// Evaluate a condition expression against an item.
pub fn evaluate(expr: &WireExpr, item: &Item, ctx: &EvalContext<'_>) -> Result<bool> {
    match expr {
        WireExpr::Equal(lhs, rhs) => Ok(operand(lhs, item, ctx)? == operand(rhs, item, ctx)?),
        WireExpr::NotEqual(lhs, rhs) => Ok(operand(lhs, item, ctx)? != operand(rhs, item, ctx)?),
        WireExpr::LessThan(lhs, rhs) => compare(lhs, rhs, item, ctx, |o| o.is_lt()),
        WireExpr::LessThanOrEqual(lhs, rhs) => compare(lhs, rhs, item, ctx, |o| o.is_le()),
        WireExpr::GreaterThan(lhs, rhs) => compare(lhs, rhs, item, ctx, |o| o.is_gt()),
        WireExpr::GreaterThanOrEqual(lhs, rhs) => compare(lhs, rhs, item, ctx, |o| o.is_ge()),
        WireExpr::Between(value, low, high) => {
            let value = operand(value, item, ctx)?;
            let low = operand(low, item, ctx)?;
            let high = operand(high, item, ctx)?;
            let (Some(value), Some(low), Some(high)) = (value, low, high) else {
                return Ok(false);
            };
            let lower = compare_values(&value, &low);
            let upper = compare_values(&value, &high);
            Ok(matches!(lower, Some(o) if o.is_ge()) && matches!(upper, Some(o) if o.is_le()))
        }
        WireExpr::In(value, list) => {
            let needle = operand(value, item, ctx)?;
            let Some(needle) = needle else {
                return Ok(false);
            };
            for candidate in list {
                if operand(candidate, item, ctx)? == Some(needle.clone()) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        WireExpr::And(lhs, rhs) => Ok(evaluate(lhs, item, ctx)? && evaluate(rhs, item, ctx)?),
        WireExpr::Or(lhs, rhs) => Ok(evaluate(lhs, item, ctx)? || evaluate(rhs, item, ctx)?),
        WireExpr::Not(inner) => Ok(!evaluate(inner, item, ctx)?),
        WireExpr::AttributeExists(path) => Ok(lookup(path, item, ctx).is_some()),
        WireExpr::AttributeNotExists(path) => Ok(lookup(path, item, ctx).is_none()),
        WireExpr::AttributeType(path, tag) => {
            let Some(value) = lookup(path, item, ctx) else {
                return Ok(false);
            };
            let Some(Value::S(expected)) = operand(tag, item, ctx)? else {
                return Err(invalid("attribute_type requires a string type tag"));
            };
            Ok(value.type_tag() == expected)
        }
        WireExpr::BeginsWith(path, prefix) => {
            let (Some(value), Some(prefix)) =
                (operand(path, item, ctx)?, operand(prefix, item, ctx)?)
            else {
                return Ok(false);
            };
            match (&value, &prefix) {
                (Value::S(s), Value::S(p)) => Ok(s.starts_with(p.as_str())),
                (Value::B(b), Value::B(p)) => Ok(b.starts_with(p.as_ref())),
                _ => Err(invalid("begins_with requires string or binary operands")),
            }
        }
        WireExpr::Contains(path, operand_expr) => {
            let Some(value) = lookup(path, item, ctx) else {
                return Ok(false);
            };
            let Some(needle) = operand(operand_expr, item, ctx)? else {
                return Ok(false);
            };
            Ok(match (value, &needle) {
                (Value::S(s), Value::S(n)) => s.contains(n.as_str()),
                (Value::Ss(set), Value::S(n)) => set.iter().any(|s| s == n),
                (Value::Ns(set), Value::N(n)) => set.iter().any(|s| s == n),
                (Value::Bs(set), Value::B(n)) => set.iter().any(|b| b == n),
                (Value::L(list), _) => list.iter().any(|v| v == &needle),
                _ => false,
            })
        }
        WireExpr::Size(_) | WireExpr::Path(_) | WireExpr::Placeholder(_) => {
            Err(invalid("operand cannot stand alone as a condition"))
        }
    }
}

fn compare(
    lhs: &WireExpr,
    rhs: &WireExpr,
    item: &Item,
    ctx: &EvalContext<'_>,
    test: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<bool> {
    let (Some(lhs), Some(rhs)) = (operand(lhs, item, ctx)?, operand(rhs, item, ctx)?) else {
        return Ok(false);
    };
    Ok(matches!(compare_values(&lhs, &rhs), Some(o) if test(o)))
}

/// Resolve an operand to a value; a missing attribute resolves to `None`
/// (conditions over missing attributes are false, not errors).
fn operand(expr: &WireExpr, item: &Item, ctx: &EvalContext<'_>) -> Result<Option<Value>> {
    match expr {
        WireExpr::Path(path) => Ok(lookup(path, item, ctx).cloned()),
        WireExpr::Placeholder(name) => Ok(Some(ctx.resolve_value(name)?.clone())),
        WireExpr::Size(path) => {
            let Some(value) = lookup(path, item, ctx) else {
                return Ok(None);
            };
            let size = match value {
                Value::S(s) => s.len(),
                Value::B(b) => b.len(),
                Value::L(l) => l.len(),
                Value::M(m) => m.len(),
                Value::Ss(s) => s.len(),
                Value::Ns(s) => s.len(),
                Value::Bs(s) => s.len(),
                _ => return Err(invalid("size() is undefined for this type")),
            };
            Ok(Some(Value::number(size)))
        }
        _ => Err(invalid("expected an operand expression")),
    }
}

/// Walk a document path through an item.
fn lookup<'a>(path: &Path, item: &'a Item, ctx: &EvalContext<'_>) -> Option<&'a Value> {
    let mut segments = path.segments.iter();
    let first = match segments.next()? {
        Seg::Name(name) => ctx.resolve_name(name),
        Seg::Index(_) => return None,
    };
    let mut current = item.get(first)?;
    for segment in segments {
        current = match segment {
            Seg::Name(name) => match current {
                Value::M(map) => map.get(ctx.resolve_name(name))?,
                _ => return None,
            },
            Seg::Index(index) => match current {
                Value::L(list) => list.get(*index)?,
                _ => return None,
            },
        };
    }
    Some(current)
}

/// Apply update actions to an item, returning the updated copy.
pub fn apply_update(
    item: &Item,
    actions: &[UpdateAction],
    ctx: &EvalContext<'_>,
) -> Result<Item> {
    let mut result = item.clone();
    for action in actions {
        match action {
            UpdateAction::Set(path, rhs) => {
                let value = resolve_set_rhs(rhs, &result, ctx)?;
                set_path(&mut result, path, value, ctx)?;
            }
            UpdateAction::Remove(path) => {
                remove_path(&mut result, path, ctx);
            }
            UpdateAction::Add(path, placeholder) => {
                let addend = ctx.resolve_value(placeholder)?.clone();
                let name = top_level_name(path, ctx)?;
                let updated = match (result.get(&name), &addend) {
                    (None, _) => addend.clone(),
                    (Some(Value::N(a)), Value::N(b)) => Value::N(add_numbers(a, b)?),
                    (Some(Value::Ss(set)), Value::Ss(more)) => {
                        let mut set = set.clone();
                        for value in more {
                            if !set.contains(value) {
                                set.push(value.clone());
                            }
                        }
                        Value::Ss(set)
                    }
                    (Some(Value::Ns(set)), Value::Ns(more)) => {
                        let mut set = set.clone();
                        for value in more {
                            if !set.contains(value) {
                                set.push(value.clone());
                            }
                        }
                        Value::Ns(set)
                    }
                    (Some(Value::Bs(set)), Value::Bs(more)) => {
                        let mut set = set.clone();
                        for value in more {
                            if !set.contains(value) {
                                set.push(value.clone());
                            }
                        }
                        Value::Bs(set)
                    }
                    _ => return Err(invalid("ADD requires a number or a matching set")),
                };
                result.insert(name, updated);
            }
            UpdateAction::Delete(path, placeholder) => {
                let removal = ctx.resolve_value(placeholder)?.clone();
                let name = top_level_name(path, ctx)?;
                if let Some(existing) = result.get(&name) {
                    let updated = match (existing, &removal) {
                        (Value::Ss(set), Value::Ss(gone)) => {
                            Value::Ss(set.iter().filter(|v| !gone.contains(v)).cloned().collect())
                        }
                        (Value::Ns(set), Value::Ns(gone)) => {
                            Value::Ns(set.iter().filter(|v| !gone.contains(v)).cloned().collect())
                        }
                        (Value::Bs(set), Value::Bs(gone)) => {
                            Value::Bs(set.iter().filter(|v| !gone.contains(v)).cloned().collect())
                        }
                        _ => return Err(invalid("DELETE requires matching set types")),
                    };
                    result.insert(name, updated);
                }
            }
        }
    }
    Ok(result)
}

fn resolve_set_rhs(rhs: &SetRhs, item: &Item, ctx: &EvalContext<'_>) -> Result<Value> {
    match rhs {
        SetRhs::Operand(operand) => resolve_set_operand(operand, item, ctx),
        SetRhs::Plus(lhs, rhs) => {
            arithmetic(lhs, rhs, item, ctx, |a, b| add_numbers(a, b))
        }
        SetRhs::Minus(lhs, rhs) => {
            arithmetic(lhs, rhs, item, ctx, |a, b| sub_numbers(a, b))
        }
        SetRhs::IfNotExists(path, default) => match lookup(path, item, ctx) {
            Some(value) => Ok(value.clone()),
            None => resolve_set_rhs(default, item, ctx),
        },
        SetRhs::ListAppend(first, second) => {
            let first = resolve_set_rhs(first, item, ctx)?;
            let second = resolve_set_rhs(second, item, ctx)?;
            match (first, second) {
                (Value::L(mut a), Value::L(b)) => {
                    a.extend(b);
                    Ok(Value::L(a))
                }
                _ => Err(invalid("list_append requires two lists")),
            }
        }
    }
}

fn resolve_set_operand(
    operand: &SetOperand,
    item: &Item,
    ctx: &EvalContext<'_>,
) -> Result<Value> {
    match operand {
        SetOperand::Placeholder(name) => Ok(ctx.resolve_value(name)?.clone()),
        SetOperand::Path(path) => lookup(path, item, ctx)
            .cloned()
            .ok_or_else(|| invalid(format!("attribute path not found: {:?}", path))),
    }
}

fn arithmetic(
    lhs: &SetOperand,
    rhs: &SetOperand,
    item: &Item,
    ctx: &EvalContext<'_>,
    op: impl Fn(&str, &str) -> Result<String>,
) -> Result<Value> {
    let lhs = resolve_set_operand(lhs, item, ctx)?;
    let rhs = resolve_set_operand(rhs, item, ctx)?;
    match (&lhs, &rhs) {
        (Value::N(a), Value::N(b)) => Ok(Value::N(op(a, b)?)),
        _ => Err(invalid("arithmetic requires number operands")),
    }
}

fn add_numbers(a: &str, b: &str) -> Result<String> {
    let (a, b) = parse_pair(a, b)?;
    Ok(render_number(a + b))
}

fn sub_numbers(a: &str, b: &str) -> Result<String> {
    let (a, b) = parse_pair(a, b)?;
    Ok(render_number(a - b))
}

fn parse_pair(a: &str, b: &str) -> Result<(f64, f64)> {
    let a = a.parse::<f64>().map_err(|_| invalid("invalid number"))?;
    let b = b.parse::<f64>().map_err(|_| invalid("invalid number"))?;
    Ok((a, b))
}

fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn top_level_name(path: &Path, ctx: &EvalContext<'_>) -> Result<String> {
    match path.segments.as_slice() {
        [Seg::Name(name)] => Ok(ctx.resolve_name(name).to_string()),
        _ => Err(invalid("ADD/DELETE require a top-level attribute")),
    }
}

fn set_path(item: &mut Item, path: &Path, value: Value, ctx: &EvalContext<'_>) -> Result<()> {
    match path.segments.as_slice() {
        [Seg::Name(name)] => {
            item.insert(ctx.resolve_name(name).to_string(), value);
            Ok(())
        }
        [Seg::Name(name), rest @ ..] => {
            let root = ctx.resolve_name(name).to_string();
            let entry = item
                .entry(root)
                .or_insert_with(|| Value::M(HashMap::new()));
            set_nested(entry, rest, value, ctx)
        }
        _ => Err(invalid("SET path must start with an attribute name")),
    }
}

fn set_nested(
    current: &mut Value,
    segments: &[Seg],
    value: Value,
    ctx: &EvalContext<'_>,
) -> Result<()> {
    match segments {
        [] => {
            *current = value;
            Ok(())
        }
        [Seg::Name(name), rest @ ..] => match current {
            Value::M(map) => {
                let entry = map
                    .entry(ctx.resolve_name(name).to_string())
                    .or_insert_with(|| Value::M(HashMap::new()));
                set_nested(entry, rest, value, ctx)
            }
            _ => Err(invalid("SET path traverses a non-map value")),
        },
        [Seg::Index(index), rest @ ..] => match current {
            Value::L(list) => {
                let is_append = rest.is_empty() && *index == list.len();
                match list.get_mut(*index) {
                    Some(entry) => set_nested(entry, rest, value, ctx),
                    None if is_append => {
                        list.push(value);
                        Ok(())
                    }
                    None => Err(invalid("SET list index out of bounds")),
                }
            }
            _ => Err(invalid("SET path indexes a non-list value")),
        },
    }
}

fn remove_path(item: &mut Item, path: &Path, ctx: &EvalContext<'_>) {
    match path.segments.as_slice() {
        [Seg::Name(name)] => {
            item.remove(ctx.resolve_name(name));
        }
        [Seg::Name(name), rest @ ..] => {
            if let Some(value) = item.get_mut(ctx.resolve_name(name)) {
                remove_nested(value, rest, ctx);
            }
        }
        _ => {}
    }
}

fn remove_nested(current: &mut Value, segments: &[Seg], ctx: &EvalContext<'_>) {
    match segments {
        [] => {}
        [Seg::Name(name)] => {
            if let Value::M(map) = current {
                map.remove(ctx.resolve_name(name));
            }
        }
        [Seg::Index(index)] => {
            if let Value::L(list) = current {
                if *index < list.len() {
                    list.remove(*index);
                }
            }
        }
        [Seg::Name(name), rest @ ..] => {
            if let Value::M(map) = current {
                if let Some(next) = map.get_mut(ctx.resolve_name(name)) {
                    remove_nested(next, rest, ctx);
                }
            }
        }
        [Seg::Index(index), rest @ ..] => {
            if let Value::L(list) = current {
                if let Some(next) = list.get_mut(*index) {
                    remove_nested(next, rest, ctx);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_maps() -> (NameMap, ValueMap) {
        (NameMap::new(), ValueMap::new())
    }

    fn eval(expression: &str, item: &Item, names: NameMap, values: ValueMap) -> bool {
        let expr = WireParser::parse_condition(expression).unwrap();
        let ctx = EvalContext::new(&names, &values);
        evaluate(&expr, item, &ctx).unwrap()
    }

    #[test]
    fn test_equal_with_placeholders() {
        let item = Item::from([("age".to_string(), Value::number(30))]);
        let values = ValueMap::from([(":v0".to_string(), Value::number(30))]);
        assert!(eval("age = :v0", &item, NameMap::new(), values));
    }

    #[test]
    fn test_name_placeholder_resolution() {
        let item = Item::from([("user-name".to_string(), Value::string("Alice"))]);
        let names = NameMap::from([("#n0".to_string(), "user-name".to_string())]);
        let values = ValueMap::from([(":v0".to_string(), Value::string("Alice"))]);
        assert!(eval("#n0 = :v0", &item, names, values));
    }

    #[test]
    fn test_comparisons_and_logic() {
        let item = Item::from([
            ("age".to_string(), Value::number(25)),
            ("active".to_string(), Value::Bool(true)),
        ]);
        let values = ValueMap::from([
            (":min".to_string(), Value::number(18)),
            (":flag".to_string(), Value::Bool(true)),
        ]);
        assert!(eval(
            "age > :min AND active = :flag",
            &item,
            NameMap::new(),
            values.clone()
        ));
        assert!(eval(
            "age < :min OR active = :flag",
            &item,
            NameMap::new(),
            values.clone()
        ));
        assert!(!eval("NOT (age > :min)", &item, NameMap::new(), values));
    }

    #[test]
    fn test_between_and_in() {
        let item = Item::from([("ts".to_string(), Value::number(15))]);
        let values = ValueMap::from([
            (":a".to_string(), Value::number(10)),
            (":b".to_string(), Value::number(20)),
            (":c".to_string(), Value::number(15)),
        ]);
        assert!(eval("ts BETWEEN :a AND :b", &item, NameMap::new(), values.clone()));
        assert!(eval("ts IN (:a, :c)", &item, NameMap::new(), values.clone()));
        assert!(!eval("ts IN (:a, :b)", &item, NameMap::new(), values));
    }

    #[test]
    fn test_missing_attribute_is_false_not_error() {
        let item = Item::new();
        let values = ValueMap::from([(":v".to_string(), Value::number(1))]);
        assert!(!eval("missing > :v", &item, NameMap::new(), values));
    }

    #[test]
    fn test_functions() {
        let item = Item::from([
            ("email".to_string(), Value::string("alice@example.com")),
            (
                "tags".to_string(),
                Value::Ss(vec!["admin".to_string(), "ops".to_string()]),
            ),
        ]);
        let values = ValueMap::from([
            (":p".to_string(), Value::string("alice")),
            (":t".to_string(), Value::string("admin")),
            (":n".to_string(), Value::number(5)),
            (":tag".to_string(), Value::string("S")),
        ]);
        assert!(eval("attribute_exists(email)", &item, NameMap::new(), values.clone()));
        assert!(eval("attribute_not_exists(phone)", &item, NameMap::new(), values.clone()));
        assert!(eval("begins_with(email, :p)", &item, NameMap::new(), values.clone()));
        assert!(eval("contains(tags, :t)", &item, NameMap::new(), values.clone()));
        assert!(eval("size(email) > :n", &item, NameMap::new(), values.clone()));
        assert!(eval("attribute_type(email, :tag)", &item, NameMap::new(), values));
    }

    #[test]
    fn test_nested_path_lookup() {
        let profile = Value::M(HashMap::from([(
            "name".to_string(),
            Value::string("Alice"),
        )]));
        let item = Item::from([("profile".to_string(), profile)]);
        let values = ValueMap::from([(":v".to_string(), Value::string("Alice"))]);
        assert!(eval("profile.name = :v", &item, NameMap::new(), values));
    }

    fn update(expression: &str, item: &Item, values: ValueMap) -> Item {
        let actions = WireParser::parse_update(expression).unwrap();
        let names = NameMap::new();
        let ctx = EvalContext::new(&names, &values);
        apply_update(item, &actions, &ctx).unwrap()
    }

    #[test]
    fn test_update_set_literal() {
        let item = Item::from([("age".to_string(), Value::number(25))]);
        let values = ValueMap::from([(":v".to_string(), Value::number(30))]);
        let updated = update("SET age = :v", &item, values);
        assert_eq!(updated.get("age"), Some(&Value::number(30)));
    }

    #[test]
    fn test_update_set_increment() {
        let item = Item::from([("score".to_string(), Value::number(100))]);
        let values = ValueMap::from([(":inc".to_string(), Value::number(50))]);
        let updated = update("SET score = score + :inc", &item, values);
        assert_eq!(updated.get("score"), Some(&Value::number(150)));
    }

    #[test]
    fn test_update_add_number_and_set() {
        let item = Item::from([
            ("views".to_string(), Value::number(10)),
            ("tags".to_string(), Value::Ss(vec!["a".to_string()])),
        ]);
        let values = ValueMap::from([
            (":n".to_string(), Value::number(1)),
            (":s".to_string(), Value::Ss(vec!["b".to_string()])),
        ]);
        let updated = update("ADD views :n, tags :s", &item, values);
        assert_eq!(updated.get("views"), Some(&Value::number(11)));
        assert_eq!(
            updated.get("tags"),
            Some(&Value::Ss(vec!["a".to_string(), "b".to_string()]))
        );
    }

    #[test]
    fn test_update_add_initializes_missing() {
        let item = Item::new();
        let values = ValueMap::from([(":n".to_string(), Value::number(1))]);
        let updated = update("ADD views :n", &item, values);
        assert_eq!(updated.get("views"), Some(&Value::number(1)));
    }

    #[test]
    fn test_update_remove_and_delete() {
        let item = Item::from([
            ("temp".to_string(), Value::string("x")),
            (
                "tags".to_string(),
                Value::Ss(vec!["a".to_string(), "b".to_string()]),
            ),
        ]);
        let values = ValueMap::from([(":gone".to_string(), Value::Ss(vec!["a".to_string()]))]);
        let updated = update("REMOVE temp DELETE tags :gone", &item, values);
        assert!(!updated.contains_key("temp"));
        assert_eq!(updated.get("tags"), Some(&Value::Ss(vec!["b".to_string()])));
    }

    #[test]
    fn test_update_if_not_exists_and_list_append() {
        let item = Item::from([("log".to_string(), Value::L(vec![Value::number(1)]))]);
        let values = ValueMap::from([
            (":zero".to_string(), Value::number(0)),
            (":more".to_string(), Value::L(vec![Value::number(2)])),
        ]);
        let updated = update(
            "SET counter = if_not_exists(counter, :zero), log = list_append(log, :more)",
            &item,
            values,
        );
        assert_eq!(updated.get("counter"), Some(&Value::number(0)));
        assert_eq!(
            updated.get("log"),
            Some(&Value::L(vec![Value::number(1), Value::number(2)]))
        );
    }

    #[test]
    fn test_update_nested_set() {
        let item = Item::from([(
            "profile".to_string(),
            Value::M(HashMap::from([("a".to_string(), Value::number(1))])),
        )]);
        let values = ValueMap::from([(":v".to_string(), Value::number(2))]);
        let updated = update("SET profile.b = :v", &item, values);
        let map = updated.get("profile").unwrap().as_map().unwrap();
        assert_eq!(map.get("b"), Some(&Value::number(2)));
    }

    #[test]
    fn test_unbound_placeholder_is_error() {
        let item = Item::new();
        let (names, values) = ctx_maps();
        let expr = WireParser::parse_condition("a = :missing").unwrap();
        let ctx = EvalContext::new(&names, &values);
        assert!(evaluate(&expr, &item, &ctx).is_err());
    }

    #[test]
    fn test_parse_roundtrip_of_compiled_shapes() {
        // The shapes the expression compiler emits all parse
        for expression in [
            "#n0 = :v0",
            "#n0 = :v0 AND #n1 BETWEEN :v1 AND :v2",
            "begins_with(#n0, :v0)",
            "#n0 IN (:v0, :v1, :v2)",
            "(#n0 = :v0 AND #n1 > :v1)",
            "NOT ((#n0 = :v0 OR #n1 = :v1))",
            "attribute_type(#n0, :v0)",
            "size(#n0) > :v0",
        ] {
            WireParser::parse_condition(expression).unwrap();
        }
        for expression in [
            "SET #n0 = #n0 + :v0",
            "ADD #n0 :v0",
            "SET #n0 = :v0, #n2 = :v1 REMOVE #n1",
            "SET #n0 = if_not_exists(#n0, :v0), #n1 = list_append(#n1, :v1)",
            "DELETE #n0 :v0",
        ] {
            WireParser::parse_update(expression).unwrap();
        }
    }
}
