//! Condition expression language.
//!
//! Predicates over the JSON scope a condition is evaluated against
//! (`params`, `trigger`, `goal`, `task`).
//!
//! # Syntax
//!
//! ```text
//! expr       = or
//! or         = and ("or" and)*
//! and        = not ("and" not)*
//! not        = "not" primary / primary
//! primary    = "(" expr ")" / path SP op SP value
//! path       = name ["." path]
//! op         = "eq" / "ne" / "co" / "sw" / "ew" / "gt" / "lt" / "ge" / "le" / "pr"
//! value      = string / number / "true" / "false" / "null" / token
//! ```
//!
//! # Examples
//!
//! ```text
//! params.value gt 180
//! task.status ne "completed" and goal.status eq active
//! not (params.source eq "device") or trigger.firedAt ge 2024-06-01
//! task.performer pr false
//! ```

use careplan_core::time::parse_datetime;
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{EvaluationError, Result};

/// Deepest parenthesis/`not` nesting accepted by the parser.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Contains; membership for arrays
    Co,
    /// Starts with
    Sw,
    /// Ends with
    Ew,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Ge,
    /// Less than or equal
    Le,
    /// Present (non-null) when compared with `true`
    Pr,
}

impl CompareOp {
    fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "co" => Some(Self::Co),
            "sw" => Some(Self::Sw),
            "ew" => Some(Self::Ew),
            "gt" => Some(Self::Gt),
            "lt" => Some(Self::Lt),
            "ge" => Some(Self::Ge),
            "le" => Some(Self::Le),
            "pr" => Some(Self::Pr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Comparison {
        path: String,
        op: CompareOp,
        value: Literal,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Not(Box<Expression>),
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    QuotedString(String),
    OpenParen,
    CloseParen,
    And,
    Or,
    Not,
    Operator(CompareOp),
    Eof,
}

struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek_char() {
            if !ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn next_token(&mut self) -> std::result::Result<Token, String> {
        self.skip_whitespace();

        let Some(ch) = self.peek_char() else {
            return Ok(Token::Eof);
        };

        if ch == '(' {
            self.pos += 1;
            return Ok(Token::OpenParen);
        }
        if ch == ')' {
            self.pos += 1;
            return Ok(Token::CloseParen);
        }

        if ch == '"' || ch == '\'' {
            self.pos += 1;
            let start = self.pos;
            while let Some(c) = self.peek_char() {
                if c == ch {
                    let value = &self.input[start..self.pos];
                    self.pos += 1;
                    return Ok(Token::QuotedString(value.to_string()));
                }
                self.pos += c.len_utf8();
            }
            return Err("unterminated quoted string".to_string());
        }

        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ':' | '+') {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        if self.pos == start {
            return Err(format!("unexpected character '{ch}'"));
        }

        let word = &self.input[start..self.pos];
        match word.to_lowercase().as_str() {
            "and" => Ok(Token::And),
            "or" => Ok(Token::Or),
            "not" => Ok(Token::Not),
            _ => match CompareOp::from_str(word) {
                Some(op) => Ok(Token::Operator(op)),
                None => Ok(Token::Word(word.to_string())),
            },
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    current: Token,
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> std::result::Result<Self, String> {
        let mut tokenizer = Tokenizer::new(input);
        let current = tokenizer.next_token()?;
        Ok(Self {
            tokenizer,
            current,
            nesting: 0,
        })
    }

    fn advance(&mut self) -> std::result::Result<(), String> {
        self.current = self.tokenizer.next_token()?;
        Ok(())
    }

    fn parse(&mut self) -> std::result::Result<Expression, String> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> std::result::Result<Expression, String> {
        let mut left = self.parse_and()?;
        while self.current == Token::Or {
            self.advance()?;
            let right = self.parse_and()?;
            left = Expression::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> std::result::Result<Expression, String> {
        let mut left = self.parse_not()?;
        while self.current == Token::And {
            self.advance()?;
            let right = self.parse_not()?;
            left = Expression::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> std::result::Result<Expression, String> {
        if self.current == Token::Not {
            self.advance()?;
            self.enter()?;
            let expr = self.parse_primary()?;
            self.nesting -= 1;
            return Ok(Expression::Not(Box::new(expr)));
        }
        self.parse_primary()
    }

    fn enter(&mut self) -> std::result::Result<(), String> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(format!("nesting deeper than {MAX_NESTING}"));
        }
        Ok(())
    }

    fn parse_primary(&mut self) -> std::result::Result<Expression, String> {
        if self.current == Token::OpenParen {
            self.advance()?;
            self.enter()?;
            let expr = self.parse()?;
            self.nesting -= 1;
            if self.current != Token::CloseParen {
                return Err("expected ')'".to_string());
            }
            self.advance()?;
            return Ok(expr);
        }

        let path = match &self.current {
            Token::Word(s) => s.clone(),
            other => return Err(format!("expected field path, found {other:?}")),
        };
        self.advance()?;

        let op = match &self.current {
            Token::Operator(op) => *op,
            other => return Err(format!("expected comparison operator after '{path}', found {other:?}")),
        };
        self.advance()?;

        let value = match &self.current {
            Token::QuotedString(s) => Literal::String(s.clone()),
            Token::Word(w) => word_literal(w),
            other => return Err(format!("expected value after operator, found {other:?}")),
        };
        self.advance()?;

        if op == CompareOp::Pr && !matches!(value, Literal::Bool(_)) {
            return Err("'pr' takes true or false".to_string());
        }

        Ok(Expression::Comparison { path, op, value })
    }
}

fn word_literal(word: &str) -> Literal {
    match word {
        "true" => Literal::Bool(true),
        "false" => Literal::Bool(false),
        "null" => Literal::Null,
        _ => match word.parse::<f64>() {
            Ok(n) if n.is_finite() => Literal::Number(n),
            _ => Literal::String(word.to_string()),
        },
    }
}

/// Parse a condition expression.
pub fn parse_expression(input: &str) -> Result<Expression> {
    let wrap = |message: String| EvaluationError::invalid_expression(input, message);

    if input.trim().is_empty() {
        return Err(wrap("expression is empty".to_string()));
    }

    let mut parser = Parser::new(input).map_err(wrap)?;
    let expr = parser.parse().map_err(wrap)?;
    if parser.current != Token::Eof {
        return Err(wrap("unexpected tokens after expression".to_string()));
    }
    Ok(expr)
}

// ============================================================================
// Evaluation
// ============================================================================

impl Expression {
    /// Evaluate against `scope`.
    ///
    /// A path that does not resolve is an error, except under `pr`.
    pub fn evaluate(&self, scope: &Value) -> Result<bool> {
        match self {
            Expression::Comparison { path, op, value } => compare(scope, path, *op, value),
            Expression::Logical { op, left, right } => {
                let lhs = left.evaluate(scope)?;
                match op {
                    LogicalOp::And if !lhs => Ok(false),
                    LogicalOp::Or if lhs => Ok(true),
                    _ => right.evaluate(scope),
                }
            }
            Expression::Not(inner) => Ok(!inner.evaluate(scope)?),
        }
    }

    /// Every field path the expression reads.
    pub fn paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                Expression::Comparison { path, .. } => out.push(path.as_str()),
                Expression::Logical { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
                Expression::Not(inner) => stack.push(inner),
            }
        }
        out
    }
}

/// Resolve a dotted path; numeric segments index arrays.
pub fn resolve<'v>(scope: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(scope, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn compare(scope: &Value, path: &str, op: CompareOp, literal: &Literal) -> Result<bool> {
    let resolved = resolve(scope, path);

    if op == CompareOp::Pr {
        let present = resolved.is_some_and(|v| !v.is_null());
        return Ok(match literal {
            Literal::Bool(expected) => present == *expected,
            _ => present,
        });
    }

    let actual = resolved.ok_or_else(|| EvaluationError::missing_field(path))?;
    let mismatch = || {
        EvaluationError::invalid_expression(
            path,
            format!("cannot apply {op:?} to {actual} and {literal:?}"),
        )
    };

    match op {
        CompareOp::Eq => Ok(equals(actual, literal)),
        CompareOp::Ne => Ok(!equals(actual, literal)),
        CompareOp::Co | CompareOp::Sw | CompareOp::Ew => {
            let needle = match literal {
                Literal::String(s) => s.to_lowercase(),
                Literal::Number(n) => n.to_string(),
                _ => return Err(mismatch()),
            };
            match actual {
                Value::String(s) => {
                    let hay = s.to_lowercase();
                    Ok(match op {
                        CompareOp::Co => hay.contains(&needle),
                        CompareOp::Sw => hay.starts_with(&needle),
                        _ => hay.ends_with(&needle),
                    })
                }
                Value::Array(items) if op == CompareOp::Co => {
                    Ok(items.iter().any(|item| equals(item, literal)))
                }
                _ => Err(mismatch()),
            }
        }
        CompareOp::Gt | CompareOp::Lt | CompareOp::Ge | CompareOp::Le => {
            let ordering = order(actual, literal).ok_or_else(mismatch)?;
            Ok(match op {
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Ge => ordering != Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
        CompareOp::Pr => Ok(!actual.is_null()),
    }
}

fn equals(actual: &Value, literal: &Literal) -> bool {
    match (actual, literal) {
        (Value::Null, Literal::Null) => true,
        (Value::Bool(a), Literal::Bool(b)) => a == b,
        (Value::Number(a), Literal::Number(b)) => a.as_f64().is_some_and(|a| (a - b).abs() < f64::EPSILON),
        (Value::String(a), Literal::Number(b)) => a.parse::<f64>().is_ok_and(|a| (a - b).abs() < f64::EPSILON),
        (Value::String(a), Literal::String(b)) => {
            a == b || matches!(order_dates(a, b), Some(Ordering::Equal))
        }
        _ => false,
    }
}

fn order(actual: &Value, literal: &Literal) -> Option<Ordering> {
    match (actual, literal) {
        (Value::Number(a), Literal::Number(b)) => a.as_f64()?.partial_cmp(b),
        (Value::String(a), Literal::Number(b)) => a.parse::<f64>().ok()?.partial_cmp(b),
        (Value::String(a), Literal::String(b)) => order_dates(a, b).or_else(|| Some(a.cmp(b))),
        _ => None,
    }
}

/// Chronological order when both sides are timestamps or dates.
fn order_dates(a: &str, b: &str) -> Option<Ordering> {
    let a = parse_datetime(a).ok()?;
    let b = parse_datetime(b).ok()?;
    Some(a.cmp(&b))
}
