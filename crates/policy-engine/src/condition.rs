//! Condition Evaluator (C6)
//!
//! A small, hand-rolled expression language over `{principal, resource,
//! context}` (spec §4.5). Deliberately not a general scripting runtime: the
//! grammar is fixed, the AST is tiny, and expressions are compiled once
//! (parsed into an `Expr`) and cached by source string so repeated policy
//! evaluations never re-parse.

use chrono::DateTime;
use dashmap::DashMap;
use reaper_core::AttrValue;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(AttrValue),
    Field(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
    Len(Box<Expr>),
    Contains(Box<Expr>, Box<Expr>),
    StartsWith(Box<Expr>, Box<Expr>),
    EndsWith(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CondError(pub String);

impl fmt::Display for CondError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for CondError {}

/// The ambient environment an expression is evaluated against: the three
/// top-level names `principal`, `resource`, `context`.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub principal: AttrValue,
    pub resource: AttrValue,
    pub context: AttrValue,
}

impl EvalContext {
    pub fn new(principal: AttrValue, resource: AttrValue, context: AttrValue) -> Self {
        Self {
            principal,
            resource,
            context,
        }
    }

    fn resolve(&self, path: &[String]) -> Option<AttrValue> {
        let (root, rest) = path.split_first()?;
        let base = match root.as_str() {
            "principal" => &self.principal,
            "resource" => &self.resource,
            "context" => &self.context,
            _ => return None,
        };
        if rest.is_empty() {
            return Some(base.clone());
        }
        base.get_path(&rest.join(".")).cloned()
    }
}

/// Parse a condition source string into an AST. A syntax error is a
/// validator-time (admission-time) failure, per spec §4.2.
pub fn parse(source: &str) -> Result<Expr, CondError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(CondError(format!(
            "unexpected trailing input in condition: {source}"
        )));
    }
    Ok(expr)
}

/// Evaluate a compiled expression. Per spec §4.5, unbound identifiers and
/// type errors are not hard failures — they are surfaced as `Err` so the
/// caller can skip the rule and record a diagnostic, never as a
/// caller-visible error.
pub fn eval(expr: &Expr, ctx: &EvalContext) -> Result<AttrValue, CondError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Field(path) => ctx
            .resolve(path)
            .ok_or_else(|| CondError(format!("unbound identifier: {}", path.join(".")))),
        Expr::Not(e) => Ok(AttrValue::Bool(!as_bool(eval(e, ctx)?)?)),
        Expr::And(a, b) => {
            let lhs = as_bool(eval(a, ctx)?)?;
            if !lhs {
                return Ok(AttrValue::Bool(false));
            }
            Ok(AttrValue::Bool(as_bool(eval(b, ctx)?)?))
        }
        Expr::Or(a, b) => {
            let lhs = as_bool(eval(a, ctx)?)?;
            if lhs {
                return Ok(AttrValue::Bool(true));
            }
            Ok(AttrValue::Bool(as_bool(eval(b, ctx)?)?))
        }
        Expr::Eq(a, b) => Ok(AttrValue::Bool(eval(a, ctx)? == eval(b, ctx)?)),
        Expr::Ne(a, b) => Ok(AttrValue::Bool(eval(a, ctx)? != eval(b, ctx)?)),
        Expr::Lt(a, b) => Ok(AttrValue::Bool(
            compare(&eval(a, ctx)?, &eval(b, ctx)?)? == Ordering::Less,
        )),
        Expr::Le(a, b) => Ok(AttrValue::Bool(
            compare(&eval(a, ctx)?, &eval(b, ctx)?)? != Ordering::Greater,
        )),
        Expr::Gt(a, b) => Ok(AttrValue::Bool(
            compare(&eval(a, ctx)?, &eval(b, ctx)?)? == Ordering::Greater,
        )),
        Expr::Ge(a, b) => Ok(AttrValue::Bool(
            compare(&eval(a, ctx)?, &eval(b, ctx)?)? != Ordering::Less,
        )),
        Expr::In(needle, haystack) => {
            let needle = eval(needle, ctx)?;
            let haystack = eval(haystack, ctx)?;
            let list = haystack
                .as_list()
                .ok_or_else(|| CondError("right-hand side of `in` must be a list".to_string()))?;
            Ok(AttrValue::Bool(list.iter().any(|v| *v == needle)))
        }
        Expr::Len(e) => {
            let v = eval(e, ctx)?;
            let len = match &v {
                AttrValue::List(l) => l.len(),
                AttrValue::String(s) => s.chars().count(),
                _ => return Err(CondError("len() requires a list or string".to_string())),
            };
            Ok(AttrValue::Number(len as f64))
        }
        Expr::Contains(a, b) => {
            let lhs = eval(a, ctx)?;
            let rhs = eval(b, ctx)?;
            match (&lhs, &rhs) {
                (AttrValue::String(s), AttrValue::String(needle)) => {
                    Ok(AttrValue::Bool(s.contains(needle.as_str())))
                }
                (AttrValue::List(l), needle) => Ok(AttrValue::Bool(l.iter().any(|v| v == needle))),
                _ => Err(CondError("contains() requires a string or list receiver".to_string())),
            }
        }
        Expr::StartsWith(a, b) => {
            let s = as_str(eval(a, ctx)?)?;
            let prefix = as_str(eval(b, ctx)?)?;
            Ok(AttrValue::Bool(s.starts_with(&prefix)))
        }
        Expr::EndsWith(a, b) => {
            let s = as_str(eval(a, ctx)?)?;
            let suffix = as_str(eval(b, ctx)?)?;
            Ok(AttrValue::Bool(s.ends_with(&suffix)))
        }
    }
}

fn as_bool(v: AttrValue) -> Result<bool, CondError> {
    v.as_bool().ok_or_else(|| CondError("expected a boolean".to_string()))
}

fn as_str(v: AttrValue) -> Result<String, CondError> {
    v.as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| CondError("expected a string".to_string()))
}

fn compare(a: &AttrValue, b: &AttrValue) -> Result<Ordering, CondError> {
    match (a, b) {
        (AttrValue::Number(x), AttrValue::Number(y)) => {
            x.partial_cmp(y).ok_or_else(|| CondError("NaN comparison".to_string()))
        }
        (AttrValue::String(x), AttrValue::String(y)) => {
            // Timestamps: RFC3339 strings sort chronologically when parsed;
            // fall back to lexicographic comparison otherwise.
            if let (Ok(tx), Ok(ty)) = (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                Ok(tx.cmp(&ty))
            } else {
                Ok(x.cmp(y))
            }
        }
        _ => Err(CondError("comparison requires two numbers or two strings".to_string())),
    }
}

// ---------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    True,
    False,
    Null,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Not,
    And,
    Or,
    In,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(src: &str) -> Result<Vec<Token>, CondError> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(CondError("unexpected '='; did you mean '=='?".to_string()));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(CondError("unterminated string literal".to_string()));
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            _ if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| CondError(format!("invalid number literal: {text}")))?;
                tokens.push(Token::Num(n));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(CondError(format!("unexpected character: {other:?}"))),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------
// Recursive-descent parser
// ---------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, tok: &Token) -> Result<(), CondError> {
        if self.peek() == Some(tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(CondError(format!("expected {tok:?}, got {:?}", self.peek())))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, CondError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, CondError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CondError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, CondError> {
        let lhs = self.parse_primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(Token::Eq),
            Some(Token::Ne) => Some(Token::Ne),
            Some(Token::Lt) => Some(Token::Lt),
            Some(Token::Le) => Some(Token::Le),
            Some(Token::Gt) => Some(Token::Gt),
            Some(Token::Ge) => Some(Token::Ge),
            Some(Token::In) => Some(Token::In),
            _ => None,
        };
        let Some(op) = op else { return Ok(lhs) };
        self.advance();
        let rhs = self.parse_primary()?;
        Ok(match op {
            Token::Eq => Expr::Eq(Box::new(lhs), Box::new(rhs)),
            Token::Ne => Expr::Ne(Box::new(lhs), Box::new(rhs)),
            Token::Lt => Expr::Lt(Box::new(lhs), Box::new(rhs)),
            Token::Le => Expr::Le(Box::new(lhs), Box::new(rhs)),
            Token::Gt => Expr::Gt(Box::new(lhs), Box::new(rhs)),
            Token::Ge => Expr::Ge(Box::new(lhs), Box::new(rhs)),
            Token::In => Expr::In(Box::new(lhs), Box::new(rhs)),
            _ => unreachable!(),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, CondError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Lit(AttrValue::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Lit(AttrValue::Number(n))),
            Some(Token::True) => Ok(Expr::Lit(AttrValue::Bool(true))),
            Some(Token::False) => Ok(Expr::Lit(AttrValue::Bool(false))),
            Some(Token::Null) => Ok(Expr::Lit(AttrValue::Null)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket)?;
                let values: Result<Vec<AttrValue>, CondError> = items
                    .into_iter()
                    .map(|e| match e {
                        Expr::Lit(v) => Ok(v),
                        _ => Err(CondError("list literals must contain only literals".to_string())),
                    })
                    .collect();
                Ok(Expr::Lit(AttrValue::List(values?)))
            }
            Some(Token::Ident(first)) if first == "len" && self.peek() == Some(&Token::LParen) => {
                self.advance();
                let arg = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(Expr::Len(Box::new(arg)))
            }
            Some(Token::Ident(first)) => self.parse_path_or_call(first),
            other => Err(CondError(format!("unexpected token: {other:?}"))),
        }
    }

    /// Parses `a.b.c`, stopping early to build a method call when a
    /// trailing segment is immediately followed by `(`, e.g.
    /// `resource.attributes.tags.contains("x")`.
    fn parse_path_or_call(&mut self, first: String) -> Result<Expr, CondError> {
        let mut segments = vec![first];
        loop {
            if self.peek() != Some(&Token::Dot) {
                break;
            }
            // Look ahead past the dot to see if this segment is a method call.
            let save = self.pos;
            self.advance(); // consume '.'
            let Some(Token::Ident(seg)) = self.advance() else {
                self.pos = save;
                break;
            };
            if self.peek() == Some(&Token::LParen) && is_method_name(&seg) {
                self.advance(); // consume '('
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.parse_or()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RParen)?;
                let receiver = Expr::Field(segments);
                return build_method_call(&seg, receiver, args);
            }
            segments.push(seg);
        }
        Ok(Expr::Field(segments))
    }
}

fn is_method_name(name: &str) -> bool {
    matches!(name, "contains" | "startsWith" | "endsWith" | "length")
}

fn build_method_call(name: &str, receiver: Expr, mut args: Vec<Expr>) -> Result<Expr, CondError> {
    match name {
        "length" => Ok(Expr::Len(Box::new(receiver))),
        "contains" if args.len() == 1 => Ok(Expr::Contains(Box::new(receiver), Box::new(args.remove(0)))),
        "startsWith" if args.len() == 1 => {
            Ok(Expr::StartsWith(Box::new(receiver), Box::new(args.remove(0))))
        }
        "endsWith" if args.len() == 1 => {
            Ok(Expr::EndsWith(Box::new(receiver), Box::new(args.remove(0))))
        }
        other => Err(CondError(format!("unknown method or wrong arity: {other}"))),
    }
}

// ---------------------------------------------------------------------
// Compiled-expression cache
// ---------------------------------------------------------------------

/// Compiles expressions once per unique source string and caches the result,
/// shared by the validator (which compiles at admission time) and the
/// evaluator (which looks the compiled form up by string, per spec §4.5 /
/// §9: "Compile once at policy admission; store compiled form alongside the
/// rule inside the snapshot").
#[derive(Debug, Default)]
pub struct ExprCache {
    compiled: DashMap<String, Arc<Expr>>,
}

impl ExprCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&self, source: &str) -> Result<Arc<Expr>, CondError> {
        if let Some(existing) = self.compiled.get(source) {
            return Ok(existing.clone());
        }
        let expr = Arc::new(parse(source)?);
        self.compiled.insert(source.to_string(), expr.clone());
        Ok(expr)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}
