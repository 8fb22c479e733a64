//! Embedded expression evaluator behind the `js` import namespace
//!
//! Sources occasionally need to run small scraper helper snippets found
//! in page HTML: unpack an obfuscated string, compute a token, join URL
//! parts. This module evaluates that expression subset directly. The
//! evaluator has no access to the host file system, network, or plugin
//! memory; a context holds nothing but string-keyed variables.

use std::collections::BTreeMap;
use std::fmt;

/// Evaluation errors. The ABI maps all of these to `MissingResult`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JsError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("eval error: {0}")]
    Eval(String),
}

type JsResult<T> = Result<T, JsError>;

/// Runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<JsValue>),
    Object(BTreeMap<String, JsValue>),
}

impl JsValue {
    pub fn truthy(&self) -> bool {
        match self {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Bool(b) => *b,
            JsValue::Number(n) => *n != 0.0 && !n.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            JsValue::Array(_) | JsValue::Object(_) => true,
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            JsValue::Number(n) => *n,
            JsValue::Bool(true) => 1.0,
            JsValue::Bool(false) | JsValue::Null => 0.0,
            JsValue::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    /// The string form handed back across the ABI. Arrays and objects are
    /// JSON-stringified.
    pub fn to_output_string(&self) -> String {
        match self {
            JsValue::Undefined => "undefined".to_string(),
            JsValue::Null => "null".to_string(),
            JsValue::Bool(b) => b.to_string(),
            JsValue::Number(n) => format_number(*n),
            JsValue::String(s) => s.clone(),
            JsValue::Array(_) | JsValue::Object(_) => {
                serde_json::to_string(&self.to_json()).unwrap_or_else(|_| "null".to_string())
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            JsValue::Undefined | JsValue::Null => serde_json::Value::Null,
            JsValue::Bool(b) => serde_json::Value::Bool(*b),
            JsValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            JsValue::String(s) => serde_json::Value::String(s.clone()),
            JsValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(JsValue::to_json).collect())
            }
            JsValue::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> JsValue {
        match json {
            serde_json::Value::Null => JsValue::Null,
            serde_json::Value::Bool(b) => JsValue::Bool(*b),
            serde_json::Value::Number(n) => JsValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => JsValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                JsValue::Array(items.iter().map(JsValue::from_json).collect())
            }
            serde_json::Value::Object(map) => JsValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), JsValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ===== Tokens =====

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    String(String),
    Ident(String),
    Punct(&'static str),
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
        }
    }

    fn tokenize(mut self) -> JsResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else if c.is_ascii_digit() {
                tokens.push(self.number()?);
            } else if c == '"' || c == '\'' {
                tokens.push(self.string(c)?);
            } else if c.is_alphabetic() || c == '_' || c == '$' {
                tokens.push(self.ident());
            } else {
                tokens.push(self.punct()?);
            }
        }
        Ok(tokens)
    }

    fn number(&mut self) -> JsResult<Token> {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' || c == 'x' || c.is_ascii_hexdigit() {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            let value = i64::from_str_radix(hex, 16)
                .map_err(|_| JsError::Parse(format!("bad hex literal {text}")))?;
            return Ok(Token::Number(value as f64));
        }
        text.parse()
            .map(Token::Number)
            .map_err(|_| JsError::Parse(format!("bad number literal {text}")))
    }

    fn string(&mut self, quote: char) -> JsResult<Token> {
        self.chars.next();
        let mut text = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => break,
                Some('\\') => match self.chars.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('u') => {
                        let mut code = String::new();
                        for _ in 0..4 {
                            code.push(
                                self.chars
                                    .next()
                                    .ok_or_else(|| JsError::Parse("bad \\u escape".into()))?,
                            );
                        }
                        let value = u32::from_str_radix(&code, 16)
                            .map_err(|_| JsError::Parse("bad \\u escape".into()))?;
                        text.push(char::from_u32(value).unwrap_or('\u{fffd}'));
                    }
                    Some(other) => text.push(other),
                    None => return Err(JsError::Parse("unterminated string".into())),
                },
                Some(c) => text.push(c),
                None => return Err(JsError::Parse("unterminated string".into())),
            }
        }
        Ok(Token::String(text))
    }

    fn ident(&mut self) -> Token {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        Token::Ident(text)
    }

    fn punct(&mut self) -> JsResult<Token> {
        const PUNCTS: &[&str] = &[
            "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">",
            "!", "(", ")", "[", "]", "{", "}", ",", ".", ":", ";", "?", "=",
        ];
        // Longest match: extend only while the buffer stays a prefix of
        // some operator, so nothing is consumed and lost.
        let mut buf = String::new();
        while let Some(&c) = self.chars.peek() {
            let mut candidate = buf.clone();
            candidate.push(c);
            if PUNCTS.iter().any(|p| p.starts_with(candidate.as_str())) {
                buf.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        PUNCTS
            .iter()
            .find(|p| **p == buf)
            .map(|p| Token::Punct(*p))
            .ok_or_else(|| JsError::Parse("unexpected character".into()))
    }
}

// ===== AST =====

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    String(String),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary(&'static str, Box<Expr>),
    Binary(Box<Expr>, &'static str, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Stmt {
    Assign(String, Expr),
    Expr(Expr),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(q)) if *q == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &'static str) -> JsResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(JsError::Parse(format!("expected `{p}`")))
        }
    }

    fn program(&mut self) -> JsResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while self.peek().is_some() {
            if self.eat_punct(";") {
                continue;
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> JsResult<Stmt> {
        // `var`/`let`/`const` declarations and bare assignments.
        if let Some(Token::Ident(word)) = self.peek() {
            if word == "var" || word == "let" || word == "const" {
                self.next();
                let Some(Token::Ident(name)) = self.next() else {
                    return Err(JsError::Parse("expected identifier".into()));
                };
                self.expect_punct("=")?;
                return Ok(Stmt::Assign(name, self.expression()?));
            }
            if matches!(self.tokens.get(self.pos + 1), Some(Token::Punct("="))) {
                let name = word.clone();
                self.pos += 2;
                return Ok(Stmt::Assign(name, self.expression()?));
            }
        }
        Ok(Stmt::Expr(self.expression()?))
    }

    fn expression(&mut self) -> JsResult<Expr> {
        let condition = self.binary(0)?;
        if self.eat_punct("?") {
            let then = self.expression()?;
            self.expect_punct(":")?;
            let otherwise = self.expression()?;
            return Ok(Expr::Ternary(
                Box::new(condition),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(condition)
    }

    fn binary(&mut self, min_level: u8) -> JsResult<Expr> {
        const LEVELS: &[&[&str]] = &[
            &["||"],
            &["&&"],
            &["===", "!==", "==", "!="],
            &["<", "<=", ">", ">="],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        if min_level as usize >= LEVELS.len() {
            return self.unary();
        }
        let mut left = self.binary(min_level + 1)?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct(p)) if LEVELS[min_level as usize].contains(p) => *p,
                _ => break,
            };
            self.pos += 1;
            let right = self.binary(min_level + 1)?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> JsResult<Expr> {
        for op in ["-", "!", "+"] {
            if matches!(self.peek(), Some(Token::Punct(p)) if *p == op) {
                self.pos += 1;
                let operand = self.unary()?;
                let op: &'static str = match op {
                    "-" => "-",
                    "!" => "!",
                    _ => "+",
                };
                return Ok(Expr::Unary(op, Box::new(operand)));
            }
        }
        self.postfix()
    }

    fn postfix(&mut self) -> JsResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let Some(Token::Ident(name)) = self.next() else {
                    return Err(JsError::Parse("expected property name".into()));
                };
                expr = Expr::Member(Box::new(expr), name);
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat_punct("(") {
                let mut args = Vec::new();
                if !self.eat_punct(")") {
                    loop {
                        args.push(self.expression()?);
                        if self.eat_punct(")") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                expr = Expr::Call(Box::new(expr), args);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> JsResult<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::String(s)) => Ok(Expr::String(s)),
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Token::Punct("(")) => {
                let inner = self.expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Some(Token::Punct("[")) => {
                let mut items = Vec::new();
                if !self.eat_punct("]") {
                    loop {
                        items.push(self.expression()?);
                        if self.eat_punct("]") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Some(Token::Punct("{")) => {
                let mut props = Vec::new();
                if !self.eat_punct("}") {
                    loop {
                        let key = match self.next() {
                            Some(Token::Ident(name)) => name,
                            Some(Token::String(s)) => s,
                            _ => return Err(JsError::Parse("expected property key".into())),
                        };
                        self.expect_punct(":")?;
                        props.push((key, self.expression()?));
                        if self.eat_punct("}") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Object(props))
            }
            other => Err(JsError::Parse(format!("unexpected token {other:?}"))),
        }
    }
}

// ===== Evaluation =====

/// A sandboxed variable context
#[derive(Debug, Default)]
pub struct JsContext {
    vars: BTreeMap<String, JsValue>,
}

impl JsContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&JsValue> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: JsValue) {
        self.vars.insert(name.into(), value);
    }

    /// Evaluate source in this context. Assignments persist as context
    /// variables; the value of the last statement is returned.
    pub fn eval(&mut self, source: &str) -> JsResult<JsValue> {
        let tokens = Lexer::new(source).tokenize()?;
        let stmts = Parser::new(tokens).program()?;
        if stmts.is_empty() {
            return Ok(JsValue::Undefined);
        }
        let mut last = JsValue::Undefined;
        for stmt in stmts {
            match stmt {
                Stmt::Assign(name, expr) => {
                    let value = self.eval_expr(&expr)?;
                    last = value.clone();
                    self.vars.insert(name, value);
                }
                Stmt::Expr(expr) => last = self.eval_expr(&expr)?,
            }
        }
        Ok(last)
    }

    fn eval_expr(&self, expr: &Expr) -> JsResult<JsValue> {
        match expr {
            Expr::Number(n) => Ok(JsValue::Number(*n)),
            Expr::String(s) => Ok(JsValue::String(s.clone())),
            Expr::Array(items) => Ok(JsValue::Array(
                items
                    .iter()
                    .map(|e| self.eval_expr(e))
                    .collect::<JsResult<_>>()?,
            )),
            Expr::Object(props) => {
                let mut map = BTreeMap::new();
                for (key, value) in props {
                    map.insert(key.clone(), self.eval_expr(value)?);
                }
                Ok(JsValue::Object(map))
            }
            Expr::Ident(name) => Ok(match name.as_str() {
                "true" => JsValue::Bool(true),
                "false" => JsValue::Bool(false),
                "null" => JsValue::Null,
                "undefined" => JsValue::Undefined,
                "NaN" => JsValue::Number(f64::NAN),
                "Infinity" => JsValue::Number(f64::INFINITY),
                // Namespaces resolve at the member-call site.
                "Math" | "JSON" | "String" | "Number" => JsValue::String(format!("[{name}]")),
                _ => self.vars.get(name).cloned().unwrap_or(JsValue::Undefined),
            }),
            Expr::Unary(op, operand) => {
                let value = self.eval_expr(operand)?;
                Ok(match *op {
                    "!" => JsValue::Bool(!value.truthy()),
                    "-" => JsValue::Number(-value.as_number()),
                    _ => JsValue::Number(value.as_number()),
                })
            }
            Expr::Binary(left, op, right) => self.eval_binary(left, op, right),
            Expr::Ternary(condition, then, otherwise) => {
                if self.eval_expr(condition)?.truthy() {
                    self.eval_expr(then)
                } else {
                    self.eval_expr(otherwise)
                }
            }
            Expr::Member(target, name) => {
                let value = self.eval_expr(target)?;
                Ok(member(&value, name))
            }
            Expr::Index(target, index) => {
                let value = self.eval_expr(target)?;
                let index = self.eval_expr(index)?;
                Ok(match (&value, &index) {
                    (JsValue::Array(items), JsValue::Number(n)) => items
                        .get(*n as usize)
                        .cloned()
                        .unwrap_or(JsValue::Undefined),
                    (JsValue::String(s), JsValue::Number(n)) => s
                        .chars()
                        .nth(*n as usize)
                        .map(|c| JsValue::String(c.to_string()))
                        .unwrap_or(JsValue::Undefined),
                    (JsValue::Object(map), _) => map
                        .get(&index.to_output_string())
                        .cloned()
                        .unwrap_or(JsValue::Undefined),
                    _ => JsValue::Undefined,
                })
            }
            Expr::Call(callee, args) => self.eval_call(callee, args),
        }
    }

    fn eval_binary(&self, left: &Expr, op: &str, right: &Expr) -> JsResult<JsValue> {
        if op == "&&" {
            let lhs = self.eval_expr(left)?;
            return if lhs.truthy() { self.eval_expr(right) } else { Ok(lhs) };
        }
        if op == "||" {
            let lhs = self.eval_expr(left)?;
            return if lhs.truthy() { Ok(lhs) } else { self.eval_expr(right) };
        }
        let lhs = self.eval_expr(left)?;
        let rhs = self.eval_expr(right)?;
        Ok(match op {
            "+" => match (&lhs, &rhs) {
                (JsValue::String(_), _) | (_, JsValue::String(_)) => JsValue::String(format!(
                    "{}{}",
                    lhs.to_output_string(),
                    rhs.to_output_string()
                )),
                _ => JsValue::Number(lhs.as_number() + rhs.as_number()),
            },
            "-" => JsValue::Number(lhs.as_number() - rhs.as_number()),
            "*" => JsValue::Number(lhs.as_number() * rhs.as_number()),
            "/" => JsValue::Number(lhs.as_number() / rhs.as_number()),
            "%" => JsValue::Number(lhs.as_number() % rhs.as_number()),
            "==" | "===" => JsValue::Bool(loose_eq(&lhs, &rhs)),
            "!=" | "!==" => JsValue::Bool(!loose_eq(&lhs, &rhs)),
            "<" => compare(&lhs, &rhs, |o| o == std::cmp::Ordering::Less),
            "<=" => compare(&lhs, &rhs, |o| o != std::cmp::Ordering::Greater),
            ">" => compare(&lhs, &rhs, |o| o == std::cmp::Ordering::Greater),
            ">=" => compare(&lhs, &rhs, |o| o != std::cmp::Ordering::Less),
            other => return Err(JsError::Eval(format!("unsupported operator {other}"))),
        })
    }

    fn eval_call(&self, callee: &Expr, args: &[Expr]) -> JsResult<JsValue> {
        let args: Vec<JsValue> = args
            .iter()
            .map(|a| self.eval_expr(a))
            .collect::<JsResult<_>>()?;

        match callee {
            Expr::Ident(name) => global_call(name, &args),
            Expr::Member(target, method) => {
                if let Expr::Ident(namespace) = target.as_ref() {
                    match namespace.as_str() {
                        "Math" => return math_call(method, &args),
                        "JSON" => return json_call(method, &args),
                        "String" if method == "fromCharCode" => {
                            let text: String = args
                                .iter()
                                .filter_map(|a| char::from_u32(a.as_number() as u32))
                                .collect();
                            return Ok(JsValue::String(text));
                        }
                        _ => {}
                    }
                }
                let value = self.eval_expr(target)?;
                method_call(&value, method, &args)
            }
            _ => Err(JsError::Eval("value is not callable".into())),
        }
    }
}

fn member(value: &JsValue, name: &str) -> JsValue {
    match (value, name) {
        (JsValue::String(s), "length") => JsValue::Number(s.chars().count() as f64),
        (JsValue::Array(items), "length") => JsValue::Number(items.len() as f64),
        (JsValue::Object(map), _) => map.get(name).cloned().unwrap_or(JsValue::Undefined),
        _ => JsValue::Undefined,
    }
}

fn loose_eq(lhs: &JsValue, rhs: &JsValue) -> bool {
    match (lhs, rhs) {
        (JsValue::Number(a), JsValue::Number(b)) => a == b,
        (JsValue::String(a), JsValue::String(b)) => a == b,
        (JsValue::Bool(a), JsValue::Bool(b)) => a == b,
        (JsValue::Null | JsValue::Undefined, JsValue::Null | JsValue::Undefined) => true,
        (JsValue::Number(a), b) | (b, JsValue::Number(a)) => *a == b.as_number(),
        _ => lhs == rhs,
    }
}

fn compare(lhs: &JsValue, rhs: &JsValue, pick: impl Fn(std::cmp::Ordering) -> bool) -> JsValue {
    let ordering = match (lhs, rhs) {
        (JsValue::String(a), JsValue::String(b)) => Some(a.cmp(b)),
        _ => lhs.as_number().partial_cmp(&rhs.as_number()),
    };
    match ordering {
        Some(o) => JsValue::Bool(pick(o)),
        None => JsValue::Bool(false),
    }
}

fn global_call(name: &str, args: &[JsValue]) -> JsResult<JsValue> {
    let first = args.first().cloned().unwrap_or(JsValue::Undefined);
    Ok(match name {
        "parseInt" => {
            let radix = args.get(1).map(|v| v.as_number() as u32).unwrap_or(10);
            let text = first.to_output_string();
            let text = text.trim();
            let digits: String = text
                .chars()
                .take_while(|c| c.is_digit(radix.max(2)) || *c == '-' || *c == '+')
                .collect();
            i64::from_str_radix(digits.trim_start_matches('+'), radix.max(2))
                .map(|i| JsValue::Number(i as f64))
                .unwrap_or(JsValue::Number(f64::NAN))
        }
        "parseFloat" => JsValue::Number(first.as_number()),
        "String" => JsValue::String(first.to_output_string()),
        "Number" => JsValue::Number(first.as_number()),
        "Boolean" => JsValue::Bool(first.truthy()),
        "isNaN" => JsValue::Bool(first.as_number().is_nan()),
        "encodeURIComponent" => JsValue::String(encode_uri_component(&first.to_output_string())),
        "decodeURIComponent" => JsValue::String(decode_uri_component(&first.to_output_string())),
        _ => return Err(JsError::Eval(format!("unknown function {name}"))),
    })
}

fn math_call(method: &str, args: &[JsValue]) -> JsResult<JsValue> {
    let first = args.first().map(|v| v.as_number()).unwrap_or(f64::NAN);
    Ok(JsValue::Number(match method {
        "floor" => first.floor(),
        "ceil" => first.ceil(),
        "round" => first.round(),
        "abs" => first.abs(),
        "sqrt" => first.sqrt(),
        "pow" => first.powf(args.get(1).map(|v| v.as_number()).unwrap_or(f64::NAN)),
        "min" => args
            .iter()
            .map(|v| v.as_number())
            .fold(f64::INFINITY, f64::min),
        "max" => args
            .iter()
            .map(|v| v.as_number())
            .fold(f64::NEG_INFINITY, f64::max),
        other => return Err(JsError::Eval(format!("unknown Math method {other}"))),
    }))
}

fn json_call(method: &str, args: &[JsValue]) -> JsResult<JsValue> {
    let first = args.first().cloned().unwrap_or(JsValue::Undefined);
    match method {
        "stringify" => Ok(JsValue::String(
            serde_json::to_string(&first.to_json())
                .map_err(|e| JsError::Eval(e.to_string()))?,
        )),
        "parse" => {
            let parsed: serde_json::Value = serde_json::from_str(&first.to_output_string())
                .map_err(|e| JsError::Eval(format!("JSON.parse: {e}")))?;
            Ok(JsValue::from_json(&parsed))
        }
        other => Err(JsError::Eval(format!("unknown JSON method {other}"))),
    }
}

fn method_call(value: &JsValue, method: &str, args: &[JsValue]) -> JsResult<JsValue> {
    match value {
        JsValue::String(s) => string_method(s, method, args),
        JsValue::Array(items) => array_method(items, method, args),
        JsValue::Number(n) => match method {
            "toString" => Ok(JsValue::String(format_number(*n))),
            "toFixed" => {
                let digits = args.first().map(|v| v.as_number() as usize).unwrap_or(0);
                Ok(JsValue::String(format!("{n:.digits$}")))
            }
            other => Err(JsError::Eval(format!("unknown number method {other}"))),
        },
        _ => Err(JsError::Eval(format!(
            "no method {method} on {}",
            value.to_output_string()
        ))),
    }
}

fn string_method(s: &str, method: &str, args: &[JsValue]) -> JsResult<JsValue> {
    let arg = |i: usize| {
        args.get(i)
            .map(JsValue::to_output_string)
            .unwrap_or_default()
    };
    let num = |i: usize| args.get(i).map(|v| v.as_number());
    let chars: Vec<char> = s.chars().collect();
    let clamp = |n: f64| -> usize {
        if n < 0.0 {
            (chars.len() as f64 + n).max(0.0) as usize
        } else {
            (n as usize).min(chars.len())
        }
    };
    Ok(match method {
        "charAt" => JsValue::String(
            chars
                .get(num(0).unwrap_or(0.0) as usize)
                .map(|c| c.to_string())
                .unwrap_or_default(),
        ),
        "charCodeAt" => chars
            .get(num(0).unwrap_or(0.0) as usize)
            .map(|c| JsValue::Number(*c as u32 as f64))
            .unwrap_or(JsValue::Number(f64::NAN)),
        "indexOf" => JsValue::Number(match s.find(&arg(0)) {
            Some(byte) => s[..byte].chars().count() as f64,
            None => -1.0,
        }),
        "lastIndexOf" => JsValue::Number(match s.rfind(&arg(0)) {
            Some(byte) => s[..byte].chars().count() as f64,
            None => -1.0,
        }),
        "includes" => JsValue::Bool(s.contains(&arg(0))),
        "startsWith" => JsValue::Bool(s.starts_with(&arg(0))),
        "endsWith" => JsValue::Bool(s.ends_with(&arg(0))),
        "toLowerCase" => JsValue::String(s.to_lowercase()),
        "toUpperCase" => JsValue::String(s.to_uppercase()),
        "trim" => JsValue::String(s.trim().to_string()),
        "repeat" => JsValue::String(s.repeat(num(0).unwrap_or(0.0).max(0.0) as usize)),
        "concat" => JsValue::String(format!("{s}{}", arg(0))),
        "replace" => JsValue::String(s.replacen(&arg(0), &arg(1), 1)),
        "replaceAll" => JsValue::String(s.replace(&arg(0), &arg(1))),
        "split" => {
            let separator = arg(0);
            let parts: Vec<JsValue> = if separator.is_empty() {
                chars.iter().map(|c| JsValue::String(c.to_string())).collect()
            } else {
                s.split(separator.as_str())
                    .map(|part| JsValue::String(part.to_string()))
                    .collect()
            };
            JsValue::Array(parts)
        }
        "slice" | "substring" => {
            let start = clamp(num(0).unwrap_or(0.0));
            let end = num(1).map(clamp).unwrap_or(chars.len());
            let (start, end) = if method == "substring" && start > end {
                (end, start)
            } else {
                (start, end.max(start))
            };
            JsValue::String(chars[start..end].iter().collect())
        }
        "padStart" | "padEnd" => {
            let target = num(0).unwrap_or(0.0).max(0.0) as usize;
            let pad = args
                .get(1)
                .map(JsValue::to_output_string)
                .unwrap_or_else(|| " ".to_string());
            let mut out = s.to_string();
            while out.chars().count() < target && !pad.is_empty() {
                if method == "padStart" {
                    out = format!("{pad}{out}");
                } else {
                    out.push_str(&pad);
                }
            }
            JsValue::String(out)
        }
        "toString" => JsValue::String(s.to_string()),
        other => return Err(JsError::Eval(format!("unknown string method {other}"))),
    })
}

fn array_method(items: &[JsValue], method: &str, args: &[JsValue]) -> JsResult<JsValue> {
    Ok(match method {
        "join" => {
            let separator = args
                .first()
                .map(JsValue::to_output_string)
                .unwrap_or_else(|| ",".to_string());
            JsValue::String(
                items
                    .iter()
                    .map(JsValue::to_output_string)
                    .collect::<Vec<_>>()
                    .join(&separator),
            )
        }
        "indexOf" => {
            let needle = args.first().cloned().unwrap_or(JsValue::Undefined);
            JsValue::Number(
                items
                    .iter()
                    .position(|item| loose_eq(item, &needle))
                    .map(|i| i as f64)
                    .unwrap_or(-1.0),
            )
        }
        "includes" => {
            let needle = args.first().cloned().unwrap_or(JsValue::Undefined);
            JsValue::Bool(items.iter().any(|item| loose_eq(item, &needle)))
        }
        "reverse" => JsValue::Array(items.iter().rev().cloned().collect()),
        "slice" => {
            let len = items.len() as f64;
            let clamp = |n: f64| {
                if n < 0.0 {
                    (len + n).max(0.0) as usize
                } else {
                    (n as usize).min(items.len())
                }
            };
            let start = args.first().map(|v| clamp(v.as_number())).unwrap_or(0);
            let end = args.get(1).map(|v| clamp(v.as_number())).unwrap_or(items.len());
            JsValue::Array(items[start..end.max(start)].to_vec())
        }
        "concat" => {
            let mut out = items.to_vec();
            for arg in args {
                match arg {
                    JsValue::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            JsValue::Array(out)
        }
        other => return Err(JsError::Eval(format!("unknown array method {other}"))),
    })
}

fn encode_uri_component(text: &str) -> String {
    let mut out = String::new();
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'!' | b'~' | b'*'
            | b'\'' | b'(' | b')' => out.push(byte as char),
            other => {
                use fmt::Write;
                let _ = write!(out, "%{other:02X}");
            }
        }
    }
    out
}

fn decode_uri_component(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&text[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> JsValue {
        JsContext::new().eval(source).unwrap()
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3"), JsValue::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3"), JsValue::Number(9.0));
        assert_eq!(eval("7 % 4"), JsValue::Number(3.0));
        assert_eq!(eval("-3 + 1"), JsValue::Number(-2.0));
    }

    #[test]
    fn test_string_concat_and_methods() {
        assert_eq!(
            eval("'a' + 'b' + 1"),
            JsValue::String("ab1".to_string())
        );
        assert_eq!(
            eval("'Hello World'.split(' ')[1].toUpperCase()"),
            JsValue::String("WORLD".to_string())
        );
        assert_eq!(eval("'abcdef'.slice(1, 3)"), JsValue::String("bc".into()));
        assert_eq!(eval("'aaa'.replace('a', 'b')"), JsValue::String("baa".into()));
        assert_eq!(eval("'aaa'.replaceAll('a', 'b')"), JsValue::String("bbb".into()));
    }

    #[test]
    fn test_variables_persist_in_context() {
        let mut context = JsContext::new();
        context.eval("var x = 40").unwrap();
        assert_eq!(context.eval("x + 2").unwrap(), JsValue::Number(42.0));
        assert_eq!(context.get("x"), Some(&JsValue::Number(40.0)));
    }

    #[test]
    fn test_ternary_and_comparison() {
        assert_eq!(eval("3 > 2 ? 'yes' : 'no'"), JsValue::String("yes".into()));
        assert_eq!(eval("1 == '1'"), JsValue::Bool(true));
        assert_eq!(eval("'a' < 'b'"), JsValue::Bool(true));
    }

    #[test]
    fn test_globals() {
        assert_eq!(eval("parseInt('42px')"), JsValue::Number(42.0));
        assert_eq!(eval("parseInt('ff', 16)"), JsValue::Number(255.0));
        assert_eq!(eval("Math.floor(3.9)"), JsValue::Number(3.0));
        assert_eq!(eval("String.fromCharCode(104, 105)"), JsValue::String("hi".into()));
        assert_eq!(
            eval("encodeURIComponent('a b&c')"),
            JsValue::String("a%20b%26c".into())
        );
    }

    #[test]
    fn test_json_stringify_output() {
        let mut context = JsContext::new();
        let value = context.eval("{a: 1, b: [1, 2]}").unwrap();
        assert_eq!(value.to_output_string(), r#"{"a":1.0,"b":[1.0,2.0]}"#);
    }

    #[test]
    fn test_object_member_and_index() {
        assert_eq!(eval("{a: {b: 5}}.a.b"), JsValue::Number(5.0));
        assert_eq!(eval("[10, 20, 30][1]"), JsValue::Number(20.0));
        assert_eq!(eval("'abc'.length"), JsValue::Number(3.0));
    }

    #[test]
    fn test_parse_errors() {
        let mut context = JsContext::new();
        assert!(matches!(context.eval("1 +"), Err(JsError::Parse(_))));
        assert!(matches!(context.eval("'open"), Err(JsError::Parse(_))));
    }
}
