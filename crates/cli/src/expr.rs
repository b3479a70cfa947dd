//! Restricted expression language used by `--filter`, `--print`, `--exec`
//! and `--exec-once`.
//!
//! Expressions are parsed once into an [`Expr`] tree and evaluated against a
//! [`Scope`] per row. Nothing outside the fixed operator and function set can
//! be reached.
//!
//! ```text
//! expr      := or
//! or        := and ("or" and)*
//! and       := not ("and" not)*
//! not       := "not" not | compare
//! compare   := sum (("==" | "!=" | "<" | "<=" | ">" | ">=") sum)*
//! sum       := product (("+" | "-") product)*
//! product   := unary (("*" | "/" | "%") unary)*
//! unary     := "-" unary | atom
//! atom      := number | string | "true" | "false" | "none"
//!            | ident | ident "(" [expr ("," expr)*] ")" | "(" expr ")"
//! program   := [statement (";" statement)*] [";"]
//! statement := ident "=" expr
//! ```

use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    /// Malformed input
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax {
        /// Byte offset into the source
        offset: usize,
        /// What was expected or found
        message: String,
    },

    /// Identifier that is neither a row field nor a session variable
    #[error("Unknown name '{0}'")]
    UnknownName(String),

    /// Call to a function outside the supported set
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// Wrong number of arguments
    #[error("{name}() takes {expected} argument(s), got {got}")]
    Arity {
        /// Function name
        name: String,
        /// Expected argument count
        expected: usize,
        /// Supplied argument count
        got: usize,
    },

    /// Operand of the wrong type
    #[error("Type error: {0}")]
    Type(String),

    /// Pattern passed to `matches()` failed to compile
    #[error("Invalid regex: {0}")]
    Regex(String),

    /// Division or modulo by zero
    #[error("Division by zero")]
    DivisionByZero,
}

/// Result of parsing or evaluating an expression.
pub type Result<T> = std::result::Result<T, ExprError>;

fn syntax(offset: usize, message: impl Into<String>) -> ExprError {
    ExprError::Syntax {
        offset,
        message: message.into(),
    }
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    None,
    /// Boolean.
    Bool(bool),
    /// Number (all numbers are floating point).
    Num(f64),
    /// String.
    Str(String),
}

impl Value {
    /// Truthiness: `none`, `false`, `0` and `""` are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Num(n) => *n != 0.0,
            Self::Str(s) => !s.is_empty(),
        }
    }

    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Num(_) => "number",
            Self::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Num(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Option<f64>> for Value {
    fn from(n: Option<f64>) -> Self {
        n.map_or(Self::None, Self::Num)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition or string concatenation (+).
    Add,
    /// Subtraction (-).
    Sub,
    /// Multiplication (*).
    Mul,
    /// Division (/).
    Div,
    /// Floored modulo (%).
    Mod,
    /// Equal (==).
    Eq,
    /// Not equal (!=).
    NotEq,
    /// Less than (<).
    Lt,
    /// Less than or equal (<=).
    LtEq,
    /// Greater than (>).
    Gt,
    /// Greater than or equal (>=).
    GtEq,
    /// Short-circuit AND.
    And,
    /// Short-circuit OR.
    Or,
}

impl BinaryOp {
    /// Left and right binding power.
    fn binding_power(self) -> (u8, u8) {
        match self {
            Self::Or => (1, 2),
            Self::And => (3, 4),
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq => (7, 8),
            Self::Add | Self::Sub => (9, 10),
            Self::Mul | Self::Div | Self::Mod => (11, 12),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "and",
            Self::Or => "or",
        };
        write!(f, "{op}")
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical NOT.
    Not,
    /// Numeric negation (-).
    Neg,
}

const NOT_BP: u8 = 5;
const NEG_BP: u8 = 13;

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value.
    Literal(Value),
    /// Row field or session variable.
    Ident(String),
    /// Function call.
    Call {
        /// Function name.
        name: String,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// `target = expr`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Name being assigned.
    pub target: String,
    /// Value expression.
    pub expr: Expr,
}

/// Name resolution for evaluation.
pub trait Scope {
    /// Resolve an identifier.
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Value of the current row's argument `name`, or [`Value::None`].
    fn arg(&self, _name: &str) -> Result<Value> {
        Err(ExprError::Type("arg() is only available on a row".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Value),
    Ident(String),
    Op(BinaryOp),
    Not,
    Assign,
    LParen,
    RParen,
    Comma,
    Semicolon,
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let starts_number = c.is_ascii_digit()
            || (c == '.' && source[offset + 1..].starts_with(|d: char| d.is_ascii_digit()));
        if starts_number {
            let mut end = offset;
            let mut prev = '\0';
            while let Some(&(i, d)) = chars.peek() {
                let exponent_sign = (d == '+' || d == '-') && (prev == 'e' || prev == 'E');
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    end = i + d.len_utf8();
                    prev = d;
                    chars.next();
                } else {
                    break;
                }
            }
            let text = &source[offset..end];
            let n: f64 = text
                .parse()
                .map_err(|_| syntax(offset, format!("invalid number '{text}'")))?;
            tokens.push((offset, Token::Literal(Value::Num(n))));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut end = offset;
            while let Some(&(i, d)) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    end = i + d.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let token = match &source[offset..end] {
                "and" => Token::Op(BinaryOp::And),
                "or" => Token::Op(BinaryOp::Or),
                "not" => Token::Not,
                "true" => Token::Literal(Value::Bool(true)),
                "false" => Token::Literal(Value::Bool(false)),
                "none" => Token::Literal(Value::None),
                word => Token::Ident(word.to_string()),
            };
            tokens.push((offset, token));
            continue;
        }

        if c == '\'' || c == '"' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some((_, d)) = chars.next() {
                match d {
                    '\\' => match chars.next() {
                        Some((_, 'n')) => text.push('\n'),
                        Some((_, 't')) => text.push('\t'),
                        Some((_, other)) => text.push(other),
                        None => break,
                    },
                    d if d == c => {
                        closed = true;
                        break;
                    }
                    d => text.push(d),
                }
            }
            if !closed {
                return Err(syntax(offset, "unterminated string"));
            }
            tokens.push((offset, Token::Literal(Value::Str(text))));
            continue;
        }

        chars.next();
        let followed_by_eq = matches!(chars.peek(), Some(&(_, '=')));
        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '+' => Token::Op(BinaryOp::Add),
            '-' => Token::Op(BinaryOp::Sub),
            '*' => Token::Op(BinaryOp::Mul),
            '/' => Token::Op(BinaryOp::Div),
            '%' => Token::Op(BinaryOp::Mod),
            '=' if followed_by_eq => Token::Op(BinaryOp::Eq),
            '=' => Token::Assign,
            '!' if followed_by_eq => Token::Op(BinaryOp::NotEq),
            '<' if followed_by_eq => Token::Op(BinaryOp::LtEq),
            '<' => Token::Op(BinaryOp::Lt),
            '>' if followed_by_eq => Token::Op(BinaryOp::GtEq),
            '>' => Token::Op(BinaryOp::Gt),
            other => return Err(syntax(offset, format!("unexpected character '{other}'"))),
        };
        if matches!(
            token,
            Token::Op(BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::LtEq | BinaryOp::GtEq)
        ) {
            chars.next();
        }
        tokens.push((offset, token));
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            end: source.len(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(o, _)| *o)
    }

    fn advance(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<()> {
        match self.peek() {
            Some(t) if t == expected => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(syntax(self.offset(), format!("expected {what}"))),
        }
    }

    fn expr(&mut self, min_bp: u8) -> Result<Expr> {
        let (offset, token) = self
            .advance()
            .ok_or_else(|| syntax(self.end, "unexpected end of input"))?;

        let mut lhs = match token {
            Token::Literal(value) => Expr::Literal(value),
            Token::Ident(name) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.call_args()?;
                    Expr::Call { name, args }
                } else {
                    Expr::Ident(name)
                }
            }
            Token::LParen => {
                let inner = self.expr(0)?;
                self.expect(&Token::RParen, "')'")?;
                inner
            }
            Token::Not => Expr::Unary(UnaryOp::Not, Box::new(self.expr(NOT_BP)?)),
            Token::Op(BinaryOp::Sub) => Expr::Unary(UnaryOp::Neg, Box::new(self.expr(NEG_BP)?)),
            other => return Err(syntax(offset, format!("unexpected {other:?}"))),
        };

        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            let (l_bp, r_bp) = op.binding_power();
            if l_bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.expr(r_bp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn call_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr(0)?);
            match self.advance() {
                Some((_, Token::Comma)) => continue,
                Some((_, Token::RParen)) => return Ok(args),
                Some((offset, _)) => return Err(syntax(offset, "expected ',' or ')'")),
                None => return Err(syntax(self.end, "unclosed argument list")),
            }
        }
    }

    fn finish(&self) -> Result<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(syntax(self.offset(), "unexpected trailing input"))
        }
    }
}

/// Parse a single expression.
pub fn parse_expr(source: &str) -> Result<Expr> {
    let mut parser = Parser::new(source)?;
    let expr = parser.expr(0)?;
    parser.finish()?;
    Ok(expr)
}

/// Parse comma-separated expressions.
pub fn parse_expr_list(source: &str) -> Result<Vec<Expr>> {
    let mut parser = Parser::new(source)?;
    let mut exprs = vec![parser.expr(0)?];
    while parser.peek() == Some(&Token::Comma) {
        parser.pos += 1;
        exprs.push(parser.expr(0)?);
    }
    parser.finish()?;
    Ok(exprs)
}

/// Parse `;`-separated assignments.
pub fn parse_program(source: &str) -> Result<Vec<Statement>> {
    let mut parser = Parser::new(source)?;
    let mut statements = Vec::new();

    while !parser.at_end() {
        if parser.peek() == Some(&Token::Semicolon) {
            parser.pos += 1;
            continue;
        }
        let target = match parser.advance() {
            Some((_, Token::Ident(name))) => name,
            Some((offset, _)) => return Err(syntax(offset, "expected assignment target")),
            None => break,
        };
        parser.expect(&Token::Assign, "'='")?;
        let expr = parser.expr(0)?;
        statements.push(Statement { target, expr });

        match parser.peek() {
            None | Some(Token::Semicolon) => {}
            Some(_) => return Err(syntax(parser.offset(), "expected ';'")),
        }
    }

    if statements.is_empty() {
        return Err(syntax(0, "no statements"));
    }
    Ok(statements)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Expr {
    /// Evaluate against `scope`.
    pub fn eval(&self, scope: &dyn Scope) -> Result<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Ident(name) => scope
                .lookup(name)
                .ok_or_else(|| ExprError::UnknownName(name.clone())),
            Self::Call { name, args } => call(name, args, scope),
            Self::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!operand.eval(scope)?.is_truthy())),
            Self::Unary(UnaryOp::Neg, operand) => match operand.eval(scope)? {
                Value::Num(n) => Ok(Value::Num(-n)),
                other => Err(ExprError::Type(format!("cannot negate {}", other.type_name()))),
            },
            Self::Binary(BinaryOp::And, lhs, rhs) => {
                Ok(Value::Bool(lhs.eval(scope)?.is_truthy() && rhs.eval(scope)?.is_truthy()))
            }
            Self::Binary(BinaryOp::Or, lhs, rhs) => {
                Ok(Value::Bool(lhs.eval(scope)?.is_truthy() || rhs.eval(scope)?.is_truthy()))
            }
            Self::Binary(op, lhs, rhs) => binary(*op, lhs.eval(scope)?, rhs.eval(scope)?),
        }
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    use std::cmp::Ordering;

    let ordering = |lhs: &Value, rhs: &Value| -> Result<Option<Ordering>> {
        match (lhs, rhs) {
            (Value::Num(a), Value::Num(b)) => Ok(a.partial_cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
            (a, b) => Err(ExprError::Type(format!(
                "cannot compare {} with {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    };

    let value = match op {
        BinaryOp::Eq => Value::Bool(lhs == rhs),
        BinaryOp::NotEq => Value::Bool(lhs != rhs),
        BinaryOp::Lt => Value::Bool(ordering(&lhs, &rhs)? == Some(Ordering::Less)),
        BinaryOp::LtEq => Value::Bool(matches!(
            ordering(&lhs, &rhs)?,
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(ordering(&lhs, &rhs)? == Some(Ordering::Greater)),
        BinaryOp::GtEq => Value::Bool(matches!(
            ordering(&lhs, &rhs)?,
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Add => match (lhs, rhs) {
            (Value::Num(a), Value::Num(b)) => Value::Num(a + b),
            (Value::Str(a), Value::Str(b)) => Value::Str(a + &b),
            (a, b) => return Err(operand_error(op, &a, &b)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let (a, b) = match (&lhs, &rhs) {
                (Value::Num(a), Value::Num(b)) => (*a, *b),
                (a, b) => return Err(operand_error(op, a, b)),
            };
            match op {
                BinaryOp::Sub => Value::Num(a - b),
                BinaryOp::Mul => Value::Num(a * b),
                _ if b == 0.0 => return Err(ExprError::DivisionByZero),
                BinaryOp::Div => Value::Num(a / b),
                _ => Value::Num(a - b * (a / b).floor()),
            }
        }
        BinaryOp::And => Value::Bool(lhs.is_truthy() && rhs.is_truthy()),
        BinaryOp::Or => Value::Bool(lhs.is_truthy() || rhs.is_truthy()),
    };
    Ok(value)
}

fn operand_error(op: BinaryOp, lhs: &Value, rhs: &Value) -> ExprError {
    ExprError::Type(format!(
        "unsupported operands for {op}: {} and {}",
        lhs.type_name(),
        rhs.type_name()
    ))
}

fn call(name: &str, args: &[Expr], scope: &dyn Scope) -> Result<Value> {
    let expected = match name {
        "arg" | "len" | "str" | "num" => 1,
        "contains" | "startswith" | "matches" => 2,
        _ => return Err(ExprError::UnknownFunction(name.to_string())),
    };
    if args.len() != expected {
        return Err(ExprError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }

    let values = args
        .iter()
        .map(|a| a.eval(scope))
        .collect::<Result<Vec<_>>>()?;

    match (name, values.as_slice()) {
        ("arg", [Value::Str(arg_name)]) => scope.arg(arg_name),
        ("len", [Value::Str(s)]) => Ok(Value::Num(s.chars().count() as f64)),
        ("str", [v]) => Ok(Value::Str(v.to_string())),
        ("num", [Value::Num(n)]) => Ok(Value::Num(*n)),
        ("num", [Value::Bool(b)]) => Ok(Value::Num(if *b { 1.0 } else { 0.0 })),
        ("num", [Value::Str(s)]) => s
            .trim()
            .parse()
            .map(Value::Num)
            .map_err(|_| ExprError::Type(format!("cannot convert '{s}' to a number"))),
        ("contains", [Value::Str(haystack), Value::Str(needle)]) => {
            Ok(Value::Bool(haystack.contains(needle.as_str())))
        }
        ("startswith", [Value::Str(s), Value::Str(prefix)]) => {
            Ok(Value::Bool(s.starts_with(prefix.as_str())))
        }
        ("matches", [Value::Str(s), Value::Str(pattern)]) => {
            let re = Regex::new(pattern).map_err(|e| ExprError::Regex(e.to_string()))?;
            Ok(Value::Bool(re.is_match(s)))
        }
        _ => {
            let types: Vec<&str> = values.iter().map(Value::type_name).collect();
            Err(ExprError::Type(format!(
                "{name}() does not accept ({})",
                types.join(", ")
            )))
        }
    }
}
