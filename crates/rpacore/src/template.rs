//! `${...}` template resolution
//!
//! Placeholders hold a small expression language:
//!
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | primary
//! primary := NUMBER | path | "(" expr ")"
//! path    := IDENT ("." (IDENT | DIGITS))*
//! ```
//!
//! A string consisting of exactly one placeholder resolves to the referenced
//! value itself, so lists and maps survive substitution. Anything else is
//! interpolated as text. Unknown references resolve to `Null` (or the empty
//! string when interpolated); malformed placeholders are left untouched.

use crate::{Value, VariableStore};

/// Resolve all placeholders in `input` against `vars`.
pub fn resolve_str(input: &str, vars: &VariableStore) -> Value {
    if !input.contains("${") {
        return Value::String(input.to_string());
    }

    if let Some(inner) = whole_placeholder(input) {
        return match parse(inner) {
            Ok(expr) => evaluate(&expr, vars),
            Err(e) => {
                tracing::debug!("Leaving malformed placeholder '{}' as-is: {}", input, e);
                Value::String(input.to_string())
            }
        };
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        match parse(&after[..end]) {
            Ok(expr) => out.push_str(&evaluate(&expr, vars).to_string()),
            Err(e) => {
                tracing::debug!("Leaving malformed placeholder in '{}' as-is: {}", input, e);
                out.push_str(&rest[start..start + 2 + end + 1]);
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Value::String(out)
}

fn whole_placeholder(input: &str) -> Option<&str> {
    let inner = input.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains('}') || inner.contains("${") {
        return None;
    }
    Some(inner)
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Path(String),
    Neg(Box<Expr>),
    Binary(Box<Expr>, char, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Path(String),
    Op(char),
    LParen,
    RParen,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(c));
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
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", literal))?;
                tokens.push(Token::Number(n));
            }
            c if is_ident_char(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                while i + 1 < chars.len() && chars[i] == '.' && is_ident_char(chars[i + 1]) {
                    i += 1;
                    while i < chars.len() && is_ident_char(chars[i]) {
                        i += 1;
                    }
                }
                tokens.push(Token::Path(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if matches!(self.peek(), Some(Token::Op('-'))) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Path(p)) => Ok(Expr::Path(p)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected ')'".to_string()),
                }
            }
            Some(other) => Err(format!("unexpected token {:?}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn parse(source: &str) -> Result<Expr, String> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("trailing tokens".to_string());
    }
    Ok(expr)
}

fn evaluate(expr: &Expr, vars: &VariableStore) -> Value {
    match expr {
        Expr::Number(n) => Value::Number(*n),
        Expr::Path(path) => vars.lookup(path).cloned().unwrap_or(Value::Null),
        Expr::Neg(inner) => match evaluate(inner, vars).to_number() {
            Some(n) => Value::Number(-n),
            None => Value::Null,
        },
        Expr::Binary(lhs, op, rhs) => {
            let (Some(a), Some(b)) = (evaluate(lhs, vars).to_number(), evaluate(rhs, vars).to_number()) else {
                return Value::Null;
            };
            match op {
                '+' => Value::Number(a + b),
                '-' => Value::Number(a - b),
                '*' => Value::Number(a * b),
                '/' if b != 0.0 => Value::Number(a / b),
                '%' if b != 0.0 => Value::Number(a % b),
                _ => Value::Null,
            }
        }
    }
}
