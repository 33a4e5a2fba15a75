//! Boolean/arithmetic expression engine used by `IF` conditions
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or         := and ( "||" and )*
//! and        := comparison ( "&&" comparison )*
//! comparison := additive ( ("==" | "!=" | "<" | "<=" | ">" | ">=") additive )?
//! additive   := term ( ("+" | "-") term )*
//! term       := unary ( ("*" | "/" | "%") unary )*
//! unary      := ("!" | "-") unary | primary
//! primary    := number | string | true | false | null | nil | ident | "(" or ")"
//! ```
//!
//! Identifiers are looked up in a parameter map. Strings may use single
//! or double quotes.

use serde_json::Value;
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::{CacheError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Number(f64),
  Str(String),
  Ident(String),
  True,
  False,
  Null,
  LParen,
  RParen,
  Plus,
  Minus,
  Star,
  Slash,
  Percent,
  Not,
  And,
  Or,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

struct Lexer<'a> {
  source: &'a str,
  chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
  fn new(source: &'a str) -> Self {
    Self {
      source,
      chars: source.char_indices().peekable(),
    }
  }

  fn tokenize(mut self) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    while let Some(token) = self.next_token()? {
      tokens.push(token);
    }
    Ok(tokens)
  }

  fn peek_char(&mut self) -> Option<char> {
    self.chars.peek().map(|(_, c)| *c)
  }

  fn advance(&mut self) -> Option<char> {
    self.chars.next().map(|(_, c)| c)
  }

  fn next_if(&mut self, expected: char) -> bool {
    if self.peek_char() == Some(expected) {
      self.advance();
      true
    } else {
      false
    }
  }

  fn next_token(&mut self) -> Result<Option<Token>> {
    while matches!(self.peek_char(), Some(c) if c.is_whitespace()) {
      self.advance();
    }

    let Some(&(start, c)) = self.chars.peek() else {
      return Ok(None);
    };

    let token = match c {
      '(' => {
        self.advance();
        Token::LParen
      }
      ')' => {
        self.advance();
        Token::RParen
      }
      '+' => {
        self.advance();
        Token::Plus
      }
      '-' => {
        self.advance();
        Token::Minus
      }
      '*' => {
        self.advance();
        Token::Star
      }
      '/' => {
        self.advance();
        Token::Slash
      }
      '%' => {
        self.advance();
        Token::Percent
      }
      '!' => {
        self.advance();
        if self.next_if('=') {
          Token::Ne
        } else {
          Token::Not
        }
      }
      '=' => {
        self.advance();
        if !self.next_if('=') {
          return Err(CacheError::InvalidExpression(format!(
            "unexpected '=' at {} (use '==')",
            start
          )));
        }
        Token::Eq
      }
      '<' => {
        self.advance();
        if self.next_if('=') {
          Token::Le
        } else {
          Token::Lt
        }
      }
      '>' => {
        self.advance();
        if self.next_if('=') {
          Token::Ge
        } else {
          Token::Gt
        }
      }
      '&' => {
        self.advance();
        if !self.next_if('&') {
          return Err(CacheError::InvalidExpression(format!("unexpected '&' at {}", start)));
        }
        Token::And
      }
      '|' => {
        self.advance();
        if !self.next_if('|') {
          return Err(CacheError::InvalidExpression(format!("unexpected '|' at {}", start)));
        }
        Token::Or
      }
      '"' | '\'' => self.scan_string(c)?,
      c if c.is_ascii_digit() || c == '.' => self.scan_number(start)?,
      c if c.is_alphabetic() || c == '_' => self.scan_ident(start),
      other => {
        return Err(CacheError::InvalidExpression(format!(
          "unexpected character '{}' at {}",
          other, start
        )))
      }
    };
    Ok(Some(token))
  }

  fn scan_string(&mut self, quote: char) -> Result<Token> {
    self.advance();
    let mut out = String::new();
    loop {
      match self.advance() {
        None => return Err(CacheError::InvalidExpression("unterminated string".to_string())),
        Some('\\') => match self.advance() {
          Some(escaped) => out.push(escaped),
          None => return Err(CacheError::InvalidExpression("unterminated string".to_string())),
        },
        Some(c) if c == quote => return Ok(Token::Str(out)),
        Some(c) => out.push(c),
      }
    }
  }

  fn scan_number(&mut self, start: usize) -> Result<Token> {
    let mut end = start;
    while let Some(&(i, c)) = self.chars.peek() {
      if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' {
        end = i + c.len_utf8();
        self.advance();
      } else {
        break;
      }
    }
    let text = &self.source[start..end];
    text
      .parse::<f64>()
      .map(Token::Number)
      .map_err(|_| CacheError::InvalidExpression(format!("invalid number '{}'", text)))
  }

  fn scan_ident(&mut self, start: usize) -> Token {
    let mut end = start;
    while let Some(&(i, c)) = self.chars.peek() {
      if c.is_alphanumeric() || c == '_' {
        end = i + c.len_utf8();
        self.advance();
      } else {
        break;
      }
    }
    match &self.source[start..end] {
      "true" => Token::True,
      "false" => Token::False,
      "null" | "nil" => Token::Null,
      ident => Token::Ident(ident.to_string()),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
  Or,
  And,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
  Add,
  Sub,
  Mul,
  Div,
  Rem,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
  Not,
  Neg,
}

/// Operator chains (`a || b || c`, `a + b - c`) are kept flat so that
/// long aggregation expansions never deepen the tree. Only parentheses
/// and unary operators nest, and those are bounded by [`MAX_DEPTH`].
#[derive(Debug, Clone, PartialEq)]
enum Expr {
  Literal(Value),
  Var(String),
  Unary(UnaryOp, Box<Expr>),
  Logical(BinaryOp, Vec<Expr>),
  Compare(BinaryOp, Box<Expr>, Box<Expr>),
  Chain(Box<Expr>, Vec<(BinaryOp, Expr)>),
}

/// Maximum nesting of parentheses and unary operators
const MAX_DEPTH: usize = 128;

struct Parser {
  tokens: Vec<Token>,
  pos: usize,
  depth: usize,
}

impl Parser {
  fn new(tokens: Vec<Token>) -> Self {
    Self {
      tokens,
      pos: 0,
      depth: 0,
    }
  }

  fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
    if self.depth >= MAX_DEPTH {
      return Err(CacheError::InvalidExpression(format!(
        "expression nested deeper than {} levels",
        MAX_DEPTH
      )));
    }
    self.depth += 1;
    let result = f(self);
    self.depth -= 1;
    result
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn advance(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    token
  }

  fn parse(mut self) -> Result<Expr> {
    let expr = self.parse_or()?;
    if let Some(token) = self.peek() {
      return Err(CacheError::InvalidExpression(format!(
        "unexpected token {:?}",
        token
      )));
    }
    Ok(expr)
  }

  fn parse_or(&mut self) -> Result<Expr> {
    self.parse_logical(Token::Or, BinaryOp::Or, Self::parse_and)
  }

  fn parse_and(&mut self) -> Result<Expr> {
    self.parse_logical(Token::And, BinaryOp::And, Self::parse_comparison)
  }

  fn parse_logical(
    &mut self,
    separator: Token,
    op: BinaryOp,
    operand: fn(&mut Self) -> Result<Expr>,
  ) -> Result<Expr> {
    let first = operand(self)?;
    if self.peek() != Some(&separator) {
      return Ok(first);
    }
    let mut operands = vec![first];
    while self.peek() == Some(&separator) {
      self.advance();
      operands.push(operand(self)?);
    }
    Ok(Expr::Logical(op, operands))
  }

  fn parse_comparison(&mut self) -> Result<Expr> {
    let left = self.parse_additive()?;
    let op = match self.peek() {
      Some(Token::Eq) => BinaryOp::Eq,
      Some(Token::Ne) => BinaryOp::Ne,
      Some(Token::Lt) => BinaryOp::Lt,
      Some(Token::Le) => BinaryOp::Le,
      Some(Token::Gt) => BinaryOp::Gt,
      Some(Token::Ge) => BinaryOp::Ge,
      _ => return Ok(left),
    };
    self.advance();
    let right = self.parse_additive()?;
    Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
  }

  fn parse_additive(&mut self) -> Result<Expr> {
    self.parse_chain(Self::parse_term, |token| match token {
      Some(Token::Plus) => Some(BinaryOp::Add),
      Some(Token::Minus) => Some(BinaryOp::Sub),
      _ => None,
    })
  }

  fn parse_term(&mut self) -> Result<Expr> {
    self.parse_chain(Self::parse_unary, |token| match token {
      Some(Token::Star) => Some(BinaryOp::Mul),
      Some(Token::Slash) => Some(BinaryOp::Div),
      Some(Token::Percent) => Some(BinaryOp::Rem),
      _ => None,
    })
  }

  fn parse_chain(
    &mut self,
    operand: fn(&mut Self) -> Result<Expr>,
    operator: fn(Option<&Token>) -> Option<BinaryOp>,
  ) -> Result<Expr> {
    let first = operand(self)?;
    let mut rest = Vec::new();
    while let Some(op) = operator(self.peek()) {
      self.advance();
      rest.push((op, operand(self)?));
    }
    if rest.is_empty() {
      Ok(first)
    } else {
      Ok(Expr::Chain(Box::new(first), rest))
    }
  }

  fn parse_unary(&mut self) -> Result<Expr> {
    let op = match self.peek() {
      Some(Token::Not) => UnaryOp::Not,
      Some(Token::Minus) => UnaryOp::Neg,
      _ => return self.parse_primary(),
    };
    self.advance();
    let inner = self.nested(Self::parse_unary)?;
    Ok(Expr::Unary(op, Box::new(inner)))
  }

  fn parse_primary(&mut self) -> Result<Expr> {
    match self.advance() {
      Some(Token::Number(n)) => Ok(Expr::Literal(Value::from(n))),
      Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
      Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
      Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
      Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
      Some(Token::Ident(name)) => Ok(Expr::Var(name)),
      Some(Token::LParen) => {
        let inner = self.nested(Self::parse_or)?;
        match self.advance() {
          Some(Token::RParen) => Ok(inner),
          _ => Err(CacheError::InvalidExpression("missing ')'".to_string())),
        }
      }
      Some(token) => Err(CacheError::InvalidExpression(format!(
        "unexpected token {:?}",
        token
      ))),
      None => Err(CacheError::InvalidExpression(
        "unexpected end of expression".to_string(),
      )),
    }
  }
}

/// Parse and evaluate `source` against `params`
pub fn evaluate(source: &str, params: &HashMap<String, Value>) -> Result<Value> {
  let tokens = Lexer::new(source).tokenize()?;
  let expr = Parser::new(tokens).parse()?;
  eval(&expr, params)
}

/// Evaluate `source` and require a boolean result
pub fn evaluate_bool(source: &str, params: &HashMap<String, Value>) -> Result<bool> {
  match evaluate(source, params)? {
    Value::Bool(b) => Ok(b),
    _ => Err(CacheError::NotBoolean),
  }
}

fn eval(expr: &Expr, params: &HashMap<String, Value>) -> Result<Value> {
  match expr {
    Expr::Literal(v) => Ok(v.clone()),
    Expr::Var(name) => params
      .get(name)
      .cloned()
      .ok_or_else(|| CacheError::Evaluation(format!("no parameter '{}' found", name))),
    Expr::Unary(UnaryOp::Not, inner) => match eval(inner, params)? {
      Value::Bool(b) => Ok(Value::Bool(!b)),
      other => Err(CacheError::Evaluation(format!("cannot negate {}", other))),
    },
    Expr::Unary(UnaryOp::Neg, inner) => {
      let n = number(&eval(inner, params)?, "-")?;
      Ok(Value::from(-n))
    }
    Expr::Logical(op, operands) => {
      let (symbol, short_circuit) = match op {
        BinaryOp::Or => ("||", true),
        _ => ("&&", false),
      };
      for operand in operands {
        if boolean(&eval(operand, params)?, symbol)? == short_circuit {
          return Ok(Value::Bool(short_circuit));
        }
      }
      Ok(Value::Bool(!short_circuit))
    }
    Expr::Compare(op, left, right) => {
      let l = eval(left, params)?;
      let r = eval(right, params)?;
      binary(*op, &l, &r)
    }
    Expr::Chain(first, rest) => {
      let mut acc = eval(first, params)?;
      for (op, operand) in rest {
        acc = binary(*op, &acc, &eval(operand, params)?)?;
      }
      Ok(acc)
    }
  }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
  match op {
    BinaryOp::Eq => Ok(Value::Bool(equals(l, r))),
    BinaryOp::Ne => Ok(Value::Bool(!equals(l, r))),
    BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
      let ordering = compare(l, r)?;
      Ok(Value::Bool(match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
      }))
    }
    BinaryOp::Add => match (l, r) {
      (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, text(b)))),
      (a, Value::String(b)) => Ok(Value::String(format!("{}{}", text(a), b))),
      _ => Ok(Value::from(number(l, "+")? + number(r, "+")?)),
    },
    BinaryOp::Sub => Ok(Value::from(number(l, "-")? - number(r, "-")?)),
    BinaryOp::Mul => Ok(Value::from(number(l, "*")? * number(r, "*")?)),
    BinaryOp::Div => Ok(Value::from(number(l, "/")? / number(r, "/")?)),
    BinaryOp::Rem => Ok(Value::from(number(l, "%")? % number(r, "%")?)),
    BinaryOp::Or | BinaryOp::And => Err(CacheError::Internal("logical operator".to_string())),
  }
}

fn equals(l: &Value, r: &Value) -> bool {
  match (l, r) {
    (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
    _ => l == r,
  }
}

fn compare(l: &Value, r: &Value) -> Result<std::cmp::Ordering> {
  match (l, r) {
    (Value::Number(a), Value::Number(b)) => {
      let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
      a.partial_cmp(&b)
        .ok_or_else(|| CacheError::Evaluation(format!("cannot compare {} and {}", a, b)))
    }
    (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
    _ => Err(CacheError::Evaluation(format!(
      "value '{}' cannot be compared with '{}'",
      l, r
    ))),
  }
}

fn number(v: &Value, op: &str) -> Result<f64> {
  v.as_f64().ok_or_else(|| {
    CacheError::Evaluation(format!(
      "value '{}' cannot be used with the operator '{}', it is not a number",
      v, op
    ))
  })
}

fn boolean(v: &Value, op: &str) -> Result<bool> {
  v.as_bool().ok_or_else(|| {
    CacheError::Evaluation(format!(
      "value '{}' cannot be used with the operator '{}', it is not a bool",
      v, op
    ))
  })
}

fn text(v: &Value) -> String {
  match v {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.clone()))
      .collect()
  }

  #[test]
  fn test_numeric_comparisons() {
    let p = params(&[("a_b_c", json!(0)), ("x", json!(2.5))]);
    assert!(evaluate_bool("a_b_c == 0", &p).unwrap());
    assert!(evaluate_bool("x > 2 && x <= 2.5", &p).unwrap());
    assert!(!evaluate_bool("x != 2.5", &p).unwrap());
    assert!(evaluate_bool("x * 2 == 5", &p).unwrap());
  }

  #[test]
  fn test_integer_and_float_are_equal() {
    let p = params(&[("n", json!(3)), ("f", json!(3.0))]);
    assert!(evaluate_bool("n == f", &p).unwrap());
  }

  #[test]
  fn test_strings() {
    let p = params(&[("status", json!("busy"))]);
    assert!(evaluate_bool("status == 'busy'", &p).unwrap());
    assert!(evaluate_bool("status != \"done\"", &p).unwrap());
    assert!(evaluate_bool("status + '!' == 'busy!'", &p).unwrap());
    assert!(evaluate_bool("'a' < 'b'", &p).unwrap());
  }

  #[test]
  fn test_logic_and_grouping() {
    let p = params(&[("t", json!(true)), ("f", json!(false))]);
    assert!(evaluate_bool("t || f", &p).unwrap());
    assert!(!evaluate_bool("t && f", &p).unwrap());
    assert!(evaluate_bool("!(t && f)", &p).unwrap());
    assert!(evaluate_bool("(1 + 2) * 3 == 9", &p).unwrap());
    assert!(evaluate_bool("1 + 2 * 3 == 7", &p).unwrap());
    assert!(evaluate_bool("-2 < 0", &p).unwrap());
  }

  #[test]
  fn test_short_circuit_skips_unknown_parameter() {
    let p = HashMap::new();
    assert!(evaluate_bool("true || missing", &p).unwrap());
    assert!(!evaluate_bool("false && missing", &p).unwrap());
  }

  #[test]
  fn test_null_equality() {
    let p = params(&[("gone", Value::Null)]);
    assert!(evaluate_bool("gone == null", &p).unwrap());
    assert!(!evaluate_bool("gone == 0", &p).unwrap());
    assert!(matches!(
      evaluate_bool("gone < 1", &p),
      Err(CacheError::Evaluation(_))
    ));
  }

  #[test]
  fn test_errors() {
    let p = HashMap::new();
    assert!(matches!(evaluate("1 +", &p), Err(CacheError::InvalidExpression(_))));
    assert!(matches!(evaluate("(1", &p), Err(CacheError::InvalidExpression(_))));
    assert!(matches!(evaluate("a = 1", &p), Err(CacheError::InvalidExpression(_))));
    assert!(matches!(evaluate("missing", &p), Err(CacheError::Evaluation(_))));
    assert!(matches!(evaluate_bool("1 + 1", &p), Err(CacheError::NotBoolean)));
  }

  #[test]
  fn test_deep_parentheses_are_rejected() {
    let source = format!("{}true{}", "(".repeat(10_000), ")".repeat(10_000));
    assert!(matches!(
      evaluate_bool(&source, &HashMap::new()),
      Err(CacheError::InvalidExpression(_))
    ));

    let shallow = format!("{}true{}", "(".repeat(100), ")".repeat(100));
    assert!(evaluate_bool(&shallow, &HashMap::new()).unwrap());
  }

  #[test]
  fn test_deep_negation_is_rejected() {
    let source = format!("{}true", "!".repeat(10_000));
    assert!(matches!(
      evaluate_bool(&source, &HashMap::new()),
      Err(CacheError::InvalidExpression(_))
    ));
    assert!(matches!(
      evaluate(&format!("{}1", "-".repeat(10_000)), &HashMap::new()),
      Err(CacheError::InvalidExpression(_))
    ));
    assert!(!evaluate_bool(&format!("{}true", "!".repeat(101)), &HashMap::new()).unwrap());
  }

  #[test]
  fn test_long_chains_stay_flat() {
    let p = params(&[("v", json!(1))]);
    let any = vec!["v == 0"; 20_000].join(" || ") + " || v == 1";
    assert!(evaluate_bool(&any, &p).unwrap());
    let all = vec!["v == 1"; 20_000].join(" && ");
    assert!(evaluate_bool(&all, &p).unwrap());
    let sum = vec!["1"; 20_000].join(" + ");
    assert_eq!(evaluate(&sum, &p).unwrap(), json!(20_000.0));
  }
}
