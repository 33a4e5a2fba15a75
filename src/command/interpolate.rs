//! `${{ … }}` interpolation
//!
//! Interpolations appear in keys, conditions, loop expressions, messages
//! and return values. `${{path}}` reads a value, `${{path || literal}}`
//! falls back to a literal when the path is missing, `${{N}}` is the Nth
//! capture of an enclosing `FOR` or trigger (rewritten before evaluation)
//! and `${{$old}}` / `${{$new}}` expose the change that fired a trigger.

use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::ExecContext;
use crate::cache::CacheGuard;
use crate::document;
use crate::error::{CacheError, Result};
use crate::path;

const OLD_VALUE: &str = "$old";
const NEW_VALUE: &str = "$new";

pub(crate) fn interpolation_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("interpolation pattern"))
}

fn capture_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\$\{\{\s*(\d+)\s*\}\}").expect("capture pattern"))
}

fn aggregation_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"\b(any|all)\(\s*\$\{\{\s*([^}]+?)\s*\}\}\s*([!<>=]=?|==)\s*([^\)]+?)\s*\)")
      .expect("aggregation pattern")
  })
}

/// True when `s` contains at least one interpolation
pub fn has_interpolation(s: &str) -> bool {
  interpolation_re().is_match(s)
}

/// Replace `${{1}}`, `${{2}}`, … with the matching capture.
///
/// Placeholders past the number of captures are left untouched.
pub fn substitute_captures(s: &str, captures: &[String]) -> String {
  if captures.is_empty() || !s.contains("${{") {
    return s.to_string();
  }
  capture_re()
    .replace_all(s, |caps: &Captures| {
      let inner = caps[1].trim();
      match inner.parse::<usize>() {
        Ok(n) if n >= 1 && n <= captures.len() => captures[n - 1].clone(),
        _ => caps[0].to_string(),
      }
    })
    .into_owned()
}

/// Interpret a fallback literal: booleans, null/nil, integers, floats,
/// quoted strings, otherwise the bare text.
pub fn parse_literal(s: &str) -> Value {
  let s = s.trim();
  match s {
    "true" => return Value::Bool(true),
    "false" => return Value::Bool(false),
    "null" | "nil" => return Value::Null,
    _ => {}
  }
  if let Ok(i) = s.parse::<i64>() {
    return Value::from(i);
  }
  if let Ok(f) = s.parse::<f64>() {
    if f.is_finite() {
      return Value::from(f);
    }
  }
  let bytes = s.as_bytes();
  if bytes.len() >= 2 {
    let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
    if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
      return Value::String(s[1..s.len() - 1].to_string());
    }
  }
  Value::String(s.to_string())
}

/// Turn a path into a name the expression engine accepts
pub fn key_to_identifier(key: &str) -> String {
  let mut ident: String = key
    .chars()
    .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
    .collect();
  let starts_with_digit = ident.chars().next().map_or(true, |c| c.is_ascii_digit());
  if starts_with_digit || matches!(ident.as_str(), "true" | "false" | "null" | "nil") {
    ident.insert(0, '_');
  }
  ident
}

/// Read one path, honouring the trigger pseudo-keys
fn lookup(guard: &CacheGuard<'_>, ctx: &ExecContext, key: &str) -> Result<Value> {
  let special = match key {
    OLD_VALUE => Some(ctx.old_value()),
    NEW_VALUE => Some(ctx.new_value()),
    _ => None,
  };
  match special {
    Some(Some(v)) => Ok(v.clone()),
    Some(None) => Err(CacheError::KeyNotFound(key.to_string())),
    None => guard.get(key),
  }
}

fn interpolation_error(key: &str, err: CacheError) -> CacheError {
  CacheError::Interpolation {
    key: key.to_string(),
    source: Box::new(err),
  }
}

/// `key || literal`
fn resolve_fallback(guard: &CacheGuard<'_>, ctx: &ExecContext, expr: &str) -> Result<Value> {
  let parts: Vec<&str> = expr.split("||").collect();
  if parts.len() != 2 {
    return Err(CacheError::InvalidFallback {
      parts: parts.len(),
      expr: expr.to_string(),
    });
  }
  let key = parts[0].trim();
  if path::has_wildcard(key) {
    return Err(CacheError::WildcardWithFallback(key.to_string()));
  }
  match lookup(guard, ctx, key) {
    Ok(v) => Ok(v),
    Err(_) => Ok(parse_literal(parts[1])),
  }
}

/// Resolve the body of an interpolation that spans a whole string
fn resolve_whole(guard: &CacheGuard<'_>, ctx: &ExecContext, expr: &str) -> Result<Value> {
  if expr.contains("||") {
    return resolve_fallback(guard, ctx, expr);
  }
  if path::has_wildcard(expr) {
    let mut values = Vec::new();
    for key in guard.wild_keys(expr) {
      values.push(guard.get(&key).map_err(|e| interpolation_error(&key, e))?);
    }
    return Ok(Value::Array(values));
  }
  lookup(guard, ctx, expr).map_err(|e| interpolation_error(expr, e))
}

/// Evaluate a string argument.
///
/// With no interpolation the string is returned as is. A string that is
/// exactly one interpolation yields the raw value (a list for wildcard
/// paths); anything else is rendered as a template.
pub fn evaluate(guard: &CacheGuard<'_>, ctx: &ExecContext, s: &str) -> Result<Value> {
  let re = interpolation_re();
  let mut matches = re.captures_iter(s);
  let Some(first) = matches.next() else {
    return Ok(Value::String(s.to_string()));
  };
  let whole = first.get(0).map_or(false, |m| m.start() == 0 && m.end() == s.len());
  if whole && matches.next().is_none() {
    return resolve_whole(guard, ctx, first[1].trim());
  }
  render_template(guard, ctx, s).map(Value::String)
}

/// Splice every interpolation into `s` as text. Wildcards are rejected.
pub fn render_template(guard: &CacheGuard<'_>, ctx: &ExecContext, s: &str) -> Result<String> {
  let mut out = String::with_capacity(s.len());
  let mut last = 0;
  for caps in interpolation_re().captures_iter(s) {
    let Some(m) = caps.get(0) else { continue };
    let expr = caps[1].trim();
    let value = if expr.contains("||") {
      resolve_fallback(guard, ctx, expr)?
    } else if path::has_wildcard(expr) {
      return Err(CacheError::WildcardInTemplate(expr.to_string()));
    } else {
      lookup(guard, ctx, expr).map_err(|e| interpolation_error(expr, e))?
    };
    out.push_str(&s[last..m.start()]);
    out.push_str(&document::render(&value));
    last = m.end();
  }
  out.push_str(&s[last..]);
  Ok(out)
}

/// Resolve interpolations inside a key, leaving plain keys untouched
pub fn resolve_key(guard: &CacheGuard<'_>, ctx: &ExecContext, key: &str) -> Result<String> {
  if !has_interpolation(key) {
    return Ok(key.to_string());
  }
  render_template(guard, ctx, key)
}

/// Expression parameters bound while rewriting a condition
#[derive(Debug, Default)]
pub struct Bindings {
  names: HashMap<String, String>,
  params: HashMap<String, Value>,
}

impl Bindings {
  /// Bind `key` to `value` and return the identifier standing for it
  pub fn bind(&mut self, key: &str, value: Value) -> String {
    if let Some(name) = self.names.get(key) {
      return name.clone();
    }
    let base = key_to_identifier(key);
    let mut name = base.clone();
    let mut n = 2;
    while self.params.contains_key(&name) {
      name = format!("{}_{}", base, n);
      n += 1;
    }
    self.names.insert(key.to_string(), name.clone());
    self.params.insert(name.clone(), value);
    name
  }

  pub fn params(&self) -> &HashMap<String, Value> {
    &self.params
  }
}

/// Expand `any(...)`/`all(...)` aggregations into plain boolean terms
pub fn expand_aggregates(
  guard: &CacheGuard<'_>,
  ctx: &ExecContext,
  expr: &str,
  bindings: &mut Bindings,
) -> Result<String> {
  let mut out = String::with_capacity(expr.len());
  let mut last = 0;
  for caps in aggregation_re().captures_iter(expr) {
    let Some(m) = caps.get(0) else { continue };
    out.push_str(&expr[last..m.start()]);
    last = m.end();

    let mode = &caps[1];
    let pattern = caps[2].trim();
    let op = &caps[3];
    let rhs = caps[4].trim();

    let keys = guard.wild_keys(pattern);
    if keys.is_empty() {
      out.push_str("false");
      continue;
    }

    let mut terms = Vec::with_capacity(keys.len());
    for key in keys {
      let value = lookup(guard, ctx, &key).unwrap_or(Value::Null);
      let name = bindings.bind(&key, value);
      terms.push(format!("{} {} {}", name, op, rhs));
    }
    let join = if mode == "all" { " && " } else { " || " };
    out.push('(');
    out.push_str(&terms.join(join));
    out.push(')');
  }
  out.push_str(&expr[last..]);
  Ok(out)
}

/// Rewrite an `IF` condition into an expression plus its parameters.
///
/// Missing paths bind to `null` so conditions can test for absence.
pub fn prepare_condition(
  guard: &CacheGuard<'_>,
  ctx: &ExecContext,
  condition: &str,
) -> Result<(String, Bindings)> {
  let mut bindings = Bindings::default();
  let expanded = expand_aggregates(guard, ctx, condition, &mut bindings)?;

  let mut out = String::with_capacity(expanded.len());
  let mut last = 0;
  for caps in interpolation_re().captures_iter(&expanded) {
    let Some(m) = caps.get(0) else { continue };
    let expr = caps[1].trim();
    let value = if expr.contains("||") {
      resolve_fallback(guard, ctx, expr)?
    } else {
      lookup(guard, ctx, expr).unwrap_or(Value::Null)
    };
    let name = bindings.bind(expr, value);
    out.push_str(&expanded[last..m.start()]);
    out.push_str(&name);
    last = m.end();
  }
  out.push_str(&expanded[last..]);
  Ok((out, bindings))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Cache;
  use serde_json::json;

  #[test]
  fn test_parse_literal() {
    assert_eq!(parse_literal("true"), json!(true));
    assert_eq!(parse_literal(" false "), json!(false));
    assert_eq!(parse_literal("nil"), Value::Null);
    assert_eq!(parse_literal("42"), json!(42));
    assert_eq!(parse_literal("-1.5"), json!(-1.5));
    assert_eq!(parse_literal("'quoted'"), json!("quoted"));
    assert_eq!(parse_literal("\"dq\""), json!("dq"));
    assert_eq!(parse_literal("bare words"), json!("bare words"));
  }

  #[test]
  fn test_substitute_captures() {
    let caps = vec!["u1".to_string(), "x".to_string()];
    assert_eq!(substitute_captures("a/${{1}}/b/${{ 2 }}", &caps), "a/u1/b/x");
    assert_eq!(substitute_captures("${{3}}", &caps), "${{3}}");
    assert_eq!(substitute_captures("${{path}}", &caps), "${{path}}");
    assert_eq!(substitute_captures("${{a/${{1}}/b}}", &caps), "${{a/u1/b}}");
  }

  #[test]
  fn test_key_to_identifier() {
    assert_eq!(key_to_identifier("a/b.c-d"), "a_b_c_d");
    assert_eq!(key_to_identifier("1/x"), "_1_x");
    assert_eq!(key_to_identifier("$old"), "_old");
    assert_eq!(key_to_identifier("true"), "_true");
  }

  #[test]
  fn test_bindings_dedupe_colliding_names() {
    let mut b = Bindings::default();
    let first = b.bind("a/b", json!(1));
    let second = b.bind("a-b", json!(2));
    assert_ne!(first, second);
    assert_eq!(b.bind("a/b", json!(1)), first);
    assert_eq!(b.params()[&second], json!(2));
  }

  #[test]
  fn test_evaluate_whole_and_template() {
    let cache = Cache::with_data("t", "/", json!({"a": {"b": 1}, "s": "hi", "list": {"x": 1, "y": 2}}));
    let guard = cache.acquire("t");
    let ctx = ExecContext::new();

    assert_eq!(evaluate(&guard, &ctx, "${{a/b}}").unwrap(), json!(1));
    assert_eq!(evaluate(&guard, &ctx, "${{ a }}").unwrap(), json!({"b": 1}));
    assert_eq!(evaluate(&guard, &ctx, "plain").unwrap(), json!("plain"));
    assert_eq!(
      evaluate(&guard, &ctx, "${{s}} there, n=${{a/b}}").unwrap(),
      json!("hi there, n=1")
    );
    assert_eq!(evaluate(&guard, &ctx, "${{list/*}}").unwrap(), json!([1, 2]));
  }

  #[test]
  fn test_fallback() {
    let cache = Cache::with_data("t", "/", json!({"a": 5}));
    let guard = cache.acquire("t");
    let ctx = ExecContext::new();

    assert_eq!(evaluate(&guard, &ctx, "${{a || 0}}").unwrap(), json!(5));
    assert_eq!(evaluate(&guard, &ctx, "${{missing || 'none'}}").unwrap(), json!("none"));
    assert_eq!(evaluate(&guard, &ctx, "n=${{missing || 7}}").unwrap(), json!("n=7"));
    assert!(matches!(
      evaluate(&guard, &ctx, "${{a || b || c}}"),
      Err(CacheError::InvalidFallback { parts: 3, .. })
    ));
    assert!(matches!(
      evaluate(&guard, &ctx, "${{x/* || 1}}"),
      Err(CacheError::WildcardWithFallback(_))
    ));
  }

  #[test]
  fn test_template_errors() {
    let cache = Cache::with_data("t", "/", json!({"a": 5}));
    let guard = cache.acquire("t");
    let ctx = ExecContext::new();

    assert!(matches!(
      evaluate(&guard, &ctx, "all: ${{x/*}}"),
      Err(CacheError::WildcardInTemplate(_))
    ));
    let err = evaluate(&guard, &ctx, "${{missing}}").unwrap_err();
    assert!(matches!(err, CacheError::Interpolation { .. }));
    assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
  }

  #[test]
  fn test_trigger_pseudo_keys() {
    let cache = Cache::new("t", "/");
    let guard = cache.acquire("t");
    let ctx = ExecContext::new().for_trigger(json!(1), json!(2));
    assert_eq!(evaluate(&guard, &ctx, "${{$old}}->${{$new}}").unwrap(), json!("1->2"));
    assert!(evaluate(&guard, &ExecContext::new(), "${{$old}}").is_err());
  }

  #[test]
  fn test_prepare_condition() {
    let cache = Cache::with_data(
      "t",
      "/",
      json!({"jobs": {"j1": {"status": "busy"}, "j2": {"status": "done"}}, "n": 3}),
    );
    let guard = cache.acquire("t");
    let ctx = ExecContext::new();

    let (expr, bindings) =
      prepare_condition(&guard, &ctx, "any(${{jobs/*/status}} == \"busy\") && ${{n}} > 2").unwrap();
    assert_eq!(
      expr,
      "(jobs_j1_status == \"busy\" || jobs_j2_status == \"busy\") && n > 2"
    );
    assert_eq!(bindings.params()["n"], json!(3));

    let (expr, _) = prepare_condition(&guard, &ctx, "all(${{none/*}} == 1)").unwrap();
    assert_eq!(expr, "false");

    let (expr, bindings) = prepare_condition(&guard, &ctx, "${{gone}} == null").unwrap();
    assert_eq!(expr, "gone == null");
    assert_eq!(bindings.params()["gone"], Value::Null);
  }
}
