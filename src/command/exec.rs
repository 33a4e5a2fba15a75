//! Per-command execution

use serde_json::{Map, Value};

use super::{expr, interpolate, Command, CmdResult, ExecContext};
use crate::cache::CacheGuard;
use crate::error::CacheError;
use crate::path;

/// Target for `PRINT` output
pub const PRINT_TARGET: &str = "mapcache::print";

pub(super) fn get(guard: &mut CacheGuard<'_>, ctx: &ExecContext, keys: &[String]) -> CmdResult {
  let mut out = Map::new();
  for key in keys {
    let key = interpolate::resolve_key(guard, ctx, key)?;
    if !path::has_wildcard(&key) {
      let value = guard.get(&key)?;
      out.insert(key, value);
      continue;
    }
    for matched in guard.wild_keys(&key) {
      let value = guard.get(&matched)?;
      out.insert(matched, value);
    }
  }
  Ok(Value::Object(out))
}

pub(super) fn replace(
  guard: &mut CacheGuard<'_>,
  ctx: &ExecContext,
  key: &str,
  value: &Value,
) -> CmdResult {
  let key = interpolate::resolve_key(guard, ctx, key)?;
  let value = match value {
    Value::String(s) => interpolate::evaluate(guard, ctx, s)?,
    other => other.clone(),
  };
  guard.replace(ctx, &key, value.clone())?;
  Ok(value)
}

pub(super) fn delete(guard: &mut CacheGuard<'_>, ctx: &ExecContext, key: &str) -> CmdResult {
  let key = interpolate::resolve_key(guard, ctx, key)?;
  if path::has_wildcard(&key) {
    let keys = guard.wild_keys(&key);
    let values: Vec<Value> = keys.iter().filter_map(|k| guard.get(k).ok()).collect();
    guard.delete(&keys)?;
    return Ok(Value::Array(values));
  }

  match guard.get(&key) {
    Ok(value) => {
      guard.delete(&[key])?;
      Ok(value)
    }
    Err(_) => Ok(Value::Null),
  }
}

pub(super) fn inc(guard: &mut CacheGuard<'_>, ctx: &ExecContext, key: &str, delta: f64) -> CmdResult {
  let key = interpolate::resolve_key(guard, ctx, key)?;
  guard.increment(ctx, &key, delta)
}

pub(super) fn print(guard: &mut CacheGuard<'_>, ctx: &ExecContext, messages: &[String]) -> CmdResult {
  let mut out = Vec::with_capacity(messages.len());
  for message in messages {
    let formatted = interpolate::render_template(guard, ctx, message)?;
    tracing::info!(target: PRINT_TARGET, cache = %guard.cache().name(), "{}", formatted);
    out.push(Value::String(formatted));
  }
  Ok(Value::Array(out))
}

pub(super) fn ret(guard: &mut CacheGuard<'_>, ctx: &ExecContext, key: &Value) -> CmdResult {
  match key {
    Value::String(s) => interpolate::evaluate(guard, ctx, s),
    other => Ok(other.clone()),
  }
}

pub(super) fn branch(
  guard: &mut CacheGuard<'_>,
  ctx: &ExecContext,
  condition: &str,
  if_true: &Command,
  if_false: &Command,
) -> CmdResult {
  let (expression, bindings) = interpolate::prepare_condition(guard, ctx, condition)?;
  if expr::evaluate_bool(&expression, bindings.params())? {
    if_true.execute(guard, ctx)
  } else {
    if_false.execute(guard, ctx)
  }
}

pub(super) fn for_each(
  guard: &mut CacheGuard<'_>,
  ctx: &ExecContext,
  loop_expr: &str,
  commands: &[Command],
) -> CmdResult {
  let trimmed = loop_expr.trim();
  let pattern = interpolate::interpolation_re()
    .captures(trimmed)
    .filter(|caps| caps.get(0).map_or(false, |m| m.start() == 0 && m.end() == trimmed.len()))
    .map(|caps| caps[1].trim().to_string())
    .ok_or_else(|| CacheError::InvalidForExpression(loop_expr.to_string()))?;

  if !path::has_wildcard(&pattern) {
    return Err(CacheError::ForNeedsWildcard(pattern));
  }

  let delimiter = guard.delimiter().to_string();
  let mut results = Vec::new();
  for key in guard.wild_keys(&pattern) {
    let Some(captures) = path::match_wildcard(&pattern, &key, &delimiter) else {
      continue;
    };

    let mut values = Vec::with_capacity(commands.len());
    for command in commands {
      values.push(command.with_captures(&captures).execute(guard, ctx)?);
    }
    results.push(if values.len() == 1 {
      values.pop().unwrap_or(Value::Null)
    } else {
      Value::Array(values)
    });
  }
  Ok(Value::Array(results))
}
