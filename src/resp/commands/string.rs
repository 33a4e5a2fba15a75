//! String commands
//!
//! Strings are stored as document scalars at the translated key. Values
//! written by `SET`-style commands are stored as text; arithmetic results
//! are stored as numbers.

use serde_json::Value;

use super::{float_of, integer_of, parse_int, Reply, ReplyError, Request};
use crate::cache::CacheGuard;
use crate::document;
use crate::resp::mapper::{scalar_text, to_resp};
use crate::resp::protocol::{RespValue, MAX_FRAME_LEN};

/// Largest string SETRANGE may produce
const MAX_STRING_LEN: usize = MAX_FRAME_LEN as usize;

/// Text of a string key, `None` when missing
fn text_of(guard: &CacheGuard<'_>, key: &str) -> Result<Option<String>, ReplyError> {
  match guard.get(key) {
    Ok(value) => scalar_text(&value).map(Some).ok_or(ReplyError::WrongType),
    Err(_) => Ok(None),
  }
}

/// Write a string value, dropping any TTL unless `keep_ttl`
fn store(
  guard: &mut CacheGuard<'_>,
  req: &Request,
  key: &str,
  value: Value,
  keep_ttl: bool,
) -> Result<(), ReplyError> {
  guard.set(req.ctx(), key, value)?;
  if !keep_ttl {
    guard.cancel_key_ttl(key)?;
  }
  Ok(())
}

fn expire_millis(amount: i64, unit_ms: i64, cmd: &str) -> Result<i64, ReplyError> {
  match amount.checked_mul(unit_ms) {
    Some(ms) if ms > 0 => Ok(ms),
    _ => Err(ReplyError::Message(format!(
      "invalid expire time in '{}' command",
      cmd
    ))),
  }
}

pub(super) fn get(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  Ok(match guard.get(&req.key(0)) {
    Ok(value) => to_resp(&value),
    Err(_) => RespValue::null_bulk(),
  })
}

/// `SET key value [NX|XX] [GET] [EX s|PX ms|KEEPTTL]`
pub(super) fn set(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_min(2)?;
  let key = req.key(0);

  let mut ttl = None;
  let (mut nx, mut xx, mut get, mut keep_ttl) = (false, false, false, false);
  let mut i = 2;
  while i < req.len() {
    match req.option(i).as_str() {
      "NX" => nx = true,
      "XX" => xx = true,
      "GET" => get = true,
      "KEEPTTL" => keep_ttl = true,
      unit @ ("EX" | "PX") => {
        if ttl.is_some() || i + 1 >= req.len() {
          return Err(ReplyError::Syntax);
        }
        i += 1;
        let scale = if unit == "EX" { 1000 } else { 1 };
        ttl = Some(expire_millis(req.int(i)?, scale, "set")?);
      }
      _ => return Err(ReplyError::Syntax),
    }
    i += 1;
  }
  if (nx && xx) || (keep_ttl && ttl.is_some()) {
    return Err(ReplyError::Syntax);
  }

  let old = guard.get(&key).ok();
  let previous = match (&old, get) {
    (Some(Value::Array(_) | Value::Object(_)), true) => return Err(ReplyError::WrongType),
    (Some(value), true) => to_resp(value),
    _ => RespValue::null_bulk(),
  };

  if (nx && old.is_some()) || (xx && old.is_none()) {
    return Ok(RespValue::null_bulk());
  }

  store(guard, req, &key, Value::from(req.arg(1)), keep_ttl)?;
  if let Some(ms) = ttl {
    guard.set_key_ttl(&key, ms)?;
  }

  Ok(if get { previous } else { RespValue::ok() })
}

pub(super) fn del(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_min(1)?;
  let mut deleted = 0;
  for i in 0..req.len() {
    let key = req.key(i);
    if guard.exists(&key) {
      guard.delete(&[&key])?;
      deleted += 1;
    }
  }
  Ok(RespValue::integer(deleted))
}

pub(super) fn exists(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_min(1)?;
  let found = (0..req.len()).filter(|i| guard.exists(&req.key(*i))).count();
  Ok(RespValue::integer(found as i64))
}

fn incr_by(guard: &mut CacheGuard<'_>, req: &Request, delta: i64) -> Reply {
  let key = req.key(0);
  let current = match guard.get(&key) {
    Ok(value) => integer_of(&value)?,
    Err(_) => 0,
  };
  let updated = current
    .checked_add(delta)
    .ok_or_else(|| ReplyError::Message("increment or decrement would overflow".to_string()))?;
  guard.set(req.ctx(), &key, Value::from(updated))?;
  Ok(RespValue::integer(updated))
}

pub(super) fn incr(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  incr_by(guard, req, 1)
}

pub(super) fn decr(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  incr_by(guard, req, -1)
}

pub(super) fn incrby(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(2)?;
  let delta = req.int(1)?;
  incr_by(guard, req, delta)
}

pub(super) fn decrby(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(2)?;
  let delta = req.int(1)?.checked_neg().ok_or(ReplyError::NotInteger)?;
  incr_by(guard, req, delta)
}

pub(super) fn incrbyfloat(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(2)?;
  let key = req.key(0);
  let delta = req.float(1)?;
  let current = match guard.get(&key) {
    Ok(value) => float_of(&value)?,
    Err(_) => 0.0,
  };
  let updated = current + delta;
  if !updated.is_finite() {
    return Err(ReplyError::Message(
      "increment would produce NaN or Infinity".to_string(),
    ));
  }
  guard.set(req.ctx(), &key, document::number_value(updated))?;
  Ok(RespValue::bulk(updated.to_string()))
}

pub(super) fn mget(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_min(1)?;
  let values = (0..req.len())
    .map(|i| match guard.get(&req.key(i)) {
      Ok(value) => to_resp(&value),
      Err(_) => RespValue::null_bulk(),
    })
    .collect();
  Ok(RespValue::array(values))
}

pub(super) fn mset(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  if req.len() < 2 || req.len() % 2 != 0 {
    return Err(ReplyError::WrongArgs("mset".to_string()));
  }
  for i in (0..req.len()).step_by(2) {
    store(guard, req, &req.key(i), Value::from(req.arg(i + 1)), false)?;
  }
  Ok(RespValue::ok())
}

pub(super) fn getset(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(2)?;
  let key = req.key(0);
  let previous = match text_of(guard, &key)? {
    Some(_) => guard.get(&key).map(|v| to_resp(&v))?,
    None => RespValue::null_bulk(),
  };
  store(guard, req, &key, Value::from(req.arg(1)), false)?;
  Ok(previous)
}

pub(super) fn setnx(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(2)?;
  let key = req.key(0);
  if guard.exists(&key) {
    return Ok(RespValue::integer(0));
  }
  store(guard, req, &key, Value::from(req.arg(1)), false)?;
  Ok(RespValue::integer(1))
}

fn set_with_ttl(guard: &mut CacheGuard<'_>, req: &Request, unit_ms: i64, cmd: &str) -> Reply {
  req.expect(3)?;
  let key = req.key(0);
  let ttl = expire_millis(req.int(1)?, unit_ms, cmd)?;
  store(guard, req, &key, Value::from(req.arg(2)), true)?;
  guard.set_key_ttl(&key, ttl)?;
  Ok(RespValue::ok())
}

pub(super) fn setex(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  set_with_ttl(guard, req, 1000, "setex")
}

pub(super) fn psetex(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  set_with_ttl(guard, req, 1, "psetex")
}

pub(super) fn strlen(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  let len = text_of(guard, &req.key(0))?.map_or(0, |s| s.len());
  Ok(RespValue::integer(len as i64))
}

pub(super) fn append(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(2)?;
  let key = req.key(0);
  let mut text = text_of(guard, &key)?.unwrap_or_default();
  text.push_str(req.arg(1));
  let len = text.len();
  guard.set(req.ctx(), &key, Value::from(text))?;
  Ok(RespValue::integer(len as i64))
}

pub(super) fn getrange(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(3)?;
  let (start, end) = (req.int(1)?, req.int(2)?);
  let text = text_of(guard, &req.key(0))?.unwrap_or_default();
  let bytes = text.as_bytes();
  Ok(match super::normalize_range(start, end, bytes.len()) {
    Some((from, to)) => RespValue::bulk(String::from_utf8_lossy(&bytes[from..=to]).into_owned()),
    None => RespValue::bulk(""),
  })
}

pub(super) fn setrange(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(3)?;
  let key = req.key(0);
  let offset = req.int(1)?;
  if offset < 0 {
    return Err(ReplyError::Message("offset is out of range".to_string()));
  }
  let offset = offset as usize;
  let patch = req.arg(2).as_bytes();
  let current = text_of(guard, &key)?;
  if patch.is_empty() {
    return Ok(RespValue::integer(current.map_or(0, |s| s.len()) as i64));
  }

  let end = offset
    .checked_add(patch.len())
    .filter(|&end| end <= MAX_STRING_LEN)
    .ok_or_else(|| ReplyError::Message("string exceeds maximum allowed size".to_string()))?;
  let mut bytes = current.unwrap_or_default().into_bytes();
  if bytes.len() < end {
    bytes.resize(end, 0);
  }
  bytes[offset..end].copy_from_slice(patch);
  let text = String::from_utf8_lossy(&bytes).into_owned();
  let len = text.len();
  guard.set(req.ctx(), &key, Value::from(text))?;
  Ok(RespValue::integer(len as i64))
}

/// `GETEX key [EX s|PX ms|EXAT ts|PXAT ts|PERSIST]`
pub(super) fn getex(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_between(1, 3)?;
  let key = req.key(0);

  enum Change {
    Keep,
    Expire(i64),
    Persist,
  }
  let change = match (req.len(), req.option(1).as_str()) {
    (1, _) => Change::Keep,
    (2, "PERSIST") => Change::Persist,
    (3, "EX") => Change::Expire(expire_millis(req.int(2)?, 1000, "getex")?),
    (3, "PX") => Change::Expire(expire_millis(req.int(2)?, 1, "getex")?),
    (3, "EXAT") => Change::Expire(parse_int(req.arg(2))?.saturating_mul(1000).saturating_sub(now_millis())),
    (3, "PXAT") => Change::Expire(parse_int(req.arg(2))?.saturating_sub(now_millis())),
    _ => return Err(ReplyError::Syntax),
  };

  let Ok(value) = guard.get(&key) else {
    return Ok(RespValue::null_bulk());
  };
  match change {
    Change::Keep => {}
    Change::Persist => guard.cancel_key_ttl(&key)?,
    Change::Expire(ms) if ms <= 0 => guard.delete(&[&key])?,
    Change::Expire(ms) => guard.set_key_ttl(&key, ms)?,
  }
  Ok(to_resp(&value))
}

pub(super) fn getdel(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  let key = req.key(0);
  let Ok(value) = guard.get(&key) else {
    return Ok(RespValue::null_bulk());
  };
  guard.delete(&[&key])?;
  Ok(to_resp(&value))
}

pub(super) fn now_millis() -> i64 {
  chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
  use super::super::test_support::call;
  use crate::cache::Cache;
  use crate::resp::protocol::RespValue;
  use serde_json::json;

  fn bulk(s: &str) -> RespValue {
    RespValue::bulk(s)
  }

  #[tokio::test]
  async fn test_set_get_del() {
    let cache = Cache::new("t", "/");
    let mut guard = cache.acquire("test");
    assert_eq!(call(&mut guard, "SET user:1 alice"), RespValue::ok());
    assert_eq!(guard.get("user/1").unwrap(), json!("alice"));
    assert_eq!(call(&mut guard, "GET user:1"), bulk("alice"));
    assert_eq!(call(&mut guard, "GET missing"), RespValue::null_bulk());
    assert_eq!(call(&mut guard, "EXISTS user:1 user:1 nope"), RespValue::integer(2));
    assert_eq!(call(&mut guard, "DEL user:1 nope"), RespValue::integer(1));
    assert_eq!(call(&mut guard, "GET user:1"), RespValue::null_bulk());
  }

  #[tokio::test]
  async fn test_set_options() {
    let cache = Cache::new("t", "/");
    let mut guard = cache.acquire("test");
    assert_eq!(call(&mut guard, "SET k v XX"), RespValue::null_bulk());
    assert_eq!(call(&mut guard, "SET k v NX"), RespValue::ok());
    assert_eq!(call(&mut guard, "SET k w NX"), RespValue::null_bulk());
    assert_eq!(call(&mut guard, "SET k w GET"), bulk("v"));
    assert_eq!(call(&mut guard, "SET k x EX 100"), RespValue::ok());
    assert!(guard.key_ttl_millis("k").is_some());
    assert_eq!(call(&mut guard, "SET k y KEEPTTL"), RespValue::ok());
    assert!(guard.key_ttl_millis("k").is_some());
    assert_eq!(call(&mut guard, "SET k z"), RespValue::ok());
    assert!(guard.key_ttl_millis("k").is_none());
    assert_eq!(
      call(&mut guard, "SET k z NX XX"),
      RespValue::error("ERR syntax error")
    );
    assert_eq!(
      call(&mut guard, "SET k z EX 0"),
      RespValue::error("ERR invalid expire time in 'set' command")
    );
    assert_eq!(
      call(&mut guard, "SET k"),
      RespValue::error("ERR wrong number of arguments for 'set' command")
    );
  }

  #[tokio::test]
  async fn test_counters() {
    let cache = Cache::new("t", "/");
    let mut guard = cache.acquire("test");
    assert_eq!(call(&mut guard, "INCR hits"), RespValue::integer(1));
    assert_eq!(call(&mut guard, "INCRBY hits 10"), RespValue::integer(11));
    assert_eq!(call(&mut guard, "DECR hits"), RespValue::integer(10));
    assert_eq!(call(&mut guard, "DECRBY hits 4"), RespValue::integer(6));
    assert_eq!(guard.get("hits").unwrap(), json!(6));

    call(&mut guard, "SET n 5");
    assert_eq!(call(&mut guard, "INCR n"), RespValue::integer(6));
    assert_eq!(call(&mut guard, "INCRBYFLOAT n 1.5"), bulk("7.5"));

    call(&mut guard, "SET word abc");
    assert_eq!(
      call(&mut guard, "INCR word"),
      RespValue::error("ERR value is not an integer or out of range")
    );
    assert_eq!(
      call(&mut guard, "INCRBY hits x"),
      RespValue::error("ERR value is not an integer or out of range")
    );
  }

  #[tokio::test]
  async fn test_multi_key() {
    let cache = Cache::new("t", "/");
    let mut guard = cache.acquire("test");
    assert_eq!(call(&mut guard, "MSET a 1 b 2"), RespValue::ok());
    assert_eq!(
      call(&mut guard, "MGET a nope b"),
      RespValue::array(vec![bulk("1"), RespValue::null_bulk(), bulk("2")])
    );
    assert_eq!(
      call(&mut guard, "MSET a"),
      RespValue::error("ERR wrong number of arguments for 'mset' command")
    );
    assert_eq!(call(&mut guard, "GETSET a 9"), bulk("1"));
    assert_eq!(call(&mut guard, "GETSET fresh 9"), RespValue::null_bulk());
    assert_eq!(call(&mut guard, "SETNX a 0"), RespValue::integer(0));
    assert_eq!(call(&mut guard, "SETNX c 0"), RespValue::integer(1));
    assert_eq!(call(&mut guard, "GETDEL c"), bulk("0"));
    assert!(!guard.exists("c"));
  }

  #[tokio::test]
  async fn test_string_ranges() {
    let cache = Cache::new("t", "/");
    let mut guard = cache.acquire("test");
    assert_eq!(call(&mut guard, "APPEND s Hello"), RespValue::integer(5));
    assert_eq!(call(&mut guard, "APPEND s World"), RespValue::integer(10));
    assert_eq!(call(&mut guard, "STRLEN s"), RespValue::integer(10));
    assert_eq!(call(&mut guard, "STRLEN nope"), RespValue::integer(0));
    assert_eq!(call(&mut guard, "GETRANGE s 0 4"), bulk("Hello"));
    assert_eq!(call(&mut guard, "GETRANGE s -5 -1"), bulk("World"));
    assert_eq!(call(&mut guard, "GETRANGE s 5 2"), bulk(""));
    assert_eq!(call(&mut guard, "SETRANGE s 5 Redis"), RespValue::integer(10));
    assert_eq!(call(&mut guard, "GET s"), bulk("HelloRedis"));
    assert_eq!(call(&mut guard, "SETRANGE pad 2 x"), RespValue::integer(3));
    assert_eq!(guard.get("pad").unwrap(), json!("\u{0}\u{0}x"));
  }

  #[tokio::test]
  async fn test_setrange_size_limit() {
    let cache = Cache::new("t", "/");
    let mut guard = cache.acquire("test");
    let too_big = RespValue::error("ERR string exceeds maximum allowed size");
    assert_eq!(call(&mut guard, "SETRANGE k 4611686018427387903 x"), too_big);
    assert_eq!(call(&mut guard, "SETRANGE k 536870912 x"), too_big);
    assert_eq!(call(&mut guard, "SETRANGE k 9223372036854775807 x"), too_big);
    assert!(!guard.exists("k"));
  }

  #[tokio::test]
  async fn test_ttl_variants() {
    let cache = Cache::new("t", "/");
    let mut guard = cache.acquire("test");
    assert_eq!(call(&mut guard, "SETEX a 100 v"), RespValue::ok());
    assert!(guard.key_ttl_millis("a").unwrap() > 99_000);
    assert_eq!(call(&mut guard, "PSETEX b 5000 v"), RespValue::ok());
    assert!(guard.key_ttl_millis("b").unwrap() <= 5000);
    assert_eq!(call(&mut guard, "GETEX b PERSIST"), bulk("v"));
    assert!(guard.key_ttl_millis("b").is_none());
    assert_eq!(call(&mut guard, "GETEX b PX 1000"), bulk("v"));
    assert!(guard.key_ttl_millis("b").is_some());
    assert_eq!(call(&mut guard, "GETEX nope EX 1"), RespValue::null_bulk());
    assert_eq!(
      call(&mut guard, "GETEX b EX"),
      RespValue::error("ERR syntax error")
    );
  }

  #[tokio::test]
  async fn test_wrong_type() {
    let cache = Cache::with_data("t", "/", json!({"h": {"f": 1}}));
    let mut guard = cache.acquire("test");
    assert_eq!(
      call(&mut guard, "APPEND h x"),
      RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
    );
  }
}
