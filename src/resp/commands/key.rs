//! Key management commands
//!
//! TTLs map onto the per-key expiration timers of the cache. Redis
//! reports `-2` for a missing key and `-1` for a key without a TTL.

use super::string::now_millis;
use super::{Reply, ReplyError, Request};
use crate::cache::CacheGuard;
use crate::resp::mapper::type_name;
use crate::resp::protocol::RespValue;

const NO_KEY: i64 = -2;
const NO_TTL: i64 = -1;

/// `[NX|XX|GT|LT]` condition of the EXPIRE family
#[derive(Clone, Copy, PartialEq)]
enum Condition {
  Always,
  Nx,
  Xx,
  Gt,
  Lt,
}

impl Condition {
  fn parse(req: &Request) -> Result<Self, ReplyError> {
    let mut condition = Condition::Always;
    for i in 2..req.len() {
      let next = match req.option(i).as_str() {
        "NX" => Condition::Nx,
        "XX" => Condition::Xx,
        "GT" => Condition::Gt,
        "LT" => Condition::Lt,
        other => {
          return Err(ReplyError::Message(format!("Unsupported option {}", other)));
        }
      };
      if condition != Condition::Always && condition != next {
        return Err(ReplyError::Message(
          "NX and XX, GT or LT options at the same time are not compatible".to_string(),
        ));
      }
      condition = next;
    }
    Ok(condition)
  }

  /// Whether a new TTL may replace `current` (`None` = persistent)
  fn allows(self, current: Option<i64>, millis: i64) -> bool {
    match self {
      Condition::Always => true,
      Condition::Nx => current.is_none(),
      Condition::Xx => current.is_some(),
      Condition::Gt => current.is_some_and(|c| millis > c),
      Condition::Lt => current.map_or(true, |c| millis < c),
    }
  }
}

/// Expire the key `millis` from now; a non-positive delay deletes it
fn expire_in(guard: &mut CacheGuard<'_>, req: &Request, millis: i64) -> Reply {
  let condition = Condition::parse(req)?;
  let key = req.key(0);
  if !guard.exists(&key) || !condition.allows(guard.key_ttl_millis(&key), millis) {
    return Ok(RespValue::integer(0));
  }
  if millis <= 0 {
    guard.delete(&[&key])?;
  } else {
    guard.set_key_ttl(&key, millis)?;
  }
  Ok(RespValue::integer(1))
}

fn scaled(req: &Request, unit_ms: i64, cmd: &str) -> Result<i64, ReplyError> {
  req.int(1)?.checked_mul(unit_ms).ok_or_else(|| {
    ReplyError::Message(format!("invalid expire time in '{}' command", cmd))
  })
}

pub(super) fn expire(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_between(2, 3)?;
  let millis = scaled(req, 1000, "expire")?;
  expire_in(guard, req, millis)
}

pub(super) fn pexpire(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_between(2, 3)?;
  let millis = scaled(req, 1, "pexpire")?;
  expire_in(guard, req, millis)
}

pub(super) fn expireat(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_between(2, 3)?;
  let at = scaled(req, 1000, "expireat")?;
  expire_in(guard, req, at.saturating_sub(now_millis()))
}

pub(super) fn pexpireat(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_between(2, 3)?;
  let at = scaled(req, 1, "pexpireat")?;
  expire_in(guard, req, at.saturating_sub(now_millis()))
}

pub(super) fn persist(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  let key = req.key(0);
  if !guard.exists(&key) || guard.key_ttl_millis(&key).is_none() {
    return Ok(RespValue::integer(0));
  }
  guard.cancel_key_ttl(&key)?;
  Ok(RespValue::integer(1))
}

/// Remaining TTL of the key in `unit_ms` units, rounded to nearest
fn remaining(guard: &CacheGuard<'_>, key: &str, unit_ms: i64) -> i64 {
  if !guard.exists(key) {
    return NO_KEY;
  }
  match guard.key_ttl_millis(key) {
    Some(ms) => (ms + unit_ms / 2) / unit_ms,
    None => NO_TTL,
  }
}

pub(super) fn ttl(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  Ok(RespValue::integer(remaining(guard, &req.key(0), 1000)))
}

pub(super) fn pttl(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  Ok(RespValue::integer(remaining(guard, &req.key(0), 1)))
}

/// Absolute expiration of the key in `unit_ms` units since the epoch
fn expires_at(guard: &CacheGuard<'_>, key: &str, unit_ms: i64) -> i64 {
  if !guard.exists(key) {
    return NO_KEY;
  }
  guard
    .key_expiration_millis(key)
    .map_or(NO_TTL, |ms| ms / unit_ms)
}

pub(super) fn expiretime(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  Ok(RespValue::integer(expires_at(guard, &req.key(0), 1000)))
}

pub(super) fn pexpiretime(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  Ok(RespValue::integer(expires_at(guard, &req.key(0), 1)))
}

/// `KEYS pattern`; `*` matches one whole path segment
pub(super) fn keys(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  let pattern = req.key(0);
  let found = guard.wild_keys(&pattern);
  Ok(RespValue::bulks(found.iter().map(|k| req.to_redis_key(k))))
}

/// Move `src` to `dst`, carrying its TTL along
fn move_key(guard: &mut CacheGuard<'_>, req: &Request, src: &str, dst: &str) -> Result<(), ReplyError> {
  let value = guard.get(src)?;
  let ttl = guard.key_ttl_millis(src);
  guard.delete(&[src])?;
  guard.cancel_key_ttl(dst)?;
  guard.set(req.ctx(), dst, value)?;
  if let Some(ms) = ttl.filter(|ms| *ms > 0) {
    guard.set_key_ttl(dst, ms)?;
  }
  Ok(())
}

pub(super) fn rename(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(2)?;
  let (src, dst) = (req.key(0), req.key(1));
  if !guard.exists(&src) {
    return Err(ReplyError::Message("no such key".to_string()));
  }
  if src != dst {
    move_key(guard, req, &src, &dst)?;
  }
  Ok(RespValue::ok())
}

pub(super) fn renamenx(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(2)?;
  let (src, dst) = (req.key(0), req.key(1));
  if !guard.exists(&src) {
    return Err(ReplyError::Message("no such key".to_string()));
  }
  if guard.exists(&dst) {
    return Ok(RespValue::integer(0));
  }
  move_key(guard, req, &src, &dst)?;
  Ok(RespValue::integer(1))
}

pub(super) fn key_type(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  let name = match guard.get(&req.key(0)) {
    Ok(value) => type_name(&value),
    Err(_) => "none",
  };
  Ok(RespValue::SimpleString(name.to_string()))
}

/// `COPY source destination [REPLACE]`
pub(super) fn copy(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_between(2, 3)?;
  let replace = match req.len() {
    3 if req.option(2) == "REPLACE" => true,
    3 => return Err(ReplyError::Syntax),
    _ => false,
  };
  let (src, dst) = (req.key(0), req.key(1));
  let Ok(value) = guard.get(&src) else {
    return Ok(RespValue::integer(0));
  };
  if src == dst || (!replace && guard.exists(&dst)) {
    return Ok(RespValue::integer(0));
  }

  let ttl = guard.key_ttl_millis(&src);
  guard.cancel_key_ttl(&dst)?;
  guard.set(req.ctx(), &dst, value)?;
  if let Some(ms) = ttl.filter(|ms| *ms > 0) {
    guard.set_key_ttl(&dst, ms)?;
  }
  Ok(RespValue::integer(1))
}
