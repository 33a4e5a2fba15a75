//! Hash commands
//!
//! A hash is a mapping stored at the key; field `f` of hash `h` lives at
//! the path `h/f`.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};

use super::{float_of, integer_of, Reply, ReplyError, Request};
use crate::cache::CacheGuard;
use crate::document;
use crate::resp::mapper::to_resp;
use crate::resp::protocol::RespValue;

/// Largest |count| HRANDFIELD answers
const MAX_RANDOM_COUNT: u64 = 1 << 20;

/// Fields of the hash at `key`; a missing key is an empty hash
fn hash_of(guard: &CacheGuard<'_>, key: &str) -> Result<Map<String, Value>, ReplyError> {
  match guard.get(key) {
    Ok(Value::Object(map)) => Ok(map),
    Ok(_) => Err(ReplyError::WrongType),
    Err(_) => Ok(Map::new()),
  }
}

fn field_pairs(req: &Request, cmd: &str) -> Result<(), ReplyError> {
  if req.len() < 3 || req.len() % 2 == 0 {
    return Err(ReplyError::WrongArgs(cmd.to_string()));
  }
  Ok(())
}

/// Write the field/value pairs after the key, returning how many were new
fn write_pairs(guard: &mut CacheGuard<'_>, req: &Request, key: &str) -> Result<i64, ReplyError> {
  let hash = hash_of(guard, key)?;
  let mut added = 0;
  for i in (1..req.len()).step_by(2) {
    let field = req.arg(i);
    if !hash.contains_key(field) {
      added += 1;
    }
    guard.set(req.ctx(), &req.field(key, field), Value::from(req.arg(i + 1)))?;
  }
  Ok(added)
}

pub(super) fn hget(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(2)?;
  let hash = hash_of(guard, &req.key(0))?;
  Ok(hash.get(req.arg(1)).map_or_else(RespValue::null_bulk, to_resp))
}

pub(super) fn hset(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  field_pairs(req, "hset")?;
  let added = write_pairs(guard, req, &req.key(0))?;
  Ok(RespValue::integer(added))
}

pub(super) fn hmset(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  field_pairs(req, "hmset")?;
  write_pairs(guard, req, &req.key(0))?;
  Ok(RespValue::ok())
}

pub(super) fn hsetnx(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(3)?;
  let key = req.key(0);
  if hash_of(guard, &key)?.contains_key(req.arg(1)) {
    return Ok(RespValue::integer(0));
  }
  guard.set(req.ctx(), &req.field(&key, req.arg(1)), Value::from(req.arg(2)))?;
  Ok(RespValue::integer(1))
}

/// Every field and value; anything other than a mapping reads as empty
pub(super) fn hgetall(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  Ok(match guard.get(&req.key(0)) {
    Ok(value @ Value::Object(_)) => to_resp(&value),
    _ => RespValue::array(vec![]),
  })
}

pub(super) fn hdel(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_min(2)?;
  let key = req.key(0);
  let mut hash = hash_of(guard, &key)?;
  let mut removed = 0;
  for field in req.args_from(1) {
    if hash.remove(field).is_some() {
      guard.delete(&[req.field(&key, field)])?;
      removed += 1;
    }
  }
  if removed > 0 && hash.is_empty() {
    guard.delete(&[&key])?;
  }
  Ok(RespValue::integer(removed))
}

pub(super) fn hexists(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(2)?;
  let found = hash_of(guard, &req.key(0))?.contains_key(req.arg(1));
  Ok(RespValue::integer(i64::from(found)))
}

pub(super) fn hlen(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  Ok(RespValue::integer(hash_of(guard, &req.key(0))?.len() as i64))
}

pub(super) fn hkeys(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  Ok(RespValue::bulks(hash_of(guard, &req.key(0))?.keys().cloned()))
}

pub(super) fn hvals(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  let hash = hash_of(guard, &req.key(0))?;
  Ok(RespValue::array(hash.values().map(to_resp).collect()))
}

pub(super) fn hmget(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_min(2)?;
  let hash = hash_of(guard, &req.key(0))?;
  let values = req
    .args_from(1)
    .iter()
    .map(|f| hash.get(f).map_or_else(RespValue::null_bulk, to_resp))
    .collect();
  Ok(RespValue::array(values))
}

pub(super) fn hincrby(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(3)?;
  let key = req.key(0);
  let delta = req.int(2)?;
  let current = match hash_of(guard, &key)?.get(req.arg(1)) {
    Some(value) => integer_of(value)?,
    None => 0,
  };
  let updated = current
    .checked_add(delta)
    .ok_or_else(|| ReplyError::Message("increment or decrement would overflow".to_string()))?;
  guard.set(req.ctx(), &req.field(&key, req.arg(1)), Value::from(updated))?;
  Ok(RespValue::integer(updated))
}

pub(super) fn hincrbyfloat(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(3)?;
  let key = req.key(0);
  let delta = req.float(2)?;
  let current = match hash_of(guard, &key)?.get(req.arg(1)) {
    Some(value) => float_of(value)?,
    None => 0.0,
  };
  let updated = current + delta;
  if !updated.is_finite() {
    return Err(ReplyError::Message(
      "increment would produce NaN or Infinity".to_string(),
    ));
  }
  guard.set(
    req.ctx(),
    &req.field(&key, req.arg(1)),
    document::number_value(updated),
  )?;
  Ok(RespValue::bulk(updated.to_string()))
}

/// `HRANDFIELD key [count [WITHVALUES]]`
pub(super) fn hrandfield(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_between(1, 3)?;
  let hash = hash_of(guard, &req.key(0))?;
  let entries: Vec<(&String, &Value)> = hash.iter().collect();
  let mut rng = rand::thread_rng();

  if req.len() == 1 {
    return Ok(match entries.choose(&mut rng) {
      Some((field, _)) => RespValue::bulk(field.as_str()),
      None => RespValue::null_bulk(),
    });
  }

  let count = req.int(1)?;
  let with_values = match req.len() {
    3 if req.option(2) == "WITHVALUES" => true,
    3 => return Err(ReplyError::Syntax),
    _ => false,
  };
  if count.unsigned_abs() > MAX_RANDOM_COUNT {
    return Err(ReplyError::Message("value is out of range".to_string()));
  }
  if entries.is_empty() {
    return Ok(RespValue::array(vec![]));
  }

  // A negative count may repeat fields
  let picked: Vec<(&String, &Value)> = if count >= 0 {
    entries
      .choose_multiple(&mut rng, count as usize)
      .copied()
      .collect()
  } else {
    (0..count.unsigned_abs())
      .map(|_| entries[rng.gen_range(0..entries.len())])
      .collect()
  };

  let mut out = Vec::with_capacity(picked.len() * 2);
  for (field, value) in picked {
    out.push(RespValue::bulk(field.as_str()));
    if with_values {
      out.push(to_resp(value));
    }
  }
  Ok(RespValue::array(out))
}
