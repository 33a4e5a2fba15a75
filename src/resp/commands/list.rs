//! List commands
//!
//! Lists are arrays stored at the key. An operation that empties a list
//! removes the key.

use serde_json::Value;

use super::{normalize_range, Reply, ReplyError, Request};
use crate::cache::CacheGuard;
use crate::resp::mapper::{scalar_text, to_resp};
use crate::resp::protocol::RespValue;

fn list_of(guard: &CacheGuard<'_>, key: &str) -> Result<Option<Vec<Value>>, ReplyError> {
  match guard.get(key) {
    Ok(Value::Array(items)) => Ok(Some(items)),
    Ok(_) => Err(ReplyError::WrongType),
    Err(_) => Ok(None),
  }
}

/// Write the list back, deleting the key when it is empty
fn save(guard: &mut CacheGuard<'_>, req: &Request, key: &str, items: Vec<Value>) -> Result<(), ReplyError> {
  if items.is_empty() {
    guard.delete(&[key])?;
  } else {
    guard.set(req.ctx(), key, Value::Array(items))?;
  }
  Ok(())
}

fn matches(item: &Value, element: &str) -> bool {
  scalar_text(item).is_some_and(|s| s == element)
}

#[derive(Clone, Copy, PartialEq)]
enum End {
  Head,
  Tail,
}

fn push(guard: &mut CacheGuard<'_>, req: &Request, end: End, only_existing: bool) -> Reply {
  req.expect_min(2)?;
  let key = req.key(0);
  let mut items = match list_of(guard, &key)? {
    Some(items) => items,
    None if only_existing => return Ok(RespValue::integer(0)),
    None => Vec::new(),
  };
  for value in req.args_from(1) {
    match end {
      End::Head => items.insert(0, Value::from(value.as_str())),
      End::Tail => items.push(Value::from(value.as_str())),
    }
  }
  let len = items.len();
  save(guard, req, &key, items)?;
  Ok(RespValue::integer(len as i64))
}

pub(super) fn lpush(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  push(guard, req, End::Head, false)
}

pub(super) fn rpush(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  push(guard, req, End::Tail, false)
}

pub(super) fn lpushx(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  push(guard, req, End::Head, true)
}

pub(super) fn rpushx(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  push(guard, req, End::Tail, true)
}

fn pop(guard: &mut CacheGuard<'_>, req: &Request, end: End) -> Reply {
  req.expect_between(1, 2)?;
  let key = req.key(0);
  let count = match req.len() {
    2 => {
      let n = req.int(1)?;
      if n < 0 {
        return Err(ReplyError::Message(
          "value is out of range, must be positive".to_string(),
        ));
      }
      Some(n as usize)
    }
    _ => None,
  };

  let Some(mut items) = list_of(guard, &key)? else {
    return Ok(match count {
      Some(_) => RespValue::null_array(),
      None => RespValue::null_bulk(),
    });
  };

  let take = count.unwrap_or(1).min(items.len());
  let split = items.len() - take;
  let popped: Vec<Value> = match end {
    End::Head => items.drain(..take).collect(),
    End::Tail => items.drain(split..).rev().collect(),
  };
  save(guard, req, &key, items)?;

  Ok(match count {
    Some(_) => RespValue::array(popped.iter().map(to_resp).collect()),
    None => popped.first().map_or_else(RespValue::null_bulk, to_resp),
  })
}

pub(super) fn lpop(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  pop(guard, req, End::Head)
}

pub(super) fn rpop(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  pop(guard, req, End::Tail)
}

pub(super) fn llen(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(1)?;
  let len = list_of(guard, &req.key(0))?.map_or(0, |items| items.len());
  Ok(RespValue::integer(len as i64))
}

pub(super) fn lrange(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(3)?;
  let (start, stop) = (req.int(1)?, req.int(2)?);
  let items = list_of(guard, &req.key(0))?.unwrap_or_default();
  Ok(match normalize_range(start, stop, items.len()) {
    Some((from, to)) => RespValue::array(items[from..=to].iter().map(to_resp).collect()),
    None => RespValue::array(vec![]),
  })
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
  let len = len as i64;
  let index = if index < 0 { index.checked_add(len)? } else { index };
  (0..len).contains(&index).then_some(index as usize)
}

pub(super) fn lindex(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(2)?;
  let index = req.int(1)?;
  let items = list_of(guard, &req.key(0))?.unwrap_or_default();
  Ok(
    resolve_index(index, items.len())
      .map_or_else(RespValue::null_bulk, |i| to_resp(&items[i])),
  )
}

pub(super) fn lset(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(3)?;
  let key = req.key(0);
  let index = req.int(1)?;
  let Some(mut items) = list_of(guard, &key)? else {
    return Err(ReplyError::Message("no such key".to_string()));
  };
  let i = resolve_index(index, items.len())
    .ok_or_else(|| ReplyError::Message("index out of range".to_string()))?;
  items[i] = Value::from(req.arg(2));
  save(guard, req, &key, items)?;
  Ok(RespValue::ok())
}

pub(super) fn ltrim(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(3)?;
  let key = req.key(0);
  let (start, stop) = (req.int(1)?, req.int(2)?);
  let Some(items) = list_of(guard, &key)? else {
    return Ok(RespValue::ok());
  };
  let kept = match normalize_range(start, stop, items.len()) {
    Some((from, to)) => items[from..=to].to_vec(),
    None => Vec::new(),
  };
  save(guard, req, &key, kept)?;
  Ok(RespValue::ok())
}

/// `LINSERT key BEFORE|AFTER pivot element`
pub(super) fn linsert(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(4)?;
  let key = req.key(0);
  let after = match req.option(1).as_str() {
    "BEFORE" => false,
    "AFTER" => true,
    _ => return Err(ReplyError::Syntax),
  };
  let Some(mut items) = list_of(guard, &key)? else {
    return Ok(RespValue::integer(0));
  };
  let Some(pivot) = items.iter().position(|v| matches(v, req.arg(2))) else {
    return Ok(RespValue::integer(-1));
  };
  items.insert(pivot + usize::from(after), Value::from(req.arg(3)));
  let len = items.len();
  save(guard, req, &key, items)?;
  Ok(RespValue::integer(len as i64))
}

/// `LREM key count element`: positive counts scan from the head,
/// negative ones from the tail, zero removes every match
pub(super) fn lrem(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(3)?;
  let key = req.key(0);
  let count = req.int(1)?;
  let element = req.arg(2);
  let Some(items) = list_of(guard, &key)? else {
    return Ok(RespValue::integer(0));
  };

  let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
  let mut removed = 0;
  let mut kept: Vec<Value> = Vec::with_capacity(items.len());
  let mut keep = |item: Value| {
    if removed < limit && matches(&item, element) {
      removed += 1;
    } else {
      kept.push(item);
    }
  };
  if count < 0 {
    items.into_iter().rev().for_each(&mut keep);
    kept.reverse();
  } else {
    items.into_iter().for_each(&mut keep);
  }

  if removed > 0 {
    save(guard, req, &key, kept)?;
  }
  Ok(RespValue::integer(removed as i64))
}

/// `LPOS key element [RANK rank] [COUNT num] [MAXLEN len]`
pub(super) fn lpos(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_min(2)?;
  let element = req.arg(1);
  let (mut rank, mut count, mut maxlen) = (1i64, None, 0usize);

  let mut i = 2;
  while i < req.len() {
    if i + 1 >= req.len() {
      return Err(ReplyError::Syntax);
    }
    let value = req.int(i + 1)?;
    match req.option(i).as_str() {
      "RANK" if value == 0 => {
        return Err(ReplyError::Message(
          "RANK can't be zero: use 1 to start from the first match, 2 from the second ... or use negative to start from the last match".to_string(),
        ))
      }
      "RANK" => rank = value,
      "COUNT" if value < 0 => {
        return Err(ReplyError::Message("COUNT can't be negative".to_string()))
      }
      "COUNT" => count = Some(value as usize),
      "MAXLEN" if value < 0 => {
        return Err(ReplyError::Message("MAXLEN can't be negative".to_string()))
      }
      "MAXLEN" => maxlen = value as usize,
      _ => return Err(ReplyError::Syntax),
    }
    i += 2;
  }

  let items = list_of(guard, &req.key(0))?.unwrap_or_default();
  let scan = if maxlen == 0 { items.len() } else { maxlen.min(items.len()) };
  let indexes: Box<dyn Iterator<Item = usize>> = if rank > 0 {
    Box::new(0..scan)
  } else {
    Box::new((items.len() - scan..items.len()).rev())
  };

  let wanted = match count {
    Some(0) => usize::MAX,
    Some(n) => n,
    None => 1,
  };
  let found: Vec<usize> = indexes
    .filter(|&i| matches(&items[i], element))
    .skip(rank.unsigned_abs() as usize - 1)
    .take(wanted)
    .collect();

  Ok(match count {
    Some(_) => RespValue::array(found.into_iter().map(|i| RespValue::integer(i as i64)).collect()),
    None => found
      .first()
      .map_or_else(RespValue::null_bulk, |&i| RespValue::integer(i as i64)),
  })
}
