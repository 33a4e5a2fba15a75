//! RESP command table
//!
//! Connection commands run directly against the [`Session`]. Every other
//! command is a [`Handler`] that runs on the blocking pool while holding
//! the selected cache under the tag `resp-{conn_id}-{CMD}`.

mod connection;
mod hash;
mod key;
mod list;
mod string;

use serde_json::Value;
use std::time::Instant;

use super::mapper::{translate_key, untranslate_key};
use super::protocol::RespValue;
use super::server::RespServer;
use super::session::Session;
use crate::cache::CacheGuard;
use crate::command::ExecContext;
use crate::config::KeyMode;
use crate::error::{CacheError, ErrorKind};

pub(crate) type Reply = std::result::Result<RespValue, ReplyError>;

/// A command body executed while holding the selected cache
pub(crate) type Handler = fn(&mut CacheGuard<'_>, &Request) -> Reply;

const COMMANDS: &[(&str, Handler)] = &[
  // strings
  ("GET", string::get),
  ("SET", string::set),
  ("DEL", string::del),
  ("EXISTS", string::exists),
  ("INCR", string::incr),
  ("DECR", string::decr),
  ("INCRBY", string::incrby),
  ("DECRBY", string::decrby),
  ("INCRBYFLOAT", string::incrbyfloat),
  ("MGET", string::mget),
  ("MSET", string::mset),
  ("GETSET", string::getset),
  ("SETNX", string::setnx),
  ("SETEX", string::setex),
  ("PSETEX", string::psetex),
  ("STRLEN", string::strlen),
  ("APPEND", string::append),
  ("GETRANGE", string::getrange),
  ("SETRANGE", string::setrange),
  ("GETEX", string::getex),
  ("GETDEL", string::getdel),
  // hashes
  ("HGET", hash::hget),
  ("HSET", hash::hset),
  ("HGETALL", hash::hgetall),
  ("HDEL", hash::hdel),
  ("HEXISTS", hash::hexists),
  ("HLEN", hash::hlen),
  ("HKEYS", hash::hkeys),
  ("HVALS", hash::hvals),
  ("HMGET", hash::hmget),
  ("HMSET", hash::hmset),
  ("HINCRBY", hash::hincrby),
  ("HINCRBYFLOAT", hash::hincrbyfloat),
  ("HSETNX", hash::hsetnx),
  ("HRANDFIELD", hash::hrandfield),
  // lists
  ("LPUSH", list::lpush),
  ("RPUSH", list::rpush),
  ("LPUSHX", list::lpushx),
  ("RPUSHX", list::rpushx),
  ("LPOP", list::lpop),
  ("RPOP", list::rpop),
  ("LLEN", list::llen),
  ("LRANGE", list::lrange),
  ("LINDEX", list::lindex),
  ("LSET", list::lset),
  ("LTRIM", list::ltrim),
  ("LINSERT", list::linsert),
  ("LREM", list::lrem),
  ("LPOS", list::lpos),
  // keys
  ("EXPIRE", key::expire),
  ("PEXPIRE", key::pexpire),
  ("EXPIREAT", key::expireat),
  ("PEXPIREAT", key::pexpireat),
  ("PERSIST", key::persist),
  ("TTL", key::ttl),
  ("PTTL", key::pttl),
  ("EXPIRETIME", key::expiretime),
  ("PEXPIRETIME", key::pexpiretime),
  ("KEYS", key::keys),
  ("RENAME", key::rename),
  ("RENAMENX", key::renamenx),
  ("TYPE", key::key_type),
  ("COPY", key::copy),
  // server
  ("DBSIZE", connection::dbsize),
  ("FLUSHDB", connection::flushdb),
  ("FLUSHALL", connection::flushdb),
];

fn lookup(name: &str) -> Option<Handler> {
  COMMANDS
    .iter()
    .find(|(n, _)| *n == name)
    .map(|(_, handler)| *handler)
}

/// Number of commands the server answers
pub(crate) fn command_count() -> usize {
  COMMANDS.len() + connection::NAMES.len()
}

/// Execute one command for `session`
pub async fn execute_command(
  server: &RespServer,
  session: &mut Session,
  cmd: &str,
  args: Vec<String>,
) -> RespValue {
  if let Some(reply) = connection::execute(server, session, cmd, &args) {
    return reply;
  }
  match lookup(cmd) {
    Some(handler) => run(server, session, cmd, args, handler).await,
    None => RespValue::error(format!("ERR unknown command '{}'", cmd)),
  }
}

async fn run(
  server: &RespServer,
  session: &Session,
  cmd: &str,
  args: Vec<String>,
  handler: Handler,
) -> RespValue {
  let cache = match server.registry().fetch_cache(session.selected()) {
    Ok(cache) => cache,
    Err(e) => return ReplyError::from(e).into(),
  };

  let config = server.config();
  let timeout = config.command_timeout;
  let threshold = config.long_threshold;
  let tag = session.tag(cmd);
  let request = Request {
    name: cmd.to_string(),
    args,
    ctx: ExecContext::with_timeout(timeout),
    key_mode: config.key_mode,
    delimiter: server.registry().delimiter().to_string(),
  };

  let task = tokio::task::spawn_blocking(move || {
    let started = Instant::now();
    let Some(mut guard) = cache.try_acquire_for(&tag, timeout) else {
      cache.record_operation(&request.name, started.elapsed(), false, true, threshold);
      return Err(ReplyError::Cache(CacheError::Timeout));
    };
    let reply = handler(&mut guard, &request);
    guard.release(&tag);
    cache.record_operation(&request.name, started.elapsed(), reply.is_ok(), false, threshold);
    reply
  });

  let reply = match tokio::time::timeout(timeout, task).await {
    Ok(Ok(reply)) => reply,
    Ok(Err(e)) => Err(ReplyError::Cache(CacheError::Internal(e.to_string()))),
    Err(_) => Err(ReplyError::Cache(CacheError::Timeout)),
  };

  reply.unwrap_or_else(|e| {
    tracing::debug!(conn_id = session.id(), command = cmd, error = %e, "RESP command failed");
    e.into()
  })
}

/// Arguments of one command plus what handlers need to interpret them
pub(crate) struct Request {
  name: String,
  args: Vec<String>,
  ctx: ExecContext,
  key_mode: KeyMode,
  delimiter: String,
}

impl Request {
  pub(crate) fn new(name: &str, args: Vec<String>, key_mode: KeyMode, delimiter: &str) -> Self {
    Self {
      name: name.to_uppercase(),
      args,
      ctx: ExecContext::new(),
      key_mode,
      delimiter: delimiter.to_string(),
    }
  }

  pub(crate) fn ctx(&self) -> &ExecContext {
    &self.ctx
  }

  pub(crate) fn len(&self) -> usize {
    self.args.len()
  }

  fn wrong_args(&self) -> ReplyError {
    ReplyError::WrongArgs(self.name.to_lowercase())
  }

  pub(crate) fn expect(&self, n: usize) -> Result<(), ReplyError> {
    if self.args.len() == n {
      Ok(())
    } else {
      Err(self.wrong_args())
    }
  }

  pub(crate) fn expect_between(&self, min: usize, max: usize) -> Result<(), ReplyError> {
    if (min..=max).contains(&self.args.len()) {
      Ok(())
    } else {
      Err(self.wrong_args())
    }
  }

  pub(crate) fn expect_min(&self, n: usize) -> Result<(), ReplyError> {
    self.expect_between(n, usize::MAX)
  }

  pub(crate) fn arg(&self, i: usize) -> &str {
    self.args.get(i).map_or("", String::as_str)
  }

  pub(crate) fn args_from(&self, i: usize) -> &[String] {
    self.args.get(i..).unwrap_or(&[])
  }

  /// Argument `i` as a cache key
  pub(crate) fn key(&self, i: usize) -> String {
    self.to_path(self.arg(i))
  }

  pub(crate) fn to_path(&self, key: &str) -> String {
    translate_key(key, self.key_mode, &self.delimiter)
  }

  pub(crate) fn to_redis_key(&self, path: &str) -> String {
    untranslate_key(path, self.key_mode, &self.delimiter)
  }

  /// Path of a hash field
  pub(crate) fn field(&self, key: &str, field: &str) -> String {
    format!("{}{}{}", key, self.delimiter, field)
  }

  pub(crate) fn int(&self, i: usize) -> Result<i64, ReplyError> {
    parse_int(self.arg(i))
  }

  pub(crate) fn float(&self, i: usize) -> Result<f64, ReplyError> {
    parse_float(self.arg(i))
  }

  pub(crate) fn option(&self, i: usize) -> String {
    self.arg(i).to_uppercase()
  }
}

pub(crate) fn parse_int(s: &str) -> Result<i64, ReplyError> {
  s.parse().map_err(|_| ReplyError::NotInteger)
}

pub(crate) fn parse_float(s: &str) -> Result<f64, ReplyError> {
  match s.parse::<f64>() {
    Ok(f) if !f.is_nan() => Ok(f),
    _ => Err(ReplyError::NotFloat),
  }
}

/// Integer held by a stored value
pub(crate) fn integer_of(value: &Value) -> Result<i64, ReplyError> {
  match value {
    Value::Number(n) => n.as_i64().ok_or(ReplyError::NotInteger),
    Value::String(s) => parse_int(s),
    Value::Array(_) | Value::Object(_) => Err(ReplyError::WrongType),
    _ => Err(ReplyError::NotInteger),
  }
}

/// Float held by a stored value
pub(crate) fn float_of(value: &Value) -> Result<f64, ReplyError> {
  match value {
    Value::Number(n) => n.as_f64().ok_or(ReplyError::NotFloat),
    Value::String(s) => parse_float(s),
    Value::Array(_) | Value::Object(_) => Err(ReplyError::WrongType),
    _ => Err(ReplyError::NotFloat),
  }
}

/// Resolve Redis-style `start`/`stop` offsets into an inclusive index range
pub(crate) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
  let len = len as i64;
  let start = if start < 0 { start.saturating_add(len).max(0) } else { start };
  let stop = if stop < 0 { stop.saturating_add(len) } else { stop.min(len - 1) };
  if len == 0 || start > stop || start >= len || stop < 0 {
    return None;
  }
  Some((start as usize, stop as usize))
}

/// Error reply of a command
#[derive(Debug)]
pub(crate) enum ReplyError {
  WrongArgs(String),
  Syntax,
  NotInteger,
  NotFloat,
  WrongType,
  Message(String),
  Cache(CacheError),
}

impl std::fmt::Display for ReplyError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ReplyError::WrongArgs(cmd) => {
        write!(f, "ERR wrong number of arguments for '{}' command", cmd)
      }
      ReplyError::Syntax => write!(f, "ERR syntax error"),
      ReplyError::NotInteger => write!(f, "ERR value is not an integer or out of range"),
      ReplyError::NotFloat => write!(f, "ERR value is not a valid float"),
      ReplyError::WrongType => write!(
        f,
        "WRONGTYPE Operation against a key holding the wrong kind of value"
      ),
      ReplyError::Message(msg) => write!(f, "ERR {}", msg),
      ReplyError::Cache(e) => match e.kind() {
        ErrorKind::TypeMismatch => write!(f, "{}", ReplyError::WrongType),
        _ => write!(f, "ERR {}", e),
      },
    }
  }
}

impl std::error::Error for ReplyError {}

impl From<CacheError> for ReplyError {
  fn from(e: CacheError) -> Self {
    ReplyError::Cache(e)
  }
}

impl From<ReplyError> for RespValue {
  fn from(e: ReplyError) -> Self {
    RespValue::error(e.to_string())
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_normalize_range() {
    assert_eq!(normalize_range(0, -1, 3), Some((0, 2)));
    assert_eq!(normalize_range(-2, -1, 3), Some((1, 2)));
    assert_eq!(normalize_range(1, 100, 3), Some((1, 2)));
    assert_eq!(normalize_range(-100, 0, 3), Some((0, 0)));
    assert_eq!(normalize_range(2, 1, 3), None);
    assert_eq!(normalize_range(5, 10, 3), None);
    assert_eq!(normalize_range(0, -1, 0), None);
  }

  #[test]
  fn test_reply_errors() {
    assert_eq!(
      RespValue::from(ReplyError::WrongArgs("get".into())),
      RespValue::error("ERR wrong number of arguments for 'get' command")
    );
    assert_eq!(
      RespValue::from(ReplyError::from(CacheError::NotAnArray("k".into()))),
      RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
    );
    assert_eq!(
      RespValue::from(ReplyError::from(CacheError::CacheNotFound("3".into()))),
      RespValue::error("ERR cache not found: 3")
    );
  }

  #[test]
  fn test_lookup_table() {
    assert!(lookup("GET").is_some());
    assert!(lookup("get").is_none());
    assert!(lookup("PING").is_none());
    let mut names: Vec<&str> = COMMANDS.iter().map(|(n, _)| *n).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), COMMANDS.len());
  }

  #[test]
  fn test_value_coercion() {
    assert_eq!(integer_of(&Value::from("12")).unwrap(), 12);
    assert_eq!(integer_of(&Value::from(3)).unwrap(), 3);
    assert!(matches!(integer_of(&Value::from(1.5)), Err(ReplyError::NotInteger)));
    assert!(matches!(
      integer_of(&serde_json::json!([])),
      Err(ReplyError::WrongType)
    ));
    assert_eq!(float_of(&Value::from("2.5")).unwrap(), 2.5);
  }
}
