//! Connection and server commands

use super::{command_count, Reply, Request};
use crate::cache::CacheGuard;
use crate::resp::protocol::RespValue;
use crate::resp::server::RespServer;
use crate::resp::session::Session;

/// Commands answered without touching a cache
pub(super) const NAMES: &[&str] = &["PING", "ECHO", "SELECT", "COMMAND", "HELLO", "CLIENT", "QUIT"];

fn wrong_args(cmd: &str) -> RespValue {
  RespValue::error(format!(
    "ERR wrong number of arguments for '{}' command",
    cmd
  ))
}

/// Handle a connection-level command, or `None` if `cmd` is not one
pub(super) fn execute(
  server: &RespServer,
  session: &mut Session,
  cmd: &str,
  args: &[String],
) -> Option<RespValue> {
  let reply = match cmd {
    "PING" => match args {
      [] => RespValue::pong(),
      [message] => RespValue::bulk(message.as_str()),
      _ => wrong_args("ping"),
    },
    "ECHO" => match args {
      [message] => RespValue::bulk(message.as_str()),
      _ => wrong_args("echo"),
    },
    "SELECT" => select(server, session, args),
    "COMMAND" => command(args),
    "HELLO" => hello(session, args),
    "CLIENT" => client(session, args),
    "QUIT" => RespValue::ok(),
    _ => return None,
  };
  Some(reply)
}

/// `SELECT n` picks the cache named `n`; `0` is the configured default
fn select(server: &RespServer, session: &mut Session, args: &[String]) -> RespValue {
  let [index] = args else {
    return wrong_args("select");
  };
  if index.parse::<u32>().is_err() {
    return RespValue::error("ERR value is not an integer or out of range");
  }
  let name = if index == "0" {
    server.config().default_cache.clone()
  } else {
    index.clone()
  };
  server.registry().get_or_create(&name);
  tracing::debug!(conn_id = session.id(), cache = %name, "RESP cache selected");
  session.select(name);
  RespValue::ok()
}

fn command(args: &[String]) -> RespValue {
  let Some(sub) = args.first() else {
    return RespValue::array(vec![]);
  };
  match sub.to_uppercase().as_str() {
    "COUNT" => RespValue::integer(command_count() as i64),
    "INFO" => RespValue::array(args[1..].iter().map(|_| RespValue::null_array()).collect()),
    "DOCS" => RespValue::array(vec![]),
    other => RespValue::error(format!("ERR unknown subcommand '{}'", other)),
  }
}

/// `HELLO [protover [SETNAME name]]`; only RESP2 is spoken
fn hello(session: &mut Session, args: &[String]) -> RespValue {
  if let Some(version) = args.first() {
    match version.parse::<u32>() {
      Ok(2) => {}
      Ok(_) => return RespValue::error("NOPROTO unsupported protocol version"),
      Err(_) => return RespValue::error("ERR Protocol version is not an integer or out of range"),
    }
  }
  let mut i = 1;
  while i < args.len() {
    match args[i].to_uppercase().as_str() {
      "SETNAME" if i + 1 < args.len() => {
        session.set_client_name(Some(args[i + 1].clone()));
        i += 2;
      }
      "AUTH" if i + 2 < args.len() => i += 3,
      _ => return RespValue::error("ERR syntax error"),
    }
  }

  RespValue::array(vec![
    RespValue::bulk("server"),
    RespValue::bulk("map-cache"),
    RespValue::bulk("version"),
    RespValue::bulk(env!("CARGO_PKG_VERSION")),
    RespValue::bulk("proto"),
    RespValue::integer(2),
    RespValue::bulk("id"),
    RespValue::integer(session.id() as i64),
    RespValue::bulk("mode"),
    RespValue::bulk("standalone"),
    RespValue::bulk("role"),
    RespValue::bulk("master"),
    RespValue::bulk("modules"),
    RespValue::array(vec![]),
  ])
}

fn client(session: &mut Session, args: &[String]) -> RespValue {
  let Some(sub) = args.first() else {
    return wrong_args("client");
  };
  match (sub.to_uppercase().as_str(), &args[1..]) {
    ("ID", []) => RespValue::integer(session.id() as i64),
    ("GETNAME", []) => match session.client_name() {
      Some(name) => RespValue::bulk(name),
      None => RespValue::null_bulk(),
    },
    ("SETNAME", [name]) => {
      if name.contains(' ') {
        return RespValue::error("ERR Client names cannot contain spaces, newlines or special characters.");
      }
      session.set_client_name(Some(name.clone()));
      RespValue::ok()
    }
    ("SETINFO", [_, _]) => RespValue::ok(),
    ("ID" | "GETNAME" | "SETNAME" | "SETINFO", _) => wrong_args("client"),
    (other, _) => RespValue::error(format!("ERR unknown subcommand '{}'", other)),
  }
}

pub(super) fn dbsize(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect(0)?;
  Ok(RespValue::integer(guard.wild_keys("*").len() as i64))
}

/// Remove every top-level key of the selected cache. `FLUSHALL` does the
/// same; other caches are left alone.
pub(super) fn flushdb(guard: &mut CacheGuard<'_>, req: &Request) -> Reply {
  req.expect_between(0, 1)?;
  let keys = guard.wild_keys("*");
  guard.delete(&keys)?;
  tracing::info!(cache = %guard.cache().name(), keys = keys.len(), "Cache flushed");
  Ok(RespValue::ok())
}
