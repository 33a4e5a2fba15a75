//! RESP TCP server
//!
//! Each connection gets a [`Session`] that starts on the configured default
//! cache. Commands in a pipelined read are answered in order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use super::commands::execute_command;
use super::protocol::{extract_command, RespParser, RespValue};
use super::session::Session;
use crate::config::{Config, KeyMode};
use crate::registry::Registry;

/// How long a rejected client gets to take the refusal message
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings the RESP surface reads on every command
#[derive(Debug, Clone)]
pub struct RespConfig {
  pub key_mode: KeyMode,
  pub default_cache: String,
  pub command_timeout: Duration,
  pub long_threshold: Duration,
  /// 0 = unlimited
  pub max_connections: usize,
}

impl From<&Config> for RespConfig {
  fn from(config: &Config) -> Self {
    Self {
      key_mode: config.resp_key_mode,
      default_cache: config.resp_default_cache.clone(),
      command_timeout: config.command_timeout(),
      long_threshold: config.long_threshold(),
      max_connections: config.resp_max_connections,
    }
  }
}

pub struct RespServer {
  registry: Registry,
  config: RespConfig,
  next_conn_id: AtomicU64,
  active: Arc<AtomicUsize>,
}

/// Holds one connection slot until dropped
struct ConnectionSlot {
  active: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
  fn drop(&mut self) {
    self.active.fetch_sub(1, Ordering::SeqCst);
  }
}

impl RespServer {
  pub fn new(registry: Registry, config: &Config) -> Self {
    Self {
      registry,
      config: RespConfig::from(config),
      next_conn_id: AtomicU64::new(1),
      active: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn registry(&self) -> &Registry {
    &self.registry
  }

  pub fn config(&self) -> &RespConfig {
    &self.config
  }

  /// Number of connected clients
  pub fn active_connections(&self) -> usize {
    self.active.load(Ordering::SeqCst)
  }

  fn claim_slot(&self) -> Option<ConnectionSlot> {
    let limit = self.config.max_connections;
    let previous = self.active.fetch_add(1, Ordering::SeqCst);
    let slot = ConnectionSlot {
      active: self.active.clone(),
    };
    if limit > 0 && previous >= limit {
      return None;
    }
    Some(slot)
  }

  /// Bind `addr` and serve until `shutdown` fires
  pub async fn run(
    self: Arc<Self>,
    addr: SocketAddr,
    shutdown: broadcast::Receiver<()>,
  ) -> Result<(), anyhow::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("RESP server listening on {}", addr);
    self.serve(listener, shutdown).await
  }

  /// Accept connections on an already bound listener
  pub async fn serve(
    self: Arc<Self>,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
  ) -> Result<(), anyhow::Error> {
    loop {
      tokio::select! {
        accepted = listener.accept() => {
          let (mut socket, addr) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
              tracing::warn!("RESP accept failed: {}", e);
              continue;
            }
          };

          let Some(slot) = self.claim_slot() else {
            tracing::warn!(peer = %addr, "RESP connection rejected: max clients reached");
            tokio::spawn(async move {
              let reply = socket.write_all(b"-ERR max number of clients reached\r\n");
              let _ = tokio::time::timeout(REJECT_WRITE_TIMEOUT, reply).await;
            });
            continue;
          };

          let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
          let server = self.clone();
          let shutdown = shutdown.resubscribe();
          tokio::spawn(async move {
            let _slot = slot;
            if let Err(e) = handle_client(server, socket, addr, conn_id, shutdown).await {
              tracing::debug!(conn_id, "Client {} error: {}", addr, e);
            }
          });
        }
        _ = shutdown.recv() => {
          tracing::info!("RESP server shutting down");
          break;
        }
      }
    }
    Ok(())
  }
}

async fn handle_client(
  server: Arc<RespServer>,
  mut socket: TcpStream,
  addr: SocketAddr,
  conn_id: u64,
  mut shutdown: broadcast::Receiver<()>,
) -> Result<(), anyhow::Error> {
  tracing::debug!(conn_id, "RESP client connected: {}", addr);

  let mut session = Session::new(conn_id, &server.config().default_cache);
  let mut parser = RespParser::new();
  let mut buf = [0u8; 4096];
  let mut out = Vec::with_capacity(4096);

  loop {
    let n = tokio::select! {
      read = socket.read(&mut buf) => read?,
      _ = shutdown.recv() => break,
    };
    if n == 0 {
      break;
    }

    parser.feed(&buf[..n]);

    // Answer every complete command in the buffer
    loop {
      let value = match parser.parse() {
        Ok(Some(value)) => value,
        Ok(None) => break,
        Err(e) => {
          RespValue::error(format!("ERR {}", e)).encode_into(&mut out);
          socket.write_all(&out).await?;
          tracing::debug!(conn_id, "Closing RESP client {}: {}", addr, e);
          return Ok(());
        }
      };

      let response = match extract_command(&value) {
        Some((cmd, args)) => {
          if cmd == "QUIT" {
            RespValue::ok().encode_into(&mut out);
            socket.write_all(&out).await?;
            tracing::debug!(conn_id, "RESP client quit: {}", addr);
            return Ok(());
          }
          execute_command(&server, &mut session, &cmd, args).await
        }
        // Blank inline line
        None if value == RespValue::Array(Some(vec![])) => continue,
        None => RespValue::error("ERR invalid command format"),
      };
      response.encode_into(&mut out);
    }

    if !out.is_empty() {
      socket.write_all(&out).await?;
      out.clear();
    }
  }

  tracing::debug!(conn_id, "RESP client disconnected: {}", addr);
  Ok(())
}

impl std::fmt::Debug for RespServer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RespServer")
      .field("config", &self.config)
      .field("active", &self.active_connections())
      .finish()
  }
}
