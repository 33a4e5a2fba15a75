//! Process configuration
//!
//! Every setting has a default and can be overridden from the
//! environment (`KEY_DELIMITER`, `LISTEN_ADDRESS`, `RESP_ADDRESS`, …).

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// How inbound Redis keys map onto cache paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
  /// `:` is rewritten to the key delimiter
  #[default]
  Translate,
  /// Keys are used verbatim
  Preserve,
}

impl std::fmt::Display for KeyMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      KeyMode::Translate => write!(f, "translate"),
      KeyMode::Preserve => write!(f, "preserve"),
    }
  }
}

impl std::str::FromStr for KeyMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "translate" => Ok(KeyMode::Translate),
      "preserve" | "" => Ok(KeyMode::Preserve),
      _ => Err(format!("Unknown key mode: {}", s)),
    }
  }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
  #[default]
  Text,
  Json,
}

impl std::fmt::Display for LogFormat {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      LogFormat::Text => write!(f, "text"),
      LogFormat::Json => write!(f, "json"),
    }
  }
}

impl std::str::FromStr for LogFormat {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "text" | "console" | "" => Ok(LogFormat::Text),
      "json" => Ok(LogFormat::Json),
      _ => Err(format!("Unknown log format: {}", s)),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
  #[serde(default = "default_key_delimiter")]
  pub key_delimiter: String,

  /// HTTP bind address; `:port` binds every interface
  #[serde(default = "default_listen_address")]
  pub listen_address: String,

  /// RESP bind address; empty disables the RESP server
  #[serde(default = "default_resp_address")]
  pub resp_address: String,

  #[serde(default = "default_resp_default_cache")]
  pub resp_default_cache: String,

  #[serde(default)]
  pub resp_key_mode: KeyMode,

  /// Maximum concurrent RESP connections (0 = unlimited)
  #[serde(default)]
  pub resp_max_connections: usize,

  #[serde(default = "default_command_timeout_ms")]
  pub command_timeout_ms: u64,

  /// Operations slower than this are logged and recorded in cache stats
  #[serde(default = "default_command_long_threshold_ms")]
  pub command_long_threshold_ms: u64,

  #[serde(default)]
  pub log_format: LogFormat,

  /// Directory that admin backup/restore filenames are relative to
  #[serde(default = "default_backup_dir")]
  pub backup_dir: String,
}

fn default_key_delimiter() -> String {
  "/".into()
}
fn default_listen_address() -> String {
  ":8080".into()
}
fn default_resp_address() -> String {
  ":6379".into()
}
fn default_resp_default_cache() -> String {
  crate::registry::DEFAULT_NAME.into()
}
fn default_command_timeout_ms() -> u64 {
  5000
}
fn default_command_long_threshold_ms() -> u64 {
  1000
}
fn default_backup_dir() -> String {
  ".".into()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      key_delimiter: default_key_delimiter(),
      listen_address: default_listen_address(),
      resp_address: default_resp_address(),
      resp_default_cache: default_resp_default_cache(),
      resp_key_mode: KeyMode::default(),
      resp_max_connections: 0,
      command_timeout_ms: default_command_timeout_ms(),
      command_long_threshold_ms: default_command_long_threshold_ms(),
      log_format: LogFormat::default(),
      backup_dir: default_backup_dir(),
    }
  }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
  InvalidValue { var: String, value: String, reason: String },
  InvalidAddress(String),
}

impl std::fmt::Display for ConfigError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ConfigError::InvalidValue { var, value, reason } => {
        write!(f, "Invalid value for {}: {:?} ({})", var, value, reason)
      }
      ConfigError::InvalidAddress(addr) => write!(f, "Invalid address: {:?}", addr),
    }
  }
}

impl std::error::Error for ConfigError {}

fn parse_var<T>(var: &str, value: String) -> Result<T, ConfigError>
where
  T: std::str::FromStr,
  T::Err: std::fmt::Display,
{
  let parsed = value.trim().parse::<T>();
  parsed.map_err(|e| ConfigError::InvalidValue {
    var: var.to_string(),
    value,
    reason: e.to_string(),
  })
}

impl Config {
  /// Read the configuration from process environment variables
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|var| std::env::var(var).ok())
  }

  /// Build a configuration from any variable source
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();
    if let Some(v) = lookup("KEY_DELIMITER").filter(|v| !v.is_empty()) {
      config.key_delimiter = v;
    }
    if let Some(v) = lookup("LISTEN_ADDRESS").filter(|v| !v.is_empty()) {
      config.listen_address = v;
    }
    if let Some(v) = lookup("RESP_ADDRESS") {
      config.resp_address = v;
    }
    if let Some(v) = lookup("RESP_DEFAULT_CACHE").filter(|v| !v.is_empty()) {
      config.resp_default_cache = v;
    }
    if let Some(v) = lookup("RESP_KEY_MODE") {
      config.resp_key_mode = parse_var("RESP_KEY_MODE", v)?;
    }
    if let Some(v) = lookup("RESP_MAX_CONNECTIONS") {
      config.resp_max_connections = parse_var("RESP_MAX_CONNECTIONS", v)?;
    }
    if let Some(v) = lookup("COMMAND_TIMEOUT_MS") {
      config.command_timeout_ms = parse_var("COMMAND_TIMEOUT_MS", v)?;
    }
    if let Some(v) = lookup("COMMAND_LONG_THRESHOLD_MS") {
      config.command_long_threshold_ms = parse_var("COMMAND_LONG_THRESHOLD_MS", v)?;
    }
    if let Some(v) = lookup("LOG_FORMAT") {
      config.log_format = parse_var("LOG_FORMAT", v)?;
    }
    if let Some(v) = lookup("BACKUP_DIR").filter(|v| !v.is_empty()) {
      config.backup_dir = v;
    }
    Ok(config)
  }

  pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
    parse_address(&self.listen_address)
  }

  /// RESP bind address, or `None` when the RESP server is disabled
  pub fn resp_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
    if self.resp_address.trim().is_empty() {
      return Ok(None);
    }
    parse_address(&self.resp_address).map(Some)
  }

  pub fn command_timeout(&self) -> Duration {
    Duration::from_millis(self.command_timeout_ms)
  }

  pub fn long_threshold(&self) -> Duration {
    Duration::from_millis(self.command_long_threshold_ms)
  }
}

/// Parse `host:port`, treating a bare `:port` as every interface
pub fn parse_address(addr: &str) -> Result<SocketAddr, ConfigError> {
  let addr = addr.trim();
  let full = if addr.starts_with(':') {
    format!("0.0.0.0{}", addr)
  } else {
    addr.to_string()
  };
  if let Ok(parsed) = full.parse::<SocketAddr>() {
    return Ok(parsed);
  }
  full
    .to_socket_addrs()
    .ok()
    .and_then(|mut addrs| addrs.next())
    .ok_or_else(|| ConfigError::InvalidAddress(addr.to_string()))
}
