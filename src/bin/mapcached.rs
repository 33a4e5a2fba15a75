use clap::Parser;
use mapcache::config::{Config, KeyMode, LogFormat};
use mapcache::server::Daemon;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "mapcached", about = "map-cache server", version)]
struct Args {
  #[arg(long, env = "KEY_DELIMITER")]
  key_delimiter: Option<String>,
  #[arg(long, env = "LISTEN_ADDRESS")]
  listen_address: Option<String>,
  /// Empty disables the RESP server
  #[arg(long, env = "RESP_ADDRESS")]
  resp_address: Option<String>,
  #[arg(long, env = "RESP_DEFAULT_CACHE")]
  resp_default_cache: Option<String>,
  #[arg(long, env = "RESP_KEY_MODE")]
  resp_key_mode: Option<KeyMode>,
  #[arg(long, env = "RESP_MAX_CONNECTIONS")]
  resp_max_connections: Option<usize>,
  #[arg(long, env = "COMMAND_TIMEOUT_MS")]
  command_timeout_ms: Option<u64>,
  #[arg(long, env = "COMMAND_LONG_THRESHOLD_MS")]
  command_long_threshold_ms: Option<u64>,
  #[arg(long, env = "LOG_FORMAT")]
  log_format: Option<LogFormat>,
  #[arg(long, env = "BACKUP_DIR")]
  backup_dir: Option<String>,
  #[arg(long)]
  log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();
  let mut config = Config::from_env()?;

  // CLI args override the environment
  if let Some(v) = args.key_delimiter {
    config.key_delimiter = v;
  }
  if let Some(v) = args.listen_address {
    config.listen_address = v;
  }
  if let Some(v) = args.resp_address {
    config.resp_address = v;
  }
  if let Some(v) = args.resp_default_cache {
    config.resp_default_cache = v;
  }
  if let Some(v) = args.resp_key_mode {
    config.resp_key_mode = v;
  }
  if let Some(v) = args.resp_max_connections {
    config.resp_max_connections = v;
  }
  if let Some(v) = args.command_timeout_ms {
    config.command_timeout_ms = v;
  }
  if let Some(v) = args.command_long_threshold_ms {
    config.command_long_threshold_ms = v;
  }
  if let Some(v) = args.log_format {
    config.log_format = v;
  }
  if let Some(v) = args.backup_dir {
    config.backup_dir = v;
  }

  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| args.log_level.unwrap_or_else(|| "info".to_string()).into());
  match config.log_format {
    LogFormat::Json => tracing_subscriber::registry()
      .with(filter)
      .with(tracing_subscriber::fmt::layer().json())
      .init(),
    LogFormat::Text => tracing_subscriber::registry()
      .with(filter)
      .with(tracing_subscriber::fmt::layer())
      .init(),
  }

  tracing::info!(
    version = env!("CARGO_PKG_VERSION"),
    listen = %config.listen_address,
    resp = %config.resp_address,
    "Starting mapcached"
  );

  let daemon = Arc::new(Daemon::new(config));
  let signal_daemon = daemon.clone();

  // Handle shutdown signals (SIGINT, SIGTERM)
  tokio::spawn(async move {
    shutdown_signal().await;
    signal_daemon.shutdown();
  });

  daemon.run().await
}

async fn shutdown_signal() {
  let ctrl_c = async {
    tokio::signal::ctrl_c()
      .await
      .expect("Failed to install Ctrl+C handler");
  };

  #[cfg(unix)]
  let terminate = async {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
      .expect("Failed to install SIGTERM handler")
      .recv()
      .await;
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => tracing::info!("Received SIGINT"),
    _ = terminate => tracing::info!("Received SIGTERM"),
  }
}
