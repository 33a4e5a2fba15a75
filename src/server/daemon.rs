use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::http::{self, AppState};
use crate::registry::Registry;
use crate::resp::RespServer;

/// Runs the HTTP API and the RESP server over one cache registry
pub struct Daemon {
  config: Config,
  registry: Registry,
  shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
  pub fn new(config: Config) -> Self {
    let (shutdown_tx, _) = broadcast::channel(1);
    let registry = Registry::new(&config.key_delimiter);
    tracing::info!(
      delimiter = %config.key_delimiter,
      command_timeout_ms = config.command_timeout_ms,
      "Registry created"
    );
    Self {
      config,
      registry,
      shutdown_tx,
    }
  }

  pub fn registry(&self) -> &Registry {
    &self.registry
  }

  /// Trigger graceful shutdown of all servers
  pub fn shutdown(&self) {
    tracing::info!("Initiating graceful shutdown...");
    let _ = self.shutdown_tx.send(());
  }

  /// Bind both listeners and serve until [`Daemon::shutdown`] is called
  pub async fn run(&self) -> Result<(), anyhow::Error> {
    let http_listener = TcpListener::bind(self.config.http_addr()?).await?;
    tracing::info!("HTTP API on {}", http_listener.local_addr()?);
    let state = AppState::new(self.registry.clone(), self.config.clone());
    let http_task = tokio::spawn(http::serve(
      http_listener,
      state,
      self.shutdown_tx.subscribe(),
    ));

    let resp_task = match self.config.resp_addr()? {
      Some(addr) => {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(
          key_mode = %self.config.resp_key_mode,
          default_cache = %self.config.resp_default_cache,
          "RESP server on {}",
          listener.local_addr()?
        );
        let server = Arc::new(RespServer::new(self.registry.clone(), &self.config));
        Some(tokio::spawn(server.serve(listener, self.shutdown_tx.subscribe())))
      }
      None => {
        tracing::info!("RESP server disabled");
        None
      }
    };

    if let Err(e) = http_task.await? {
      tracing::error!("HTTP server error: {}", e);
    }
    if let Some(task) = resp_task {
      if let Err(e) = task.await? {
        tracing::error!("RESP server error: {}", e);
      }
    }

    self.registry.close_all();
    tracing::info!("Shutdown complete");
    Ok(())
  }
}
