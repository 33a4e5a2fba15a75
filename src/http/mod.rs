//! REST surface under `/api/v1`
//!
//! Every cache-scoped request picks its cache with the `X-Cache-Name`
//! header (`default` when absent). The cache work itself runs on the
//! blocking pool while holding the cache's ownership token, tagged with
//! the request id.

mod admin;
mod caches;
mod commands;
pub mod error;
mod keys;
mod triggers;

pub use error::AppError;

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::cache::{Cache, CacheGuard};
use crate::command::ExecContext;
use crate::config::Config;
use crate::error::CacheError;
use crate::registry::{Registry, DEFAULT_NAME};

pub const CACHE_NAME_HEADER: &str = "x-cache-name";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
  pub registry: Registry,
  pub config: Arc<Config>,
}

impl AppState {
  pub fn new(registry: Registry, config: Config) -> Self {
    Self {
      registry,
      config: Arc::new(config),
    }
  }
}

/// Id of the current request, set by the request-id middleware
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// The cache selected by `X-Cache-Name`, plus the tag used to hold it
pub struct CacheScope {
  cache: Arc<Cache>,
  tag: String,
}

impl FromRequestParts<AppState> for CacheScope {
  type Rejection = AppError;

  async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
    let name = parts
      .headers
      .get(CACHE_NAME_HEADER)
      .and_then(|v| v.to_str().ok())
      .filter(|v| !v.is_empty())
      .unwrap_or(DEFAULT_NAME);
    let cache = state
      .registry
      .fetch_cache(name)
      .map_err(|_| AppError::CacheNotFound)?;
    let tag = parts
      .extensions
      .get::<RequestId>()
      .map(|id| id.0.clone())
      .unwrap_or_else(|| Uuid::new_v4().to_string());
    Ok(Self { cache, tag })
  }
}

impl CacheScope {
  /// Run `f` holding the cache token, bounded by the command timeout
  pub async fn run<T, F>(self, state: &AppState, operation: &'static str, f: F) -> Result<T, AppError>
  where
    T: Send + 'static,
    F: FnOnce(&mut CacheGuard<'_>, &ExecContext) -> crate::Result<T> + Send + 'static,
  {
    let timeout = state.config.command_timeout();
    let threshold = state.config.long_threshold();
    let Self { cache, tag } = self;

    let task = tokio::task::spawn_blocking(move || {
      let started = Instant::now();
      let Some(mut guard) = cache.try_acquire_for(&tag, timeout) else {
        cache.record_operation(operation, started.elapsed(), false, true, threshold);
        return Err(CacheError::Timeout);
      };
      let ctx = ExecContext::with_timeout(timeout.saturating_sub(started.elapsed()));
      let result = f(&mut guard, &ctx);
      guard.release(&tag);
      let timed_out = matches!(result, Err(CacheError::Timeout));
      cache.record_operation(operation, started.elapsed(), result.is_ok(), timed_out, threshold);
      result
    });

    match tokio::time::timeout(timeout, task).await {
      Ok(Ok(result)) => result.map_err(AppError::from),
      Ok(Err(e)) => Err(CacheError::Internal(e.to_string()).into()),
      Err(_) => Err(CacheError::Timeout.into()),
    }
  }
}

/// Reuse an inbound `X-Request-ID` or mint one, echo it and log the request
async fn request_id(mut req: Request, next: Next) -> Response {
  let id = req
    .headers()
    .get(REQUEST_ID_HEADER)
    .and_then(|v| v.to_str().ok())
    .filter(|v| !v.is_empty())
    .map(str::to_string)
    .unwrap_or_else(|| Uuid::new_v4().to_string());
  req.extensions_mut().insert(RequestId(id.clone()));

  let method = req.method().clone();
  let path = req.uri().path().to_string();
  let started = Instant::now();
  let mut response = next.run(req).await;

  if let Ok(value) = HeaderValue::from_str(&id) {
    response
      .headers_mut()
      .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
  }
  tracing::info!(
    request_id = %id,
    method = %method,
    path = %path,
    status = response.status().as_u16(),
    duration_ms = started.elapsed().as_millis() as u64,
    "HTTP request"
  );
  response
}

/// Liveness probe
async fn health_check() -> StatusCode {
  StatusCode::OK
}

pub fn router(state: AppState) -> Router {
  let api = Router::new()
    .route("/", get(|| async { "OK" }))
    .merge(keys::routes())
    .merge(commands::routes())
    .merge(triggers::routes())
    .merge(caches::routes());

  Router::new()
    .route("/healthz", get(health_check))
    .nest("/api/v1", api)
    .merge(admin::routes())
    .layer(middleware::from_fn(request_id))
    .layer(CorsLayer::permissive())
    .with_state(state)
}

/// Serve the router on `listener` until `shutdown` fires
pub async fn serve(
  listener: TcpListener,
  state: AppState,
  mut shutdown: broadcast::Receiver<()>,
) -> Result<(), anyhow::Error> {
  let app = router(state);
  axum::serve(listener, app.into_make_service())
    .with_graceful_shutdown(async move {
      let _ = shutdown.recv().await;
      tracing::info!("HTTP server shutting down");
    })
    .await?;
  Ok(())
}
