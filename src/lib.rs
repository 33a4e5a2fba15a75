//! Hierarchical in-memory JSON cache with triggers, a small command
//! language and Redis/REST front ends.

// Core engine
pub mod backup;
pub mod cache;
pub mod command;
pub mod config;
pub mod document;
pub mod error;
pub mod path;
pub mod registry;
pub mod timer;

// Network surfaces (only compiled with server feature)
#[cfg(feature = "server")]
pub mod http;
#[cfg(feature = "server")]
pub mod resp;
#[cfg(feature = "server")]
pub mod server;

pub use cache::{Cache, CacheGuard, Trigger};
pub use command::{Command, ExecContext};
pub use config::Config;
pub use error::{CacheError, ErrorKind, Result};
pub use registry::Registry;
