//! Redis-compatible (RESP2) surface over the cache registry
//!
//! Redis keys are mapped onto cache paths (`user:1:name` → `user/1/name`
//! in translate mode), hashes are mappings and lists are arrays.

mod commands;
pub mod mapper;
pub mod protocol;
pub mod server;
pub mod session;

pub use commands::execute_command;
pub use mapper::to_resp;
pub use protocol::{extract_command, parse_resp, RespError, RespParser, RespValue};
pub use server::{RespConfig, RespServer};
pub use session::Session;
