//! DAP Debug MCP Server
//!
//! A Model Context Protocol server that drives Delve's Debug Adapter Protocol
//! server. Each MCP tool call is one synchronous debugging operation; underneath,
//! requests, responses and events are multiplexed over a single TCP connection.

pub mod config;
pub mod dap;
pub mod error;
pub mod session;
pub mod tools;

pub use config::{Args, Config};
pub use error::{DebugError, Result, TransportError};
pub use session::{SessionController, SessionSettings, SessionState};
pub use tools::DapDebugToolHandler;
