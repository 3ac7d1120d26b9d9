//! MCP tool surface for the debug session

pub mod dap_tools;
pub mod types;

pub use dap_tools::DapDebugToolHandler;
pub use types::*;
