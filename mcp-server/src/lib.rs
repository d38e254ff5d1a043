// MCP front end over the dàn engine.
pub mod connection;
pub mod mcp_handler;
pub mod use_cases;

pub use connection::service;
pub use mcp_handler::{MCPHandler, stdio};
