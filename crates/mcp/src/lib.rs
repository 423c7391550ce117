//! Tool server client for the Model Context Protocol over stdio.
//!
//! Each configured server is launched as a child process. Requests and
//! responses are newline-delimited JSON-RPC 2.0 messages on its stdin/stdout.
//! [`McpServer`] implements [`corvid_core::ToolServer`], so the agent's
//! registry treats it like any other tool source.

pub mod connection;
pub mod protocol;
pub mod server;

pub use connection::McpConnection;
pub use server::McpServer;
