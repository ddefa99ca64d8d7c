//! Model Context Protocol surface
//!
//! Exposes the identify pipeline and the regulations QA service as MCP tools
//! over stdio, for assistants that speak MCP instead of HTTP.

pub mod server;

pub use server::{VerifaceMcpServer, start_stdio_server};
