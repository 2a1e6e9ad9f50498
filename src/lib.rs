//! AytchMCP - Model Context Protocol server
//!
//! Exposes resources, tools and prompts to MCP clients and routes model calls
//! made by those capabilities to one of several interchangeable LLM provider
//! backends.

pub mod capability;
pub mod config;
pub mod error;
pub mod mcp;
pub mod prompts;
pub mod providers;
pub mod resources;
pub mod startup;
pub mod tools;

pub use config::Config;
pub use error::{AytchError, Result};
pub use mcp::McpServer;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default server host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port
pub const DEFAULT_PORT: u16 = 8000;
