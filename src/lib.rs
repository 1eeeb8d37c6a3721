//! Toolgate Library
//!
//! A uniform execution runtime for heterogeneous tool adapters, served over
//! the Model Context Protocol (MCP). Every call is validated against the
//! tool's schema, served from a TTL cache when possible, rate limited per
//! tool, executed under a timeout, and returned as a normalized result.
//!
//! # Architecture
//!
//! - **core**: Configuration, error handling, the MCP server and transports
//! - **domains**: Business logic organized by bounded contexts
//!   - **tools**: Tool contract, registry, dispatcher and built-in tools
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::{Map, json};
//! use toolgate::{Config, McpServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServer::new(Config::from_env())?;
//!
//!     let mut arguments = Map::new();
//!     arguments.insert("text".into(), json!("Hello there. General Kenobi!"));
//!     let result = server.dispatcher().invoke("text_stats", arguments).await;
//!     println!("{}", result.to_envelope());
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod domains;

// Re-export commonly used types for convenience
pub use core::{Config, Error, McpServer, Result};
pub use domains::tools::{Dispatcher, ErrorKind, ExecutionResult, ToolDefinition, ToolRegistry};
