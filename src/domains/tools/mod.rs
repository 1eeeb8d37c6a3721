//! Tools domain module.
//!
//! The tool execution runtime: every tool call goes through the same
//! pipeline regardless of which adapter serves it.
//!
//! ## Architecture
//!
//! - `contract.rs` - The adapter contract (typed and JSON-level)
//! - `schema.rs` / `validator.rs` - Schema model and structural validation
//! - `rate_limit.rs` - Fixed-window per-tool rate limiting
//! - `cache.rs` - TTL response cache keyed by canonical arguments
//! - `normalize.rs` - Failure taxonomy mapping and redaction
//! - `registry.rs` - Immutable table of tools and their policies
//! - `dispatcher.rs` - The invocation pipeline
//! - `definitions/` - Built-in tools (one file per tool)
//!
//! ## Adding a New Tool
//!
//! 1. Create a new file in `definitions/` (e.g., `my_tool.rs`)
//! 2. Define params and output types deriving `JsonSchema`
//! 3. Implement `ToolDefinition`, including `default_policy` if needed
//! 4. Register it in `definitions::builtin_registry`

pub mod cache;
pub mod contract;
pub mod definitions;
pub mod dispatcher;
pub mod error;
pub mod normalize;
pub mod rate_limit;
pub mod registry;
pub mod schema;
pub mod validator;

pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use contract::{AdapterFailure, ToolAdapter, ToolDefinition, TypedAdapter};
pub use dispatcher::{Dispatcher, ExecutionResult, InvocationRequest, InvocationStage};
pub use error::{AdapterError, ErrorKind, ToolFailure};
pub use normalize::{RawFailure, normalize, redact};
pub use rate_limit::{RateLimit, RateLimitExceeded, RateLimiter};
pub use registry::{RegistryBuilder, RegistryError, ToolDescriptor, ToolPolicy, ToolRegistry};
pub use schema::{ObjectSchema, Schema, SchemaError};
pub use validator::{ValidationError, validate};
