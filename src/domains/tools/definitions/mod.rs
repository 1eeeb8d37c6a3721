//! Built-in tool definitions.
//!
//! Each tool is defined in its own file. [`builtin_registry`] registers all
//! of them with their final policies: configuration overrides layered over
//! each tool's own defaults, layered over the runtime defaults.

pub mod http_fetch;
pub mod text_stats;

pub use http_fetch::{FetchResult, HttpFetchParams, HttpFetchTool};
pub use text_stats::{TextStats, TextStatsParams, TextStatsTool};

use crate::core::{Config, Error, Result};
use crate::domains::tools::contract::ToolDefinition;
use crate::domains::tools::registry::{ToolPolicy, ToolRegistry};

/// Final policy for tool `T` under `config`.
pub fn policy_for<T: ToolDefinition>(config: &Config) -> ToolPolicy {
    let base = config.runtime.base_policy();
    config.policy_for(T::NAME, T::default_policy(base))
}

/// Build the registry of built-in tools.
pub fn builtin_registry(config: &Config) -> Result<ToolRegistry> {
    let http_fetch = HttpFetchTool::new(&config.adapters.http_fetch)
        .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

    let registry = ToolRegistry::builder()
        .register(TextStatsTool::new(), policy_for::<TextStatsTool>(config))?
        .register(http_fetch, policy_for::<HttpFetchTool>(config))?
        .build();

    Ok(registry)
}
