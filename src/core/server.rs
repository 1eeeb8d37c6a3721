//! MCP server implementation and lifecycle management.
//!
//! [`McpServer`] implements the MCP `ServerHandler` by publishing the
//! registry's enabled tools and routing every `tools/call` through the
//! [`Dispatcher`]. Results travel as the `{ ok, ... }` envelope in the
//! structured content, with `isError` set on failure.

use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler, model::*, service::RequestContext,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use super::config::Config;
use super::error::Result;
use crate::domains::tools::{Dispatcher, ExecutionResult, ToolRegistry, definitions};

/// The main MCP server handler.
#[derive(Clone)]
pub struct McpServer {
    /// Server configuration.
    config: Arc<Config>,

    /// Routes tool calls through policy enforcement.
    dispatcher: Arc<Dispatcher>,
}

impl McpServer {
    /// Create a server with the built-in tools registered.
    pub fn new(config: Config) -> Result<Self> {
        let registry = definitions::builtin_registry(&config)?;
        Ok(Self::with_registry(config, registry))
    }

    /// Create a server around an already built registry.
    pub fn with_registry(config: Config, registry: ToolRegistry) -> Self {
        let dispatcher =
            Dispatcher::with_default_timeout(Arc::new(registry), config.runtime.default_timeout);
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    /// Get the server version.
    pub fn version(&self) -> &str {
        &self.config.server.version
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Start the cache sweeper if an interval is configured.
    pub fn spawn_cache_sweeper(&self, shutdown_rx: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let every = self.config.runtime.cache_sweep_interval;
        if every.is_zero() {
            return None;
        }
        Some(self.dispatcher.spawn_cache_sweeper(every, shutdown_rx))
    }

    fn instructions(&self) -> String {
        format!(
            "{} exposes {} tools. Every call returns {{ ok: true, data }} or \
             {{ ok: false, kind, message, details }} where kind is one of \
             Validation, NotFound, RateLimited, Upstream, Timeout, Internal.",
            self.name(),
            self.dispatcher.registry().list_tools().len()
        )
    }

    // ========================================================================
    // HTTP Transport Support Methods
    // ========================================================================

    /// List enabled tools as JSON (for HTTP transport).
    pub fn list_tools_json(&self) -> Vec<Value> {
        self.dispatcher
            .registry()
            .list_tools()
            .into_iter()
            .map(|t| {
                let mut tool = json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": Value::Object((*t.input_schema).clone())
                });
                if let (Some(schema), Some(obj)) = (t.output_schema, tool.as_object_mut()) {
                    obj.insert("outputSchema".to_string(), Value::Object((*schema).clone()));
                }
                tool
            })
            .collect()
    }

    /// Call a tool and render the MCP result as JSON (for HTTP transport).
    pub async fn call_tool_json(&self, name: &str, arguments: Map<String, Value>) -> Value {
        let result = self.dispatcher.invoke(name, arguments).await;
        let rendered = to_call_result(&result);
        json!({
            "content": rendered.content,
            "structuredContent": rendered.structured_content,
            "isError": rendered.is_error.unwrap_or(false)
        })
    }
}

/// Wrap a dispatcher outcome in an MCP tool result.
fn to_call_result(result: &ExecutionResult) -> CallToolResult {
    let envelope = result.to_envelope();
    let summary = match result {
        ExecutionResult::Success(data) => data.to_string(),
        ExecutionResult::Failure(failure) => failure.to_string(),
    };
    CallToolResult {
        content: vec![Content::text(summary)],
        structured_content: Some(envelope),
        is_error: Some(!result.is_success()),
        meta: None,
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(self.instructions()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.config.server.name.clone(),
                version: self.config.server.version.clone(),
                ..Implementation::from_build_env()
            },
            ..Default::default()
        }
    }

    #[instrument(skip(self, _context))]
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        info!("Listing tools");
        Ok(ListToolsResult {
            tools: self.dispatcher.registry().list_tools(),
            next_cursor: None,
            meta: None,
        })
    }

    #[instrument(skip(self, request, _context), fields(tool = %request.name))]
    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let arguments = request.arguments.unwrap_or_default();
        let result = self.dispatcher.invoke(&request.name, arguments).await;
        Ok(to_call_result(&result))
    }
}
