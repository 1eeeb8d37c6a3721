//! STDIO transport implementation.
//!
//! One MCP session over stdin/stdout. This is the default transport; logs
//! go to stderr so they never interleave with protocol frames.

use rmcp::ServiceExt;
use tracing::info;

use super::{TransportError, TransportResult};
use crate::core::McpServer;

/// STDIO transport handler.
pub struct StdioTransport;

impl StdioTransport {
    /// Serve a single session until the peer closes stdin.
    pub async fn run(server: McpServer) -> TransportResult<()> {
        let tools = server.dispatcher().registry().len();
        info!(tools, "Ready - communicating via stdin/stdout");

        let service = server
            .serve(rmcp::transport::stdio())
            .await
            .map_err(|e| TransportError::init(e.to_string()))?;

        let reason = service
            .waiting()
            .await
            .map_err(|e| TransportError::ServiceError(e.to_string()))?;

        info!(?reason, "STDIO session closed");
        Ok(())
    }
}
