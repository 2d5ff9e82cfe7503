//! MCP proxy dispatch.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::McpProxyClient;
use crate::dispatch::ExecutionContext;
use crate::error::DispatchError;

/// Timeout stamped on every MCP tool call.
pub const MCP_TIMEOUT: Duration = Duration::from_secs(60);

/// An MCP tool call. Parameters are forwarded as bound, with no buckets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct McpRequest {
    pub tool_name: String,
    pub parameters: Map<String, Value>,
    #[serde(skip)]
    pub timeout: Duration,
}

impl McpRequest {
    pub fn new(tool_name: &str, parameters: Map<String, Value>, timeout: Duration) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            parameters,
            timeout,
        }
    }
}

/// The tool to call: `tool_name`, or `tool_id` when the name is empty.
pub fn resolve_tool_name<'a>(tool_name: &'a str, tool_id: &'a str) -> &'a str {
    if tool_name.is_empty() {
        tool_id
    } else {
        tool_name
    }
}

pub fn validate(mcp_id: &str) -> Result<(), DispatchError> {
    if mcp_id.is_empty() {
        return Err(DispatchError::Validation(
            "mcp_id is required for MCP actions".to_string(),
        ));
    }
    Ok(())
}

/// Call a tool through the MCP proxy.
pub async fn execute_mcp(
    client: &dyn McpProxyClient,
    ctx: &ExecutionContext,
    mcp_id: &str,
    request: &McpRequest,
) -> Result<Value, DispatchError> {
    validate(mcp_id)?;
    debug!(mcp_id = %mcp_id, tool_name = %request.tool_name, "Executing MCP tool");

    client
        .invoke(ctx, mcp_id, request)
        .await
        .map_err(|e| match e {
            DispatchError::Backend(msg) => DispatchError::Backend(format!(
                "mcp {}/{}: {}",
                mcp_id, request.tool_name, msg
            )),
            other => other,
        })
}
