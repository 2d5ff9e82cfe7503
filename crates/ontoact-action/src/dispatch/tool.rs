//! Tool-box dispatch.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use ontoact_core::action::{ParamSource, Parameter};

use crate::client::ToolBoxClient;
use crate::dispatch::ExecutionContext;
use crate::error::DispatchError;

/// Timeout stamped on every tool call.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// An HTTP-shaped tool call, one map per request bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolRequest {
    pub header: Map<String, Value>,
    pub query: Map<String, Value>,
    pub body: Map<String, Value>,
    pub path: Map<String, Value>,
    #[serde(rename = "timeout")]
    pub timeout_secs: u64,
}

impl ToolRequest {
    /// Route bound values into buckets.
    ///
    /// With no declared parameters every bound value goes to `body`.
    /// Otherwise each declared parameter lands in the bucket its `source`
    /// names; null or unbound values are not sent.
    pub fn build(declared: &[Parameter], mut params: Map<String, Value>, timeout: Duration) -> Self {
        let mut request = ToolRequest {
            timeout_secs: timeout.as_secs(),
            ..ToolRequest::default()
        };

        if declared.is_empty() {
            request.body = params;
            return request;
        }

        for param in declared {
            let Some(value) = params.remove(&param.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let bucket = match param.param_source() {
                ParamSource::Header => &mut request.header,
                ParamSource::Query => &mut request.query,
                ParamSource::Body => &mut request.body,
                ParamSource::Path => &mut request.path,
            };
            bucket.insert(param.name.clone(), value);
        }

        request
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Both identifiers are required before any call is made.
pub fn validate(box_id: &str, tool_id: &str) -> Result<(), DispatchError> {
    if box_id.is_empty() {
        return Err(DispatchError::Validation(
            "box_id is required for tool actions".to_string(),
        ));
    }
    if tool_id.is_empty() {
        return Err(DispatchError::Validation(
            "tool_id is required for tool actions".to_string(),
        ));
    }
    Ok(())
}

/// Call a tool through the tool-box proxy.
pub async fn execute_tool(
    client: &dyn ToolBoxClient,
    ctx: &ExecutionContext,
    box_id: &str,
    tool_id: &str,
    request: &ToolRequest,
) -> Result<Value, DispatchError> {
    validate(box_id, tool_id)?;
    debug!(box_id = %box_id, tool_id = %tool_id, "Executing tool");

    client
        .invoke(ctx, box_id, tool_id, request)
        .await
        .map_err(|e| match e {
            DispatchError::Backend(msg) => {
                DispatchError::Backend(format!("tool {}/{}: {}", box_id, tool_id, msg))
            }
            other => other,
        })
}
