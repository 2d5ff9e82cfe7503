//! Backend dispatch.
//!
//! Translates a bound parameter map plus an action source into a tool-box or
//! MCP proxy call. Dispatchers only stamp the timeout on the request;
//! enforcing it is the client's job.

pub mod mcp;
pub mod tool;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use ontoact_core::action::{ActionSource, ActionType};
use ontoact_core::config::BackendConfig;
use ontoact_core::types::AccountInfo;

use crate::client::{HttpMcpProxyClient, HttpToolBoxClient, McpProxyClient, ToolBoxClient};
use crate::error::DispatchError;

pub use mcp::{McpRequest, MCP_TIMEOUT};
pub use tool::{ToolRequest, TOOL_TIMEOUT};

/// Header carrying the executor's account id.
pub const HEADER_USER_ID: &str = "user_id";
/// Header carrying the executor's account type.
pub const HEADER_ACCOUNT_TYPE: &str = "x-account-type";

/// Attribution for calls made by a detached worker.
///
/// Rebuilt from the executor persisted on the execution record, never taken
/// from the submitting request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    pub account: AccountInfo,
}

impl ExecutionContext {
    pub fn from_executor(executor: &AccountInfo) -> Self {
        Self {
            account: executor.clone(),
        }
    }

    /// Attribution headers; blank values are left out.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(2);
        if !self.account.id.is_empty() {
            headers.push((HEADER_USER_ID, self.account.id.clone()));
        }
        if !self.account.account_type.is_empty() {
            headers.push((HEADER_ACCOUNT_TYPE, self.account.account_type.clone()));
        }
        headers
    }
}

/// Check the identifiers an action source needs before any call is made.
pub fn validate_source(source: &ActionSource) -> Result<(), DispatchError> {
    match source {
        ActionSource::Tool { box_id, tool_id } => tool::validate(box_id, tool_id),
        ActionSource::Mcp { mcp_id, .. } => mcp::validate(mcp_id),
    }
}

/// Routes each object's call to the backend named by the action source.
pub struct Dispatcher {
    tool_client: Option<Arc<dyn ToolBoxClient>>,
    mcp_client: Option<Arc<dyn McpProxyClient>>,
    tool_timeout: Duration,
    mcp_timeout: Duration,
}

impl Dispatcher {
    /// A dispatcher with no backends attached and the default timeouts.
    pub fn new() -> Self {
        Self {
            tool_client: None,
            mcp_client: None,
            tool_timeout: TOOL_TIMEOUT,
            mcp_timeout: MCP_TIMEOUT,
        }
    }

    /// HTTP clients for both backends, configured from `[backends]`.
    pub fn from_config(config: &BackendConfig) -> Result<Self, DispatchError> {
        let tool = HttpToolBoxClient::from_config(config)?;
        let mcp = HttpMcpProxyClient::from_config(config)?;
        Ok(Self::new()
            .with_tool_client(Arc::new(tool))
            .with_mcp_client(Arc::new(mcp))
            .with_timeouts(
                Duration::from_secs(config.tool_timeout_secs),
                Duration::from_secs(config.mcp_timeout_secs),
            ))
    }

    pub fn with_tool_client(mut self, client: Arc<dyn ToolBoxClient>) -> Self {
        self.tool_client = Some(client);
        self
    }

    pub fn with_mcp_client(mut self, client: Arc<dyn McpProxyClient>) -> Self {
        self.mcp_client = Some(client);
        self
    }

    pub fn with_timeouts(mut self, tool_timeout: Duration, mcp_timeout: Duration) -> Self {
        self.tool_timeout = tool_timeout;
        self.mcp_timeout = mcp_timeout;
        self
    }

    /// Run the action for one object with its bound parameters.
    pub async fn dispatch(
        &self,
        ctx: &ExecutionContext,
        action_type: &ActionType,
        params: Map<String, Value>,
    ) -> Result<Value, DispatchError> {
        match &action_type.action_source {
            ActionSource::Tool { box_id, tool_id } => {
                tool::validate(box_id, tool_id)?;
                let client = self.tool_client.as_deref().ok_or_else(|| {
                    DispatchError::UnsupportedSource("no tool-box client configured".to_string())
                })?;
                let request = ToolRequest::build(&action_type.parameters, params, self.tool_timeout);
                tool::execute_tool(client, ctx, box_id, tool_id, &request).await
            }
            ActionSource::Mcp {
                mcp_id,
                tool_name,
                tool_id,
            } => {
                mcp::validate(mcp_id)?;
                let client = self.mcp_client.as_deref().ok_or_else(|| {
                    DispatchError::UnsupportedSource("no MCP proxy client configured".to_string())
                })?;
                let request = McpRequest::new(
                    mcp::resolve_tool_name(tool_name, tool_id),
                    params,
                    self.mcp_timeout,
                );
                mcp::execute_mcp(client, ctx, mcp_id, &request).await
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
