//! Backend proxy clients.
//!
//! `ToolBoxClient` and `McpProxyClient` are the seams the dispatchers call
//! through. The HTTP implementations post JSON to the agent-operator proxy
//! service and enforce the timeout stamped on each request.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use ontoact_core::config::BackendConfig;

use crate::dispatch::{ExecutionContext, McpRequest, ToolRequest};
use crate::error::DispatchError;

/// Invokes a tool through the tool-box proxy.
#[async_trait]
pub trait ToolBoxClient: Send + Sync {
    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        box_id: &str,
        tool_id: &str,
        request: &ToolRequest,
    ) -> Result<Value, DispatchError>;
}

/// Invokes a tool on an MCP server through the MCP proxy.
#[async_trait]
pub trait McpProxyClient: Send + Sync {
    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        mcp_id: &str,
        request: &McpRequest,
    ) -> Result<Value, DispatchError>;
}

fn user_agent() -> String {
    format!("ontoact/{}", env!("CARGO_PKG_VERSION"))
}

/// Base client with shared defaults. Request timeouts are applied per call.
fn build_client(connect_timeout: Duration) -> Result<reqwest::Client, DispatchError> {
    reqwest::Client::builder()
        .user_agent(user_agent())
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| DispatchError::Backend(format!("Failed to build HTTP client: {}", e)))
}

fn attribute(mut req: reqwest::RequestBuilder, ctx: &ExecutionContext) -> reqwest::RequestBuilder {
    for (name, value) in ctx.headers() {
        req = req.header(name, value);
    }
    req
}

/// Decode a proxy response. Non-2xx statuses become backend errors carrying
/// the status and body; a non-JSON body is returned as a string.
async fn read_response(resp: reqwest::Response) -> Result<Value, DispatchError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| DispatchError::Backend(format!("Failed to read response: {}", e)))?;

    if !status.is_success() {
        return Err(DispatchError::Backend(format!(
            "HTTP {}: {}",
            status.as_u16(),
            body
        )));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
}

fn send_error(err: reqwest::Error) -> DispatchError {
    if err.is_timeout() {
        DispatchError::Backend(format!("request timed out: {}", err))
    } else {
        DispatchError::Backend(format!("request failed: {}", err))
    }
}

// =============================================================================
// Tool-box proxy
// =============================================================================

/// HTTP client for `{base}/tool-box/{box_id}/proxy/{tool_id}`.
pub struct HttpToolBoxClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpToolBoxClient {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, DispatchError> {
        Ok(Self {
            client: build_client(connect_timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, DispatchError> {
        Self::new(
            &config.toolbox_base_url,
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    fn url(&self, box_id: &str, tool_id: &str) -> String {
        format!("{}/tool-box/{}/proxy/{}", self.base_url, box_id, tool_id)
    }
}

#[async_trait]
impl ToolBoxClient for HttpToolBoxClient {
    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        box_id: &str,
        tool_id: &str,
        request: &ToolRequest,
    ) -> Result<Value, DispatchError> {
        let url = self.url(box_id, tool_id);
        debug!(url = %url, "POST tool proxy");

        let req = self
            .client
            .post(&url)
            .timeout(request.timeout())
            .json(request);
        let resp = attribute(req, ctx).send().await.map_err(send_error)?;
        read_response(resp).await
    }
}

// =============================================================================
// MCP proxy
// =============================================================================

/// HTTP client for `{base}/mcp/proxy/{mcp_id}/tool/call`.
pub struct HttpMcpProxyClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMcpProxyClient {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, DispatchError> {
        Ok(Self {
            client: build_client(connect_timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, DispatchError> {
        Self::new(
            &config.mcp_proxy_base_url,
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    fn url(&self, mcp_id: &str) -> String {
        format!("{}/mcp/proxy/{}/tool/call", self.base_url, mcp_id)
    }
}

#[async_trait]
impl McpProxyClient for HttpMcpProxyClient {
    async fn invoke(
        &self,
        ctx: &ExecutionContext,
        mcp_id: &str,
        request: &McpRequest,
    ) -> Result<Value, DispatchError> {
        let url = self.url(mcp_id);
        debug!(url = %url, tool_name = %request.tool_name, "POST MCP proxy");

        let req = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .json(request);
        let resp = attribute(req, ctx).send().await.map_err(send_error)?;
        read_response(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontoact_core::types::AccountInfo;
    use serde_json::{json, Map};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP response and hand back the raw request text.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if buf.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::from_executor(&AccountInfo::new("u-42", "user"))
    }

    #[test]
    fn test_urls_trim_trailing_slash() {
        let tool = HttpToolBoxClient::new("http://svc/api/", Duration::from_secs(3)).unwrap();
        assert_eq!(tool.url("b1", "t1"), "http://svc/api/tool-box/b1/proxy/t1");

        let mcp = HttpMcpProxyClient::new("http://svc/api", Duration::from_secs(3)).unwrap();
        assert_eq!(mcp.url("m1"), "http://svc/api/mcp/proxy/m1/tool/call");
    }

    #[test]
    fn test_from_default_config() {
        let config = BackendConfig::default();
        assert!(HttpToolBoxClient::from_config(&config).is_ok());
        assert!(HttpMcpProxyClient::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_tool_call_posts_buckets_with_attribution() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", r#"{"status":"ok"}"#).await;
        let client = HttpToolBoxClient::new(&base, Duration::from_secs(3)).unwrap();

        let mut request = ToolRequest {
            timeout_secs: 5,
            ..ToolRequest::default()
        };
        request.query.insert("ns".to_string(), json!("default"));

        let result = client.invoke(&ctx(), "b1", "t1", &request).await.unwrap();
        assert_eq!(result, json!({"status": "ok"}));

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /tool-box/b1/proxy/t1 HTTP/1.1"));
        let lower = raw.to_ascii_lowercase();
        assert!(lower.contains("user_id: u-42"));
        assert!(lower.contains("x-account-type: user"));
        assert!(raw.contains(r#""query":{"ns":"default"}"#));
        assert!(raw.contains(r#""timeout":5"#));
    }

    #[tokio::test]
    async fn test_mcp_call_posts_tool_name_and_parameters() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", r#"{"content":[]}"#).await;
        let client = HttpMcpProxyClient::new(&base, Duration::from_secs(3)).unwrap();

        let mut params = Map::new();
        params.insert("replicas".to_string(), json!(2));
        let request = McpRequest::new("scale", params, Duration::from_secs(5));

        let result = client.invoke(&ctx(), "m1", &request).await.unwrap();
        assert_eq!(result, json!({"content": []}));

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /mcp/proxy/m1/tool/call HTTP/1.1"));
        assert!(raw.contains(r#""tool_name":"scale""#));
        assert!(raw.contains(r#""parameters":{"replicas":2}"#));
    }

    #[tokio::test]
    async fn test_non_success_status_is_backend_error() {
        let (base, server) =
            serve_once("HTTP/1.1 500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let client = HttpMcpProxyClient::new(&base, Duration::from_secs(3)).unwrap();
        let request = McpRequest::new("scale", Map::new(), Duration::from_secs(5));

        let err = client.invoke(&ctx(), "m1", &request).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("HTTP 500"));
        assert!(msg.contains("boom"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_json_body_returned_as_string() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", "restarted").await;
        let client = HttpToolBoxClient::new(&base, Duration::from_secs(3)).unwrap();
        let request = ToolRequest {
            timeout_secs: 5,
            ..ToolRequest::default()
        };
        let result = client.invoke(&ctx(), "b1", "t1", &request).await.unwrap();
        assert_eq!(result, json!("restarted"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_backend_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            HttpToolBoxClient::new(&format!("http://{}", addr), Duration::from_secs(1)).unwrap();
        let request = ToolRequest {
            timeout_secs: 2,
            ..ToolRequest::default()
        };
        let err = client.invoke(&ctx(), "b1", "t1", &request).await.unwrap_err();
        assert!(matches!(err, DispatchError::Backend(_)));
    }
}
