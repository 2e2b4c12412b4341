//! MCP client over streamable HTTP
//!
//! Every JSON-RPC message is POSTed to the gateway URL with the bearer
//! token. The server answers with either a plain JSON body or a
//! `text/event-stream` body whose events carry the response among any
//! server notifications.
//! A session id assigned during `initialize` is echoed on every later
//! request and released with `DELETE` on close.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use url::Url;

use super::{GatewayError, SessionConnector, ToolDescriptor, ToolOutput, ToolSession};
use crate::auth::AccessToken;

const PROTOCOL_VERSION: &str = "2025-06-18";
const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_HEADER: &str = "mcp-protocol-version";

/// Opens MCP sessions against a streamable-HTTP endpoint
#[derive(Clone, Default)]
pub struct McpConnector {
    http_client: Client,
}

impl McpConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionConnector for McpConnector {
    async fn connect(
        &self,
        gateway_url: &str,
        token: AccessToken,
    ) -> Result<Arc<dyn ToolSession>, GatewayError> {
        let session = McpSession::open(self.http_client.clone(), gateway_url, token).await?;
        Ok(Arc::new(session))
    }
}

/// One initialised MCP session
pub struct McpSession {
    http_client: Client,
    url: Url,
    token: AccessToken,
    session_id: Mutex<Option<String>>,
    protocol_version: Mutex<Option<String>>,
    id_counter: AtomicU64,
    closed: AtomicBool,
}

impl McpSession {
    /// Connect and run the `initialize` handshake
    pub async fn open(http_client: Client, gateway_url: &str, token: AccessToken) -> Result<Self, GatewayError> {
        let url = Url::parse(gateway_url).map_err(|e| GatewayError::InvalidUrl {
            url: gateway_url.to_string(),
            reason: e.to_string(),
        })?;

        let session = Self {
            http_client,
            url,
            token,
            session_id: Mutex::new(None),
            protocol_version: Mutex::new(None),
            id_counter: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        };

        if let Err(e) = session.initialize().await {
            // The server may already have assigned a session id
            if let Err(close_err) = session.close().await {
                debug!("Failed to release half-open session: {}", close_err);
            }
            return Err(e);
        }

        Ok(session)
    }

    pub fn session_id(&self) -> Option<String> {
        lock(&self.session_id).clone()
    }

    async fn initialize(&self) -> Result<(), GatewayError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result = self.send_request("initialize", params).await?;

        let negotiated = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION)
            .to_string();
        debug!("MCP protocol version {}", negotiated);
        *lock(&self.protocol_version) = Some(negotiated);

        self.send_notification("notifications/initialized", json!({})).await
    }

    fn next_id(&self) -> u64 {
        self.id_counter.fetch_add(1, Ordering::SeqCst)
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let id = self.next_id();
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });

        let message = self
            .post(&payload, Some(id))
            .await?
            .ok_or_else(|| GatewayError::Protocol(format!("no response to '{method}'")))?;

        if let Some(error) = message.get("error") {
            return Err(GatewayError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-32000),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        message
            .get("result")
            .cloned()
            .ok_or_else(|| GatewayError::Protocol(format!("response to '{method}' has no result")))
    }

    async fn send_notification(&self, method: &str, params: Value) -> Result<(), GatewayError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params
        });
        self.post(&payload, None).await.map(|_| ())
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut builder = self
            .http_client
            .request(method, self.url.clone())
            .header(AUTHORIZATION, self.token.bearer_header());

        if let Some(id) = lock(&self.session_id).as_deref() {
            builder = builder.header(SESSION_HEADER, id);
        }
        if let Some(version) = lock(&self.protocol_version).as_deref() {
            builder = builder.header(PROTOCOL_HEADER, version);
        }
        builder
    }

    /// POST one message; returns the matching response when `expect_id` is set
    async fn post(&self, payload: &Value, expect_id: Option<u64>) -> Result<Option<Value>, GatewayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Closed);
        }

        let response = self
            .request(reqwest::Method::POST)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(payload)
            .send()
            .await?;

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *lock(&self.session_id) = Some(id.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let Some(id) = expect_id else {
            return Ok(None);
        };

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if !is_event_stream {
            let body = response.text().await?;
            return serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| GatewayError::Protocol(format!("invalid JSON response: {e}")));
        }

        let mut events = std::pin::pin!(response.bytes_stream().eventsource());
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| GatewayError::Protocol(format!("invalid event stream: {e}")))?;
            if event.data.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&event.data) {
                Ok(message) if id_matches(&message, id) => return Ok(Some(message)),
                Ok(message) => debug!(
                    "Skipping event {:?}",
                    message.get("method").and_then(serde_json::Value::as_str).unwrap_or("response")
                ),
                Err(e) => warn!("Skipping non-JSON event data: {}", e),
            }
        }

        Err(GatewayError::Protocol(format!("event stream ended without response {id}")))
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) || lock(&self.session_id).is_none() {
            return;
        }

        // Dropped mid-handshake or mid-close: release the session in the background
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available to release MCP session");
            return;
        };
        let request = self.request(reqwest::Method::DELETE);
        handle.spawn(async move {
            if let Err(e) = request.send().await {
                debug!("Failed to release dropped session: {}", e);
            }
        });
    }
}

#[async_trait]
impl ToolSession for McpSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError> {
        let result = self.send_request("tools/list", json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
        let tools: Vec<ToolDescriptor> = serde_json::from_value(tools)
            .map_err(|e| GatewayError::Protocol(format!("invalid tool list: {e}")))?;

        info!(
            "Available tools: {:?}",
            tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
        );
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, GatewayError> {
        let params = json!({
            "name": name,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            }
        });
        let result = self.send_request("tools/call", params).await?;

        let content = result
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);

        Ok(ToolOutput { content, is_error })
    }

    async fn close(&self) -> Result<(), GatewayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        if lock(&self.session_id).is_none() {
            self.closed.store(true, Ordering::SeqCst);
            return Ok(());
        }

        // Only a completed attempt counts as closed; a cancelled one is retried on drop
        let sent = self.request(reqwest::Method::DELETE).send().await;
        self.closed.store(true, Ordering::SeqCst);
        let response = sent?;
        match response.status() {
            // Servers that do not support explicit termination answer 405
            status if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            status => {
                warn!("Session termination returned HTTP {}", status);
                Err(GatewayError::Status {
                    status: status.as_u16(),
                    body: response.text().await.unwrap_or_default(),
                })
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn id_matches(message: &Value, id: u64) -> bool {
    match message.get("id") {
        Some(Value::Number(n)) => n.as_u64() == Some(id),
        Some(Value::String(s)) => s == &id.to_string(),
        _ => false,
    }
}
