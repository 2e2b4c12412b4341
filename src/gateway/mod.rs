//! Gateway module - remote tool sessions
//!
//! A [`ToolSession`] is opened against the tool gateway with a bearer
//! token, lists the tool catalog, executes tool calls for the agent, and
//! is closed on every exit path of the unit of work that opened it.
//!
//! [`with_session`] is the only supported way to scope a session: it
//! closes explicitly after the work finishes and falls back to a drop
//! guard when the work panics or the outer future is cancelled.

pub mod mcp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::AccessToken;

pub use mcp::{McpConnector, McpSession};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid gateway URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("gateway returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("gateway protocol error: {0}")]
    Protocol(String),

    #[error("tool session is closed")]
    Closed,
}

impl GatewayError {
    /// True for failures scoped to a single tool call; the session itself is still usable
    pub fn is_tool_level(&self) -> bool {
        matches!(self, GatewayError::Rpc { .. })
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

/// A remotely defined tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the tool's arguments
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object"})
}

/// Raw result of a remote tool call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// Content items as returned by the gateway
    pub content: Vec<Value>,
    pub is_error: bool,
}

/// An open session against the tool gateway
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Fetch the complete tool catalog
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, GatewayError>;

    /// Release the session. Idempotent.
    async fn close(&self) -> Result<(), GatewayError>;
}

/// Opens sessions; the token is consumed by the session it opens
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        gateway_url: &str,
        token: AccessToken,
    ) -> Result<Arc<dyn ToolSession>, GatewayError>;
}

/// Open a session, run `work` with it, and close it on every exit path.
pub async fn with_session<T, F, Fut>(
    connector: &dyn SessionConnector,
    gateway_url: &str,
    token: AccessToken,
    work: F,
) -> crate::Result<T>
where
    F: FnOnce(Arc<dyn ToolSession>) -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let session = connector.connect(gateway_url, token).await?;
    tracing::info!("Tool session opened against {}", gateway_url);

    let mut guard = SessionGuard::new(session.clone());
    let result = work(session).await;
    guard.close().await;

    result
}

/// Closes the session when dropped without an explicit close
struct SessionGuard {
    session: Option<Arc<dyn ToolSession>>,
}

impl SessionGuard {
    fn new(session: Arc<dyn ToolSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// Disarms only once the close has run to completion
    async fn close(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        match session.close().await {
            Ok(()) => tracing::debug!("Tool session closed"),
            Err(e) => tracing::warn!("Failed to close tool session: {}", e),
        }
        self.session = None;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Tool session abandoned mid-flight, closing in background");
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        tracing::warn!("Failed to close abandoned tool session: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("No async runtime available; tool session left open"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::spies::{time_tool, SpyConnector};
    use super::*;
    use crate::error::Error;
    use std::time::Duration;

    const URL: &str = "https://gateway.example.com/mcp";

    #[tokio::test]
    async fn test_session_closed_after_success() {
        let connector = SpyConnector::new(vec![time_tool()]);

        let names = with_session(&connector, URL, AccessToken::for_tests("t"), |session| async move {
            let tools = session.list_tools().await?;
            Ok(tools.into_iter().map(|t| t.name).collect::<Vec<_>>())
        })
        .await
        .unwrap();

        assert_eq!(names, vec!["lambda-function-target___get-current-time"]);
        assert_eq!(connector.opens(), 1);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_session_closed_when_listing_fails() {
        let connector = SpyConnector::failing_list();

        let result: crate::Result<usize> =
            with_session(&connector, URL, AccessToken::for_tests("t"), |session| async move {
                Ok(session.list_tools().await?.len())
            })
            .await;

        assert!(matches!(result, Err(Error::Gateway(GatewayError::Transport(_)))));
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_session_closed_when_work_fails() {
        let connector = SpyConnector::new(vec![time_tool()]);

        let result: crate::Result<()> =
            with_session(&connector, URL, AccessToken::for_tests("t"), |_session| async {
                Err(Error::Llm("model unavailable".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::Llm(_))));
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_never_runs_work() {
        let connector = SpyConnector::failing_connect();
        let mut ran = false;

        let result = with_session(&connector, URL, AccessToken::for_tests("t"), |_session| {
            ran = true;
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(Error::Gateway(GatewayError::Status { status: 503, .. }))));
        assert!(!ran);
        assert_eq!(connector.closes(), 0);
    }

    #[tokio::test]
    async fn test_session_closed_on_cancellation() {
        let connector = Arc::new(SpyConnector::new(vec![time_tool()]));
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();

        let task = {
            let connector = connector.clone();
            tokio::spawn(async move {
                with_session(connector.as_ref(), URL, AccessToken::for_tests("t"), move |_session| async move {
                    let _ = entered_tx.send(());
                    std::future::pending::<crate::Result<()>>().await
                })
                .await
            })
        };

        entered_rx.await.unwrap();
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), connector.closed.notified())
            .await
            .expect("session was not closed after cancellation");
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_session_closed_on_panic() {
        let connector = Arc::new(SpyConnector::new(vec![time_tool()]));

        let task = {
            let connector = connector.clone();
            tokio::spawn(async move {
                with_session(connector.as_ref(), URL, AccessToken::for_tests("t"), |_session| async {
                    if true {
                        panic!("agent blew up");
                    }
                    Ok(())
                })
                .await
            })
        };

        assert!(task.await.unwrap_err().is_panic());
        tokio::time::timeout(Duration::from_secs(1), connector.closed.notified())
            .await
            .expect("session was not closed after panic");
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_close_retried_when_cancelled_mid_close() {
        let connector = Arc::new(SpyConnector::stalling_close());

        let task = {
            let connector = connector.clone();
            tokio::spawn(async move {
                with_session(connector.as_ref(), URL, AccessToken::for_tests("t"), |_session| async {
                    Ok(())
                })
                .await
            })
        };

        connector.closing.notified().await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), connector.closed.notified())
            .await
            .expect("interrupted close was not retried");
        assert_eq!(connector.closes(), 2);
    }

    #[test]
    fn test_tool_descriptor_defaults_schema() {
        let tool: ToolDescriptor = serde_json::from_value(serde_json::json!({"name": "ping"})).unwrap();
        assert_eq!(tool.input_schema, serde_json::json!({"type": "object"}));
        assert!(tool.description.is_none());
    }

    #[test]
    fn test_only_rpc_errors_are_tool_level() {
        assert!(GatewayError::Rpc { code: 1, message: String::new() }.is_tool_level());
        assert!(!GatewayError::Transport(String::new()).is_tool_level());
        assert!(!GatewayError::Closed.is_tool_level());
    }
}
