//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`] trait for swappable model backends
//! - [`GeminiClient`], the Gemini `generateContent` implementation
//!
//! Models speak in [`ContentBlock`]s in both directions, so the agent loop
//! never sees provider-specific shapes.

mod types;

pub mod gemini;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::content::{ContentBlock, ToolUse};
use crate::agent::message::Message;
use crate::gateway::ToolDescriptor;
use crate::Result;

pub use gemini::GeminiClient;

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Content blocks of the model turn.
    pub content: Vec<ContentBlock>,

    /// Reason the response finished.
    pub finish_reason: String,

    /// Token usage statistics.
    pub usage: Usage,
}

impl LlmResponse {
    /// Create a simple text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(content)],
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    /// Tool invocations requested in this turn.
    pub fn tool_uses(&self) -> Vec<&ToolUse> {
        self.content.iter().filter_map(ContentBlock::as_tool_use).collect()
    }

    #[inline]
    pub fn has_tool_calls(&self) -> bool {
        self.content.iter().any(|b| b.as_tool_use().is_some())
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// LLM client trait: swappable provider abstraction.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send the conversation and tool catalog, get the next model turn.
    async fn chat(
        &self,
        system: Option<&str>,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<LlmResponse>;

    /// Get the model this client talks to.
    fn default_model(&self) -> &str;
}

#[async_trait]
impl<C: LlmClient + ?Sized> LlmClient for std::sync::Arc<C> {
    async fn chat(
        &self,
        system: Option<&str>,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<LlmResponse> {
        (**self).chat(system, messages, tools).await
    }

    fn default_model(&self) -> &str {
        (**self).default_model()
    }
}

/// Fake LLM client for testing.
#[cfg(test)]
pub struct FakeLlmClient {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<LlmResponse>>>,
    /// Every conversation the client was called with.
    pub seen: std::sync::Mutex<Vec<Vec<Message>>>,
    /// Tool names offered on each call.
    pub seen_tools: std::sync::Mutex<Vec<Vec<String>>>,
}

#[cfg(test)]
impl FakeLlmClient {
    /// Create with predefined text responses.
    pub fn new(responses: Vec<&str>) -> Self {
        Self::scripted(responses.into_iter().map(|s| Ok(LlmResponse::text(s))).collect())
    }

    /// Create from arbitrary scripted turns.
    pub fn scripted(responses: Vec<Result<LlmResponse>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
            seen: std::sync::Mutex::new(Vec::new()),
            seen_tools: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create with a single tool call followed by a text response.
    pub fn with_tool_call(name: &str, args: serde_json::Value, final_response: &str) -> Self {
        let tool_response = LlmResponse {
            content: vec![ContentBlock::tool_use("tooluse_0", name, args)],
            finish_reason: "tool_use".to_string(),
            usage: Usage::default(),
        };

        Self::scripted(vec![Ok(tool_response), Ok(LlmResponse::text(final_response))])
    }

    /// Create a client whose first call fails.
    pub fn failing(message: &str) -> Self {
        Self::scripted(vec![Err(crate::error::Error::Llm(message.to_string()))])
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn chat(
        &self,
        _system: Option<&str>,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<LlmResponse> {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.seen_tools
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.name.clone()).collect());

        let mut responses = self.responses.lock().unwrap();
        responses
            .pop_front()
            .unwrap_or_else(|| Err(crate::error::Error::Llm("No more fake responses".to_string())))
    }

    fn default_model(&self) -> &str {
        "fake-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fake_llm_client() {
        let client = FakeLlmClient::new(vec!["Hello!", "World!"]);

        let resp1 = client.chat(None, &[], &[]).await.unwrap();
        assert_eq!(resp1.content[0].as_text(), Some("Hello!"));

        let resp2 = client.chat(None, &[], &[]).await.unwrap();
        assert_eq!(resp2.content[0].as_text(), Some("World!"));

        assert!(client.chat(None, &[], &[]).await.is_err());
        assert_eq!(client.calls(), 3);
    }

    #[test]
    fn test_tool_uses() {
        let response = LlmResponse {
            content: vec![
                ContentBlock::reasoning("need the time"),
                ContentBlock::tool_use("a", "get-time", json!({})),
                ContentBlock::tool_use("b", "post", json!({})),
            ],
            finish_reason: "tool_use".to_string(),
            usage: Usage::default(),
        };
        assert!(response.has_tool_calls());
        let names: Vec<_> = response.tool_uses().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["get-time", "post"]);
        assert!(!LlmResponse::text("done").has_tool_calls());
    }

    #[test]
    fn test_usage_accumulates() {
        let mut total = Usage::default();
        total += Usage { prompt_tokens: 3, completion_tokens: 2, total_tokens: 5 };
        total += Usage { prompt_tokens: 1, completion_tokens: 1, total_tokens: 2 };
        assert_eq!(total.total_tokens, 7);
        assert_eq!(total.prompt_tokens, 4);
    }
}
