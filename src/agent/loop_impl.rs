//! Agent loop - core message processing

use tracing::{debug, info, warn};

use super::content::{ContentBlock, ToolResultContent, ToolUse};
use super::llm::{LlmClient, Usage};
use super::message::Message;
use crate::error::Error;
use crate::gateway::{ToolDescriptor, ToolSession};
use crate::Result;

/// Final turn of one agent run
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// The last assistant message, the one without tool calls
    pub message: Message,
    pub usage: Usage,
    pub iterations: usize,
}

impl AgentResponse {
    pub fn content(&self) -> &[ContentBlock] {
        &self.message.content
    }
}

/// The agent loop alternates model turns and gateway tool calls until the
/// model answers without requesting a tool.
pub struct AgentLoop<C: LlmClient> {
    client: C,
    max_iterations: usize,
    system_prompt: Option<String>,
}

impl<C: LlmClient> AgentLoop<C> {
    /// Create a new agent loop
    pub fn new(client: C, max_iterations: usize, system_prompt: Option<String>) -> Self {
        Self {
            client,
            max_iterations,
            system_prompt,
        }
    }

    pub fn model(&self) -> &str {
        self.client.default_model()
    }

    /// Run the agent loop for a single prompt
    pub async fn run(
        &self,
        prompt: &str,
        tools: &[ToolDescriptor],
        session: &dyn ToolSession,
    ) -> Result<AgentResponse> {
        let mut messages = vec![Message::user(prompt)];
        let mut usage = Usage::default();

        info!(model = %self.model(), tools = tools.len(), "Starting agent loop");

        for iteration in 0..self.max_iterations {
            debug!("Iteration {}/{}", iteration + 1, self.max_iterations);

            let response = self
                .client
                .chat(self.system_prompt.as_deref(), &messages, tools)
                .await?;
            usage += response.usage;

            if !response.has_tool_calls() {
                info!(
                    iterations = iteration + 1,
                    total_tokens = usage.total_tokens,
                    "Agent completed"
                );
                return Ok(AgentResponse {
                    message: Message::assistant(response.content),
                    usage,
                    iterations: iteration + 1,
                });
            }

            let mut results = Vec::new();
            for tool_use in response.tool_uses() {
                results.push(self.execute_tool(session, tool_use).await?);
            }

            messages.push(Message::assistant(response.content));
            messages.push(Message::tool_results(results));
        }

        Err(Error::MaxIterations)
    }

    async fn execute_tool(&self, session: &dyn ToolSession, tool_use: &ToolUse) -> Result<ContentBlock> {
        debug!("Executing tool: {} with args: {}", tool_use.name, tool_use.input);

        match session.call_tool(&tool_use.name, tool_use.input.clone()).await {
            Ok(output) => {
                let status = if output.is_error { "error" } else { "success" };
                debug!("Tool {} finished with status {}", tool_use.name, status);
                let content = output.content.into_iter().map(ToolResultContent::from_gateway).collect();
                Ok(ContentBlock::tool_result(&tool_use.tool_use_id, status, content))
            }
            Err(e) if e.is_tool_level() => {
                warn!("Tool {} failed: {}", tool_use.name, e);
                Ok(ContentBlock::tool_result(
                    &tool_use.tool_use_id,
                    "error",
                    vec![ToolResultContent::Text {
                        text: format!("Error: {}", e),
                    }],
                ))
            }
            Err(e) => Err(e.into()),
        }
    }
}
