//! Gemini LLM client implementation (API key authentication).

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::agent::content::{ContentBlock, ReasoningContent, ReasoningText, ToolResult};
use crate::agent::message::{Message, Role};
use crate::error::Error;
use crate::gateway::ToolDescriptor;
use crate::Result;

use super::types::{GeminiResponse, Part};
use super::{LlmClient, LlmResponse, Usage};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Schema keywords the function-declaration endpoint rejects.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties"];

/// Gemini API client using API key authentication.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl GeminiClient {
    /// Create a new Gemini client with API key.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: GEMINI_API_URL.to_string(),
            client: Client::new(),
        }
    }

    /// Point the client at another endpoint root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_url(&self) -> String {
        format!("{}/{}:generateContent?key={}", self.base_url, self.model, self.api_key)
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<Value> {
        // functionResponse parts carry the tool name, our tool results only the id
        let names: HashMap<&str, &str> = messages
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(ContentBlock::as_tool_use)
            .map(|t| (t.tool_use_id.as_str(), t.name.as_str()))
            .collect();

        messages
            .iter()
            .filter_map(|m| {
                let parts: Vec<Value> = m
                    .content
                    .iter()
                    .filter_map(|block| convert_block(block, &names))
                    .collect();
                if parts.is_empty() {
                    return None;
                }

                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                Some(json!({"role": role, "parts": parts}))
            })
            .collect()
    }

    fn convert_tools(&self, tools: &[ToolDescriptor]) -> Option<Value> {
        if tools.is_empty() {
            return None;
        }

        let function_declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description.clone().unwrap_or_default(),
                    "parameters": sanitize_schema(&t.input_schema)
                })
            })
            .collect();

        Some(json!([{
            "functionDeclarations": function_declarations
        }]))
    }

    fn parse_response(&self, response: GeminiResponse) -> Result<LlmResponse> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("No candidates in response".to_string()))?;

        let content = candidate
            .content
            .parts
            .into_iter()
            .filter_map(convert_part)
            .collect();

        let usage = response
            .usage_metadata
            .map(|u| Usage {
                prompt_tokens: u.prompt_token_count.unwrap_or(0),
                completion_tokens: u.candidates_token_count.unwrap_or(0),
                total_tokens: u.total_token_count.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            finish_reason: candidate.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }
}

fn convert_block(block: &ContentBlock, names: &HashMap<&str, &str>) -> Option<Value> {
    match block {
        ContentBlock::Text { text } => Some(json!({"text": text})),
        ContentBlock::ToolUse { tool_use } => {
            let mut part = json!({
                "functionCall": {"name": tool_use.name, "args": tool_use.input}
            });
            if let Some(signature) = &tool_use.signature {
                part["thoughtSignature"] = json!(signature);
            }
            Some(part)
        }
        ContentBlock::ToolResult { tool_result } => Some(function_response(tool_result, names)),
        // Thoughts are not replayed to the model
        ContentBlock::Reasoning { .. } | ContentBlock::Other(_) => None,
    }
}

fn function_response(result: &ToolResult, names: &HashMap<&str, &str>) -> Value {
    let name = names
        .get(result.tool_use_id.as_str())
        .copied()
        .unwrap_or("unknown");
    let content: Vec<String> = result.content.iter().map(|c| c.render()).collect();

    json!({
        "functionResponse": {
            "name": name,
            "response": {
                "status": result.status.as_deref().unwrap_or("success"),
                "content": content
            }
        }
    })
}

fn convert_part(part: Part) -> Option<ContentBlock> {
    if let Some(call) = part.function_call {
        let id = format!("tooluse_{}", uuid::Uuid::new_v4().simple());
        let args = match call.args {
            Value::Null => json!({}),
            args => args,
        };
        return Some(ContentBlock::tool_use(id, call.name, args).with_signature(part.thought_signature));
    }

    let text = part.text?;
    if part.thought {
        return Some(ContentBlock::Reasoning {
            reasoning: ReasoningContent {
                reasoning_text: Some(ReasoningText {
                    text,
                    signature: part.thought_signature,
                }),
            },
        });
    }
    Some(ContentBlock::text(text))
}

/// Strip schema keywords Gemini refuses, at every nesting level.
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), sanitize_schema(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(
        &self,
        system: Option<&str>,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<LlmResponse> {
        let mut request = json!({
            "contents": self.convert_messages(messages),
            "generationConfig": {
                "temperature": 0.7,
                "maxOutputTokens": 8192
            }
        });

        if let Some(system) = system {
            request["systemInstruction"] = json!({
                "parts": [{"text": system}]
            });
        }

        if let Some(tool_config) = self.convert_tools(tools) {
            request["tools"] = tool_config;
        }

        debug!(model = %self.model, tools = tools.len(), "calling Gemini");

        let response = self.client.post(self.build_url()).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(Error::Llm(format!("Gemini API error ({}): {}", status, error_text)));
        }

        let gemini_response: GeminiResponse = response.json().await?;
        self.parse_response(gemini_response)
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}
