//! Content blocks exchanged with the model
//!
//! Wire shape (one key per block):
//! `{"text": ..}`, `{"toolUse": {..}}`, `{"toolResult": {..}}`,
//! `{"reasoningContent": {"reasoningText": {..}}}`. Anything else is kept
//! verbatim as [`ContentBlock::Other`], so decoding a block never fails.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(rename = "toolUse")]
        tool_use: ToolUse,
    },
    ToolResult {
        #[serde(rename = "toolResult")]
        tool_result: ToolResult,
    },
    Reasoning {
        #[serde(rename = "reasoningContent")]
        reasoning: ReasoningContent,
    },
    Other(Value),
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUse {
    #[serde(default)]
    pub tool_use_id: String,
    pub name: String,
    #[serde(default = "empty_input")]
    pub input: Value,
    /// Opaque provider signature that must accompany the call when replayed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

fn empty_input() -> Value {
    Value::Object(Default::default())
}

/// Outcome of a tool invocation, fed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    #[serde(default)]
    pub tool_use_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub content: Vec<ToolResultContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text { text: String },
    Json { json: Value },
    Other(Value),
}

impl ToolResultContent {
    /// Map one gateway content item: `text` items stay text, the rest is JSON
    pub fn from_gateway(item: Value) -> Self {
        match item.get("text").and_then(Value::as_str) {
            Some(text) => ToolResultContent::Text {
                text: text.to_string(),
            },
            None => ToolResultContent::Json { json: item },
        }
    }

    /// Plain rendering used in tool-result summaries
    pub fn render(&self) -> String {
        match self {
            ToolResultContent::Text { text } => text.clone(),
            ToolResultContent::Json { json } => json.to_string(),
            ToolResultContent::Other(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_text: Option<ReasoningText>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReasoningText {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolUse {
            tool_use: ToolUse {
                tool_use_id: id.into(),
                name: name.into(),
                input,
                signature: None,
            },
        }
    }

    /// Attach a provider signature to a tool use; other blocks are unchanged.
    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        if let ContentBlock::ToolUse { tool_use } = &mut self {
            tool_use.signature = signature;
        }
        self
    }

    pub fn tool_result(id: impl Into<String>, status: &str, content: Vec<ToolResultContent>) -> Self {
        ContentBlock::ToolResult {
            tool_result: ToolResult {
                tool_use_id: id.into(),
                status: Some(status.to_string()),
                content,
            },
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        ContentBlock::Reasoning {
            reasoning: ReasoningContent {
                reasoning_text: Some(ReasoningText {
                    text: text.into(),
                    signature: None,
                }),
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUse> {
        match self {
            ContentBlock::ToolUse { tool_use } => Some(tool_use),
            _ => None,
        }
    }
}
