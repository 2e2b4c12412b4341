//! Agent module: core agent logic.
//!
//! This module contains:
//! - Content blocks and their text rendering
//! - Message types and the invocation payload
//! - LLM client trait and the Gemini implementation
//! - Agent loop that drives gateway tools

pub mod content;
pub mod format;
pub mod llm;
mod loop_impl;
mod message;

// Re-exports for convenience
pub use content::{ContentBlock, ToolResult, ToolResultContent, ToolUse};
pub use format::{extract_text, format_all, format_block};
pub use llm::{GeminiClient, LlmClient, LlmResponse, Usage};
pub use loop_impl::{AgentLoop, AgentResponse};
pub use message::{InvocationPayload, Message, Role, DEFAULT_PROMPT};
