//! Response formatting
//!
//! Renders the agent's content blocks as human-readable lines and picks
//! the final answer out of them.

use super::content::{ContentBlock, ToolResult};

/// Reasoning traces longer than this many characters are truncated
const REASONING_PREVIEW_CHARS: usize = 100;

/// Render one block. Never fails.
pub fn format_block(block: &ContentBlock) -> String {
    match block {
        ContentBlock::Text { text } => text.clone(),
        ContentBlock::ToolUse { tool_use } => {
            format!("[tool call] {} (input: {})", tool_use.name, tool_use.input)
        }
        ContentBlock::ToolResult { tool_result } => format_tool_result(tool_result),
        ContentBlock::Reasoning { reasoning } => {
            let text = reasoning
                .reasoning_text
                .as_ref()
                .map(|r| r.text.as_str())
                .unwrap_or("");
            format!("[reasoning] {}", truncate(text, REASONING_PREVIEW_CHARS))
        }
        ContentBlock::Other(value) => value.to_string(),
    }
}

fn format_tool_result(result: &ToolResult) -> String {
    let status = result.status.as_deref().unwrap_or("unknown");
    let content = result
        .content
        .iter()
        .map(|item| item.render())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[tool result] {}: {}", status, content)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Render every block, in order
pub fn format_all(blocks: &[ContentBlock]) -> Vec<String> {
    blocks.iter().map(format_block).collect()
}

/// Final answer: all text blocks joined by newlines, or the last rendered
/// block when there is no text at all.
pub fn extract_text(blocks: &[ContentBlock]) -> String {
    let texts: Vec<&str> = blocks.iter().filter_map(ContentBlock::as_text).collect();
    if !texts.is_empty() {
        return texts.join("\n");
    }

    blocks.last().map(format_block).unwrap_or_default()
}
