use serde::Serialize;

use crate::llm::TokenUsage;

/// Progress events emitted by a streaming agent run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Text content being streamed by the model.
    TextDelta { delta: String },
    /// The model requested a tool call.
    ToolCall {
        step: usize,
        id: String,
        name: String,
        arguments: String,
    },
    /// A tool call finished.
    ToolResult {
        step: usize,
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    /// A turn completed; `usage` is the running total.
    StepComplete { step: usize, usage: TokenUsage },
}

impl AgentEvent {
    /// SSE event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            AgentEvent::TextDelta { .. } => "text",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::StepComplete { .. } => "step",
        }
    }
}
