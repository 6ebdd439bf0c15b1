//! API request and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{AgentOutput, StopReason};
use crate::llm::TokenUsage;

/// Request to generate an artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    /// Natural-language topic
    pub topic: String,

    /// Optional model override (uses default if not specified)
    #[serde(default)]
    pub model: Option<String>,
}

/// Token usage as reported to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBody {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl From<TokenUsage> for UsageBody {
    fn from(usage: TokenUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// Aggregated result of a generation run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Session identifier; also names the workspace directory
    pub request_id: Uuid,

    /// Text produced by the model across all steps
    pub text: String,

    /// Summed token usage
    pub usage: UsageBody,

    /// Completed turns
    pub steps: usize,

    /// Whether the model finished or the step limit was hit
    pub stop_reason: StopReason,
}

impl GenerateResponse {
    pub fn from_output(request_id: Uuid, output: AgentOutput) -> Self {
        Self {
            request_id,
            text: output.text,
            usage: output.usage.into(),
            steps: output.steps,
            stop_reason: output.stop_reason,
        }
    }
}

/// Error payload returned on failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Human-readable message
    pub error: String,

    /// Underlying cause, when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}
