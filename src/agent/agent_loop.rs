//! Core agent loop implementation.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::llm::{
    ChatMessage, ChatResponse, LlmClient, LlmError, OpenRouterClient, TokenUsage, ToolCall,
    ToolSchema,
};
use crate::tools::ToolRegistry;

use super::events::AgentEvent;

#[derive(Debug, Error)]
pub enum AgentError {
    /// The reasoning engine failed; the loop does not retry.
    #[error("Reasoning engine error: {0}")]
    Engine(#[from] LlmError),

    #[error("Run cancelled after {steps} completed step(s)")]
    Cancelled { steps: usize },
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting tools.
    Done,
    /// The step limit was reached first. Accumulated output is still returned.
    StepLimitExceeded,
}

/// What the model asked for on one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    FinalText(String),
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
}

impl From<ChatResponse> for TurnOutcome {
    fn from(response: ChatResponse) -> Self {
        match response.tool_calls {
            Some(calls) if !calls.is_empty() => TurnOutcome::ToolCalls {
                text: response.content.filter(|c| !c.is_empty()),
                calls,
            },
            _ => TurnOutcome::FinalText(response.content.unwrap_or_default()),
        }
    }
}

/// Aggregated result of a run.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub text: String,
    pub usage: TokenUsage,
    pub steps: usize,
    pub stop_reason: StopReason,
    pub transcript: Vec<ChatMessage>,
}

/// Mutable state of one run. Only the loop touches it, once per turn.
#[derive(Debug)]
pub(crate) struct LoopState {
    step_index: usize,
    transcript: Vec<ChatMessage>,
    usage: TokenUsage,
    segments: Vec<String>,
}

impl LoopState {
    fn new(system_prompt: &str, task: &str) -> Self {
        Self {
            step_index: 0,
            transcript: vec![ChatMessage::system(system_prompt), ChatMessage::user(task)],
            usage: TokenUsage::default(),
            segments: Vec::new(),
        }
    }

    fn push_text(&mut self, text: &str) {
        if !text.is_empty() {
            self.segments.push(text.to_string());
        }
    }

    /// Text accumulated so far, one blank line between turns.
    fn accumulated_text(&self) -> String {
        self.segments.join("\n\n")
    }

    fn finish(self, stop_reason: StopReason) -> AgentOutput {
        AgentOutput {
            text: self.accumulated_text(),
            usage: self.usage,
            steps: self.step_index,
            stop_reason,
            transcript: self.transcript,
        }
    }
}

/// Drives the exchange between the reasoning engine and a session's tools.
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    max_steps: usize,
}

impl Agent {
    /// Create an agent backed by the configured chat completions endpoint.
    pub fn new(config: &Config) -> Self {
        let llm = Arc::new(OpenRouterClient::with_base_url(
            config.api_key.clone(),
            config.base_url.clone(),
        ));
        Self::with_client(llm, config.max_steps)
    }

    pub fn with_client(llm: Arc<dyn LlmClient>, max_steps: usize) -> Self {
        Self { llm, max_steps }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run a task to completion and return the aggregated result.
    pub async fn run_task(
        &self,
        system_prompt: &str,
        task: &str,
        model: &str,
        tools: &ToolRegistry,
        cancel: &CancellationToken,
    ) -> Result<AgentOutput, AgentError> {
        self.run(system_prompt, task, model, tools, cancel, None)
            .await
    }

    /// Run a task, emitting progress on `events` as it happens.
    ///
    /// The returned aggregate is identical to what [`Agent::run_task`] returns.
    pub async fn run_task_streaming(
        &self,
        system_prompt: &str,
        task: &str,
        model: &str,
        tools: &ToolRegistry,
        cancel: &CancellationToken,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<AgentOutput, AgentError> {
        self.run(system_prompt, task, model, tools, cancel, Some(&events))
            .await
    }

    async fn run(
        &self,
        system_prompt: &str,
        task: &str,
        model: &str,
        tools: &ToolRegistry,
        cancel: &CancellationToken,
        events: Option<&mpsc::UnboundedSender<AgentEvent>>,
    ) -> Result<AgentOutput, AgentError> {
        let mut state = LoopState::new(system_prompt, task);
        let tool_schemas = tools.get_tool_schemas();
        let emit = |event: AgentEvent| {
            if let Some(tx) = events {
                let _ = tx.send(event);
            }
        };

        while state.step_index < self.max_steps {
            let step = state.step_index;
            tracing::debug!(step = step + 1, "Agent step");

            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled { steps: step });
            }

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AgentError::Cancelled { steps: step });
                }
                response = self.request_turn(model, &state.transcript, &tool_schemas, events) => response?,
            };

            if let Some(usage) = &response.usage {
                state.usage = state.usage.add(usage);
            }

            match TurnOutcome::from(response) {
                TurnOutcome::FinalText(text) => {
                    state.push_text(&text);
                    state.transcript.push(ChatMessage::assistant(text));
                    state.step_index += 1;
                    emit(AgentEvent::StepComplete {
                        step: state.step_index,
                        usage: state.usage,
                    });
                    tracing::info!(
                        steps = state.step_index,
                        total_tokens = state.usage.total_tokens,
                        "Agent finished"
                    );
                    return Ok(state.finish(StopReason::Done));
                }
                TurnOutcome::ToolCalls { text, calls } => {
                    if let Some(text) = &text {
                        state.push_text(text);
                    }
                    state
                        .transcript
                        .push(ChatMessage::assistant_tool_calls(text, calls.clone()));

                    // Sequential and in order: later calls may depend on earlier ones.
                    for call in &calls {
                        tracing::info!(
                            step = step + 1,
                            tool = %call.function.name,
                            args = %truncate_for_log(&call.function.arguments, 500),
                            "Calling tool"
                        );
                        emit(AgentEvent::ToolCall {
                            step: step + 1,
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            arguments: call.function.arguments.clone(),
                        });

                        let result = tools.dispatch(call).await;

                        if result.is_error {
                            tracing::debug!(
                                tool = %call.function.name,
                                output = %truncate_for_log(&result.output, 1000),
                                "Tool returned error"
                            );
                        }
                        emit(AgentEvent::ToolResult {
                            step: step + 1,
                            id: result.call_id.clone(),
                            name: call.function.name.clone(),
                            output: result.output.clone(),
                            is_error: result.is_error,
                        });
                        state
                            .transcript
                            .push(ChatMessage::tool(result.call_id, result.output));
                    }

                    state.step_index += 1;
                    emit(AgentEvent::StepComplete {
                        step: state.step_index,
                        usage: state.usage,
                    });
                }
            }
        }

        tracing::warn!(
            max_steps = self.max_steps,
            "Step limit reached without completion; returning partial result"
        );
        Ok(state.finish(StopReason::StepLimitExceeded))
    }

    /// One model round trip, streaming text deltas to `events` when present.
    async fn request_turn(
        &self,
        model: &str,
        transcript: &[ChatMessage],
        tool_schemas: &[ToolSchema],
        events: Option<&mpsc::UnboundedSender<AgentEvent>>,
    ) -> Result<ChatResponse, LlmError> {
        let Some(events) = events else {
            return self
                .llm
                .chat_completion(model, transcript, Some(tool_schemas))
                .await;
        };

        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel::<String>();
        let llm = &self.llm;
        let completion = async move {
            llm.chat_completion_stream(model, transcript, Some(tool_schemas), &delta_tx)
                .await
        };
        let forward = async {
            while let Some(delta) = delta_rx.recv().await {
                let _ = events.send(AgentEvent::TextDelta { delta });
            }
        };

        let (response, ()) = tokio::join!(completion, forward);
        response
    }
}

/// Truncate a string for logging purposes.
fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}
