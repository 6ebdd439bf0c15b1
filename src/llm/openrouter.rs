//! OpenAI-compatible chat completions client (OpenRouter by default).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::{ChatMessage, ChatResponse, LlmClient, LlmError, TokenUsage, ToolCall, ToolSchema};
use crate::config::DEFAULT_BASE_URL;

/// Client for `POST {base_url}/chat/completions`.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(body)
    }
}

fn request_body(
    model: &str,
    messages: &[ChatMessage],
    tools: Option<&[ToolSchema]>,
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages,
    });
    if let Some(tools) = tools.filter(|t| !t.is_empty()) {
        body["tools"] = json!(tools);
        body["tool_choice"] = json!("auto");
    }
    if stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }
    body
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: AssistantMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds streamed chunks into a single [`ChatResponse`].
///
/// Tool call fragments are keyed by their `index` so calls keep the order the
/// model emitted them in.
#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    usage: Option<TokenUsage>,
    finish_reason: Option<String>,
}

impl StreamAccumulator {
    /// Apply one chunk, returning any text delta it carried.
    fn push(&mut self, chunk: StreamChunk) -> Option<String> {
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        let choice = chunk.choices.into_iter().next()?;
        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }
        if let Some(deltas) = choice.delta.tool_calls {
            for delta in deltas {
                let entry = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    entry.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
        }
        let text = choice.delta.content.filter(|c| !c.is_empty())?;
        self.content.push_str(&text);
        Some(text)
    }

    fn finish(self) -> ChatResponse {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .map(|(index, partial)| {
                let id = if partial.id.is_empty() {
                    format!("call_{}", index)
                } else {
                    partial.id
                };
                ToolCall::new(id, partial.name, partial.arguments)
            })
            .collect();
        ChatResponse {
            content: (!self.content.is_empty()).then_some(self.content),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            usage: self.usage,
            finish_reason: self.finish_reason,
        }
    }
}

fn api_error_message(event: &Value) -> Option<String> {
    let error = event.get("error")?;
    if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
        return Some(message.to_string());
    }
    Some(error.to_string())
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
    ) -> Result<ChatResponse, LlmError> {
        let body = request_body(model, messages, tools, false);
        let response = self.request(&body).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::Decode(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyChoices)?;

        Ok(ChatResponse {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls,
            usage: parsed.usage,
            finish_reason: choice.finish_reason,
        })
    }

    async fn chat_completion_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
        deltas: &mpsc::UnboundedSender<String>,
    ) -> Result<ChatResponse, LlmError> {
        let body = request_body(model, messages, tools, true);
        let mut source = self
            .request(&body)
            .eventsource()
            .map_err(|e| LlmError::Stream(e.to_string()))?;

        let mut acc = StreamAccumulator::default();

        while let Some(event) = source.next().await {
            let message = match event {
                Ok(Event::Open) => continue,
                Ok(Event::Message(message)) => message,
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    source.close();
                    let body = response.text().await.unwrap_or_default();
                    return Err(LlmError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) => {
                    source.close();
                    return Err(LlmError::Stream(e.to_string()));
                }
            };

            tracing::trace!("Completion SSE: {}", message.data);
            if message.data == "[DONE]" {
                source.close();
                break;
            }

            let value: Value = serde_json::from_str(&message.data)
                .map_err(|e| LlmError::Decode(format!("{}, data: {}", e, message.data)))?;
            if let Some(error) = api_error_message(&value) {
                source.close();
                return Err(LlmError::Stream(error));
            }
            let chunk: StreamChunk =
                serde_json::from_value(value).map_err(|e| LlmError::Decode(e.to_string()))?;

            if let Some(text) = acc.push(chunk) {
                let _ = deltas.send(text);
            }
        }

        Ok(acc.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(value: Value) -> StreamChunk {
        serde_json::from_value(value).expect("valid chunk")
    }

    #[test]
    fn accumulator_joins_text_and_fragmented_tool_calls() {
        let mut acc = StreamAccumulator::default();
        assert_eq!(
            acc.push(chunk(json!({"choices": [{"delta": {"content": "Writing "}}]}))),
            Some("Writing ".to_string())
        );
        acc.push(chunk(json!({"choices": [{"delta": {"content": "files"}}]})));
        acc.push(chunk(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 1, "id": "call_b", "function": {"name": "execute", "arguments": "{\"command\":"}}
        ]}}]})));
        acc.push(chunk(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "call_a", "function": {"name": "edit", "arguments": "{}"}}
        ]}}]})));
        acc.push(chunk(json!({"choices": [{"delta": {"tool_calls": [
            {"index": 1, "function": {"arguments": "\"ls\"}"}}
        ]}, "finish_reason": "tool_calls"}]})));
        acc.push(chunk(json!({"choices": [], "usage": {
            "prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14
        }})));

        let response = acc.finish();
        assert_eq!(response.content.as_deref(), Some("Writing files"));
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(response.usage, Some(TokenUsage::new(10, 4)));

        let calls = response.tool_calls.expect("tool calls");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].function.name, "edit");
        assert_eq!(calls[1].id, "call_b");
        assert_eq!(calls[1].function.arguments, "{\"command\":\"ls\"}");
    }

    #[test]
    fn accumulator_without_tools_yields_plain_text() {
        let mut acc = StreamAccumulator::default();
        acc.push(chunk(json!({"choices": [{"delta": {"role": "assistant"}}]})));
        acc.push(chunk(json!({"choices": [{"delta": {"content": "done"}, "finish_reason": "stop"}]})));
        let response = acc.finish();
        assert_eq!(response.content.as_deref(), Some("done"));
        assert!(response.tool_calls.is_none());
        assert!(response.usage.is_none());
    }

    #[test]
    fn request_body_includes_tools_only_when_present() {
        let messages = vec![ChatMessage::user("hi")];
        let body = request_body("m", &messages, None, false);
        assert!(body.get("tools").is_none());
        assert!(body.get("stream").is_none());

        let schema = ToolSchema {
            schema_type: "function".into(),
            function: super::super::FunctionDefinition {
                name: "execute".into(),
                description: "run".into(),
                parameters: json!({"type": "object"}),
            },
        };
        let body = request_body("m", &messages, Some(&[schema]), true);
        assert_eq!(body["tools"][0]["function"]["name"], "execute");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn api_error_message_reads_nested_message() {
        let event = json!({"error": {"message": "rate limited"}});
        assert_eq!(api_error_message(&event).as_deref(), Some("rate limited"));
        assert!(api_error_message(&json!({"choices": []})).is_none());
    }
}
