//! Request handler driven end to end with a scripted reasoning engine and real tools.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use artifact_agent::agent::{Agent, StopReason};
use artifact_agent::api::{self, types::GenerateRequest, ApiError, AppState};
use artifact_agent::config::Config;
use artifact_agent::llm::{ChatMessage, ChatResponse, LlmClient, LlmError, Role, TokenUsage, ToolCall, ToolSchema};

struct ScriptedEngine {
    turns: Mutex<VecDeque<ChatResponse>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedEngine {
    fn new(turns: Vec<ChatResponse>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedEngine {
    async fn chat_completion(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _tools: Option<&[ToolSchema]>,
    ) -> Result<ChatResponse, LlmError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        let next = self.turns.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| tool_turn(vec![execute("echo again")])))
    }
}

/// Fails every request, like an upstream that is down.
struct UnavailableEngine;

#[async_trait]
impl LlmClient for UnavailableEngine {
    async fn chat_completion(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _tools: Option<&[ToolSchema]>,
    ) -> Result<ChatResponse, LlmError> {
        Err(LlmError::Api {
            status: 503,
            body: "no capacity".into(),
        })
    }
}

fn tool_turn(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        content: None,
        tool_calls: Some(calls),
        usage: Some(TokenUsage::new(100, 20)),
        finish_reason: Some("tool_calls".into()),
    }
}

fn final_turn(text: &str) -> ChatResponse {
    ChatResponse {
        content: Some(text.into()),
        tool_calls: None,
        usage: Some(TokenUsage::new(100, 20)),
        finish_reason: Some("stop".into()),
    }
}

fn edit(id: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(id, "edit", args.to_string())
}

fn execute(command: &str) -> ToolCall {
    ToolCall::new("exec", "execute", json!({ "command": command }).to_string())
}

fn state(output_root: PathBuf, engine: Arc<dyn LlmClient>, max_steps: usize) -> Arc<AppState> {
    let mut config = Config::new("test-key".into(), "test/model".into(), output_root);
    config.max_steps = max_steps;
    let agent = Arc::new(Agent::with_client(engine, max_steps));
    Arc::new(AppState::with_agent(config, agent))
}

fn request(topic: &str) -> Json<GenerateRequest> {
    Json(GenerateRequest {
        topic: topic.into(),
        model: None,
    })
}

/// Collect a finished SSE body as `(event, data)` pairs.
async fn sse_events(response: axum::response::Response) -> Vec<(String, serde_json::Value)> {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    text.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .filter_map(|block| {
            let mut name = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    name = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = Some(serde_json::from_str(v.trim()).unwrap());
                }
            }
            Some((name?, data?))
        })
        .collect()
}

fn tool_messages(transcript: &[ChatMessage]) -> Vec<&ChatMessage> {
    transcript.iter().filter(|m| m.role == Role::Tool).collect()
}

#[tokio::test]
async fn create_then_view_round_trips_through_the_handler() {
    let root = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new(vec![
        tool_turn(vec![edit(
            "c",
            json!({"command": "create", "path": "out.txt", "file_text": "hello"}),
        )]),
        tool_turn(vec![edit("v", json!({"command": "view", "path": "out.txt"}))]),
        final_turn("Wrote out.txt"),
    ]);
    let state = state(root.path().to_path_buf(), engine.clone(), 20);

    let Json(response) = api::generate(State(state), request("greetings"))
        .await
        .expect("generation succeeds");

    assert_eq!(response.steps, 3);
    assert_eq!(response.text, "Wrote out.txt");
    assert_eq!(response.stop_reason, StopReason::Done);
    assert_eq!(response.usage.total_tokens, 360);

    let written = root
        .path()
        .join(response.request_id.to_string())
        .join("out.txt");
    assert_eq!(std::fs::read_to_string(written).unwrap(), "hello");

    let transcripts = engine.transcripts();
    let last = transcripts.last().unwrap();
    let results = tool_messages(last);
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].content.as_deref(), Some("hello"));
    assert!(last[1].content.as_deref().unwrap().contains("greetings"));
}

#[tokio::test]
async fn failing_command_is_reported_and_loop_continues() {
    let python = std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    let command = if python {
        r#"python3 -c "print(1/0)""#
    } else {
        "echo 'ZeroDivisionError: division by zero' >&2; exit 1"
    };

    let root = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new(vec![
        tool_turn(vec![execute(command)]),
        tool_turn(vec![execute("echo fixed")]),
        final_turn("Recovered"),
    ]);
    let state = state(root.path().to_path_buf(), engine.clone(), 20);

    let Json(response) = api::generate(State(state), request("arithmetic"))
        .await
        .expect("tool errors do not fail the run");
    assert_eq!(response.steps, 3);
    assert_eq!(response.stop_reason, StopReason::Done);

    let transcripts = engine.transcripts();
    let failure = tool_messages(&transcripts[1])[0].content.clone().unwrap();
    assert!(failure.starts_with("Error: Command failed"), "{failure}");
    assert!(failure.contains("ZeroDivisionError"));

    let success = tool_messages(&transcripts[2])[1].content.clone().unwrap();
    assert_eq!(success, "fixed\n");
}

#[tokio::test]
async fn step_limit_returns_partial_result_not_error() {
    let root = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new(Vec::new());
    let state = state(root.path().to_path_buf(), engine.clone(), 4);

    let Json(response) = api::generate(State(state), request("endless"))
        .await
        .expect("step limit is not an error");
    assert_eq!(response.steps, 4);
    assert_eq!(response.stop_reason, StopReason::StepLimitExceeded);
    assert_eq!(response.usage.prompt_tokens, 400);
    assert_eq!(engine.transcripts().len(), 4);
}

#[tokio::test]
async fn blank_topic_is_rejected_before_any_turn() {
    let root = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new(vec![final_turn("unused")]);
    let state = state(root.path().to_path_buf(), engine.clone(), 20);

    let err = api::generate(State(state), request("   ")).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
    assert!(engine.transcripts().is_empty());
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn concurrent_sessions_use_separate_workspaces() {
    let root = tempfile::tempdir().unwrap();
    let script = || {
        vec![
            tool_turn(vec![edit(
                "c",
                json!({"command": "create", "path": "narrative.md", "file_text": "story"}),
            )]),
            final_turn("ok"),
        ]
    };
    let a = state(root.path().to_path_buf(), ScriptedEngine::new(script()), 20);
    let b = state(root.path().to_path_buf(), ScriptedEngine::new(script()), 20);

    let (ra, rb) = tokio::join!(
        api::generate(State(a), request("first")),
        api::generate(State(b), request("second"))
    );
    let (Json(ra), Json(rb)) = (ra.unwrap(), rb.unwrap());

    assert_ne!(ra.request_id, rb.request_id);
    for id in [ra.request_id, rb.request_id] {
        assert!(root.path().join(id.to_string()).join("narrative.md").is_file());
    }
}

#[tokio::test]
async fn stream_emits_events_in_order_and_ends_with_done() {
    let root = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::new(vec![
        tool_turn(vec![edit(
            "c",
            json!({"command": "create", "path": "outline.json", "file_text": "{}"}),
        )]),
        final_turn("Outline ready"),
    ]);
    let state = state(root.path().to_path_buf(), engine, 20);

    let sse = api::generate_stream(State(state), request("tides"))
        .await
        .expect("stream starts");
    let events = sse_events(sse.into_response()).await;

    let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec!["start", "tool_call", "tool_result", "step", "text", "step", "done"]
    );

    let request_id = events[0].1["requestId"].clone();
    assert_eq!(events[1].1["name"], "edit");
    assert_eq!(events[2].1["is_error"], false);
    assert_eq!(events[4].1["delta"], "Outline ready");

    let done = &events[6].1;
    assert_eq!(done["requestId"], request_id);
    assert_eq!(done["text"], "Outline ready");
    assert_eq!(done["steps"], 2);
    assert_eq!(done["stopReason"], "done");
    assert_eq!(done["usage"]["totalTokens"], 240);

    let id = request_id.as_str().unwrap();
    assert!(root.path().join(id).join("outline.json").is_file());
}

#[tokio::test]
async fn stream_reports_engine_failure_as_error_event() {
    let root = tempfile::tempdir().unwrap();
    let state = state(root.path().to_path_buf(), Arc::new(UnavailableEngine), 20);

    let sse = api::generate_stream(State(state), request("tides"))
        .await
        .expect("stream starts");
    let events = sse_events(sse.into_response()).await;

    let names: Vec<&str> = events.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["start", "error"]);
    let error = &events[1].1;
    assert_eq!(error["error"], "Agent run failed");
    assert!(error["detail"]
        .as_str()
        .unwrap()
        .contains("Reasoning engine error"));
}
