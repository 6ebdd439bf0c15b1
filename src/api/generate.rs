//! Request handler: topic in, aggregated run result out.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::agent::{build_system_prompt, build_task_prompt, AgentError, AgentEvent, AgentOutput};
use crate::tools::ToolRegistry;
use crate::workspace::Session;

use super::routes::AppState;
use super::types::{ErrorResponse, GenerateRequest, GenerateResponse, HealthResponse};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Failed to create session workspace")]
    Workspace(#[source] std::io::Error),

    #[error("Agent run failed")]
    Agent(#[from] AgentError),

    #[error("Agent task aborted: {0}")]
    Join(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Agent(AgentError::Engine(_)) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorResponse {
        let detail = match self {
            ApiError::Workspace(e) => Some(e.to_string()),
            ApiError::Agent(e) => Some(e.to_string()),
            ApiError::BadRequest(_) | ApiError::Join(_) => None,
        };
        ErrorResponse {
            error: self.to_string(),
            detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, detail = ?self.body().detail, "Request failed");
        (self.status(), Json(self.body())).into_response()
    }
}

/// Everything a run needs, built from one inbound request.
struct PreparedRun {
    session: Session,
    model: String,
    system_prompt: String,
    task: String,
    tools: ToolRegistry,
}

async fn prepare(state: &AppState, req: GenerateRequest) -> Result<PreparedRun, ApiError> {
    let topic = req.topic.trim();
    if topic.is_empty() {
        return Err(ApiError::BadRequest("'topic' must not be empty".to_string()));
    }
    let model = req
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.default_model.clone());

    let session = Session::create(&state.config.output_root)
        .await
        .map_err(ApiError::Workspace)?;
    let tools = ToolRegistry::for_session(session.workspace_dir.clone(), &state.config.tools);
    let system_prompt = build_system_prompt(&session.workspace_dir.to_string_lossy(), &tools);

    tracing::info!(
        request_id = %session.request_id,
        model = %model,
        workspace = %session.workspace_dir.display(),
        "Starting generation"
    );

    Ok(PreparedRun {
        session,
        model,
        system_prompt,
        task: build_task_prompt(topic),
        tools,
    })
}

/// Run on a separate task so an aborted request stops the loop at a turn
/// boundary instead of mid tool call. Dropping the guard cancels the run.
fn spawn_run(
    state: &AppState,
    run: PreparedRun,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
) -> (JoinHandle<Result<AgentOutput, AgentError>>, DropGuard) {
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let agent = state.agent.clone();

    let handle = tokio::spawn(async move {
        let PreparedRun {
            model,
            system_prompt,
            task,
            tools,
            ..
        } = run;
        match events {
            Some(tx) => {
                agent
                    .run_task_streaming(&system_prompt, &task, &model, &tools, &run_cancel, tx)
                    .await
            }
            None => {
                agent
                    .run_task(&system_prompt, &task, &model, &tools, &run_cancel)
                    .await
            }
        }
    });

    (handle, cancel.drop_guard())
}

async fn join_run(handle: JoinHandle<Result<AgentOutput, AgentError>>) -> Result<AgentOutput, ApiError> {
    handle
        .await
        .map_err(|e| ApiError::Join(e.to_string()))?
        .map_err(ApiError::from)
}

/// POST /api/generate - Run the agent for a topic and return the aggregate.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let run = prepare(&state, req).await?;
    let request_id = run.session.request_id;

    let (handle, _guard) = spawn_run(&state, run, None);
    let output = join_run(handle).await?;

    tracing::info!(
        request_id = %request_id,
        steps = output.steps,
        stop_reason = ?output.stop_reason,
        total_tokens = output.usage.total_tokens,
        "Generation finished"
    );
    Ok(Json(GenerateResponse::from_output(request_id, output)))
}

/// POST /api/generate/stream - Same run, delivered as Server-Sent Events.
pub async fn generate_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let run = prepare(&state, req).await?;
    let request_id = run.session.request_id;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (handle, guard) = spawn_run(&state, run, Some(tx));

    let stream = async_stream::stream! {
        // Client disconnect drops the stream, and with it the guard.
        let _guard = guard;

        if let Ok(ev) = Event::default()
            .event("start")
            .json_data(serde_json::json!({ "requestId": request_id }))
        {
            yield Ok(ev);
        }

        while let Some(ev) = rx.recv().await {
            match Event::default().event(ev.event_name()).json_data(&ev) {
                Ok(sse) => yield Ok(sse),
                Err(e) => {
                    tracing::error!(
                        request_id = %request_id,
                        event = %ev.event_name(),
                        error = %e,
                        "Failed to serialize SSE event; dropping"
                    );
                }
            }
        }

        let final_event = match join_run(handle).await {
            Ok(output) => Event::default()
                .event("done")
                .json_data(GenerateResponse::from_output(request_id, output)),
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Streaming generation failed");
                Event::default().event("error").json_data(e.body())
            }
        };
        match final_event {
            Ok(ev) => yield Ok(ev),
            Err(e) => tracing::error!(request_id = %request_id, error = %e, "Failed to serialize final SSE event"),
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
