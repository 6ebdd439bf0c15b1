//! Host-side tools the model can call.
//!
//! Every session gets its own [`ToolRegistry`]. Tools never fail the agent
//! loop: errors are rendered into a [`ToolResult`] with `is_error` set so the
//! model can read them on its next turn.

mod edit;
mod terminal;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::ToolSettings;
use crate::llm::{FunctionDefinition, ToolCall, ToolSchema};

pub use edit::EditFile;
pub use terminal::{Execute, ShellSession};

/// Recoverable tool failures. These are reported to the model, never to the caller.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("No match found for old_str in {0}; the text must appear verbatim, including whitespace")]
    PatternNotFound(PathBuf),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Path {0} is outside the session workspace")]
    OutsideWorkspace(PathBuf),

    #[error("Command failed with exit code {exit_code}\n--- stderr ---\n{stderr}\n--- stdout ---\n{stdout}")]
    CommandFailed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Command timed out after {secs}s and was killed; shorten the command or run long jobs in the background")]
    Timeout { secs: f64 },

    #[error("Failed to spawn command: {0}")]
    Spawn(std::io::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Outcome of one tool call, fed back to the model in call order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolResult {
    pub call_id: String,
    pub output: String,
    pub is_error: bool,
}

/// A tool the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the tool's arguments.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. `workspace` is the session's workspace directory.
    async fn execute(&self, args: Value, workspace: &Path) -> anyhow::Result<String>;
}

/// Name and description of a registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// The tool set of a single session.
pub struct ToolRegistry {
    workspace: PathBuf,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Build the `edit` and `execute` tools for a session rooted at `workspace`.
    pub fn for_session(workspace: PathBuf, settings: &ToolSettings) -> Self {
        let shell = ShellSession::new(workspace.clone());
        let mut registry = Self::empty(workspace);
        registry.register(Arc::new(EditFile::new(
            settings.max_view_chars,
            settings.confine_edits,
        )));
        registry.register(Arc::new(Execute::new(
            shell,
            settings.command_timeout,
            settings.max_output_bytes,
        )));
        registry
    }

    /// A registry with no tools.
    pub fn empty(workspace: PathBuf) -> Self {
        Self {
            workspace,
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Registered tools, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        let mut tools: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Function-calling schemas advertised to the model, sorted by name.
    pub fn get_tool_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                schema_type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                },
            })
            .collect();
        schemas.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        schemas
    }

    /// Run a tool by name.
    pub async fn execute(&self, name: &str, args: Value, workspace: &Path) -> anyhow::Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", name))?;
        tool.execute(args, workspace).await
    }

    /// Run a model-issued call and convert any failure into an error result.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let result = match parse_arguments(&call.function.arguments) {
            Ok(args) => {
                self.execute(&call.function.name, args, &self.workspace)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(output) => ToolResult {
                call_id: call.id.clone(),
                output,
                is_error: false,
            },
            Err(e) => ToolResult {
                call_id: call.id.clone(),
                output: format!("Error: {}", e),
                is_error: true,
            },
        }
    }
}

fn parse_arguments(raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
        .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {}", e)))
}

/// Read a required string argument.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing '{}' argument", key)))
}
