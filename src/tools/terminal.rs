//! Shell command execution tool.

use std::path::{Path, PathBuf};
use std::pin::pin;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{FusedFuture, FutureExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Tool, ToolError};

const CWD_FILE_ENV: &str = "__AGENT_CWD_FILE";

/// How long to keep reading output after the shell itself has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Bytes read from one output stream, plus how many were dropped past the cap.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    dropped: usize,
}

impl Captured {
    fn render(&self, stream: &str) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.dropped > 0 {
            text.push_str(&format!(
                "\n... [{} truncated: {} bytes omitted]",
                stream, self.dropped
            ));
        }
        text
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty() && self.dropped == 0
    }
}

/// Output of a command that ran to completion.
#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Per-session shell context.
///
/// Commands run one at a time, each in its own process group. The working
/// directory left behind by one command becomes the starting directory of the
/// next. [`ShellSession::reset`] kills anything earlier commands left running
/// and returns to the workspace root.
pub struct ShellSession {
    root: PathBuf,
    cwd: PathBuf,
    cwd_file: PathBuf,
    process_groups: Vec<i32>,
}

impl ShellSession {
    pub fn new(root: PathBuf) -> Self {
        let cwd_file =
            std::env::temp_dir().join(format!("artifact-agent-{}.cwd", Uuid::new_v4().simple()));
        Self {
            cwd: root.clone(),
            root,
            cwd_file,
            process_groups: Vec::new(),
        }
    }

    /// Directory the next command starts in.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Kill leftover processes and return to the workspace root.
    pub fn reset(&mut self) {
        for pgid in self.process_groups.drain(..) {
            kill_group(pgid);
        }
        self.cwd = self.root.clone();
        let _ = std::fs::remove_file(&self.cwd_file);
        tracing::info!(root = %self.root.display(), "Shell session reset");
    }

    /// Run `command` under `sh -c`, capturing at most `max_output_bytes` per stream.
    pub async fn run(
        &mut self,
        command: &str,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> Result<CommandOutput, ToolError> {
        let _ = tokio::fs::remove_file(&self.cwd_file).await;
        let script = format!(
            "{}\n__agent_status=$?\npwd -P > \"${}\" 2>/dev/null\nexit $__agent_status",
            command, CWD_FILE_ENV
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .current_dir(&self.cwd)
            .env(CWD_FILE_ENV, &self.cwd_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(ToolError::Spawn)?;
        let pgid = child.id().map(|id| id as i32);
        if let Some(pgid) = pgid {
            self.process_groups.retain(|&g| group_alive(g));
            self.process_groups.push(pgid);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut out = Captured::default();
        let mut err = Captured::default();
        let collect = async {
            let mut readers = pin!(async {
                tokio::join!(
                    read_capped(stdout, max_output_bytes, &mut out),
                    read_capped(stderr, max_output_bytes, &mut err)
                );
            }
            .fuse());
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                () = &mut readers => None,
            };
            let status = match exited {
                Some(status) => status,
                None => child.wait().await,
            };
            // A background job can hold the pipes open long after `sh` exits.
            if !readers.is_terminated() {
                let _ = tokio::time::timeout(PIPE_DRAIN_GRACE, &mut readers).await;
            }
            status
        };
        let outcome = tokio::time::timeout(timeout, collect).await;

        let status = match outcome {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(command = %command, timeout = ?timeout, "Command timed out");
                if let Some(pgid) = pgid {
                    kill_group(pgid);
                    self.process_groups.retain(|&g| g != pgid);
                }
                let _ = child.kill().await;
                return Err(ToolError::Timeout {
                    secs: timeout.as_secs_f64(),
                });
            }
        };
        let status = status.map_err(ToolError::Spawn)?;
        if let Some(pgid) = pgid {
            if !group_alive(pgid) {
                self.process_groups.retain(|&g| g != pgid);
            }
        }

        if let Ok(dir) = tokio::fs::read_to_string(&self.cwd_file).await {
            let dir = PathBuf::from(dir.trim_end_matches('\n'));
            if dir.is_dir() {
                self.cwd = dir;
            }
        }

        let exit_code = status.code().unwrap_or(-1);
        let stdout_text = out.render("stdout");
        let stderr_text = if err.is_empty() {
            String::new()
        } else {
            err.render("stderr")
        };

        Ok(CommandOutput {
            exit_code,
            stdout: stdout_text,
            stderr: stderr_text,
        })
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        for pgid in self.process_groups.drain(..) {
            kill_group(pgid);
        }
        let _ = std::fs::remove_file(&self.cwd_file);
    }
}

/// Drain `reader` to EOF into `captured`, keeping the first `cap` bytes.
///
/// Reading continues past the cap so a chatty child never blocks on a full pipe.
/// Bytes land in `captured` as they arrive, so dropping the future early keeps
/// what was read so far.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize, captured: &mut Captured) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = vec![0u8; 16 * 1024];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(captured.bytes.len());
                let keep = room.min(n);
                captured.bytes.extend_from_slice(&chunk[..keep]);
                captured.dropped += n - keep;
            }
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: i32) {
    // SAFETY: killpg takes plain integers and touches no memory we own.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: i32) {}

#[cfg(unix)]
fn group_alive(pgid: i32) -> bool {
    // SAFETY: signal 0 only probes for existence; no memory is shared.
    unsafe { libc::killpg(pgid, 0) == 0 }
}

#[cfg(not(unix))]
fn group_alive(_pgid: i32) -> bool {
    false
}

/// Run a shell command in the session.
pub struct Execute {
    shell: Mutex<ShellSession>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl Execute {
    pub fn new(shell: ShellSession, timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            shell: Mutex::new(shell),
            timeout,
            max_output_bytes,
        }
    }
}

#[async_trait]
impl Tool for Execute {
    fn name(&self) -> &str {
        "execute"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace and return its output. Use for validating and running generated files. The working directory persists between calls. Commands are killed after a fixed timeout. Background jobs keep running after the command returns; only output they print right away is captured. Set restart=true to reset the shell session instead of running a command."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "restart": {
                    "type": "boolean",
                    "description": "Reset the shell session (kills leftover processes, returns to the workspace root). No command is run."
                }
            }
        })
    }

    async fn execute(&self, args: Value, _workspace: &Path) -> anyhow::Result<String> {
        let mut shell = self.shell.lock().await;

        if args["restart"].as_bool().unwrap_or(false) {
            shell.reset();
            return Ok(format!(
                "Shell session restarted. Working directory: {}",
                shell.cwd().display()
            ));
        }

        let command = args["command"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("missing 'command' argument".to_string()))?;

        tracing::info!("Executing command: {}", command);

        let output = shell
            .run(command, self.timeout, self.max_output_bytes)
            .await?;

        if output.exit_code != 0 {
            return Err(ToolError::CommandFailed {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            }
            .into());
        }

        let mut result = output.stdout;
        if !output.stderr.is_empty() {
            result.push_str("\n--- stderr ---\n");
            result.push_str(&output.stderr);
        }
        if result.is_empty() {
            result.push_str("Command completed successfully with no output.");
        }
        Ok(result)
    }
}
