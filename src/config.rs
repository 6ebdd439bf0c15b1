//! Configuration management for the artifact agent.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Required. API key for the chat completions endpoint.
//! - `LLM_BASE_URL` - Optional. OpenAI-compatible base URL. Defaults to OpenRouter.
//! - `DEFAULT_MODEL` - Optional. Model used when a request names none.
//! - `OUTPUT_ROOT` - Optional. Directory holding per-request workspaces. Defaults to `./output`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `MAX_STEPS` - Optional. Maximum agent loop turns. Defaults to `20`.
//! - `COMMAND_TIMEOUT_SECS` - Optional. Wall-clock limit per command. Defaults to `30`.
//! - `MAX_COMMAND_OUTPUT_BYTES` - Optional. Captured bytes per stream. Defaults to 1 MiB.
//! - `MAX_VIEW_CHARS` - Optional. Characters returned by a file view. Defaults to `50000`.
//! - `CONFINE_EDITS` - Optional. Keep edit paths inside the workspace. Defaults to `true`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Limits applied by the host-side tools of every session.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    /// Wall-clock limit for a single `execute` call
    pub command_timeout: Duration,

    /// Bytes captured per output stream before truncation
    pub max_output_bytes: usize,

    /// Characters returned by a single `view`
    pub max_view_chars: usize,

    /// Reject edit paths that resolve outside the session workspace
    pub confine_edits: bool,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
            max_view_chars: 50_000,
            confine_edits: true,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the chat completions endpoint
    pub api_key: String,

    /// OpenAI-compatible base URL
    pub base_url: String,

    /// Default LLM model identifier
    pub default_model: String,

    /// Root directory under which per-request workspaces are created
    pub output_root: PathBuf,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Maximum turns for the agent loop
    pub max_steps: usize,

    /// Tool limits
    pub tools: ToolSettings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set,
    /// or `ConfigError::InvalidValue` when a numeric or boolean value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let base_url =
            std::env::var("LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let default_model =
            std::env::var("DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let output_root = std::env::var("OUTPUT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("output"));

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env_parse("PORT", 3000u16)?;
        let max_steps = env_parse("MAX_STEPS", 20usize)?;

        let defaults = ToolSettings::default();
        let tools = ToolSettings {
            command_timeout: Duration::from_secs(env_parse(
                "COMMAND_TIMEOUT_SECS",
                defaults.command_timeout.as_secs(),
            )?),
            max_output_bytes: env_parse("MAX_COMMAND_OUTPUT_BYTES", defaults.max_output_bytes)?,
            max_view_chars: env_parse("MAX_VIEW_CHARS", defaults.max_view_chars)?,
            confine_edits: std::env::var("CONFINE_EDITS")
                .ok()
                .map(|v| {
                    parse_bool(&v)
                        .map_err(|e| ConfigError::InvalidValue("CONFINE_EDITS".to_string(), e))
                })
                .transpose()?
                .unwrap_or(defaults.confine_edits),
        };

        if max_steps == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_STEPS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            api_key,
            base_url,
            default_model,
            output_root,
            host,
            port,
            max_steps,
            tools,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, default_model: String, output_root: PathBuf) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model,
            output_root,
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_steps: 20,
            tools: ToolSettings::default(),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}
