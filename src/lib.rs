//! # Artifact Agent
//!
//! Turns a natural-language topic into a finished set of files by letting an
//! LLM edit files and run commands inside a per-request workspace.
//!
//! This library provides:
//! - An HTTP API for submitting topics
//! - A tool-based agent loop with a hard step limit
//! - Two host-side tools: `edit` (text files) and `execute` (shell commands)
//!
//! ## Architecture
//!
//! The agent follows the "tools in a loop" pattern:
//! 1. Receive a topic via the API and allocate a session workspace
//! 2. Build context with system prompt and available tools
//! 3. Call LLM, execute any tool calls in order
//! 4. Feed results back to LLM, repeat until it stops calling tools or the step limit is hit
//!
//! ## Example
//!
//! ```rust,ignore
//! use artifact_agent::{agent::Agent, config::Config, tools::ToolRegistry, workspace::Session};
//!
//! let config = Config::from_env()?;
//! let agent = Agent::new(&config);
//! let session = Session::create(&config.output_root).await?;
//! let tools = ToolRegistry::for_session(session.workspace_dir.clone(), &config.tools);
//! let output = agent
//!     .run_task(&system_prompt, "Tides", &config.default_model, &tools, &cancel)
//!     .await?;
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod llm;
pub mod tools;
pub mod workspace;

pub use config::Config;
