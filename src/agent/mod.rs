//! Agent module - the core autonomous agent logic.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Build context with system prompt and user task
//! 2. Call LLM with available tools
//! 3. If LLM requests tool calls, execute them in order and feed results back
//! 4. Repeat until LLM produces final response or the step limit is reached

mod agent_loop;
mod events;
mod prompt;

pub use agent_loop::{Agent, AgentError, AgentOutput, StopReason, TurnOutcome};
pub use events::AgentEvent;
pub use prompt::{build_system_prompt, build_task_prompt};
