//! HTTP API for submitting topics and receiving generated artifacts.
//!
//! ## Endpoints
//!
//! - `POST /api/generate` - Run the agent and return `{requestId, text, usage, steps}`
//! - `POST /api/generate/stream` - Same run, streamed as Server-Sent Events
//! - `GET /api/health` - Health check

mod generate;
mod routes;
pub mod types;

pub use generate::{generate, generate_stream, health, ApiError};
pub use routes::{router, serve, AppState};
