//! HTTP API for task submission and monitoring.
//!
//! ## Endpoints
//! - `GET /health` - liveness, pid, active task count, uptime
//! - `POST /tasks` - submit a task (202 with the pending record, 429 at capacity)
//! - `GET /tasks?status=` - list tasks, newest first
//! - `GET /tasks/:id` - get a single task
//! - `DELETE /tasks/:id` - cancel a task

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
