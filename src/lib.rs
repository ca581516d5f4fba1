//! # Codex Listener
//!
//! A local task supervisor for the Codex CLI.
//!
//! This library provides:
//! - An HTTP API for task submission and monitoring
//! - One worker subprocess per task under a concurrency ceiling
//! - Incremental parsing of the worker's JSONL output
//! - Plan-bridge payload extraction for plan/answer round trips
//! - Best-effort completion notifications (Telegram, Feishu)
//!
//! ## Task Flow
//! 1. Receive task via API (rejected with 429 at capacity)
//! 2. Spawn `codex exec --json ...` in the background
//! 3. Parse stdout for the final assistant message and session id
//! 4. Record the outcome, archive it, notify
//!
//! ## Modules
//! - `task`: Task records, worker invocation, output parsing, supervisor
//! - `api`: axum routes
//! - `session`: Worker session transcript lookup
//! - `notify`: Notification channels
//! - `client`: HTTP client used by the CLI

pub mod api;
pub mod client;
pub mod config;
pub mod notify;
pub mod session;
pub mod settings;
pub mod task;

pub use config::Config;
pub use task::{Supervisor, TaskRecord, TaskStatus};
