//! Task module - records, worker invocation, output parsing and supervision.
//!
//! - [`record`]: the task record and its lifecycle transitions
//! - [`command`]: builds the worker argument vector from a request
//! - [`stream`]: parses the worker's JSONL stdout
//! - [`bridge`]: finds plan-bridge payloads in assistant text
//! - [`Supervisor`]: admission, execution, cancellation and history

pub mod bridge;
pub mod command;
pub mod record;
pub mod stream;
mod supervisor;

pub use record::{BridgeStage, CreateTaskRequest, TaskRecord, TaskStatus, WorkflowMode};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorError};
