//! Task record and request types.
//!
//! A [`TaskRecord`] is created `pending` on admission and is only ever mutated
//! by the supervisor that owns it. Transitions are forward-only:
//!
//! ```text
//! pending ──► running ──► completed
//!    │           │
//!    └───────────┴──────► failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// `completed` and `failed` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Pending and running tasks count against the admission ceiling.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// How the worker's final answer should be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    #[default]
    Normal,
    /// The answer may carry an embedded `planmode.v1` bridge payload.
    PlanBridge,
}

/// Where a plan-bridge negotiation currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStage {
    #[default]
    None,
    NeedsInput,
    PlanReady,
}

impl BridgeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::NeedsInput => "needs_input",
            Self::PlanReady => "plan_ready",
        }
    }
}

fn default_model() -> String {
    "gpt-5.3-codex".to_string()
}

fn default_cwd() -> String {
    ".".to_string()
}

fn default_sandbox() -> String {
    "danger-full-access".to_string()
}

fn default_reasoning_effort() -> String {
    "high".to_string()
}

fn default_true() -> bool {
    true
}

/// Body of `POST /tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Working directory for the worker process
    #[serde(default = "default_cwd")]
    pub cwd: String,
    /// Sandbox policy (`read-only`, `workspace-write`, `danger-full-access`)
    #[serde(default = "default_sandbox")]
    pub sandbox: String,
    /// Run without approval prompts
    #[serde(default = "default_true")]
    pub full_auto: bool,
    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: String,
    #[serde(default)]
    pub workflow_mode: WorkflowMode,
    /// Continue an earlier worker session instead of starting fresh
    #[serde(default)]
    pub resume_session_id: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
}

impl CreateTaskRequest {
    /// A request with every optional field at its default.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: default_model(),
            cwd: default_cwd(),
            sandbox: default_sandbox(),
            full_auto: true,
            reasoning_effort: default_reasoning_effort(),
            workflow_mode: WorkflowMode::Normal,
            resume_session_id: None,
            parent_task_id: None,
        }
    }
}

/// Observable state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: TaskStatus,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    /// Final assistant message
    pub output: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set exactly when `status` is terminal
    pub completed_at: Option<DateTime<Utc>>,
    pub workflow_mode: WorkflowMode,
    pub parent_task_id: Option<String>,
    /// Worker session id, usable as `resume_session_id` later
    pub session_id: Option<String>,
    pub bridge_stage: BridgeStage,
    pub bridge_questions: Option<Vec<String>>,
    pub bridge_plan: Option<String>,
}

impl TaskRecord {
    pub fn new(task_id: String, req: &CreateTaskRequest) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            pid: None,
            exit_code: None,
            output: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            workflow_mode: req.workflow_mode,
            parent_task_id: req.parent_task_id.clone(),
            session_id: None,
            bridge_stage: BridgeStage::None,
            bridge_questions: None,
            bridge_plan: None,
        }
    }

    /// Move to `running` once the worker process exists.
    pub fn mark_running(&mut self, pid: Option<u32>) {
        if self.advance(TaskStatus::Running) {
            self.pid = pid;
        }
    }

    /// Successful worker exit.
    pub fn mark_completed(&mut self, exit_code: i32, output: Option<String>) {
        if self.advance(TaskStatus::Completed) {
            self.exit_code = Some(exit_code);
            self.output = output;
            self.completed_at = Some(Utc::now());
        }
    }

    /// Failure from any non-terminal state.
    pub fn mark_failed(&mut self, exit_code: Option<i32>, error: impl Into<String>) {
        if self.advance(TaskStatus::Failed) {
            self.exit_code = exit_code;
            self.error = Some(error.into());
            self.completed_at = Some(Utc::now());
        }
    }

    fn advance(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                "Ignoring transition {} -> {} for task {}",
                self.status,
                next,
                self.task_id
            );
            return false;
        }
        self.status = next;
        true
    }

    /// Drop every bridge field back to its empty state.
    pub fn clear_bridge(&mut self) {
        self.bridge_stage = BridgeStage::None;
        self.bridge_questions = None;
        self.bridge_plan = None;
    }
}
