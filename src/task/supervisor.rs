//! Task supervisor: admission, worker processes, lifecycle, history.
//!
//! Each admitted task gets one background unit (a tokio task) that spawns
//! the worker, drains its output, waits for exit and finalizes the record.
//! The live index and the bounded archive sit behind a single mutex that is
//! only held for lookups and moves, never across process I/O.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::record::{CreateTaskRequest, TaskRecord, TaskStatus, WorkflowMode};
use super::stream::{self, StreamOutcome};
use super::{bridge, command};
use crate::config::{Config, WorkerConfig};
use crate::notify::{Dispatcher, Notification};
use crate::session::{self, SessionSummary};

/// Request-time failures. Everything after admission lands in the record.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Max concurrent tasks ({max}) reached. Cancel or wait for a task to finish.")]
    CapacityExceeded { max: usize },

    #[error("Task {0} not found")]
    NotFound(String),
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Admission ceiling on pending + running tasks
    pub max_concurrent: usize,
    /// Archive capacity; oldest finished tasks are evicted beyond it
    pub max_completed: usize,
    pub worker: WorkerConfig,
    /// Worker session logs used to enrich finished tasks
    pub sessions_dir: Option<PathBuf>,
}

impl From<&Config> for SupervisorConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            max_completed: config.max_completed,
            worker: config.worker.clone(),
            sessions_dir: config.sessions_dir.clone(),
        }
    }
}

struct LiveTask {
    record: TaskRecord,
    /// Wakes the unit's exit-wait loop to deliver SIGTERM.
    cancel: Arc<Notify>,
}

#[derive(Default)]
struct TaskTables {
    live: HashMap<String, LiveTask>,
    /// Finished records, oldest completion first.
    archive: VecDeque<TaskRecord>,
    units: HashMap<String, JoinHandle<()>>,
}

impl TaskTables {
    fn active_count(&self) -> usize {
        self.live
            .values()
            .filter(|t| t.record.status.is_active())
            .count()
    }

    fn contains(&self, task_id: &str) -> bool {
        self.live.contains_key(task_id) || self.archive.iter().any(|r| r.task_id == task_id)
    }

    fn get(&self, task_id: &str) -> Option<&TaskRecord> {
        self.live
            .get(task_id)
            .map(|t| &t.record)
            .or_else(|| self.archive.iter().find(|r| r.task_id == task_id))
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().simple().to_string()[..8].to_string();
            if !self.contains(&id) {
                return id;
            }
        }
    }

    /// Move a record from the live index into the archive.
    ///
    /// Returns `false` without archiving when the task is no longer live,
    /// so each task id is archived at most once.
    fn archive(&mut self, record: TaskRecord, max_completed: usize) -> bool {
        if self.live.remove(&record.task_id).is_none() {
            tracing::warn!("Task {} already left the live index", record.task_id);
            return false;
        }
        self.archive.push_back(record);
        while self.archive.len() > max_completed {
            if let Some(evicted) = self.archive.pop_front() {
                tracing::debug!("Evicted task {} from history", evicted.task_id);
            }
        }
        true
    }
}

struct Inner {
    config: SupervisorConfig,
    notifier: Dispatcher,
    tables: Mutex<TaskTables>,
}

/// Owns every task record and the worker processes behind them.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, notifier: Dispatcher) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                notifier,
                tables: Mutex::new(TaskTables::default()),
            }),
        }
    }

    pub async fn active_count(&self) -> usize {
        self.inner.tables.lock().await.active_count()
    }

    /// Admit a task and start it in the background.
    ///
    /// Returns the `pending` record immediately; the worker runs
    /// asynchronously.
    pub async fn submit(&self, req: CreateTaskRequest) -> Result<TaskRecord, SupervisorError> {
        let max = self.inner.config.max_concurrent;
        let mut tables = self.inner.tables.lock().await;
        if tables.active_count() >= max {
            tracing::warn!("Rejecting task: {} tasks already active", max);
            return Err(SupervisorError::CapacityExceeded { max });
        }

        let task_id = tables.fresh_id();
        let record = TaskRecord::new(task_id.clone(), &req);
        let cancel = Arc::new(Notify::new());
        tables.live.insert(
            task_id.clone(),
            LiveTask {
                record: record.clone(),
                cancel: Arc::clone(&cancel),
            },
        );

        let this = self.clone();
        let unit_id = task_id.clone();
        let handle = tokio::spawn(async move {
            this.run_task(&unit_id, req, cancel).await;
            this.inner.tables.lock().await.units.remove(&unit_id);
        });
        tables.units.insert(task_id.clone(), handle);

        tracing::info!("Accepted task {}", task_id);
        Ok(record)
    }

    /// Look up a live or archived task.
    pub async fn get(&self, task_id: &str) -> Result<TaskRecord, SupervisorError> {
        self.inner
            .tables
            .lock()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound(task_id.to_string()))
    }

    /// Live and archived tasks, newest first.
    pub async fn list(&self, status: Option<TaskStatus>) -> Vec<TaskRecord> {
        let mut tasks: Vec<TaskRecord> = {
            let tables = self.inner.tables.lock().await;
            tables
                .live
                .values()
                .map(|t| &t.record)
                .chain(tables.archive.iter())
                .filter(|r| status.map_or(true, |s| r.status == s))
                .cloned()
                .collect()
        };
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Cancel a task.
    ///
    /// Terminal tasks are returned unchanged. A pending task fails on the
    /// spot. A running task is sent SIGTERM and returned still `running`;
    /// its unit records the outcome once the process exits.
    pub async fn cancel(&self, task_id: &str) -> Result<TaskRecord, SupervisorError> {
        let mut tables = self.inner.tables.lock().await;

        let Some(live) = tables.live.get_mut(task_id) else {
            return tables
                .get(task_id)
                .cloned()
                .ok_or_else(|| SupervisorError::NotFound(task_id.to_string()));
        };

        match live.record.status {
            TaskStatus::Pending => {
                live.record.mark_failed(None, "Cancelled before starting");
                let record = live.record.clone();
                tables.archive(record.clone(), self.inner.config.max_completed);
                tracing::info!("Cancelled task {} before it started", task_id);
                Ok(record)
            }
            TaskStatus::Running => {
                live.cancel.notify_one();
                tracing::info!("Cancellation requested for task {}", task_id);
                Ok(live.record.clone())
            }
            TaskStatus::Completed | TaskStatus::Failed => Ok(live.record.clone()),
        }
    }

    /// Cancel everything live and wait for every unit to finish.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = {
            let tables = self.inner.tables.lock().await;
            tables.live.keys().cloned().collect()
        };
        tracing::info!("Shutting down, cancelling {} active tasks", ids.len());
        for id in ids {
            let _ = self.cancel(&id).await;
        }

        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut tables = self.inner.tables.lock().await;
                tables.units.drain().map(|(_, h)| h).collect()
            };
            if handles.is_empty() {
                break;
            }
            for result in futures::future::join_all(handles).await {
                if let Err(e) = result {
                    tracing::error!("Task unit ended abnormally: {}", e);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Execution unit
    // ─────────────────────────────────────────────────────────────────────

    async fn run_task(&self, task_id: &str, req: CreateTaskRequest, cancel: Arc<Notify>) {
        if !self.is_pending(task_id).await {
            tracing::debug!("Task {} left the queue before starting", task_id);
            return;
        }

        let invocation = command::build(&self.inner.config.worker, &req);
        tracing::info!("Starting task {}: {}", task_id, invocation.display());

        let mut child = match spawn_worker(&invocation.program, &invocation.args, &invocation.cwd) {
            Ok(child) => child,
            Err(message) => {
                tracing::warn!("Task {} failed to start: {}", task_id, message);
                self.fail_before_start(task_id, message).await;
                return;
            }
        };

        let pid = child.id();
        let record = {
            let mut tables = self.inner.tables.lock().await;
            match tables.live.get_mut(task_id) {
                Some(live) if live.record.status == TaskStatus::Pending => {
                    live.record.mark_running(pid);
                    Some(live.record.clone())
                }
                _ => None,
            }
        };
        let Some(mut record) = record else {
            // Cancelled while the process was being spawned.
            terminate(&mut child, task_id);
            let _ = child.wait().await;
            return;
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (outcome, stderr_text, exit) = tokio::join!(
            async {
                match stdout {
                    Some(out) => stream::drain(out).await,
                    None => StreamOutcome::default(),
                }
            },
            read_stderr(stderr),
            wait_for_exit(&mut child, &cancel, task_id),
        );

        if let Some(session_id) = outcome.session_id {
            record.session_id = Some(session_id);
        }

        match exit {
            Ok(status) if status.success() => {
                record.mark_completed(0, outcome.last_message);
            }
            Ok(status) => {
                let code = exit_code(&status);
                let error = outcome
                    .last_message
                    .or_else(|| Some(stderr_text).filter(|s| !s.is_empty()))
                    .unwrap_or_else(|| format!("Exited with code {}", code));
                record.mark_failed(Some(code), error);
            }
            Err(e) => {
                record.mark_failed(None, format!("Failed to wait for worker: {}", e));
            }
        }

        let summary = self.enrich(&mut record).await;

        if record.workflow_mode == WorkflowMode::PlanBridge {
            if let Some(payload) = bridge::extract(record.output.as_deref()) {
                bridge::apply(&mut record, &payload);
            }
        }

        tracing::info!(
            "Task {} finished: status={} exit_code={:?}",
            task_id,
            record.status,
            record.exit_code
        );

        self.finish(record, summary).await;
    }

    async fn is_pending(&self, task_id: &str) -> bool {
        let tables = self.inner.tables.lock().await;
        tables
            .live
            .get(task_id)
            .is_some_and(|t| t.record.status == TaskStatus::Pending)
    }

    /// Fail a task whose worker never launched, unless a cancel already
    /// finalized it.
    async fn fail_before_start(&self, task_id: &str, message: String) {
        let record = {
            let mut tables = self.inner.tables.lock().await;
            let Some(live) = tables
                .live
                .get_mut(task_id)
                .filter(|t| t.record.status == TaskStatus::Pending)
            else {
                tracing::debug!("Task {} was cancelled before its launch failed", task_id);
                return;
            };
            live.record.mark_failed(None, message);
            let record = live.record.clone();
            tables.archive(record.clone(), self.inner.config.max_completed);
            record
        };
        self.notify(&record, None).await;
    }

    /// Backfill session id and output from the worker's session transcript.
    async fn enrich(&self, record: &mut TaskRecord) -> Option<SessionSummary> {
        let dir = self.inner.config.sessions_dir.clone()?;
        let created_at = record.created_at;
        let completed_at = record.completed_at;

        let summary = tokio::task::spawn_blocking(move || {
            session::summary_for_window(&dir, created_at, completed_at)
        })
        .await
        .ok()
        .flatten()?;

        if record.session_id.is_none() && !summary.session_id.is_empty() {
            record.session_id = Some(summary.session_id.clone());
        }
        if record.output.is_none() {
            record.output = summary.last_assistant_message.clone();
        }
        Some(summary)
    }

    /// Archive a terminal record and send its notification.
    async fn finish(&self, record: TaskRecord, summary: Option<SessionSummary>) {
        let archived = {
            let mut tables = self.inner.tables.lock().await;
            tables.archive(record.clone(), self.inner.config.max_completed)
        };
        if archived {
            self.notify(&record, summary.as_ref()).await;
        }
    }

    async fn notify(&self, record: &TaskRecord, summary: Option<&SessionSummary>) {
        if !self.inner.notifier.is_empty() {
            let notification = Notification::from_task(record, summary);
            self.inner.notifier.dispatch(&notification).await;
        }
    }
}

/// Spawn the worker with piped stdout/stderr, mapping launch errors to the
/// text recorded on the task.
fn spawn_worker(program: &str, args: &[String], cwd: &Path) -> Result<Child, String> {
    if !cwd.is_dir() {
        return Err(format!("Working directory does not exist: {}", cwd.display()));
    }

    Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                format!("{} CLI not found. Is it installed and on PATH?", program)
            }
            _ => format!("Failed to start {}: {}", program, e),
        })
}

async fn read_stderr(stderr: Option<ChildStderr>) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut buf).await {
        tracing::warn!("Worker stderr read failed: {}", e);
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}

/// Wait for the worker to exit, forwarding cancellation requests as SIGTERM.
async fn wait_for_exit(
    child: &mut Child,
    cancel: &Notify,
    task_id: &str,
) -> std::io::Result<ExitStatus> {
    loop {
        tokio::select! {
            status = child.wait() => return status,
            _ = cancel.notified() => terminate(child, task_id),
        }
    }
}

/// Best-effort SIGTERM. A process that has already been reaped has no pid
/// and is left alone.
fn terminate(child: &mut Child, task_id: &str) {
    let Some(pid) = child.id() else {
        return;
    };

    #[cfg(unix)]
    {
        // SAFETY: `pid` belongs to a child we have not reaped yet.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            tracing::info!("Sent SIGTERM to task {} (pid {})", task_id, pid);
        }
    }

    #[cfg(not(unix))]
    {
        if child.start_kill().is_ok() {
            tracing::info!("Killed task {} (pid {})", task_id, pid);
        }
    }
}

/// Exit code, with death-by-signal reported as the negated signal number.
fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
