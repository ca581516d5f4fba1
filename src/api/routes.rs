//! HTTP route handlers.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::notify::Dispatcher;
use crate::settings::ChannelSettings;
use crate::task::{CreateTaskRequest, Supervisor, SupervisorConfig, TaskRecord, TaskStatus};

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub supervisor: Supervisor,
    pub started: Instant,
}

impl AppState {
    pub fn new(supervisor: Supervisor) -> Self {
        Self {
            supervisor,
            started: Instant::now(),
        }
    }
}

/// Build the API router around `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:id", get(get_task).delete(cancel_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let settings = ChannelSettings::load_or_init(&config.settings_path());
    let notifier = Dispatcher::from_settings(&settings);
    let supervisor = Supervisor::new(SupervisorConfig::from(&config), notifier);
    let state = Arc::new(AppState::new(supervisor.clone()));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        "Server listening on {} (max_concurrent={}, max_completed={}, worker={})",
        addr,
        config.max_concurrent,
        config.max_completed,
        config.worker.binary
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling active tasks...");
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let uptime = state.started.elapsed().as_secs_f64();
    Json(HealthResponse {
        status: "ok".to_string(),
        pid: std::process::id(),
        active_tasks: state.supervisor.active_count().await,
        uptime_seconds: (uptime * 100.0).round() / 100.0,
    })
}

/// Submit a task. Returns 202 with the pending record.
async fn create_task(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskRecord>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::new(e.status(), e.body_text()))?;
    let record = state.supervisor.submit(req).await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// List tasks, newest first.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTasksQuery>,
) -> Json<Vec<TaskRecord>> {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<TaskStatus>() {
            Ok(status) => Some(status),
            // No record can carry an unknown status.
            Err(_) => return Json(Vec::new()),
        },
    };
    Json(state.supervisor.list(status).await)
}

/// Get a single task.
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    Ok(Json(state.supervisor.get(&id).await?))
}

/// Cancel a task. A running task is returned still `running`.
async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    Ok(Json(state.supervisor.cancel(&id).await?))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn spawn_app(script: &str, max_concurrent: usize) -> (String, Supervisor) {
        let supervisor = Supervisor::new(
            SupervisorConfig {
                max_concurrent,
                max_completed: 50,
                worker: WorkerConfig {
                    binary: "sh".into(),
                    launcher_args: vec!["-c".into(), script.into(), "codex".into()],
                },
                sessions_dir: None,
            },
            Dispatcher::disabled(),
        );
        let app = router(Arc::new(AppState::new(supervisor.clone())));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), supervisor)
    }

    async fn wait_terminal(client: &reqwest::Client, base: &str, id: &str) -> Value {
        for _ in 0..500 {
            let task: Value = client
                .get(format!("{}/tasks/{}", base, id))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if task["status"] == "completed" || task["status"] == "failed" {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("task {} never finished", id);
    }

    #[tokio::test]
    async fn test_health() {
        let (base, _sup) = spawn_app("exit 0", 4).await;
        let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(resp.status(), 200);

        let health: HealthResponse = resp.json().await.unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.pid, std::process::id());
        assert_eq!(health.active_tasks, 0);
    }

    #[tokio::test]
    async fn test_capacity_then_recovery() {
        let script = r#"sleep 0.3; printf '%s\n' '{"type":"item.completed","item":{"type":"agent_message","text":"done"}}'"#;
        let (base, _sup) = spawn_app(script, 1).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/tasks", base))
            .json(&json!({"prompt": "x"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);
        let first: Value = resp.json().await.unwrap();
        assert_eq!(first["status"], "pending");
        assert_eq!(first["workflow_mode"], "normal");
        assert_eq!(first["bridge_stage"], "none");

        let resp = client
            .post(format!("{}/tasks", base))
            .json(&json!({"prompt": "y"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 429);
        let err: ErrorResponse = resp.json().await.unwrap();
        assert!(err.detail.contains("Max concurrent tasks (1)"));

        let id = first["task_id"].as_str().unwrap();
        let done = wait_terminal(&client, &base, id).await;
        assert_eq!(done["status"], "completed");
        assert_eq!(done["output"], "done");

        let resp = client
            .post(format!("{}/tasks", base))
            .json(&json!({"prompt": "z"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);
    }

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let (base, _sup) = spawn_app("exit 0", 4).await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{}/tasks/nope", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let err: ErrorResponse = resp.json().await.unwrap();
        assert_eq!(err.detail, "Task nope not found");

        let resp = client
            .delete(format!("{}/tasks/nope", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_cancel_and_list_filters() {
        let (base, sup) = spawn_app("exec sleep 30", 4).await;
        let client = reqwest::Client::new();

        let created: Value = client
            .post(format!("{}/tasks", base))
            .json(&json!({"prompt": "x", "workflow_mode": "plan_bridge"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = created["task_id"].as_str().unwrap().to_string();

        let resp = client
            .delete(format!("{}/tasks/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let done = wait_terminal(&client, &base, &id).await;
        assert_eq!(done["status"], "failed");
        assert!(done["completed_at"].is_string());

        let failed: Vec<Value> = client
            .get(format!("{}/tasks?status=failed", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);

        let bogus: Vec<Value> = client
            .get(format!("{}/tasks?status=bogus", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(bogus.is_empty());

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_prompt_is_rejected() {
        let (base, sup) = spawn_app("exit 0", 4).await;
        let resp = reqwest::Client::new()
            .post(format!("{}/tasks", base))
            .json(&json!({"model": "m"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 422);
        let err: ErrorResponse = resp.json().await.unwrap();
        assert!(err.detail.contains("prompt"));
        assert!(sup.list(None).await.is_empty());
    }
}
