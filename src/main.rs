//! codex-listener CLI - daemon and client entry point

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use codex_listener::client::ListenerClient;
use codex_listener::config::Config;
use codex_listener::task::{CreateTaskRequest, WorkflowMode};

/// Run Codex CLI tasks in the background behind a local HTTP API
#[derive(Parser, Debug)]
#[command(name = "codex-listener")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Daemon host (defaults to CODEX_LISTENER_HOST or 127.0.0.1)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Daemon port (defaults to CODEX_LISTENER_PORT or 19823)
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon in the foreground
    Serve {
        /// Maximum number of pending + running tasks
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// Number of finished tasks kept in history
        #[arg(long)]
        max_completed: Option<usize>,
    },
    /// Check whether the daemon is up
    Health,
    /// Submit a new task
    Submit {
        prompt: String,
        #[arg(long)]
        model: Option<String>,
        /// Working directory for the worker (defaults to the current directory)
        #[arg(long)]
        cwd: Option<String>,
        #[arg(long)]
        sandbox: Option<String>,
        #[arg(long)]
        reasoning_effort: Option<String>,
        /// Interpret the answer as a plan-bridge exchange
        #[arg(long)]
        plan_bridge: bool,
        /// Resume an earlier worker session
        #[arg(long, value_name = "SESSION")]
        resume: Option<String>,
        /// Task this one follows up on
        #[arg(long, value_name = "TASK")]
        parent: Option<String>,
    },
    /// List tasks, newest first
    List {
        /// pending, running, completed or failed
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one task
    Get { task_id: String },
    /// Cancel a task
    Cancel { task_id: String },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let mut config = Config::from_env()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    if let Command::Serve {
        max_concurrent,
        max_completed,
    } = args.command
    {
        if let Some(max) = max_concurrent {
            config.max_concurrent = max;
        }
        if let Some(max) = max_completed {
            config.max_completed = max;
        }
        config.validate()?;
        return codex_listener::api::serve(config).await;
    }

    match run_client(&config, args.command).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", json!({ "error": e.to_string() }));
            std::process::exit(1);
        }
    }
}

async fn run_client(config: &Config, command: Command) -> anyhow::Result<Value> {
    let client = ListenerClient::new(&config.host, config.port)?;

    match command {
        Command::Serve { .. } => anyhow::bail!("serve is not a client command"),
        Command::Health => client.health().await,
        Command::Submit {
            prompt,
            model,
            cwd,
            sandbox,
            reasoning_effort,
            plan_bridge,
            resume,
            parent,
        } => {
            let mut req = CreateTaskRequest::new(prompt);
            if let Some(model) = model {
                req.model = model;
            }
            req.cwd = match cwd {
                Some(cwd) => cwd,
                None => std::env::current_dir()?.to_string_lossy().into_owned(),
            };
            if let Some(sandbox) = sandbox {
                req.sandbox = sandbox;
            }
            if let Some(effort) = reasoning_effort {
                req.reasoning_effort = effort;
            }
            if plan_bridge {
                req.workflow_mode = WorkflowMode::PlanBridge;
            }
            req.resume_session_id = resume;
            req.parent_task_id = parent;
            client.submit(&req).await
        }
        Command::List { status } => client.list(status.as_deref()).await,
        Command::Get { task_id } => client.get(&task_id).await,
        Command::Cancel { task_id } => client.cancel(&task_id).await,
    }
}
