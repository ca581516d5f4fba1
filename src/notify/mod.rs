//! Outbound task-completion notifications.
//!
//! Delivery is best-effort: the [`Dispatcher`] tries every configured
//! channel once and only logs failures. Nothing here can affect task state.

mod feishu;
mod format;
mod telegram;

pub use feishu::FeishuNotifier;
pub use format::{format_count, token_usage_line, truncate_message};
pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::session::SessionSummary;
use crate::settings::ChannelSettings;
use crate::task::{BridgeStage, TaskRecord, TaskStatus};

/// Per-request timeout for channel HTTP calls.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{channel} API rejected the request: {message}")]
    Rejected { channel: &'static str, message: String },

    #[error("Invalid channel configuration: {0}")]
    Config(String),
}

/// Everything a channel needs to describe a finished task.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub task_id: String,
    pub status: TaskStatus,
    pub assistant_message: Option<String>,
    pub total_tokens: Option<u64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub reasoning_tokens: Option<u64>,
    pub completed_at: Option<String>,
    pub bridge_stage: BridgeStage,
    pub bridge_questions: Option<Vec<String>>,
    pub bridge_plan: Option<String>,
}

impl Notification {
    /// Describe a terminal record, preferring the session transcript's
    /// assistant text and timestamps when one was found.
    pub fn from_task(record: &TaskRecord, summary: Option<&SessionSummary>) -> Self {
        let assistant_message = summary
            .and_then(|s| s.last_assistant_message.clone())
            .or_else(|| record.output.clone())
            .or_else(|| record.error.clone());
        let completed_at = summary
            .and_then(|s| s.completed_at.clone())
            .or_else(|| record.completed_at.map(|t| t.to_rfc3339()));

        Self {
            task_id: record.task_id.clone(),
            status: record.status,
            assistant_message,
            total_tokens: summary.and_then(|s| s.total_tokens),
            input_tokens: summary.and_then(|s| s.input_tokens),
            output_tokens: summary.and_then(|s| s.output_tokens),
            reasoning_tokens: summary.and_then(|s| s.reasoning_tokens),
            completed_at,
            bridge_stage: record.bridge_stage,
            bridge_questions: record.bridge_questions.clone(),
            bridge_plan: record.bridge_plan.clone(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// A delivery channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Fans a notification out to every configured channel.
#[derive(Clone, Default)]
pub struct Dispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// No channels; every dispatch is a no-op.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build notifiers for every active channel in `settings`.
    pub fn from_settings(settings: &ChannelSettings) -> Self {
        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

        if let Some(feishu) = settings.active_feishu() {
            match FeishuNotifier::new(feishu.clone()) {
                Ok(n) => notifiers.push(Arc::new(n)),
                Err(e) => tracing::warn!("Feishu notifier disabled: {}", e),
            }
        }
        if let Some(telegram) = settings.active_telegram() {
            match TelegramNotifier::new(telegram.clone()) {
                Ok(n) => notifiers.push(Arc::new(n)),
                Err(e) => tracing::warn!("Telegram notifier disabled: {}", e),
            }
        }

        tracing::info!("Notification channels enabled: {}", notifiers.len());
        Self { notifiers }
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Try each channel once; failures are logged and swallowed.
    pub async fn dispatch(&self, notification: &Notification) {
        for notifier in &self.notifiers {
            tracing::info!(
                "Sending {} notification for task {}",
                notifier.name(),
                notification.task_id
            );
            if let Err(e) = notifier.send(notification).await {
                tracing::warn!(
                    "{} notification failed for task {}: {}",
                    notifier.name(),
                    notification.task_id,
                    e
                );
            }
        }
    }
}
