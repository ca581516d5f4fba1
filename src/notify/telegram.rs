//! Telegram Bot API channel.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::format::{token_usage_line, truncate_message};
use super::{Notification, Notifier, NotifyError, REQUEST_TIMEOUT};
use crate::settings::TelegramSettings;
use crate::task::BridgeStage;

const API_BASE: &str = "https://api.telegram.org";
const RULE: &str = "──────────────────────────────";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramNotifier {
    settings: TelegramSettings,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(settings: TelegramSettings) -> Result<Self, NotifyError> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(proxy) = settings.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| NotifyError::Config(format!("invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }
        Ok(Self {
            settings,
            client: builder.build()?,
        })
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", API_BASE, self.settings.token);
        let resp: ApiResponse = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "MarkdownV2",
            }))
            .send()
            .await?
            .json()
            .await?;

        if !resp.ok {
            return Err(NotifyError::Rejected {
                channel: "Telegram",
                message: resp.description.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "Telegram"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let text = build_message(notification);
        let mut last_err = None;
        for chat_id in &self.settings.allow_from {
            match self.send_message(chat_id, &text).await {
                Ok(()) => tracing::info!("Telegram notification sent to {}", chat_id),
                Err(e) => {
                    tracing::warn!("Telegram send failed to {}: {}", chat_id, e);
                    last_err = Some(e);
                }
            }
        }
        last_err.map_or(Ok(()), Err)
    }
}

/// Escape text for MarkdownV2 outside of code blocks.
fn escape_markdown_v2(text: &str) -> String {
    const SPECIAL: &[char] = &[
        '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.',
        '!',
    ];
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if SPECIAL.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Inside ``` blocks only backslash and backtick need escaping.
fn escape_code(text: &str) -> String {
    text.replace('\\', "\\\\").replace('`', "\\`")
}

pub(crate) fn build_message(n: &Notification) -> String {
    let emoji = if n.succeeded() { "✅" } else { "❌" };
    let mut lines = vec![
        format!("{} *Codex Task {}*", emoji, escape_markdown_v2(&n.task_id)),
        String::new(),
        format!("*Status:* {}", escape_markdown_v2(n.status.as_str())),
    ];
    if let Some(completed_at) = &n.completed_at {
        lines.push(format!("*Completed:* {}", escape_markdown_v2(completed_at)));
    }

    lines.extend([String::new(), RULE.to_string(), String::new()]);

    match &n.assistant_message {
        Some(msg) if !msg.is_empty() => {
            lines.push("*Codex Response:*".to_string());
            lines.push(format!("```\n{}\n```", escape_code(&truncate_message(msg))));
        }
        _ => lines.push("*Codex Response:* \\(none\\)".to_string()),
    }

    match n.bridge_stage {
        BridgeStage::NeedsInput => {
            lines.push(String::new());
            lines.push("*Plan needs input:*".to_string());
            for (i, q) in n.bridge_questions.iter().flatten().enumerate() {
                lines.push(escape_markdown_v2(&format!("{}. {}", i + 1, q)));
            }
        }
        BridgeStage::PlanReady => {
            lines.push(String::new());
            lines.push("*Plan ready:*".to_string());
            let plan = n.bridge_plan.as_deref().unwrap_or_default();
            lines.push(format!("```\n{}\n```", escape_code(&truncate_message(plan))));
        }
        BridgeStage::None => {}
    }

    lines.extend([String::new(), RULE.to_string(), String::new()]);

    if let Some(usage) = token_usage_line(
        n.total_tokens,
        n.input_tokens,
        n.output_tokens,
        n.reasoning_tokens,
    ) {
        lines.push(format!("📊 Token usage: {}", escape_markdown_v2(&usage)));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    fn notification() -> Notification {
        Notification {
            task_id: "ab12cd34".into(),
            status: TaskStatus::Completed,
            assistant_message: Some("use `cargo test`".into()),
            total_tokens: Some(1500),
            input_tokens: Some(1000),
            output_tokens: Some(500),
            reasoning_tokens: None,
            completed_at: Some("2026-01-01T00:00:00.5Z".into()),
            bridge_stage: BridgeStage::None,
            bridge_questions: None,
            bridge_plan: None,
        }
    }

    #[test]
    fn test_escape_markdown_v2() {
        assert_eq!(escape_markdown_v2("a.b-c!"), "a\\.b\\-c\\!");
        assert_eq!(escape_markdown_v2("plain"), "plain");
    }

    #[test]
    fn test_message_layout() {
        let text = build_message(&notification());
        assert!(text.starts_with("✅ *Codex Task ab12cd34*"));
        assert!(text.contains("*Completed:* 2026\\-01\\-01T00:00:00\\.5Z"));
        assert!(text.contains("```\nuse \\`cargo test\\`\n```"));
        assert!(text.contains("📊 Token usage: 1,500 total / 1,000 in / 500 out"));
    }

    #[test]
    fn test_message_with_questions_and_no_output() {
        let mut n = notification();
        n.status = TaskStatus::Failed;
        n.assistant_message = None;
        n.total_tokens = None;
        n.bridge_stage = BridgeStage::NeedsInput;
        n.bridge_questions = Some(vec!["Which env?".into()]);

        let text = build_message(&n);
        assert!(text.starts_with("❌"));
        assert!(text.contains("*Codex Response:* \\(none\\)"));
        assert!(text.contains("1\\. Which env?"));
        assert!(!text.contains("Token usage"));
    }
}
