//! Feishu (Lark) Open API channel: interactive card per recipient.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::format::{token_usage_line, truncate_message};
use super::{Notification, Notifier, NotifyError, REQUEST_TIMEOUT};
use crate::settings::FeishuSettings;
use crate::task::BridgeStage;

const TOKEN_URL: &str = "https://open.feishu.cn/open-apis/auth/v3/tenant_access_token/internal";
const SEND_MSG_URL: &str = "https://open.feishu.cn/open-apis/im/v1/messages";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    tenant_access_token: Option<String>,
}

impl ApiResponse {
    fn check(self) -> Result<Self, NotifyError> {
        if self.code != 0 {
            return Err(NotifyError::Rejected {
                channel: "Feishu",
                message: self.msg.unwrap_or_else(|| format!("code {}", self.code)),
            });
        }
        Ok(self)
    }
}

pub struct FeishuNotifier {
    settings: FeishuSettings,
    client: reqwest::Client,
}

impl FeishuNotifier {
    pub fn new(settings: FeishuSettings) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { settings, client })
    }

    async fn tenant_access_token(&self) -> Result<String, NotifyError> {
        let resp: ApiResponse = self
            .client
            .post(TOKEN_URL)
            .json(&json!({
                "app_id": self.settings.app_id,
                "app_secret": self.settings.app_secret,
            }))
            .send()
            .await?
            .json()
            .await?;

        resp.check()?.tenant_access_token.ok_or_else(|| NotifyError::Rejected {
            channel: "Feishu",
            message: "response carried no tenant_access_token".to_string(),
        })
    }

    async fn send_card(&self, token: &str, open_id: &str, card: &str) -> Result<(), NotifyError> {
        let resp: ApiResponse = self
            .client
            .post(SEND_MSG_URL)
            .query(&[("receive_id_type", "open_id")])
            .bearer_auth(token)
            .json(&json!({
                "receive_id": open_id,
                "msg_type": "interactive",
                "content": card,
            }))
            .send()
            .await?
            .json()
            .await?;
        resp.check().map(|_| ())
    }
}

#[async_trait]
impl Notifier for FeishuNotifier {
    fn name(&self) -> &str {
        "Feishu"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let token = self.tenant_access_token().await?;
        let card = build_card(notification).to_string();

        let mut last_err = None;
        for open_id in &self.settings.allow_from {
            match self.send_card(&token, open_id, &card).await {
                Ok(()) => tracing::info!("Feishu notification sent to {}", open_id),
                Err(e) => {
                    tracing::warn!("Feishu send failed to {}: {}", open_id, e);
                    last_err = Some(e);
                }
            }
        }
        last_err.map_or(Ok(()), Err)
    }
}

fn markdown_block(content: String) -> Value {
    json!({"tag": "div", "text": {"tag": "lark_md", "content": content}})
}

pub(crate) fn build_card(n: &Notification) -> Value {
    let ok = n.succeeded();
    let title = format!(
        "Codex Task {} — {}",
        n.task_id,
        if ok { "Completed" } else { "Failed" }
    );

    let mut meta = vec![format!("**Status:** {}", n.status)];
    if let Some(completed_at) = &n.completed_at {
        meta.push(format!("**Completed:** {}", completed_at));
    }

    let mut elements = vec![markdown_block(meta.join("\n")), json!({"tag": "hr"})];

    elements.push(match &n.assistant_message {
        Some(msg) if !msg.is_empty() => {
            markdown_block(format!("**Codex Response:**\n{}", truncate_message(msg)))
        }
        _ => markdown_block("**Codex Response:** (none)".to_string()),
    });

    match n.bridge_stage {
        BridgeStage::NeedsInput => {
            let questions: Vec<String> = n
                .bridge_questions
                .iter()
                .flatten()
                .enumerate()
                .map(|(i, q)| format!("{}. {}", i + 1, q))
                .collect();
            elements.push(markdown_block(format!(
                "**Plan needs input:**\n{}",
                questions.join("\n")
            )));
        }
        BridgeStage::PlanReady => {
            let plan = n.bridge_plan.as_deref().unwrap_or_default();
            elements.push(markdown_block(format!(
                "**Plan ready:**\n{}",
                truncate_message(plan)
            )));
        }
        BridgeStage::None => {}
    }

    elements.push(json!({"tag": "hr"}));

    if let Some(usage) = token_usage_line(
        n.total_tokens,
        n.input_tokens,
        n.output_tokens,
        n.reasoning_tokens,
    ) {
        elements.push(json!({
            "tag": "note",
            "elements": [{"tag": "lark_md", "content": format!("Token usage: {}", usage)}],
        }));
    }

    json!({
        "config": {"wide_screen_mode": true},
        "header": {
            "title": {"tag": "plain_text", "content": title},
            "template": if ok { "green" } else { "red" },
        },
        "elements": elements,
    })
}
