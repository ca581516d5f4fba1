//! Thin HTTP client for a running daemon, used by the CLI subcommands.

use anyhow::Context;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

use crate::api::types::ErrorResponse;
use crate::task::CreateTaskRequest;

const TIMEOUT: Duration = Duration::from_secs(10);

pub struct ListenerClient {
    base_url: String,
    http: reqwest::Client,
}

impl ListenerClient {
    pub fn new(host: &str, port: u16) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: format!("http://{}:{}", host, port),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> anyhow::Result<Value> {
        let resp = self.send(self.http.get(self.url("/health"))).await?;
        decode(resp).await
    }

    pub async fn submit(&self, req: &CreateTaskRequest) -> anyhow::Result<Value> {
        let resp = self.send(self.http.post(self.url("/tasks")).json(req)).await?;
        decode(resp).await
    }

    pub async fn list(&self, status: Option<&str>) -> anyhow::Result<Value> {
        let mut builder = self.http.get(self.url("/tasks"));
        if let Some(status) = status {
            builder = builder.query(&[("status", status)]);
        }
        let resp = self.send(builder).await?;
        decode(resp).await
    }

    pub async fn get(&self, task_id: &str) -> anyhow::Result<Value> {
        let resp = self
            .send(self.http.get(self.url(&format!("/tasks/{}", task_id))))
            .await?;
        decode(resp).await
    }

    pub async fn cancel(&self, task_id: &str) -> anyhow::Result<Value> {
        let resp = self
            .send(self.http.delete(self.url(&format!("/tasks/{}", task_id))))
            .await?;
        decode(resp).await
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> anyhow::Result<Response> {
        builder
            .send()
            .await
            .with_context(|| format!("codex-listener is not reachable at {}", self.base_url))
    }
}

/// Successful bodies are returned as JSON; error bodies become the `detail`
/// text when the daemon sent one.
async fn decode(resp: Response) -> anyhow::Result<Value> {
    let status = resp.status();
    if status.is_success() {
        return resp.json().await.context("Invalid JSON from codex-listener");
    }

    let text = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.detail)
        .unwrap_or(text);
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::NOT_FOUND => anyhow::bail!("{}", detail),
        _ => anyhow::bail!("HTTP {}: {}", status.as_u16(), detail),
    }
}
