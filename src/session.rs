//! Worker session log lookup.
//!
//! The worker keeps a JSONL transcript of every session under
//! `{sessions_dir}/YYYY/MM/DD/rollout-*.jsonl`. Those transcripts carry more
//! than the `--json` stdout stream: the full final assistant message and
//! cumulative token usage. The file for a task is located by modification
//! time, since the file name uses local time while task timestamps are UTC.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::task::stream::assistant_message_text;

/// Slack applied on both sides of the task's lifetime when matching mtimes.
const WINDOW_SLACK_SECS: i64 = 5;

/// What a session transcript tells us about a finished task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub last_assistant_message: Option<String>,
    pub total_tokens: Option<u64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub reasoning_tokens: Option<u64>,
    /// Timestamp of the last event in the transcript
    pub completed_at: Option<String>,
}

fn mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified: SystemTime = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

fn day_dir(root: &Path, day: DateTime<Utc>) -> PathBuf {
    root.join(day.format("%Y").to_string())
        .join(day.format("%m").to_string())
        .join(day.format("%d").to_string())
}

/// Find the transcript written during `[created_at, completed_at]`.
///
/// Scans the creation day and its neighbours (timezone edge cases), keeps
/// files whose mtime falls inside the task's lifetime give or take a few
/// seconds, and returns the one closest to completion.
pub fn find_session_file(
    sessions_dir: &Path,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
) -> Option<PathBuf> {
    let end = completed_at.unwrap_or_else(Utc::now);
    let window_start = created_at - Duration::seconds(WINDOW_SLACK_SECS);
    let window_end = end + Duration::seconds(WINDOW_SLACK_SECS);

    let mut candidates: Vec<(i64, PathBuf)> = Vec::new();

    for delta in [0, -1, 1] {
        let dir = day_dir(sessions_dir, created_at + Duration::days(delta));
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => {
                tracing::debug!("Session dir not found: {}", dir.display());
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_rollout = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("rollout-") && n.ends_with(".jsonl"))
                .unwrap_or(false);
            if !is_rollout {
                continue;
            }
            let Some(modified) = mtime(&path) else {
                continue;
            };
            if modified >= window_start && modified <= window_end {
                let distance = (modified - end).num_milliseconds().abs();
                candidates.push((distance, path));
            }
        }
    }

    if candidates.is_empty() {
        tracing::debug!(
            "No session file in window [{}, {}] under {}",
            window_start,
            window_end,
            sessions_dir.display()
        );
        return None;
    }

    candidates.sort_by_key(|(distance, _)| *distance);
    candidates.into_iter().next().map(|(_, path)| path)
}

/// Parse a transcript line by line.
///
/// Returns `None` when the file cannot be read or has no `session_meta`
/// event.
pub fn parse_session(path: &Path) -> Option<SessionSummary> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("Failed to read session file {}: {}", path.display(), e);
            return None;
        }
    };

    let mut session_id: Option<String> = None;
    let mut last_message: Option<String> = None;
    let mut usage: Option<Value> = None;
    let mut last_timestamp: Option<String> = None;

    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!("Stopped reading {}: {}", path.display(), e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };

        last_timestamp = event
            .get("timestamp")
            .and_then(Value::as_str)
            .map(str::to_string);
        let payload = event.get("payload");

        match event.get("type").and_then(Value::as_str) {
            Some("session_meta") if session_id.is_none() => {
                session_id = Some(
                    payload
                        .and_then(|p| p.get("id"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                );
            }
            Some("response_item") => {
                if let Some(msg) = payload.and_then(assistant_message_text) {
                    if !msg.is_empty() {
                        last_message = Some(msg);
                    }
                }
            }
            Some("event_msg") => {
                let total = payload
                    .filter(|p| p.get("type").and_then(Value::as_str) == Some("token_count"))
                    .and_then(|p| p.get("info"))
                    .and_then(|info| info.get("total_token_usage"))
                    .filter(|u| u.is_object());
                if let Some(total) = total {
                    usage = Some(total.clone());
                }
            }
            _ => {}
        }
    }

    let Some(session_id) = session_id else {
        tracing::warn!("No session_meta found in {}", path.display());
        return None;
    };

    let count = |key: &str| usage.as_ref().and_then(|u| u.get(key)).and_then(Value::as_u64);

    Some(SessionSummary {
        session_id,
        last_assistant_message: last_message,
        total_tokens: count("total_tokens"),
        input_tokens: count("input_tokens"),
        output_tokens: count("output_tokens"),
        reasoning_tokens: count("reasoning_output_tokens"),
        completed_at: last_timestamp,
    })
}

/// Locate and parse the transcript for a task's lifetime.
pub fn summary_for_window(
    sessions_dir: &Path,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
) -> Option<SessionSummary> {
    let path = find_session_file(sessions_dir, created_at, completed_at)?;
    tracing::info!("Parsing session file: {}", path.display());
    parse_session(&path)
}
