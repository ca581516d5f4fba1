//! Incremental parser for the worker's `--json` stdout stream.
//!
//! The worker writes one JSON event per line. Only two things matter to the
//! supervisor: the latest assistant message and the thread id announced at
//! startup. Everything else is ignored, and lines that are not JSON are
//! logged and skipped.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// What the stream yielded by the time stdout closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    pub last_message: Option<String>,
    pub session_id: Option<String>,
}

/// Line-at-a-time event accumulator.
#[derive(Debug, Default)]
pub struct StreamParser {
    outcome: StreamOutcome,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one raw stdout line.
    pub fn feed_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let event: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Skipping non-JSON worker line ({}): {}", e, truncate(line, 200));
                return;
            }
        };

        match event.get("type").and_then(Value::as_str) {
            Some("thread.started") => {
                if self.outcome.session_id.is_none() {
                    if let Some(id) = event
                        .get("thread_id")
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                    {
                        self.outcome.session_id = Some(id.to_string());
                    }
                }
            }
            Some("item.completed") => {
                if let Some(msg) = event.get("item").and_then(completed_item_text) {
                    self.set_message(msg);
                }
            }
            Some("response_item") => {
                if let Some(msg) = event.get("payload").and_then(assistant_message_text) {
                    self.set_message(msg);
                }
            }
            _ => {}
        }
    }

    fn set_message(&mut self, msg: String) {
        if !msg.is_empty() {
            self.outcome.last_message = Some(msg);
        }
    }

    pub fn finish(self) -> StreamOutcome {
        self.outcome
    }
}

/// Text of an `item.completed` item: a structured `message` or a plain
/// `agent_message`.
fn completed_item_text(item: &Value) -> Option<String> {
    match item.get("type").and_then(Value::as_str)? {
        "message" => Some(output_text(item)),
        "agent_message" => {
            let text = match item.get("text") {
                Some(Value::String(s)) => s.trim().to_string(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string().trim().to_string(),
            };
            Some(text)
        }
        _ => None,
    }
}

/// Text of an assistant `message` payload, as found in `response_item` events
/// and in session logs.
pub(crate) fn assistant_message_text(payload: &Value) -> Option<String> {
    if payload.get("type").and_then(Value::as_str) != Some("message") {
        return None;
    }
    if payload.get("role").and_then(Value::as_str) != Some("assistant") {
        return None;
    }
    Some(output_text(payload))
}

/// Join every `output_text` fragment of a message's `content`, in order.
fn output_text(message: &Value) -> String {
    let Some(parts) = message.get("content").and_then(Value::as_array) else {
        return String::new();
    };
    parts
        .iter()
        .filter(|p| p.get("type").and_then(Value::as_str) == Some("output_text"))
        .map(|p| p.get("text").and_then(Value::as_str).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Read `reader` until end-of-stream, feeding every line to a [`StreamParser`].
///
/// Invalid UTF-8 is replaced rather than rejected. A read error ends the
/// drain early with whatever was collected so far.
pub async fn drain<R>(reader: R) -> StreamOutcome
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut parser = StreamParser::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => parser.feed_line(&String::from_utf8_lossy(&buf)),
            Err(e) => {
                tracing::warn!("Worker stdout read failed: {}", e);
                break;
            }
        }
    }

    parser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_event(text: &str) -> String {
        serde_json::json!({
            "type": "item.completed",
            "item": {
                "type": "message",
                "content": [{"type": "output_text", "text": text}]
            }
        })
        .to_string()
    }

    #[test]
    fn test_last_message_wins() {
        let mut parser = StreamParser::new();
        parser.feed_line(&message_event("A"));
        parser.feed_line(&message_event("B"));
        assert_eq!(parser.finish().last_message.as_deref(), Some("B"));
    }

    #[test]
    fn test_output_text_fragments_joined_in_order() {
        let mut parser = StreamParser::new();
        parser.feed_line(
            r#"{"type":"item.completed","item":{"type":"message","content":[
                {"type":"output_text","text":"first"},
                {"type":"reasoning","text":"hidden"},
                {"type":"output_text","text":"second"}]}}"#
                .replace('\n', " ")
                .as_str(),
        );
        assert_eq!(
            parser.finish().last_message.as_deref(),
            Some("first\nsecond")
        );
    }

    #[test]
    fn test_agent_message_and_response_item() {
        let mut parser = StreamParser::new();
        parser.feed_line(r#"{"type":"item.completed","item":{"type":"agent_message","text":"  hi  "}}"#);
        assert_eq!(parser.outcome.last_message.as_deref(), Some("hi"));

        parser.feed_line(
            r#"{"type":"response_item","payload":{"type":"message","role":"assistant","content":[{"type":"output_text","text":"later"}]}}"#,
        );
        assert_eq!(parser.outcome.last_message.as_deref(), Some("later"));

        // User messages are not assistant output.
        parser.feed_line(
            r#"{"type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"output_text","text":"nope"}]}}"#,
        );
        assert_eq!(parser.finish().last_message.as_deref(), Some("later"));
    }

    #[test]
    fn test_empty_message_does_not_overwrite() {
        let mut parser = StreamParser::new();
        parser.feed_line(&message_event("kept"));
        parser.feed_line(&message_event("   "));
        assert_eq!(parser.finish().last_message.as_deref(), Some("kept"));
    }

    #[test]
    fn test_first_thread_id_is_kept() {
        let mut parser = StreamParser::new();
        parser.feed_line(r#"{"type":"thread.started","thread_id":"  "}"#);
        parser.feed_line(r#"{"type":"thread.started","thread_id":"t-1"}"#);
        parser.feed_line(r#"{"type":"thread.started","thread_id":"t-2"}"#);
        assert_eq!(parser.finish().session_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let mut parser = StreamParser::new();
        parser.feed_line("");
        parser.feed_line("not json at all");
        parser.feed_line("{\"type\":");
        parser.feed_line("[1,2,3]");
        assert_eq!(parser.finish(), StreamOutcome::default());
    }

    #[tokio::test]
    async fn test_drain_reads_to_end_of_stream() {
        let input = format!(
            "{}\n\nwarning: noise\n{}\n{}",
            r#"{"type":"thread.started","thread_id":"abc"}"#,
            message_event("one"),
            message_event("two"),
        );
        let outcome = drain(input.as_bytes()).await;
        assert_eq!(outcome.session_id.as_deref(), Some("abc"));
        assert_eq!(outcome.last_message.as_deref(), Some("two"));
    }
}
