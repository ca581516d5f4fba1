//! Plan-bridge payload detection.
//!
//! In `plan_bridge` mode the worker is asked to embed a small JSON control
//! object in its free-text answer:
//!
//! ```json
//! {"bridge": "planmode.v1", "stage": "needs_input", "questions": ["Which env?"]}
//! ```
//!
//! The object may be the whole answer, sit inside a fenced code block, or be
//! buried in prose. Candidates are collected from all three places (in that
//! order) and the first one carrying the `planmode.v1` marker and a known
//! stage wins.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::record::{BridgeStage, TaskRecord};

/// Marker value of the `bridge` field.
pub const BRIDGE_MARKER: &str = "planmode.v1";

/// A recognised bridge control object.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgePayload(Map<String, Value>);

impl BridgePayload {
    fn from_candidate(obj: Map<String, Value>) -> Option<Self> {
        if obj.get("bridge").and_then(Value::as_str) != Some(BRIDGE_MARKER) {
            return None;
        }
        match obj.get("stage").and_then(Value::as_str) {
            Some("needs_input") | Some("plan_ready") => Some(Self(obj)),
            _ => None,
        }
    }

    /// Wrap an arbitrary object without validation.
    #[cfg(test)]
    pub(crate) fn from_object(obj: Map<String, Value>) -> Self {
        Self(obj)
    }

    pub fn stage(&self) -> Option<&str> {
        self.0.get("stage").and_then(Value::as_str)
    }

    pub fn as_object(&self) -> &Map<String, Value> {
        &self.0
    }
}

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)```(?:json)?\s*(\{[\s\S]*?\})\s*```").expect("valid fenced block regex")
    })
}

/// Find the first bridge payload in `text`.
pub fn extract(text: Option<&str>) -> Option<BridgePayload> {
    let text = text?;
    if text.is_empty() {
        return None;
    }

    candidates(text)
        .into_iter()
        .find_map(BridgePayload::from_candidate)
}

/// Every JSON object found in `text`: whole text, then fenced blocks, then a
/// left-to-right scan of the raw text.
fn candidates(text: &str) -> Vec<Map<String, Value>> {
    let mut found = Vec::new();

    let raw = text.trim();
    if raw.starts_with('{') && raw.ends_with('}') {
        if let Ok(Value::Object(obj)) = serde_json::from_str(raw) {
            found.push(obj);
        }
    }

    for caps in fenced_block_re().captures_iter(text) {
        match serde_json::from_str(caps[1].trim()) {
            Ok(Value::Object(obj)) => found.push(obj),
            Ok(_) => {}
            Err(e) => tracing::debug!("Ignoring malformed fenced JSON block: {}", e),
        }
    }

    found.extend(scan_objects(text));
    found
}

/// Decode one JSON value at every `{`, resuming after whatever it consumed.
fn scan_objects(text: &str) -> Vec<Map<String, Value>> {
    let mut found = Vec::new();
    let mut idx = 0;

    while let Some(rel) = text[idx..].find('{') {
        let start = idx + rel;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset().max(1);
                if let Value::Object(obj) = value {
                    found.push(obj);
                }
                idx = start + consumed;
            }
            _ => idx = start + 1,
        }
    }

    found
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Copy a payload's stage data into the record's bridge fields.
pub fn apply(record: &mut TaskRecord, payload: &BridgePayload) {
    let obj = payload.as_object();
    match payload.stage() {
        Some("needs_input") => {
            let questions = match obj.get("questions") {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|q| value_text(q).trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect(),
                _ => Vec::new(),
            };
            record.bridge_stage = BridgeStage::NeedsInput;
            record.bridge_questions = Some(questions);
            record.bridge_plan = None;
        }
        Some("plan_ready") => {
            // Some models answer with `plan` instead of `plan_markdown`.
            let plan = obj
                .get("plan_markdown")
                .filter(|v| !v.is_null())
                .or_else(|| obj.get("plan").filter(|v| !v.is_null()));
            let plan = match plan {
                Some(v @ Value::Object(_)) => {
                    serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
                }
                Some(v) => value_text(v).trim().to_string(),
                None => String::new(),
            };
            record.bridge_stage = BridgeStage::PlanReady;
            record.bridge_questions = None;
            record.bridge_plan = Some(plan);
        }
        _ => record.clear_bridge(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::record::CreateTaskRequest;
    use serde_json::json;

    fn record() -> TaskRecord {
        TaskRecord::new("t1".into(), &CreateTaskRequest::new("x"))
    }

    #[test]
    fn test_fenced_needs_input() {
        let text = "I need a few answers first.\n\n```json\n{\"bridge\":\"planmode.v1\",\"stage\":\"needs_input\",\"questions\":[\"Which env?\"]}\n```\n";
        let payload = extract(Some(text)).expect("payload");
        assert_eq!(payload.stage(), Some("needs_input"));

        let mut rec = record();
        apply(&mut rec, &payload);
        assert_eq!(rec.bridge_stage, BridgeStage::NeedsInput);
        assert_eq!(rec.bridge_questions, Some(vec!["Which env?".to_string()]));
        assert_eq!(rec.bridge_plan, None);
    }

    #[test]
    fn test_whole_text_plan_ready() {
        let text = r#"{"bridge":"planmode.v1","stage":"plan_ready","plan_markdown":"Step 1..."}"#;
        let payload = extract(Some(text)).expect("payload");

        let mut rec = record();
        rec.bridge_questions = Some(vec!["stale".into()]);
        apply(&mut rec, &payload);
        assert_eq!(rec.bridge_stage, BridgeStage::PlanReady);
        assert_eq!(rec.bridge_plan.as_deref(), Some("Step 1..."));
        assert_eq!(rec.bridge_questions, None);
    }

    #[test]
    fn test_payload_buried_in_prose_with_nesting() {
        let text = r#"Here is the plan {"bridge":"planmode.v1","stage":"plan_ready","plan":{"steps":[{"n":1}]}} hope it helps"#;
        let payload = extract(Some(text)).expect("payload");

        let mut rec = record();
        apply(&mut rec, &payload);
        let plan = rec.bridge_plan.unwrap();
        let parsed: Value = serde_json::from_str(&plan).unwrap();
        assert_eq!(parsed, json!({"steps": [{"n": 1}]}));
        assert!(plan.contains('\n'));
    }

    #[test]
    fn test_first_valid_candidate_wins() {
        let text = "{\"note\": \"not a bridge\"} then \
            {\"bridge\":\"planmode.v1\",\"stage\":\"done\"} then \
            {\"bridge\":\"planmode.v1\",\"stage\":\"needs_input\",\"questions\":[\"a\"]} and \
            {\"bridge\":\"planmode.v1\",\"stage\":\"plan_ready\",\"plan_markdown\":\"b\"}";
        let payload = extract(Some(text)).expect("payload");
        assert_eq!(payload.stage(), Some("needs_input"));
    }

    #[test]
    fn test_no_payload() {
        assert!(extract(None).is_none());
        assert!(extract(Some("")).is_none());
        assert!(extract(Some("plain answer { not json")).is_none());
        assert!(extract(Some(r#"{"bridge":"planmode.v2","stage":"plan_ready"}"#)).is_none());
    }

    #[test]
    fn test_questions_are_trimmed_and_filtered() {
        let payload = BridgePayload::from_object(
            json!({"bridge": BRIDGE_MARKER, "stage": "needs_input", "questions": ["  a ", "", "   ", 3]})
                .as_object()
                .unwrap()
                .clone(),
        );
        let mut rec = record();
        rec.bridge_plan = Some("old plan".into());
        apply(&mut rec, &payload);
        assert_eq!(rec.bridge_questions, Some(vec!["a".to_string(), "3".to_string()]));
        assert_eq!(rec.bridge_plan, None);
    }

    #[test]
    fn test_malformed_questions_become_empty() {
        let payload = BridgePayload::from_object(
            json!({"bridge": BRIDGE_MARKER, "stage": "needs_input", "questions": "which?"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let mut rec = record();
        apply(&mut rec, &payload);
        assert_eq!(rec.bridge_questions, Some(Vec::new()));
    }

    #[test]
    fn test_plan_ready_without_plan_is_empty_string() {
        let payload = BridgePayload::from_object(
            json!({"bridge": BRIDGE_MARKER, "stage": "plan_ready"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let mut rec = record();
        apply(&mut rec, &payload);
        assert_eq!(rec.bridge_plan.as_deref(), Some(""));
    }

    #[test]
    fn test_unknown_stage_resets_fields() {
        let payload = BridgePayload::from_object(
            json!({"bridge": BRIDGE_MARKER, "stage": "other"})
                .as_object()
                .unwrap()
                .clone(),
        );
        let mut rec = record();
        rec.bridge_stage = BridgeStage::PlanReady;
        rec.bridge_plan = Some("x".into());
        apply(&mut rec, &payload);
        assert_eq!(rec.bridge_stage, BridgeStage::None);
        assert_eq!(rec.bridge_plan, None);
        assert_eq!(rec.bridge_questions, None);
    }
}
