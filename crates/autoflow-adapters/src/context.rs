//! Per-run execution context.
//!
//! An [`ExecutionContext`] is created from the trigger payload at the start
//! of a run, mutated only by the run that owns it (text generation writes
//! its output into [`ExecutionContext::variables`], the engine publishes
//! per-step keys after each successful step) and dropped when the run
//! finishes.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

/// Flat variable map used by `{{name}}` placeholders.
pub type Variables = BTreeMap<String, Value>;

/// The message that triggered a run, kept for reply-style operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRef {
    pub message_id: String,
    pub thread_id: Option<String>,
    pub sender: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub user_id: String,
    pub run_id: Uuid,
    /// The trigger payload as received. Non-object payloads become empty.
    pub trigger: Map<String, Value>,
    pub variables: Variables,
    pub trigger_message: Option<MessageRef>,
}

impl ExecutionContext {
    /// Build the context for a new run and seed its variables.
    ///
    /// Seeded keys: `subject`, `sender`, `from`, `body`, `timestamp`,
    /// `date`, `time`, `workflow_id`, `user_id` and `trigger` (the raw
    /// payload). Other payload keys stay reachable through `trigger.*`.
    pub fn from_trigger(workflow_id: &str, user_id: &str, payload: &Value) -> Self {
        let trigger = match payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                debug!(payload_type = %json_type(other), "ignoring non-object trigger payload");
                Map::new()
            }
        };

        let mut variables = Variables::new();
        let trigger_message = seed_message(&mut variables, &trigger);
        variables.insert("workflow_id".into(), Value::String(workflow_id.to_string()));
        variables.insert("user_id".into(), Value::String(user_id.to_string()));
        variables.insert("trigger".into(), Value::Object(trigger.clone()));

        Self {
            workflow_id: workflow_id.to_string(),
            user_id: user_id.to_string(),
            run_id: Uuid::now_v7(),
            trigger,
            variables,
            trigger_message,
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Make a fetched message the run's current message: the seeded
    /// message keys are rewritten from it and, when it carries an id, it
    /// becomes the target of later reply operations.
    pub fn adopt_message(&mut self, message: &Map<String, Value>) {
        if let Some(reference) = seed_message(&mut self.variables, message) {
            self.trigger_message = Some(reference);
        }
    }
}

/// Write `subject`, `sender`, `from`, `body`, `timestamp`, `date` and `time`
/// from a message record, returning its reference when it has an id.
fn seed_message(variables: &mut Variables, fields: &Map<String, Value>) -> Option<MessageRef> {
    let text = |key: &str| fields.get(key).and_then(value_text);

    let subject = text("subject").unwrap_or_default();
    let from = text("from").or_else(|| text("sender")).unwrap_or_default();
    let sender = text("sender")
        .or_else(|| text("from"))
        .map(|s| extract_address(&s))
        .unwrap_or_default();
    let body = text("body")
        .or_else(|| text("snippet"))
        .unwrap_or_default();

    let (timestamp, at) = match text("timestamp") {
        Some(raw) => {
            let parsed = parse_timestamp(&raw).unwrap_or_else(|| {
                debug!(timestamp = %raw, "unrecognised timestamp, using current time");
                Utc::now()
            });
            (raw, parsed)
        }
        None => {
            let now = Utc::now();
            (now.to_rfc3339(), now)
        }
    };

    variables.insert("subject".into(), Value::String(subject.clone()));
    variables.insert("sender".into(), Value::String(sender.clone()));
    variables.insert("from".into(), Value::String(from));
    variables.insert("body".into(), Value::String(body));
    variables.insert("timestamp".into(), Value::String(timestamp));
    variables.insert(
        "date".into(),
        Value::String(at.format("%Y-%m-%d").to_string()),
    );
    variables.insert(
        "time".into(),
        Value::String(at.format("%H:%M:%S").to_string()),
    );

    text("message_id").or_else(|| text("id")).map(|id| MessageRef {
        message_id: id,
        thread_id: text("thread_id").or_else(|| text("threadId")),
        sender: Some(sender).filter(|s| !s.is_empty()),
        subject: Some(subject).filter(|s| !s.is_empty()),
    })
}

/// RFC 3339 first, then zone-less ISO 8601 forms read as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// `"Alice <alice@example.com>"` becomes `"alice@example.com"`; anything
/// without angle brackets is returned trimmed.
pub fn extract_address(raw: &str) -> String {
    match (raw.rfind('<'), raw.rfind('>')) {
        (Some(open), Some(close)) if open < close => raw[open + 1..close].trim().to_string(),
        _ => raw.trim().to_string(),
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
