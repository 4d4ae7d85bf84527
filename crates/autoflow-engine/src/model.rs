//! Workflow definitions: one trigger step plus an ordered chain of actions.
//!
//! Definitions are authored elsewhere and stored as JSON. Both the field
//! names used here and the column-style names of older exports
//! (`service_name`, `action_name`, `step_type`, `step_order`,
//! `configuration`) are accepted.

use serde::{Deserialize, Deserializer, Serialize};

use crate::config_value::{ConfigRecord, ConfigValue};
use crate::error::{EngineError, Result};

/// Hard cap on steps in one workflow, trigger included.
pub const MAX_STEPS: usize = 10;

/// Hard cap on action steps in one workflow.
pub const MAX_ACTION_STEPS: usize = 9;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    Trigger,
    Action,
}

/// A single trigger or action entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "step_type", alias = "type")]
    pub role: StepRole,
    /// Integration name as authored (`gmail`, `notion`, `ai`, ...).
    #[serde(alias = "service_name", alias = "service")]
    pub integration: String,
    #[serde(alias = "action_name", alias = "action")]
    pub operation: String,
    #[serde(default, alias = "configuration", deserialize_with = "record_or_json_text")]
    pub config: ConfigRecord,
    /// Position among action steps. Ignored for the trigger.
    #[serde(default, alias = "step_order")]
    pub order: u32,
}

impl Step {
    pub fn is_trigger(&self) -> bool {
        self.role == StepRole::Trigger
    }
}

/// A persisted workflow definition. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled", alias = "is_active")]
    pub enabled: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_enabled() -> bool {
    true
}

impl WorkflowDefinition {
    /// Parse a definition document and fill in blank step ids.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let mut definition: Self =
            serde_json::from_value(value).map_err(|e| EngineError::InvalidDefinition {
                reason: e.to_string(),
            })?;
        definition.normalize();
        Ok(definition)
    }

    /// Give every step without an id a positional one (`step-1`, ...).
    pub fn normalize(&mut self) {
        for (position, step) in self.steps.iter_mut().enumerate() {
            if step.id.trim().is_empty() {
                step.id = format!("step-{}", position + 1);
            }
        }
    }

    /// The first trigger step, if any.
    pub fn trigger_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.is_trigger())
    }

    /// Action steps in ascending order index. Ties keep declaration order.
    pub fn action_steps(&self) -> Vec<&Step> {
        let mut actions: Vec<&Step> = self.steps.iter().filter(|s| !s.is_trigger()).collect();
        actions.sort_by_key(|s| s.order);
        actions
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Older exports store the configuration as a JSON-encoded string.
fn record_or_json_text<'de, D>(deserializer: D) -> std::result::Result<ConfigRecord, D::Error>
where
    D: Deserializer<'de>,
{
    match ConfigValue::deserialize(deserializer)? {
        ConfigValue::Record(record) => Ok(record),
        ConfigValue::Null => Ok(ConfigRecord::new()),
        ConfigValue::String(text) if text.trim().is_empty() => Ok(ConfigRecord::new()),
        ConfigValue::String(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "step configuration must be a record, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_native_format() {
        let definition = WorkflowDefinition::from_json(json!({
            "id": "wf-1",
            "user_id": "u1",
            "name": "Notify",
            "steps": [
                {"id": "t", "role": "trigger", "integration": "gmail", "operation": "new_email"},
                {"id": "a", "role": "action", "integration": "telegram", "operation": "send_message",
                 "config": {"chat_id": "1", "message": "hi"}, "order": 1}
            ]
        }))
        .unwrap();

        assert!(definition.enabled);
        assert_eq!(definition.trigger_step().unwrap().id, "t");
        assert_eq!(definition.action_steps().len(), 1);
        assert_eq!(
            definition.action_steps()[0].config["message"],
            ConfigValue::from("hi")
        );
    }

    #[test]
    fn parses_column_style_export() {
        let definition = WorkflowDefinition::from_json(json!({
            "id": "wf-2",
            "steps": [
                {"step_type": "trigger", "service_name": "gmail", "action_name": "new_email", "step_order": 0},
                {"step_type": "action", "service_name": "notion", "action_name": "create_page",
                 "step_order": 1, "configuration": "{\"database_id\": \"db\", \"title\": \"{{subject}}\"}"}
            ]
        }))
        .unwrap();

        let actions = definition.action_steps();
        assert_eq!(actions[0].integration, "notion");
        assert_eq!(actions[0].config["database_id"], ConfigValue::from("db"));
        assert_eq!(actions[0].id, "step-2");
    }

    #[test]
    fn actions_sorted_by_order_index() {
        let definition = WorkflowDefinition::from_json(json!({
            "id": "wf-3",
            "steps": [
                {"id": "c", "role": "action", "integration": "ai", "operation": "process_text", "order": 3},
                {"id": "t", "role": "trigger", "integration": "gmail", "operation": "new_email"},
                {"id": "a", "role": "action", "integration": "ai", "operation": "process_text", "order": 1},
                {"id": "b", "role": "action", "integration": "ai", "operation": "process_text", "order": 1}
            ]
        }))
        .unwrap();

        let ids: Vec<&str> = definition.action_steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_non_record_configuration() {
        let err = WorkflowDefinition::from_json(json!({
            "id": "wf-4",
            "steps": [{"role": "action", "integration": "ai", "operation": "process_text", "config": [1, 2]}]
        }))
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDefinition { .. }));
    }
}
