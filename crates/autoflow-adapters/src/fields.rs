//! Typed access to a resolved step configuration.
//!
//! Configurations arrive as JSON objects after template resolution. These
//! helpers validate required keys before any external call is made.

use serde_json::Value;

use crate::error::{AdapterError, Result};
use crate::operation::Operation;

/// Scalar text of `value`: strings as-is, numbers and booleans rendered.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// First non-blank text among `keys`.
pub fn optional_text(config: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| config.get(*key).and_then(scalar_text))
        .find(|text| !text.trim().is_empty())
}

/// Text for one of the accepted keys, or [`AdapterError::MissingField`]
/// naming the canonical key.
pub fn required_text(config: &Value, operation: Operation, keys: &'static [&'static str]) -> Result<String> {
    optional_text(config, keys).ok_or(AdapterError::MissingField {
        operation: operation.name(),
        field: keys.first().copied().unwrap_or("?"),
    })
}

/// Check every required field of `operation` up front.
pub fn check_required(config: &Value, operation: Operation) -> Result<()> {
    if !config.is_object() {
        return Err(AdapterError::InvalidConfig {
            operation: operation.name(),
            reason: "configuration must be an object".into(),
        });
    }
    for keys in operation.required_fields() {
        required_text(config, operation, keys)?;
    }
    Ok(())
}

/// Booleans, plus the strings `"true"`/`"false"` a template may produce.
pub fn optional_bool(config: &Value, key: &str) -> Option<bool> {
    match config.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn optional_u64(config: &Value, key: &str) -> Option<u64> {
    match config.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn optional_f64(config: &Value, key: &str) -> Option<f64> {
    match config.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_accepts_alias_and_numbers() {
        let config = json!({"to_email": "a@b.com", "chat_id": -100123});
        assert_eq!(
            required_text(&config, Operation::SendEmail, &["to", "to_email"]).unwrap(),
            "a@b.com"
        );
        assert_eq!(
            required_text(&config, Operation::SendMessage, &["chat_id"]).unwrap(),
            "-100123"
        );
    }

    #[test]
    fn blank_counts_as_missing() {
        let config = json!({"chat_id": "42", "message": "   "});
        let err = check_required(&config, Operation::SendMessage).unwrap_err();
        assert!(matches!(
            err,
            AdapterError::MissingField { field: "message", .. }
        ));
    }

    #[test]
    fn non_object_config_is_invalid() {
        let err = check_required(&json!("text"), Operation::FetchEmails).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidConfig { .. }));
    }

    #[test]
    fn loose_scalars_parse() {
        let config = json!({"html": "true", "max": "25", "temp": 0.2});
        assert_eq!(optional_bool(&config, "html"), Some(true));
        assert_eq!(optional_u64(&config, "max"), Some(25));
        assert_eq!(optional_f64(&config, "temp"), Some(0.2));
        assert_eq!(optional_u64(&config, "absent"), None);
    }
}
