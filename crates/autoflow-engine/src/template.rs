//! Placeholder expansion for step configurations.
//!
//! Two placeholder forms are recognised inside configuration strings:
//!
//! - `{{name}}` reads the run's variable map. Dotted names (`trigger.to`)
//!   try the literal key first and then walk nested records and lists.
//! - `{{steps.N.field}}` / `{{steps.N.field.subfield}}` read the result of
//!   the N-th (1-based) step already executed in this run.
//!
//! Unresolvable placeholders become the empty string and produce a
//! [`ResolutionWarning`]; resolution never fails. Each string is scanned
//! once and substituted text is not scanned again, so a string without
//! placeholders comes back unchanged and a variable whose value holds
//! placeholder text (an email body, generated text) is inserted verbatim.

use std::fmt;
use std::sync::OnceLock;

use autoflow_adapters::{Integration, Variables};
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::config_value::{ConfigRecord, ConfigValue};
use crate::report::StepResult;

/// Acknowledgement returned by `{{steps.N.output}}` for chat steps.
pub const CHAT_ACKNOWLEDGEMENT: &str = "Message sent successfully";

/// An unresolved placeholder. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionWarning {
    pub placeholder: String,
    pub reason: String,
}

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.placeholder, self.reason)
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("static pattern"))
}

fn step_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^steps\.(\d+)\.([A-Za-z0-9_]+)(?:\.([A-Za-z0-9_-]+))?$")
            .expect("static pattern")
    })
}

fn variable_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*(?:\.[A-Za-z0-9_-]+)*$").expect("static pattern")
    })
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves placeholders against one run's variables and prior results.
pub struct TemplateResolver<'a> {
    variables: &'a Variables,
    prior: &'a [StepResult],
}

impl<'a> TemplateResolver<'a> {
    pub fn new(variables: &'a Variables, prior: &'a [StepResult]) -> Self {
        Self { variables, prior }
    }

    /// Resolve every string in a configuration record. Keys are kept as is.
    pub fn resolve_record(&self, record: &ConfigRecord) -> (ConfigRecord, Vec<ResolutionWarning>) {
        let mut warnings = Vec::new();
        let resolved = record
            .iter()
            .map(|(key, value)| (key.clone(), self.resolve_into(value, &mut warnings)))
            .collect();
        (resolved, warnings)
    }

    pub fn resolve_value(&self, value: &ConfigValue) -> (ConfigValue, Vec<ResolutionWarning>) {
        let mut warnings = Vec::new();
        let resolved = self.resolve_into(value, &mut warnings);
        (resolved, warnings)
    }

    pub fn resolve_str(&self, text: &str) -> (String, Vec<ResolutionWarning>) {
        let mut warnings = Vec::new();
        let resolved = self.resolve_text(text, &mut warnings);
        (resolved, warnings)
    }

    fn resolve_into(&self, value: &ConfigValue, warnings: &mut Vec<ResolutionWarning>) -> ConfigValue {
        match value {
            ConfigValue::String(text) => ConfigValue::String(self.resolve_text(text, warnings)),
            ConfigValue::List(items) => ConfigValue::List(
                items
                    .iter()
                    .map(|item| self.resolve_into(item, warnings))
                    .collect(),
            ),
            ConfigValue::Record(fields) => ConfigValue::Record(
                fields
                    .iter()
                    .map(|(key, item)| (key.clone(), self.resolve_into(item, warnings)))
                    .collect(),
            ),
            ConfigValue::Null | ConfigValue::Bool(_) | ConfigValue::Number(_) => value.clone(),
        }
    }

    fn resolve_text(&self, text: &str, warnings: &mut Vec<ResolutionWarning>) -> String {
        if !text.contains("{{") {
            return text.to_string();
        }
        placeholder_regex()
            .replace_all(text, |caps: &Captures<'_>| {
                let placeholder = &caps[0];
                let expression = &caps[1];
                match self.expand(expression) {
                    Expansion::Value(value) => value,
                    Expansion::Missing(reason) => {
                        warnings.push(ResolutionWarning {
                            placeholder: placeholder.to_string(),
                            reason,
                        });
                        String::new()
                    }
                    Expansion::Literal => placeholder.to_string(),
                }
            })
            .into_owned()
    }

    fn expand(&self, expression: &str) -> Expansion {
        if let Some(rest) = expression.strip_prefix("steps.") {
            return match step_reference_regex().captures(expression) {
                Some(caps) => {
                    let field = caps.get(2).map_or("", |m| m.as_str());
                    let subfield = caps.get(3).map(|m| m.as_str());
                    match caps[1].parse::<usize>() {
                        Ok(index) => self.step_reference(index, field, subfield),
                        Err(_) => Expansion::Missing(format!("step index `{}` is not a number", &caps[1])),
                    }
                }
                None => Expansion::Missing(format!("malformed step reference `steps.{rest}`")),
            };
        }
        if variable_name_regex().is_match(expression) {
            return self.variable(expression);
        }
        Expansion::Literal
    }

    // -----------------------------------------------------------------------
    // {{name}}
    // -----------------------------------------------------------------------

    fn variable(&self, name: &str) -> Expansion {
        if let Some(value) = self.variables.get(name) {
            return Expansion::Value(value_text(value));
        }

        let mut segments = name.split('.');
        let root = segments.next().unwrap_or(name);
        let Some(mut current) = self.variables.get(root) else {
            return Expansion::Missing(format!("variable `{name}` is not set"));
        };
        for segment in segments {
            match child(current, segment) {
                Some(next) => current = next,
                None => {
                    return Expansion::Missing(format!(
                        "variable `{name}` has no field `{segment}`"
                    ));
                }
            }
        }
        Expansion::Value(value_text(current))
    }

    // -----------------------------------------------------------------------
    // {{steps.N.field[.subfield]}}
    // -----------------------------------------------------------------------

    fn step_reference(&self, index: usize, field: &str, subfield: Option<&str>) -> Expansion {
        if index == 0 || index > self.prior.len() {
            return Expansion::Missing(format!(
                "step {index} has not run ({} earlier result(s) available)",
                self.prior.len()
            ));
        }
        let result = &self.prior[index - 1];

        match (field, subfield) {
            ("output", None) => Expansion::Value(primary_output(result)),
            ("data", None) => Expansion::Value(value_text(&result.data)),
            ("service", None) => Expansion::Value(result.integration.clone()),
            ("action", None) => Expansion::Value(result.operation.clone()),
            ("success", None) => Expansion::Value(result.success.to_string()),
            ("data" | "output", Some(key)) => payload_field(result, index, key, None),
            (key, sub) => payload_field(result, index, key, sub),
        }
    }
}

enum Expansion {
    Value(String),
    Missing(String),
    /// Not placeholder grammar: leave the text untouched.
    Literal,
}

fn payload_field(result: &StepResult, index: usize, key: &str, subfield: Option<&str>) -> Expansion {
    let Some(mut value) = result.data.get(key) else {
        return Expansion::Missing(format!("step {index} result has no field `{key}`"));
    };
    if let Some(sub) = subfield {
        match child(value, sub) {
            Some(next) => value = next,
            None => {
                return Expansion::Missing(format!("step {index} field `{key}` has no `{sub}`"));
            }
        }
    }
    Expansion::Value(value_text(value))
}

/// The value `{{steps.N.output}}` stands for.
pub fn primary_output(result: &StepResult) -> String {
    let data = &result.data;
    let first_text = |keys: &[&str]| {
        keys.iter()
            .filter_map(|key| data.get(*key))
            .find(|value| !value_text(value).is_empty())
            .map(value_text)
    };

    let specific = match Integration::from_name(&result.integration) {
        Some(Integration::TextGeneration) => first_text(&["content"]),
        Some(Integration::Mail) => first_text(&["message_id", "thread_id"]).or_else(|| {
            data.pointer("/emails/0/id").map(value_text)
        }),
        Some(Integration::Notes) => first_text(&["page_id", "pageId", "id", "url"]),
        Some(Integration::Chat) => Some(CHAT_ACKNOWLEDGEMENT.to_string()),
        None => None,
    };

    specific
        .or_else(|| first_text(&["result", "output"]))
        .unwrap_or_else(|| value_text(data))
}

/// Flat `step_N_*` variables published once step N has succeeded, so a
/// later step can write `{{step_N_output}}` as well as `{{steps.N.output}}`.
pub fn step_variables(result: &StepResult) -> Vec<(String, Value)> {
    if !result.success {
        return Vec::new();
    }
    let prefix = format!("step_{}", result.index);
    let data = &result.data;
    let mut vars = vec![(
        format!("{prefix}_output"),
        Value::String(primary_output(result)),
    )];
    let mut publish = |suffix: &str, key: &str| {
        if let Some(value) = data.get(key).filter(|v| !v.is_null()) {
            vars.push((format!("{prefix}_{suffix}"), value.clone()));
        }
    };

    match Integration::from_name(&result.integration) {
        Some(Integration::TextGeneration) => publish("ai_content", "content"),
        Some(Integration::Mail) if data.get("emails").is_none() => {
            publish("message_id", "message_id");
        }
        Some(Integration::Notes) if data.get("page_id").is_some() => {
            publish("notion_page_id", "page_id");
            publish("notion_url", "url");
        }
        Some(Integration::Chat) => publish("telegram_sent", "successful_sends"),
        _ => {}
    }
    vars
}

/// The first email of a successful mail fetch.
pub fn fetched_message(result: &StepResult) -> Option<&Map<String, Value>> {
    let is_mail = matches!(
        Integration::from_name(&result.integration),
        Some(Integration::Mail)
    );
    if !result.success || !is_mail {
        return None;
    }
    result.data.pointer("/emails/0").and_then(Value::as_object)
}

fn child<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// String form used for substitution: strings verbatim, `null` as empty,
/// everything else as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Step indices referenced by `{{steps.N...}}` placeholders in `text`.
pub fn referenced_steps(text: &str) -> Vec<usize> {
    placeholder_regex()
        .captures_iter(text)
        .filter_map(|caps| step_reference_regex().captures(&caps[1]).map(|c| c[1].to_string()))
        .filter_map(|n| n.parse().ok())
        .collect()
}
