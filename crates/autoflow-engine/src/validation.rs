//! Static checks on a workflow definition, run before it is stored.
//!
//! Adapters repeat the required-field checks at run time; this pass exists
//! so malformed workflows are rejected before any run starts.

use std::collections::{HashMap, HashSet};

use autoflow_adapters::{Integration, Operation};
use serde::Serialize;

use crate::config_value::ConfigValue;
use crate::model::{MAX_ACTION_STEPS, MAX_STEPS, Step, WorkflowDefinition};
use crate::template::referenced_steps;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn warning(&mut self, message: String) {
        self.warnings.push(message);
    }
}

pub fn validate(definition: &WorkflowDefinition) -> ValidationReport {
    let mut report = ValidationReport::default();

    if definition.id.trim().is_empty() {
        report.error("workflow id must not be empty".into());
    }
    if definition.steps.len() > MAX_STEPS {
        report.error(format!(
            "workflow has {} steps, at most {MAX_STEPS} are allowed",
            definition.steps.len()
        ));
    }

    let triggers: Vec<&Step> = definition.steps.iter().filter(|s| s.is_trigger()).collect();
    match triggers.as_slice() {
        [] => report.error("workflow has no trigger step".into()),
        [trigger] => {
            if Integration::from_name(&trigger.integration).is_none() {
                report.warning(format!(
                    "trigger step `{}` uses unknown integration `{}`",
                    trigger.id, trigger.integration
                ));
            }
        }
        many => report.error(format!(
            "workflow has {} trigger steps, exactly one is required",
            many.len()
        )),
    }

    let actions = definition.action_steps();
    if actions.is_empty() {
        report.error("workflow has no action steps".into());
    } else if actions.len() > MAX_ACTION_STEPS {
        report.error(format!(
            "workflow has {} action steps, at most {MAX_ACTION_STEPS} are allowed",
            actions.len()
        ));
    }

    check_duplicate_ids(definition, &mut report);
    check_duplicate_orders(&actions, &mut report);

    for (position, step) in actions.iter().enumerate() {
        check_action(step, position + 1, &mut report);
    }

    report
}

fn check_duplicate_ids(definition: &WorkflowDefinition, report: &mut ValidationReport) {
    let mut seen = HashSet::new();
    for step in &definition.steps {
        if !seen.insert(step.id.as_str()) {
            report.error(format!("duplicate step id `{}`", step.id));
        }
    }
}

fn check_duplicate_orders(actions: &[&Step], report: &mut ValidationReport) {
    let mut by_order: HashMap<u32, Vec<&str>> = HashMap::new();
    for step in actions {
        by_order.entry(step.order).or_default().push(&step.id);
    }
    let mut duplicated: Vec<_> = by_order.into_iter().filter(|(_, ids)| ids.len() > 1).collect();
    duplicated.sort_by_key(|(order, _)| *order);
    for (order, ids) in duplicated {
        report.warning(format!(
            "steps {} share order index {order}; they run in declaration order",
            ids.join(", ")
        ));
    }
}

fn check_action(step: &Step, position: usize, report: &mut ValidationReport) {
    let Some(operation) = Operation::lookup(&step.integration, &step.operation) else {
        report.error(format!(
            "step `{}`: unsupported integration/operation `{}.{}`",
            step.id, step.integration, step.operation
        ));
        return;
    };

    for keys in operation.required_fields() {
        let present = keys
            .iter()
            .any(|key| step.config.get(*key).is_some_and(|v| !v.is_empty()));
        if !present {
            report.error(format!(
                "step `{}`: missing required field `{}` for {operation}",
                step.id, keys[0]
            ));
        }
    }

    let config = ConfigValue::Record(step.config.clone());
    let mut flagged = HashSet::new();
    for text in config.strings() {
        for referenced in referenced_steps(text) {
            if referenced >= position && flagged.insert(referenced) {
                report.warning(format!(
                    "step `{}` (position {position}) references step {referenced}, which has not run yet; it will resolve to empty",
                    step.id
                ));
            } else if referenced == 0 && flagged.insert(0) {
                report.warning(format!(
                    "step `{}` references step 0; step references are 1-based",
                    step.id
                ));
            }
        }
    }
}
