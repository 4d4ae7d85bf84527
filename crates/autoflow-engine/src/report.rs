//! Step results and run reports.

use autoflow_adapters::StepErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The outcome of one executed action step. Never mutated once appended
/// to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    /// 1-based position in the run, as used by `{{steps.N...}}`.
    pub index: usize,
    /// Canonical integration name when known, otherwise as authored.
    pub integration: String,
    pub operation: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<StepErrorKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn is_failure(&self) -> bool {
        !self.success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every action step succeeded.
    Completed,
    /// A step failed and the remaining steps were not attempted.
    Halted,
    /// Another run of the same workflow was in flight.
    Skipped,
    /// The run never reached its steps (missing or disabled workflow).
    Failed,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Halted => "halted",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    /// Whether the run statistics should be updated for this outcome.
    pub fn is_recorded(self) -> bool {
        matches!(self, Self::Completed | Self::Halted)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The structured outcome of one run, produced on every path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub outcome: RunOutcome,
    pub executed_steps: usize,
    pub step_results: Vec<StepResult>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Report for a run that lost the execution lock.
    pub fn skipped(workflow_id: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::now_v7(),
            workflow_id: workflow_id.to_string(),
            outcome: RunOutcome::Skipped,
            executed_steps: 0,
            step_results: Vec::new(),
            success: false,
            error: None,
            started_at: now,
            finished_at: now,
        }
    }

    /// Report for a run that could not start its steps.
    pub fn failed(workflow_id: &str, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::now_v7(),
            workflow_id: workflow_id.to_string(),
            outcome: RunOutcome::Failed,
            executed_steps: 0,
            step_results: Vec::new(),
            success: false,
            error: Some(error.into()),
            started_at: now,
            finished_at: now,
        }
    }

    /// Assemble the report for a run that went through the step loop.
    pub fn from_steps(
        run_id: Uuid,
        workflow_id: &str,
        step_results: Vec<StepResult>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let success = step_results.iter().all(|r| r.success);
        let failing = step_results.iter().find(|r| r.is_failure());
        let outcome = if failing.is_some() {
            RunOutcome::Halted
        } else {
            RunOutcome::Completed
        };
        let error = failing.map(|step| {
            format!(
                "step {} ({}.{}) failed: {}",
                step.index,
                step.integration,
                step.operation,
                step.error.as_deref().unwrap_or("unknown error")
            )
        });

        Self {
            run_id,
            workflow_id: workflow_id.to_string(),
            outcome,
            executed_steps: step_results.len(),
            step_results,
            success,
            error,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.outcome == RunOutcome::Skipped
    }

    pub fn failing_step(&self) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.is_failure())
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(index: usize, success: bool) -> StepResult {
        StepResult {
            step_id: format!("s{index}"),
            index,
            integration: "chat".into(),
            operation: "send_message".into(),
            success,
            data: if success { json!({"message_id": 1}) } else { Value::Null },
            error: (!success).then(|| "credential: token expired".to_string()),
            error_kind: (!success).then_some(StepErrorKind::Credential),
            warnings: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 3,
        }
    }

    #[test]
    fn completed_when_all_steps_succeed() {
        let report = RunReport::from_steps(Uuid::now_v7(), "wf", vec![step(1, true), step(2, true)], Utc::now());
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(report.success);
        assert_eq!(report.executed_steps, 2);
        assert!(report.error.is_none());
    }

    #[test]
    fn halted_carries_failing_step_error() {
        let report = RunReport::from_steps(Uuid::now_v7(), "wf", vec![step(1, true), step(2, false)], Utc::now());
        assert_eq!(report.outcome, RunOutcome::Halted);
        assert!(!report.success);
        assert_eq!(report.failing_step().unwrap().index, 2);
        let error = report.error.unwrap();
        assert!(error.contains("step 2"), "{error}");
        assert!(error.contains("token expired"), "{error}");
    }

    #[test]
    fn skipped_is_not_an_error() {
        let report = RunReport::skipped("wf");
        assert!(report.is_skipped());
        assert_eq!(report.executed_steps, 0);
        assert!(report.error.is_none());
        assert!(!report.outcome.is_recorded());
    }

    #[test]
    fn serialized_shape() {
        let report = RunReport::from_steps(Uuid::now_v7(), "wf", vec![step(1, false)], Utc::now());
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["outcome"], "halted");
        assert_eq!(value["executed_steps"], 1);
        let first = &value["step_results"][0];
        assert_eq!(first["error_kind"], "credential");
        assert!(first.get("data").is_none());
        assert!(first.get("warnings").is_none());
    }
}
