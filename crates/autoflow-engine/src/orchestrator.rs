//! Pipeline orchestrator.
//!
//! One run moves through
//! `Idle -> LockAttempt -> (Skipped | ContextBuilt) -> StepLoop -> (Halted | Completed) -> Finalized`:
//!
//! 1. Take the per-workflow [`ExecutionLock`]; if it is held the run is
//!    reported as skipped and nothing else happens.
//! 2. Seed an [`ExecutionContext`] from the trigger payload.
//! 3. For each action step in order: resolve its configuration against the
//!    context and earlier results, dispatch it and append the
//!    [`StepResult`]. A successful step publishes its `step_N_*` variables
//!    (and a mail fetch makes its first email the current message). The
//!    first failure halts the run.
//! 4. Release the lock, build the [`RunReport`] and hand halted or
//!    completed runs to the [`RunRecorder`].
//!
//! The orchestrator never retries; only the text-generation adapter does.

use std::sync::Arc;
use std::time::Instant;

use autoflow_adapters::{AdapterError, ExecutionContext, Integration, Operation, StepErrorKind};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::config_value::record_to_json;
use crate::dispatch::AdapterSet;
use crate::error::{EngineError, Result};
use crate::lock::ExecutionLock;
use crate::model::{Step, WorkflowDefinition};
use crate::persistence::{RunRecorder, WorkflowSource};
use crate::report::{RunReport, StepResult};
use crate::template::{TemplateResolver, fetched_message, step_variables};

/// Runs workflows. Cheaply cloneable; clones share the execution lock.
#[derive(Clone)]
pub struct Orchestrator {
    adapters: AdapterSet,
    lock: ExecutionLock,
    source: Option<Arc<dyn WorkflowSource>>,
    recorder: Option<Arc<dyn RunRecorder>>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(adapters: AdapterSet) -> Self {
        Self {
            adapters,
            lock: ExecutionLock::new(),
            source: None,
            recorder: None,
            config: EngineConfig::default(),
        }
    }

    /// Share an existing lock registry with other orchestrators.
    pub fn with_lock(mut self, lock: ExecutionLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn WorkflowSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn RunRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn lock(&self) -> &ExecutionLock {
        &self.lock
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Load `workflow_id` from the configured source and run it.
    ///
    /// A missing or disabled workflow yields a `failed` report that is not
    /// recorded.
    #[instrument(skip(self, trigger))]
    pub async fn run_workflow(&self, workflow_id: &str, trigger: &Value) -> RunReport {
        let Some(guard) = self.lock.guard(workflow_id) else {
            info!(workflow_id, "workflow already running, skipping");
            return RunReport::skipped(workflow_id);
        };

        let definition = match self.load(workflow_id).await {
            Ok(definition) => definition,
            Err(error) => {
                warn!(workflow_id, error = %error, "workflow could not be started");
                return RunReport::failed(workflow_id, error.to_string());
            }
        };

        let report = self.execute(&definition, trigger).await;
        drop(guard);
        self.finalize(report).await
    }

    /// Run an already loaded definition, enabled or not.
    #[instrument(skip(self, definition, trigger), fields(workflow_id = %definition.id))]
    pub async fn run_definition(&self, definition: &WorkflowDefinition, trigger: &Value) -> RunReport {
        let Some(guard) = self.lock.guard(&definition.id) else {
            info!(workflow_id = %definition.id, "workflow already running, skipping");
            return RunReport::skipped(&definition.id);
        };

        let report = self.execute(definition, trigger).await;
        drop(guard);
        self.finalize(report).await
    }

    async fn load(&self, workflow_id: &str) -> Result<WorkflowDefinition> {
        let Some(source) = &self.source else {
            return Err(EngineError::SourceUnavailable);
        };
        match source.load(workflow_id).await? {
            Some(definition) if definition.enabled => Ok(definition),
            Some(_) => Err(EngineError::WorkflowDisabled {
                workflow_id: workflow_id.to_string(),
            }),
            None => Err(EngineError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Step loop
    // -----------------------------------------------------------------------

    async fn execute(&self, definition: &WorkflowDefinition, trigger: &Value) -> RunReport {
        let started_at = Utc::now();
        let mut ctx = ExecutionContext::from_trigger(&definition.id, &definition.user_id, trigger);
        let run_id = ctx.run_id;
        let actions = definition.action_steps();

        info!(
            workflow_id = %definition.id,
            %run_id,
            steps = actions.len(),
            "starting workflow run"
        );

        let mut results: Vec<StepResult> = Vec::with_capacity(actions.len());
        for (position, step) in actions.into_iter().enumerate() {
            let result = self.run_step(step, position + 1, &mut ctx, &results).await;
            let failed = result.is_failure();
            if !failed {
                publish_step_outputs(&mut ctx, &result);
            }
            results.push(result);
            if failed {
                break;
            }
        }

        let report = RunReport::from_steps(run_id, &definition.id, results, started_at);
        info!(
            workflow_id = %definition.id,
            %run_id,
            outcome = %report.outcome,
            executed_steps = report.executed_steps,
            success = report.success,
            "workflow run finished"
        );
        report
    }

    async fn run_step(
        &self,
        step: &Step,
        index: usize,
        ctx: &mut ExecutionContext,
        prior: &[StepResult],
    ) -> StepResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let integration_name = Integration::from_name(&step.integration)
            .map_or_else(|| step.integration.clone(), |i| i.as_str().to_string());

        let (resolved, warnings) = TemplateResolver::new(&ctx.variables, prior).resolve_record(&step.config);
        for warning in &warnings {
            warn!(
                step = index,
                placeholder = %warning.placeholder,
                reason = %warning.reason,
                "unresolved placeholder"
            );
        }

        let mut result = StepResult {
            step_id: step.id.clone(),
            index,
            integration: integration_name,
            operation: step.operation.clone(),
            success: false,
            data: Value::Null,
            error: None,
            error_kind: None,
            warnings: warnings.iter().map(ToString::to_string).collect(),
            started_at,
            duration_ms: 0,
        };

        let outcome = match Operation::lookup(&step.integration, &step.operation) {
            Some(operation) => {
                result.operation = operation.name().to_string();
                debug!(step = index, %operation, "dispatching step");
                let config = record_to_json(resolved);
                match tokio::time::timeout(
                    self.config.step_timeout,
                    self.adapters.dispatch(operation, &config, ctx),
                )
                .await
                {
                    Ok(outcome) => outcome.map_err(|e| StepFailure::from(&e)),
                    Err(_) => Err(StepFailure::from(&AdapterError::Timeout {
                        seconds: self.config.step_timeout.as_secs(),
                        reason: format!("step {index} exceeded the step timeout"),
                    })),
                }
            }
            None => Err(StepFailure {
                kind: StepErrorKind::Unsupported,
                message: format!(
                    "unsupported integration/operation `{}.{}`",
                    step.integration, step.operation
                ),
            }),
        };

        result.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(data) => {
                info!(
                    step = index,
                    integration = %result.integration,
                    operation = %result.operation,
                    duration_ms = result.duration_ms,
                    "step succeeded"
                );
                result.success = true;
                result.data = data;
            }
            Err(failure) => {
                warn!(
                    step = index,
                    integration = %result.integration,
                    operation = %result.operation,
                    error_kind = %failure.kind,
                    error = %failure.message,
                    "step failed, halting run"
                );
                result.error = Some(format!("{}: {}", failure.kind, failure.message));
                result.error_kind = Some(failure.kind);
            }
        }
        result
    }

    // -----------------------------------------------------------------------
    // Finalize
    // -----------------------------------------------------------------------

    async fn finalize(&self, report: RunReport) -> RunReport {
        if !report.outcome.is_recorded() {
            return report;
        }
        if let Some(recorder) = &self.recorder {
            if let Err(error) = recorder.record(&report).await {
                warn!(
                    workflow_id = %report.workflow_id,
                    run_id = %report.run_id,
                    error = %error,
                    "failed to record run"
                );
            }
        }
        report
    }
}

/// Flat variables a successful step leaves for the steps after it.
fn publish_step_outputs(ctx: &mut ExecutionContext, result: &StepResult) {
    for (name, value) in step_variables(result) {
        ctx.set_variable(name, value);
    }
    if let Some(message) = fetched_message(result) {
        debug!(step = result.index, "first fetched email becomes the current message");
        ctx.adopt_message(message);
    }
}

struct StepFailure {
    kind: StepErrorKind,
    message: String,
}

impl From<&AdapterError> for StepFailure {
    fn from(error: &AdapterError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Trigger payload used for manual test runs.
pub fn test_trigger() -> Value {
    json!({
        "subject": "Test Email Subject",
        "sender": "test@example.com",
        "from": "test@example.com",
        "body": "This is a test email for workflow execution.",
        "timestamp": Utc::now().to_rfc3339(),
    })
}
