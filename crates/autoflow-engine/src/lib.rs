//! Workflow execution engine for autoflow.
//!
//! This crate provides:
//!
//! - **Templates**: `{{name}}` and `{{steps.N.field}}` expansion over step
//!   configurations via [`template::TemplateResolver`].
//! - **Execution lock**: at most one in-flight run per workflow via
//!   [`lock::ExecutionLock`].
//! - **Orchestration**: sequential, halt-on-first-failure runs producing a
//!   [`report::RunReport`] via [`orchestrator::Orchestrator`].
//! - **Validation**: static checks on definitions via
//!   [`validation::validate`].

pub mod config;
pub mod config_value;
pub mod dispatch;
pub mod error;
pub mod lock;
pub mod model;
pub mod orchestrator;
pub mod persistence;
pub mod report;
pub mod template;
pub mod validation;

pub use config::EngineConfig;
pub use config_value::{ConfigRecord, ConfigValue};
pub use dispatch::AdapterSet;
pub use error::{EngineError, Result};
pub use lock::{ExecutionLock, RunGuard};
pub use model::{Step, StepRole, WorkflowDefinition};
pub use orchestrator::{Orchestrator, test_trigger};
pub use persistence::{RunRecorder, WorkflowSource, definition_from_stored, save_definition};
pub use report::{RunOutcome, RunReport, StepResult};
pub use template::{ResolutionWarning, TemplateResolver};
pub use validation::{ValidationReport, validate};
