//! Engine error types.
//!
//! Step failures never surface here: they are recorded on the run report.
//! [`EngineError`] covers what happens around a run (loading definitions,
//! recording results, malformed documents).

/// Unified error type for the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },

    #[error("workflow is disabled: {workflow_id}")]
    WorkflowDisabled { workflow_id: String },

    #[error("no workflow source configured")]
    SourceUnavailable,

    /// The stored or supplied document is not a workflow definition.
    #[error("invalid workflow definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("store error: {0}")]
    Store(#[from] autoflow_store::StoreError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;
