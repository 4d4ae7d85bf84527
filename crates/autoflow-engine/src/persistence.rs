//! Glue between the orchestrator and the workflow store.
//!
//! The orchestrator only sees the two traits below. [`WorkflowStore`]
//! implements both; tests and embedding callers can supply their own.

use async_trait::async_trait;
use autoflow_store::{NewRun, StoredWorkflow, WorkflowStore};
use tracing::{debug, instrument};

use crate::error::{EngineError, Result};
use crate::model::WorkflowDefinition;
use crate::report::RunReport;

/// Loads workflow definitions by id.
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    /// `Ok(None)` when no workflow has this id.
    async fn load(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>>;
}

/// Records finalized runs (halted or completed).
#[async_trait]
pub trait RunRecorder: Send + Sync {
    async fn record(&self, report: &RunReport) -> Result<()>;
}

#[async_trait]
impl WorkflowSource for WorkflowStore {
    #[instrument(skip(self))]
    async fn load(&self, workflow_id: &str) -> Result<Option<WorkflowDefinition>> {
        match self.get(workflow_id).await? {
            Some(stored) => definition_from_stored(stored).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RunRecorder for WorkflowStore {
    #[instrument(skip(self, report), fields(workflow_id = %report.workflow_id, run_id = %report.run_id))]
    async fn record(&self, report: &RunReport) -> Result<()> {
        let run = NewRun {
            run_id: report.run_id.to_string(),
            workflow_id: report.workflow_id.clone(),
            success: report.success,
            outcome: report.outcome.as_str().to_string(),
            executed_steps: i64::try_from(report.executed_steps).unwrap_or(i64::MAX),
            report: serde_json::to_value(report)?,
            started_at: report.started_at.timestamp(),
            finished_at: report.finished_at.timestamp(),
        };
        let stored = self.record_run(run).await?;
        debug!(run_id = %stored.id, "run recorded");
        Ok(())
    }
}

/// Rebuild a definition from its stored row. Row columns win over the
/// document for id, owner, name, description and the enabled flag.
pub fn definition_from_stored(stored: StoredWorkflow) -> Result<WorkflowDefinition> {
    let StoredWorkflow {
        id,
        user_id,
        name,
        description,
        definition,
        enabled,
        ..
    } = stored;

    let mut document = match definition {
        serde_json::Value::Object(map) => map,
        other => {
            return Err(EngineError::InvalidDefinition {
                reason: format!("workflow {id} is stored as {other}, expected an object"),
            });
        }
    };
    document.insert("id".into(), serde_json::Value::String(id));
    let mut parsed = WorkflowDefinition::from_json(serde_json::Value::Object(document))?;
    parsed.user_id = user_id;
    parsed.name = name;
    parsed.description = description;
    parsed.enabled = enabled;
    Ok(parsed)
}

/// Store `definition` under its own id, keeping existing run statistics.
#[instrument(skip(store, definition), fields(workflow_id = %definition.id))]
pub async fn save_definition(
    store: &WorkflowStore,
    definition: &WorkflowDefinition,
) -> Result<StoredWorkflow> {
    let stored = store
        .upsert(
            &definition.id,
            &definition.user_id,
            &definition.name,
            definition.description.as_deref(),
            definition.to_json()?,
        )
        .await?;
    if stored.enabled != definition.enabled {
        store.set_enabled(&stored.id, definition.enabled).await?;
        return Ok(StoredWorkflow {
            enabled: definition.enabled,
            ..stored
        });
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoflow_store::Database;
    use serde_json::json;

    async fn store() -> WorkflowStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        WorkflowStore::new(db)
    }

    fn definition(id: &str) -> WorkflowDefinition {
        WorkflowDefinition::from_json(json!({
            "id": id,
            "user_id": "u1",
            "name": "Digest",
            "steps": [
                {"role": "trigger", "integration": "gmail", "operation": "new_email"},
                {"role": "action", "integration": "ai", "operation": "process_text",
                 "config": {"prompt": "Summarize {{body}}"}, "order": 1}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = store().await;
        save_definition(&store, &definition("wf-1")).await.unwrap();

        let loaded = store.load("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded, definition("wf-1"));
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let store = store().await;
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disabled_flag_is_persisted() {
        let store = store().await;
        let mut disabled = definition("wf-2");
        disabled.enabled = false;
        let stored = save_definition(&store, &disabled).await.unwrap();
        assert!(!stored.enabled);
        assert!(!store.load("wf-2").await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn row_columns_override_document() {
        let store = store().await;
        store
            .upsert("wf-3", "owner", "Row name", None, json!({"id": "other", "name": "Doc name", "steps": []}))
            .await
            .unwrap();
        let loaded = store.load("wf-3").await.unwrap().unwrap();
        assert_eq!(loaded.id, "wf-3");
        assert_eq!(loaded.name, "Row name");
        assert_eq!(loaded.user_id, "owner");
    }

    #[tokio::test]
    async fn non_object_document_is_invalid() {
        let store = store().await;
        store.upsert("wf-4", "u", "n", None, json!([1, 2])).await.unwrap();
        let err = store.load("wf-4").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidDefinition { .. }));
    }

    #[tokio::test]
    async fn record_updates_statistics() {
        let store = store().await;
        save_definition(&store, &definition("wf-5")).await.unwrap();

        let report = RunReport::from_steps(uuid::Uuid::now_v7(), "wf-5", Vec::new(), chrono::Utc::now());
        store.record(&report).await.unwrap();

        let stored = store.get("wf-5").await.unwrap().unwrap();
        assert_eq!(stored.total_executions, 1);
        assert_eq!(stored.successful_executions, 1);
        let runs = store.list_runs("wf-5", 10).await.unwrap();
        assert_eq!(runs[0].outcome, "completed");
        assert_eq!(runs[0].report["workflow_id"], "wf-5");
    }
}
