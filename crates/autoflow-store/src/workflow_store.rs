//! Workflow persistence.
//!
//! Stores workflow definitions as JSON alongside their execution counters,
//! and keeps one row per finalized run with the serialized run report.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A persisted workflow definition with its run statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWorkflow {
    pub id: String,
    /// Owner; credentials are looked up per user.
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    /// The full definition document (steps and their configuration).
    pub definition: serde_json::Value,
    pub enabled: bool,
    pub total_executions: i64,
    pub successful_executions: i64,
    pub failed_executions: i64,
    /// Unix timestamp of the most recent recorded run.
    pub last_executed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A finalized run to be recorded.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_id: String,
    pub workflow_id: String,
    pub success: bool,
    /// One of `completed`, `halted`, `skipped`, `failed`.
    pub outcome: String,
    pub executed_steps: i64,
    pub report: serde_json::Value,
    pub started_at: i64,
    pub finished_at: i64,
}

/// A row of the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub id: String,
    pub workflow_id: String,
    pub success: bool,
    pub outcome: String,
    pub executed_steps: i64,
    pub report: serde_json::Value,
    pub started_at: i64,
    pub finished_at: i64,
}

// ═══════════════════════════════════════════════════════════════════════
//  WorkflowStore
// ═══════════════════════════════════════════════════════════════════════

const WORKFLOW_COLUMNS: &str = "id, user_id, name, description, definition, enabled, \
     total_executions, successful_executions, failed_executions, last_executed_at, \
     created_at, updated_at";

const RUN_COLUMNS: &str =
    "id, workflow_id, success, outcome, executed_steps, report, started_at, finished_at";

/// CRUD on workflow definitions plus run bookkeeping.
#[derive(Clone)]
pub struct WorkflowStore {
    db: Database,
}

impl WorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a new workflow under a fresh UUID v7 identifier.
    #[instrument(skip(self, definition))]
    pub async fn create(
        &self,
        user_id: &str,
        name: &str,
        description: Option<&str>,
        definition: serde_json::Value,
    ) -> StoreResult<StoredWorkflow> {
        let id = Uuid::now_v7().to_string();
        self.upsert(&id, user_id, name, description, definition)
            .await
    }

    /// Insert a workflow, or replace the definition of an existing one.
    ///
    /// Replacing keeps the run statistics and the `enabled` flag.
    #[instrument(skip(self, definition))]
    pub async fn upsert(
        &self,
        id: &str,
        user_id: &str,
        name: &str,
        description: Option<&str>,
        definition: serde_json::Value,
    ) -> StoreResult<StoredWorkflow> {
        if id.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "workflow id must not be empty".into(),
            ));
        }

        let id = id.to_string();
        let user_id = user_id.to_string();
        let name = name.to_string();
        let description = description.map(str::to_string);
        let definition_json = serde_json::to_string(&definition)?;
        let now = Utc::now().timestamp();

        let stored = self
            .db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO workflows (id, user_id, name, description, definition, enabled, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6) \
                     ON CONFLICT(id) DO UPDATE SET \
                        user_id = excluded.user_id, name = excluded.name, \
                        description = excluded.description, definition = excluded.definition, \
                        updated_at = excluded.updated_at",
                    rusqlite::params![id, user_id, name, description, definition_json, now],
                )?;
                fetch_workflow(conn, &id)?.ok_or(StoreError::NotFound {
                    entity: "workflow",
                    id,
                })
            })
            .await?;

        debug!(workflow_id = %stored.id, workflow_name = %stored.name, "workflow saved");
        Ok(stored)
    }

    /// Fetch a workflow by ID, `None` if absent.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<StoredWorkflow>> {
        let id = id.to_string();
        self.db.execute(move |conn| fetch_workflow(conn, &id)).await
    }

    /// Workflows ordered by most recently updated.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<StoredWorkflow>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows \
                     ORDER BY updated_at DESC, id DESC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![limit, offset], WorkflowRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(WorkflowRow::into_stored).collect()
            })
            .await
    }

    /// All workflows owned by `user_id`.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<StoredWorkflow>> {
        let user_id = user_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE user_id = ?1 \
                     ORDER BY updated_at DESC, id DESC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id], WorkflowRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(WorkflowRow::into_stored).collect()
            })
            .await
    }

    /// Toggle a workflow's enabled state.
    #[instrument(skip(self))]
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> StoreResult<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE workflows SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, enabled, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Delete a workflow and its run history.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM workflows WHERE id = ?1", rusqlite::params![id])?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM workflows", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
    }

    /// Append a run to the history and bump the workflow's counters.
    ///
    /// Both writes happen in one transaction; an unknown workflow leaves
    /// nothing behind and returns [`StoreError::NotFound`].
    #[instrument(skip(self, run), fields(workflow_id = %run.workflow_id, run_id = %run.run_id))]
    pub async fn record_run(&self, run: NewRun) -> StoreResult<StoredRun> {
        let report_json = serde_json::to_string(&run.report)?;

        let stored = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let updated = tx.execute(
                    "UPDATE workflows SET \
                        total_executions = total_executions + 1, \
                        successful_executions = successful_executions + ?2, \
                        failed_executions = failed_executions + ?3, \
                        last_executed_at = ?4 \
                     WHERE id = ?1",
                    rusqlite::params![
                        run.workflow_id,
                        i64::from(run.success),
                        i64::from(!run.success),
                        run.finished_at
                    ],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow",
                        id: run.workflow_id,
                    });
                }
                tx.execute(
                    "INSERT INTO workflow_runs (id, workflow_id, success, outcome, executed_steps, report, started_at, finished_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        run.run_id,
                        run.workflow_id,
                        run.success,
                        run.outcome,
                        run.executed_steps,
                        report_json,
                        run.started_at,
                        run.finished_at
                    ],
                )?;
                tx.commit()?;

                Ok(StoredRun {
                    id: run.run_id,
                    workflow_id: run.workflow_id,
                    success: run.success,
                    outcome: run.outcome,
                    executed_steps: run.executed_steps,
                    report: run.report,
                    started_at: run.started_at,
                    finished_at: run.finished_at,
                })
            })
            .await?;

        debug!(success = stored.success, outcome = %stored.outcome, "run recorded");
        Ok(stored)
    }

    /// Most recent runs of a workflow, newest first.
    #[instrument(skip(self))]
    pub async fn list_runs(&self, workflow_id: &str, limit: i64) -> StoreResult<Vec<StoredRun>> {
        let workflow_id = workflow_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE workflow_id = ?1 \
                     ORDER BY finished_at DESC, id DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![workflow_id, limit], RunRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(RunRow::into_stored).collect()
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

fn fetch_workflow(
    conn: &rusqlite::Connection,
    id: &str,
) -> StoreResult<Option<StoredWorkflow>> {
    let result = conn.query_row(
        &format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?1"),
        rusqlite::params![id],
        WorkflowRow::from_row,
    );
    match result {
        Ok(row) => row.into_stored().map(Some),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StoreError::Sqlite(e)),
    }
}

/// Raw columns; JSON is parsed afterwards so the row closure stays
/// infallible apart from column access.
struct WorkflowRow {
    id: String,
    user_id: String,
    name: String,
    description: Option<String>,
    definition: String,
    enabled: bool,
    total_executions: i64,
    successful_executions: i64,
    failed_executions: i64,
    last_executed_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl WorkflowRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            definition: row.get(4)?,
            enabled: row.get(5)?,
            total_executions: row.get(6)?,
            successful_executions: row.get(7)?,
            failed_executions: row.get(8)?,
            last_executed_at: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_stored(self) -> StoreResult<StoredWorkflow> {
        Ok(StoredWorkflow {
            definition: serde_json::from_str(&self.definition)?,
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            description: self.description,
            enabled: self.enabled,
            total_executions: self.total_executions,
            successful_executions: self.successful_executions,
            failed_executions: self.failed_executions,
            last_executed_at: self.last_executed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct RunRow {
    id: String,
    workflow_id: String,
    success: bool,
    outcome: String,
    executed_steps: i64,
    report: String,
    started_at: i64,
    finished_at: i64,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            success: row.get(2)?,
            outcome: row.get(3)?,
            executed_steps: row.get(4)?,
            report: row.get(5)?,
            started_at: row.get(6)?,
            finished_at: row.get(7)?,
        })
    }

    fn into_stored(self) -> StoreResult<StoredRun> {
        Ok(StoredRun {
            report: serde_json::from_str(&self.report)?,
            id: self.id,
            workflow_id: self.workflow_id,
            success: self.success,
            outcome: self.outcome,
            executed_steps: self.executed_steps,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
