//! Versioned schema migrations.
//!
//! Each migration is a static SQL batch with a version number. Applied
//! versions are tracked in `_migrations`, so [`run_all`] only executes the
//! batches a database has not seen yet.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Append only. Never edit a migration that has shipped.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "workflow definitions with run statistics",
        sql: r#"
            CREATE TABLE workflows (
                id                    TEXT PRIMARY KEY,
                user_id               TEXT NOT NULL,
                name                  TEXT NOT NULL,
                description           TEXT,
                definition            TEXT NOT NULL,
                enabled               BOOLEAN NOT NULL DEFAULT 1,
                total_executions      INTEGER NOT NULL DEFAULT 0,
                successful_executions INTEGER NOT NULL DEFAULT 0,
                failed_executions     INTEGER NOT NULL DEFAULT 0,
                last_executed_at      INTEGER,
                created_at            INTEGER NOT NULL,
                updated_at            INTEGER NOT NULL
            );

            CREATE INDEX idx_workflows_user ON workflows(user_id);
        "#,
    },
    Migration {
        version: 2,
        description: "run history",
        sql: r#"
            CREATE TABLE workflow_runs (
                id             TEXT PRIMARY KEY,
                workflow_id    TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                success        BOOLEAN NOT NULL,
                outcome        TEXT NOT NULL
                               CHECK (outcome IN ('completed', 'halted', 'skipped', 'failed')),
                executed_steps INTEGER NOT NULL,
                report         TEXT NOT NULL,
                started_at     INTEGER NOT NULL,
                finished_at    INTEGER NOT NULL
            );

            CREATE INDEX idx_workflow_runs_workflow
                ON workflow_runs(workflow_id, finished_at DESC);
        "#,
    },
];

/// Apply every migration newer than the database's current version.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }

    Ok(())
}

/// Highest applied migration version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to read current version: {e}"),
    })
}

// ── internals ────────────────────────────────────────────────────────

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

/// Run one migration and record it, all inside `BEGIN IMMEDIATE`.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    let version = migration.version;
    info!(version, description = migration.description, "applying migration");

    let fail = |stage: &str, e: rusqlite::Error| StoreError::Migration {
        version,
        message: format!("{stage}: {e}"),
    };

    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| fail("failed to begin transaction", e))?;

    let result = conn
        .execute_batch(migration.sql)
        .map_err(|e| fail("SQL execution failed", e))
        .and_then(|()| {
            conn.execute(
                "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![version, migration.description, chrono::Utc::now().timestamp()],
            )
            .map(|_| ())
            .map_err(|e| fail("failed to record migration", e))
        });

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| fail("failed to commit", e))?;
            info!(version, "migration applied");
            Ok(())
        }
        Err(err) => {
            warn!(version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
            Err(err)
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
