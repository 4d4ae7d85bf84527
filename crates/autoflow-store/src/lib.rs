//! # autoflow-store
//!
//! Storage engine for autoflow.
//!
//! Persists workflow definitions together with their run statistics and a
//! history of finalized runs. Everything lives in a single SQLite file
//! opened in WAL mode.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  WorkflowStore (definitions + runs)      │
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL + mmap)          │
//! │  Migrations (versioned, transactional)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use autoflow_store::{Database, WorkflowStore};
//!
//! let db = Database::open_and_migrate("data/autoflow.db").await?;
//! let workflows = WorkflowStore::new(db);
//! let all = workflows.list(50, 0).await?;
//! ```

pub mod db;
pub mod error;
pub mod migration;
pub mod workflow_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use workflow_store::{NewRun, StoredRun, StoredWorkflow, WorkflowStore};
