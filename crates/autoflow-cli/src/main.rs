//! CLI entry point for autoflow.
//!
//! The `autoflow` binary imports and validates workflow definitions, runs
//! them against a trigger payload, and inspects stored run history.

mod config;
mod helpers;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use autoflow_adapters::EnvCredentials;
use autoflow_engine::{
    Orchestrator, WorkflowDefinition, WorkflowSource, save_definition, test_trigger, validate,
};
use autoflow_store::{Database, WorkflowStore};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::config::{AppConfig, LogFormat};
use crate::helpers::{format_timestamp, init_tracing, print_json, read_json_file, run_succeeded};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// autoflow: multi-step workflow automation.
#[derive(Parser)]
#[command(name = "autoflow", version, about = "Run multi-step service workflows")]
struct Cli {
    /// Configuration file (defaults to config/default.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and store a workflow definition.
    Import {
        /// Path to the definition JSON.
        file: PathBuf,
    },

    /// Check a workflow definition without storing it.
    Validate { file: PathBuf },

    /// Run a stored workflow with a trigger payload.
    Run {
        workflow_id: String,
        /// Path to the trigger payload JSON.
        #[arg(long)]
        trigger: PathBuf,
    },

    /// Run a stored workflow with a built-in test payload.
    Test { workflow_id: String },

    /// List stored workflows with their run statistics.
    List,

    /// Show recent run reports for a workflow.
    Runs {
        workflow_id: String,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        config.logging.format
    };
    init_tracing(&config.logging.level, format);

    match cli.command {
        Commands::Import { file } => cmd_import(&config, &file).await,
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Run {
            workflow_id,
            trigger,
        } => {
            let payload = read_json_file(&trigger)?;
            cmd_run(&config, &workflow_id, &payload).await
        }
        Commands::Test { workflow_id } => cmd_test(&config, &workflow_id).await,
        Commands::List => cmd_list(&config).await,
        Commands::Runs { workflow_id, limit } => cmd_runs(&config, &workflow_id, limit).await,
    }
}

async fn open_store(config: &AppConfig) -> Result<WorkflowStore> {
    let path = config.store.db_path.clone();
    let db = Database::open_and_migrate(path.clone())
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    info!(path = %path.display(), "store initialized");
    Ok(WorkflowStore::new(db))
}

fn orchestrator(config: &AppConfig, store: WorkflowStore) -> Orchestrator {
    let credentials = Arc::new(EnvCredentials::from_env());
    let store = Arc::new(store);
    Orchestrator::new(config.adapters(credentials))
        .with_config(config.engine_config())
        .with_source(store.clone())
        .with_recorder(store)
}

fn load_definition_file(file: &std::path::Path) -> Result<WorkflowDefinition> {
    let document = read_json_file(file)?;
    WorkflowDefinition::from_json(document)
        .with_context(|| format!("{} is not a workflow definition", file.display()))
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_import(config: &AppConfig, file: &std::path::Path) -> Result<ExitCode> {
    let definition = load_definition_file(file)?;
    let report = validate(&definition);
    for warning in &report.warnings {
        warn!(workflow_id = %definition.id, "{warning}");
    }
    if !report.is_valid() {
        for error in &report.errors {
            eprintln!("error: {error}");
        }
        bail!(
            "workflow {} has {} validation error(s); not imported",
            definition.id,
            report.errors.len()
        );
    }

    let store = open_store(config).await?;
    let stored = save_definition(&store, &definition).await?;
    println!("imported workflow {} ({})", stored.id, stored.name);
    Ok(ExitCode::SUCCESS)
}

fn cmd_validate(file: &std::path::Path) -> Result<ExitCode> {
    let definition = load_definition_file(file)?;
    let report = validate(&definition);
    print_json(&report)?;
    Ok(if report.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_run(config: &AppConfig, workflow_id: &str, trigger: &serde_json::Value) -> Result<ExitCode> {
    let store = open_store(config).await?;
    let report = orchestrator(config, store).run_workflow(workflow_id, trigger).await;
    print_json(&report)?;
    Ok(if run_succeeded(&report) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Test runs ignore the enabled flag.
async fn cmd_test(config: &AppConfig, workflow_id: &str) -> Result<ExitCode> {
    let store = open_store(config).await?;
    let Some(definition) = store.load(workflow_id).await? else {
        bail!("workflow not found: {workflow_id}");
    };
    let report = orchestrator(config, store)
        .run_definition(&definition, &test_trigger())
        .await;
    print_json(&report)?;
    Ok(if run_succeeded(&report) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_list(config: &AppConfig) -> Result<ExitCode> {
    let store = open_store(config).await?;
    let workflows = store.list(1000, 0).await?;
    if workflows.is_empty() {
        println!("no workflows");
        return Ok(ExitCode::SUCCESS);
    }
    for wf in workflows {
        println!(
            "{}  {:<30}  {:<8}  runs={} ok={} failed={}  last={}",
            wf.id,
            wf.name,
            if wf.enabled { "enabled" } else { "disabled" },
            wf.total_executions,
            wf.successful_executions,
            wf.failed_executions,
            format_timestamp(wf.last_executed_at),
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_runs(config: &AppConfig, workflow_id: &str, limit: i64) -> Result<ExitCode> {
    let store = open_store(config).await?;
    let runs = store.list_runs(workflow_id, limit.max(1)).await?;
    let reports: Vec<&serde_json::Value> = runs.iter().map(|run| &run.report).collect();
    print_json(&reports)?;
    Ok(ExitCode::SUCCESS)
}
