/// SQLite persistence layer for workflows and execution reports
///
/// Workflow definitions and run reports are stored as JSON documents next to
/// a few indexed columns used for listing.

use crate::runtime::context::RunReport;
use crate::workflow::types::WorkflowDefinition;
use anyhow::Result;
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool},
    Row,
};
use std::path::Path;

/// Open (and create if needed) a SQLite database file
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", parent.display(), e))?;
        }
    }

    tracing::debug!("🗄️ Opening SQLite database at {}", path.display());
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// SQLite-based storage for workflow definitions and run reports
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the workflows and executions tables
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                owner TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                definition JSON NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflows_name
            ON workflows(name)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                run_id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                report JSON NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_executions_workflow
            ON executions(workflow_id, started_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a new workflow or replace an existing one
    pub async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let definition_json = serde_json::to_string(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, owner, status, version, definition, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                owner = excluded.owner,
                status = excluded.status,
                version = excluded.version,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.owner)
        .bind(workflow.status.as_str())
        .bind(i64::from(workflow.version))
        .bind(&definition_json)
        .bind(workflow.created_at.to_rfc3339())
        .bind(workflow.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    /// List workflow metadata, most recently updated first
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>> {
        let rows = sqlx::query(
            "SELECT id, name, owner, status, version, created_at, updated_at FROM workflows ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            let version: i64 = row.get("version");
            workflows.push(WorkflowMetadata {
                id: row.get("id"),
                name: row.get("name"),
                owner: row.get("owner"),
                status: row.get("status"),
                version: u32::try_from(version)?,
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            });
        }

        Ok(workflows)
    }

    /// Load every stored definition, used to warm the registry
    pub async fn load_all_workflows(&self) -> Result<Vec<WorkflowDefinition>> {
        let rows = sqlx::query("SELECT definition FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<WorkflowDefinition> {
                let definition_json: String = row.get("definition");
                Ok(serde_json::from_str(&definition_json)?)
            })
            .collect()
    }

    /// Delete a workflow and its execution history
    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        sqlx::query("DELETE FROM executions WHERE workflow_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist a run report, replacing any earlier report for the run
    pub async fn save_execution(&self, report: &RunReport) -> Result<()> {
        let report_json = serde_json::to_string(report)?;

        sqlx::query(
            r#"
            INSERT INTO executions (run_id, workflow_id, status, report, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                report = excluded.report,
                finished_at = excluded.finished_at
            "#,
        )
        .bind(&report.run_id)
        .bind(&report.workflow_id)
        .bind(report.status.as_str())
        .bind(&report_json)
        .bind(report.started_at.to_rfc3339())
        .bind(report.finished_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_execution(&self, run_id: &str) -> Result<Option<RunReport>> {
        let row = sqlx::query("SELECT report FROM executions WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let report_json: String = row.get("report");
                Ok(Some(serde_json::from_str(&report_json)?))
            }
            None => Ok(None),
        }
    }

    /// Execution summaries for a workflow, newest first
    pub async fn list_executions(&self, workflow_id: &str) -> Result<Vec<ExecutionMetadata>> {
        let rows = sqlx::query(
            "SELECT run_id, workflow_id, status, started_at, finished_at FROM executions WHERE workflow_id = ? ORDER BY started_at DESC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ExecutionMetadata {
                run_id: row.get("run_id"),
                workflow_id: row.get("workflow_id"),
                status: row.get("status"),
                started_at: row.get("started_at"),
                finished_at: row.get("finished_at"),
            })
            .collect())
    }
}

/// Basic workflow metadata for listing operations
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub status: String,
    pub version: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// One row of a workflow's execution history
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMetadata {
    pub run_id: String,
    pub workflow_id: String,
    pub status: String,
    pub started_at: String,
    pub finished_at: String,
}
