//! Checkpoint snapshots and their stores
//!
//! A CheckpointAgent hands its input to a [`CheckpointStore`]; a later run can
//! resume from that snapshot instead of the Start node. Saves are upserts
//! keyed by `(run_id, checkpoint_key)` so a retried node never duplicates.

use crate::workflow::types::DataMap;
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persisted state captured by a CheckpointAgent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub run_id: String,
    pub workflow_id: String,
    pub checkpoint_key: String,
    /// Node that took the snapshot
    pub node_id: String,
    /// The node's input at the time of the snapshot
    pub data: DataMap,
    /// Input the run was started with, replayed for side branches on resume
    #[serde(default)]
    pub run_input: DataMap,
    pub created_at: DateTime<Utc>,
}

/// Storage for checkpoint snapshots
pub trait CheckpointStore: Send + Sync + 'static {
    /// Insert or replace the snapshot for `(run_id, checkpoint_key)`
    fn save<'a>(&'a self, snapshot: &'a CheckpointSnapshot) -> BoxFuture<'a, Result<()>>;

    fn load<'a>(
        &'a self,
        run_id: &'a str,
        checkpoint_key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CheckpointSnapshot>>>;

    /// All snapshots of a run, oldest first
    fn list<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<Vec<CheckpointSnapshot>>>;
}

/// Process-local store, used in tests and embedded setups
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    snapshots: RwLock<HashMap<(String, String), CheckpointSnapshot>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save<'a>(&'a self, snapshot: &'a CheckpointSnapshot) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let key = (snapshot.run_id.clone(), snapshot.checkpoint_key.clone());
            self.snapshots.write().await.insert(key, snapshot.clone());
            Ok(())
        })
    }

    fn load<'a>(
        &'a self,
        run_id: &'a str,
        checkpoint_key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CheckpointSnapshot>>> {
        Box::pin(async move {
            let key = (run_id.to_string(), checkpoint_key.to_string());
            Ok(self.snapshots.read().await.get(&key).cloned())
        })
    }

    fn list<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<Vec<CheckpointSnapshot>>> {
        Box::pin(async move {
            let mut snapshots: Vec<CheckpointSnapshot> = self
                .snapshots
                .read()
                .await
                .values()
                .filter(|s| s.run_id == run_id)
                .cloned()
                .collect();
            snapshots.sort_by_key(|s| s.created_at);
            Ok(snapshots)
        })
    }
}

/// SQLite-backed store sharing the application pool
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the checkpoints table. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                run_id TEXT NOT NULL,
                checkpoint_key TEXT NOT NULL,
                workflow_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                data JSON NOT NULL,
                run_input JSON NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                PRIMARY KEY (run_id, checkpoint_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CheckpointSnapshot> {
        let data: String = row.get("data");
        let run_input: String = row.get("run_input");
        let created_at: String = row.get("created_at");
        Ok(CheckpointSnapshot {
            run_id: row.get("run_id"),
            workflow_id: row.get("workflow_id"),
            checkpoint_key: row.get("checkpoint_key"),
            node_id: row.get("node_id"),
            data: serde_json::from_str(&data)?,
            run_input: serde_json::from_str(&run_input)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        })
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save<'a>(&'a self, snapshot: &'a CheckpointSnapshot) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let data = serde_json::to_string(&snapshot.data)?;
            let run_input = serde_json::to_string(&snapshot.run_input)?;
            sqlx::query(
                r#"
                INSERT INTO checkpoints (run_id, checkpoint_key, workflow_id, node_id, data, run_input, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(run_id, checkpoint_key) DO UPDATE SET
                    workflow_id = excluded.workflow_id,
                    node_id = excluded.node_id,
                    data = excluded.data,
                    run_input = excluded.run_input,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&snapshot.run_id)
            .bind(&snapshot.checkpoint_key)
            .bind(&snapshot.workflow_id)
            .bind(&snapshot.node_id)
            .bind(&data)
            .bind(&run_input)
            .bind(snapshot.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;

            Ok(())
        })
    }

    fn load<'a>(
        &'a self,
        run_id: &'a str,
        checkpoint_key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CheckpointSnapshot>>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM checkpoints WHERE run_id = ? AND checkpoint_key = ?")
                .bind(run_id)
                .bind(checkpoint_key)
                .fetch_optional(&self.pool)
                .await?;

            row.as_ref().map(Self::from_row).transpose()
        })
    }

    fn list<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<Vec<CheckpointSnapshot>>> {
        Box::pin(async move {
            let rows = sqlx::query("SELECT * FROM checkpoints WHERE run_id = ? ORDER BY created_at")
                .bind(run_id)
                .fetch_all(&self.pool)
                .await?;

            rows.iter().map(Self::from_row).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(key: &str, value: i64) -> CheckpointSnapshot {
        let mut data = DataMap::new();
        data.insert("x".into(), json!(value));
        CheckpointSnapshot {
            run_id: "run-1".into(),
            workflow_id: "wf-1".into(),
            checkpoint_key: key.into(),
            node_id: "cp".into(),
            data,
            run_input: DataMap::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_save_is_an_upsert() {
        let store = InMemoryCheckpointStore::new();
        store.save(&snapshot("after-research", 1)).await.unwrap();
        store.save(&snapshot("after-research", 2)).await.unwrap();
        assert_eq!(store.len().await, 1);

        let loaded = store.load("run-1", "after-research").await.unwrap().unwrap();
        assert_eq!(loaded.data["x"], json!(2));
        assert!(store.load("run-2", "after-research").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::workflow::storage::connect(&dir.path().join("cp.db")).await.unwrap();
        let store = SqliteCheckpointStore::new(pool);
        store.init_schema().await.unwrap();
        store.init_schema().await.unwrap();

        store.save(&snapshot("a", 1)).await.unwrap();
        store.save(&snapshot("a", 5)).await.unwrap();
        store.save(&snapshot("b", 9)).await.unwrap();

        let mut started = snapshot("c", 1);
        started.run_input.insert("topic".into(), json!("rust"));
        store.save(&started).await.unwrap();
        let loaded = store.load("run-1", "c").await.unwrap().unwrap();
        assert_eq!(loaded.run_input["topic"], json!("rust"));

        let loaded = store.load("run-1", "a").await.unwrap().unwrap();
        assert_eq!(loaded.data["x"], json!(5));
        assert_eq!(loaded.node_id, "cp");
        assert_eq!(store.list("run-1").await.unwrap().len(), 3);
    }
}
