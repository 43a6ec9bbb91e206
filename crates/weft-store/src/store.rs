use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::execution::{ExecutionStatus, WorkflowExecution};
use weft_core::traits::WorkflowStore;
use weft_core::types::{ExecutionSummary, WorkflowSummary};
use weft_core::workflow::Workflow;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workflows (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS executions (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        status TEXT NOT NULL,
        body TEXT NOT NULL,
        started_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_executions_workflow
        ON executions(workflow_id, started_at);";

fn db_err(e: rusqlite::Error) -> WeftError {
    WeftError::Database(e.to_string())
}

/// SQLite-backed store for workflow definitions and execution snapshots.
///
/// Bodies are stored as JSON; the other columns exist for listing.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WeftError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| WeftError::Database(e.to_string()))
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_status(raw: &str) -> ExecutionStatus {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .unwrap_or(ExecutionStatus::Failed)
}

impl WorkflowStore for SqliteStore {
    fn save_workflow(&self, workflow: &Workflow) -> BoxFuture<'_, Result<()>> {
        let body = serde_json::to_string(workflow);
        let id = workflow.id.clone();
        let name = workflow.name.clone();

        Box::pin(async move {
            let body = body?;
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO workflows (id, name, body, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    body = excluded.body,
                    updated_at = excluded.updated_at",
                params![id, name, body, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
            debug!(workflow_id = %id, "Workflow saved");
            Ok(())
        })
    }

    fn load_workflow(&self, id: &str) -> BoxFuture<'_, Result<Option<Workflow>>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn()?;
            let body: Option<String> = conn
                .query_row("SELECT body FROM workflows WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(db_err)?;

            body.map(|b| serde_json::from_str(&b).map_err(WeftError::from))
                .transpose()
        })
    }

    fn list_workflows(&self) -> BoxFuture<'_, Result<Vec<WorkflowSummary>>> {
        Box::pin(async move {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare("SELECT id, name, updated_at FROM workflows ORDER BY updated_at DESC, id")
                .map_err(db_err)?;

            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(db_err)?;

            let mut summaries = Vec::new();
            for row in rows {
                let (id, name, updated_at) = row.map_err(db_err)?;
                summaries.push(WorkflowSummary {
                    id,
                    name,
                    updated_at: parse_time(&updated_at).unwrap_or_else(Utc::now),
                });
            }
            Ok(summaries)
        })
    }

    fn delete_workflow(&self, id: &str) -> BoxFuture<'_, Result<bool>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn()?;
            let removed = conn
                .execute("DELETE FROM workflows WHERE id = ?1", params![id])
                .map_err(db_err)?;
            Ok(removed > 0)
        })
    }

    fn save_execution(&self, execution: &WorkflowExecution) -> BoxFuture<'_, Result<()>> {
        let body = serde_json::to_string(execution);
        let id = execution.id.clone();
        let workflow_id = execution.workflow_id.clone();
        let status = execution.status.as_str();
        let started_at = execution.started_at.map(|t| t.to_rfc3339());

        Box::pin(async move {
            let body = body?;
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO executions (id, workflow_id, status, body, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    body = excluded.body,
                    started_at = excluded.started_at",
                params![id, workflow_id, status, body, started_at],
            )
            .map_err(db_err)?;
            debug!(execution_id = %id, status, "Execution snapshot saved");
            Ok(())
        })
    }

    fn load_execution(&self, id: &str) -> BoxFuture<'_, Result<Option<WorkflowExecution>>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn()?;
            let body: Option<String> = conn
                .query_row("SELECT body FROM executions WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(db_err)?;

            body.map(|b| serde_json::from_str(&b).map_err(WeftError::from))
                .transpose()
        })
    }

    fn list_executions(
        &self,
        workflow_id: Option<&str>,
    ) -> BoxFuture<'_, Result<Vec<ExecutionSummary>>> {
        let workflow_id = workflow_id.map(String::from);
        Box::pin(async move {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, workflow_id, status, started_at FROM executions
                     WHERE ?1 IS NULL OR workflow_id = ?1
                     ORDER BY started_at DESC, id",
                )
                .map_err(db_err)?;

            let rows = stmt
                .query_map(params![workflow_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })
                .map_err(db_err)?;

            let mut summaries = Vec::new();
            for row in rows {
                let (id, workflow_id, status, started_at) = row.map_err(db_err)?;
                summaries.push(ExecutionSummary {
                    id,
                    workflow_id,
                    status: parse_status(&status),
                    started_at: started_at.as_deref().and_then(parse_time),
                });
            }
            Ok(summaries)
        })
    }

    fn delete_execution(&self, id: &str) -> BoxFuture<'_, Result<bool>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn()?;
            let removed = conn
                .execute("DELETE FROM executions WHERE id = ?1", params![id])
                .map_err(db_err)?;
            Ok(removed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::execution::HistoryStatus;
    use weft_test_utils::{echo_workflow, human_workflow, inputs};

    #[tokio::test]
    async fn test_workflow_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let wf = echo_workflow();

        store.save_workflow(&wf).await.unwrap();
        let loaded = store.load_workflow("echo").await.unwrap().unwrap();
        assert_eq!(loaded.nodes.len(), wf.nodes.len());
        assert_eq!(loaded.edges.len(), wf.edges.len());
        assert_eq!(loaded.start_node_id, "start");

        assert!(store.load_workflow("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_workflow_upsert_and_list() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_workflow(&echo_workflow()).await.unwrap();
        store.save_workflow(&echo_workflow().with_name("Renamed")).await.unwrap();
        store.save_workflow(&human_workflow()).await.unwrap();

        let list = store.list_workflows().await.unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.iter().any(|w| w.id == "echo" && w.name == "Renamed"));
    }

    #[tokio::test]
    async fn test_delete_workflow() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_workflow(&echo_workflow()).await.unwrap();
        assert!(store.delete_workflow("echo").await.unwrap());
        assert!(!store.delete_workflow("echo").await.unwrap());
    }

    #[tokio::test]
    async fn test_execution_snapshots() {
        let store = SqliteStore::in_memory().unwrap();
        let mut exec = WorkflowExecution::new("echo", inputs(json!({"x": 1})));
        store.save_execution(&exec).await.unwrap();

        exec.transition(ExecutionStatus::Running).unwrap();
        let idx = exec.begin_node("start");
        exec.complete_node(idx, Some(json!({"x": 1})));
        store.save_execution(&exec).await.unwrap();

        let loaded = store.load_execution(&exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.history[0].status, HistoryStatus::Completed);
        assert_eq!(loaded.variables["x"], json!(1));

        let other = WorkflowExecution::new("approval", Default::default());
        store.save_execution(&other).await.unwrap();

        let all = store.list_executions(None).await.unwrap();
        assert_eq!(all.len(), 2);
        let echo_only = store.list_executions(Some("echo")).await.unwrap();
        assert_eq!(echo_only.len(), 1);
        assert_eq!(echo_only[0].status, ExecutionStatus::Running);
        assert!(echo_only[0].started_at.is_some());

        assert!(store.delete_execution(&other.id).await.unwrap());
        assert!(store.load_execution(&other.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("weft.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_workflow(&echo_workflow()).await.unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.load_workflow("echo").await.unwrap().is_some());
    }
}
