use super::{Store, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an embedding run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Ok,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Ok => "ok",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "ok" => Ok(RunStatus::Ok),
            "failed" => Ok(RunStatus::Failed),
            other => Err(StoreError::InvalidValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Audit record of one indexing run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub note: String,
    pub model_id: String,
    pub device: String,
    pub collection: String,
    pub index_dir: String,
    pub total_rows: Option<usize>,
    pub total_chunks: Option<usize>,
}

/// Fields recorded when a run starts.
#[derive(Debug, Clone)]
pub struct NewRun<'a> {
    pub model_id: &'a str,
    pub device: &'a str,
    pub collection: &'a str,
    pub index_dir: &'a str,
}

const RUN_COLUMNS: &str = "id, started_at, finished_at, status, note, model_id, device, \
                           collection, index_dir, total_rows, total_chunks";

fn map_run(row: &Row<'_>) -> rusqlite::Result<EmbeddingRun> {
    let status: String = row.get(3)?;
    let status = status.parse::<RunStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(EmbeddingRun {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        status,
        note: row.get(4)?,
        model_id: row.get(5)?,
        device: row.get(6)?,
        collection: row.get(7)?,
        index_dir: row.get(8)?,
        total_rows: row.get::<_, Option<i64>>(9)?.map(|v| v as usize),
        total_chunks: row.get::<_, Option<i64>>(10)?.map(|v| v as usize),
    })
}

impl Store {
    /// Record the start of a run with `status = running` and return its id.
    pub fn start_embedding_run(&self, run: &NewRun<'_>) -> Result<i64, StoreError> {
        self.conn.execute(
            r#"
            INSERT INTO embedding_runs (started_at, status, model_id, device, collection, index_dir)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                Utc::now(),
                RunStatus::Running.as_str(),
                run.model_id,
                run.device,
                run.collection,
                run.index_dir,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Close a running run. Each run can be finished exactly once.
    pub fn finish_embedding_run(
        &self,
        run_id: i64,
        status: RunStatus,
        note: &str,
        total_rows: Option<usize>,
        total_chunks: Option<usize>,
    ) -> Result<(), StoreError> {
        if status == RunStatus::Running {
            return Err(StoreError::InvalidValue {
                field: "status",
                value: status.to_string(),
            });
        }

        let updated = self.conn.execute(
            r#"
            UPDATE embedding_runs
            SET finished_at = ?, status = ?, note = ?, total_rows = ?, total_chunks = ?
            WHERE id = ? AND status = 'running'
            "#,
            params![
                Utc::now(),
                status.as_str(),
                note,
                total_rows.map(|v| v as i64),
                total_chunks.map(|v| v as i64),
                run_id,
            ],
        )?;

        if updated == 0 {
            return match self.get_embedding_run(run_id)? {
                Some(_) => Err(StoreError::RunAlreadyFinished(run_id)),
                None => Err(StoreError::RunNotFound(run_id)),
            };
        }
        Ok(())
    }

    pub fn get_embedding_run(&self, run_id: i64) -> Result<Option<EmbeddingRun>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM embedding_runs WHERE id = ?"),
                params![run_id],
                map_run,
            )
            .optional()?)
    }

    /// Most recent runs first.
    pub fn embedding_runs(&self, limit: usize) -> Result<Vec<EmbeddingRun>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM embedding_runs ORDER BY id DESC LIMIT ?"
        ))?;
        let rows = stmt.query_map(params![limit as i64], map_run)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }
}
