//! Application record store (SQLite): embedding run log and chat history
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub mod chat;
pub mod runs;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS embedding_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at DATETIME NOT NULL,
    finished_at DATETIME,
    status TEXT NOT NULL,
    note TEXT NOT NULL DEFAULT '',
    model_id TEXT NOT NULL,
    device TEXT NOT NULL,
    collection TEXT NOT NULL,
    index_dir TEXT NOT NULL,
    total_rows INTEGER,
    total_chunks INTEGER
);

CREATE INDEX IF NOT EXISTS idx_runs_status ON embedding_runs(status);

CREATE TABLE IF NOT EXISTS chat_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at DATETIME NOT NULL
);
"#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedding run {0} not found")]
    RunNotFound(i64),

    #[error("embedding run {0} is already finished")]
    RunAlreadyFinished(i64),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// A wrapper around the SQLite connection holding run logs and chat history.
pub struct Store {
    pub(crate) conn: Connection,
}

impl Store {
    /// Open the store at `path`, creating parent directories and the schema as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!("Opening record store: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }
}
