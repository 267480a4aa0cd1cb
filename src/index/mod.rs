//! Persistent vector index using SQLite and sqlite-vec
use rusqlite::{Connection, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::Once;
use thiserror::Error;
use tracing::info;

pub mod models;
pub mod query;
pub mod upsert;

/// File name of the SQLite database inside the persistence directory.
pub const INDEX_FILENAME: &str = "index.sqlite3";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dimensions INTEGER,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    document TEXT NOT NULL,
    metadata TEXT NOT NULL,
    embedding BLOB NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(collection, id),
    FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_collection ON entries(collection);
"#;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata encoding error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("dimension mismatch: collection expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector for {id} has zero or non-finite norm")]
    DegenerateVector { id: String },

    #[error("upsert input length mismatch: {ids} ids, {texts} texts, {vectors} vectors, {metadatas} metadatas")]
    LengthMismatch {
        ids: usize,
        texts: usize,
        vectors: usize,
        metadatas: usize,
    },
}

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// A named collection of embedded documents backed by one SQLite file.
///
/// Reopening the same directory and collection attaches to the existing entries.
pub struct VectorIndex {
    pub(crate) conn: Connection,
    collection: String,
    location: Option<PathBuf>,
}

impl VectorIndex {
    /// Open (or create) `collection` inside `persist_dir`, creating the directory if needed.
    pub fn open<P: AsRef<Path>>(persist_dir: P, collection: &str) -> Result<Self, IndexError> {
        let dir = persist_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(INDEX_FILENAME);
        info!("Opening vector index: {} [{collection}]", path.display());

        init_sqlite_vec();
        let conn = Connection::open(&path)?;
        Self::init(conn, collection, Some(dir.to_path_buf()))
    }

    /// Open an in-memory index (useful for testing).
    pub fn open_in_memory(collection: &str) -> Result<Self, IndexError> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, collection, None)
    }

    fn init(
        conn: Connection,
        collection: &str,
        location: Option<PathBuf>,
    ) -> Result<Self, IndexError> {
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute(
            "INSERT OR IGNORE INTO collections (name) VALUES (?)",
            params![collection],
        )?;

        Ok(Self {
            conn,
            collection: collection.to_string(),
            location,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Directory the index persists to; `None` for in-memory indexes.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Number of entries in this collection.
    pub fn count(&self) -> Result<usize, IndexError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE collection = ?",
            params![self.collection],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Embedding dimensionality, fixed by the first upsert into the collection.
    pub fn dimensions(&self) -> Result<Option<usize>, IndexError> {
        let dims: Option<i64> = self
            .conn
            .query_row(
                "SELECT dimensions FROM collections WHERE name = ?",
                params![self.collection],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(dims.map(|d| d as usize))
    }
}

/// Helper to serialize a float32 vector into the little-endian blob sqlite-vec expects
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Inverse of [`serialize_vector`].
pub fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_index_init() {
        let index = VectorIndex::open_in_memory("laws").expect("Failed to open in-memory index");

        let tables: usize = index
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('collections', 'entries');",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
        assert_eq!(index.count().unwrap(), 0);
        assert_eq!(index.dimensions().unwrap(), None);
        assert_eq!(index.collection(), "laws");
    }

    #[test]
    fn test_open_creates_directory_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let persist = dir.path().join("nested").join("vector_db");

        let first = VectorIndex::open(&persist, "laws").unwrap();
        assert!(persist.join(INDEX_FILENAME).exists());
        assert_eq!(first.location(), Some(persist.as_path()));
        drop(first);

        let second = VectorIndex::open(&persist, "laws").unwrap();
        assert_eq!(second.count().unwrap(), 0);
    }

    #[test]
    fn test_serialize_vector() {
        let vec = vec![1.0, 2.0, -3.5];
        let bytes = serialize_vector(&vec);
        assert_eq!(bytes.len(), 12);

        // 1.0f32 in hex: 0x3f800000 -> little endian: 00 00 80 3f
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        // -3.5f32 in hex: 0xc0600000 -> little endian: 00 00 60 c0
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
        assert_eq!(deserialize_vector(&bytes), vec);
    }
}
