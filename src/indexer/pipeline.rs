//! Offline indexing: source table → chunks → embeddings → vector index, with a run log.
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::embedder::{EmbedderError, EmbeddingProvider};
use crate::index::models::Metadata;
use crate::index::upsert::disambiguate_ids;
use crate::index::{IndexError, VectorIndex};
use crate::indexer::chunker::chunk_text;
use crate::indexer::loader::{self, LawRecord, LoaderError};
use crate::store::runs::{NewRun, RunStatus};
use crate::store::{Store, StoreError};

/// Hex characters of the SHA-256 content hash kept in chunk ids.
const ROW_HASH_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoaderError),

    #[error(transparent)]
    Embed(#[from] EmbedderError),

    #[error("index write failed: {0}")]
    Index(#[from] IndexError),

    #[error("run log error: {0}")]
    RunLog(#[from] StoreError),
}

/// Parameters of one indexing run.
#[derive(Debug, Clone)]
pub struct IndexJob<'a> {
    pub source_path: &'a Path,
    pub index_dir: &'a Path,
    pub collection: &'a str,
    /// Window length in characters; `<= 0` keeps each record whole.
    pub chunk_size: i64,
    pub chunk_overlap: i64,
    /// Chunks embedded and upserted per batch; 0 is treated as 1.
    pub batch_size: usize,
}

/// Result of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub total_rows: usize,
    pub total_chunks: usize,
}

/// A chunk ready to be embedded, with its stable id.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub meta: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Drives a run record through `Pending → Running → {Completed, Failed}`.
struct RunTracker<'s> {
    store: &'s Store,
    run_id: Option<i64>,
    state: RunState,
}

impl<'s> RunTracker<'s> {
    fn new(store: &'s Store) -> Self {
        Self {
            store,
            run_id: None,
            state: RunState::Pending,
        }
    }

    fn begin(&mut self, run: &NewRun<'_>) -> Result<i64, StoreError> {
        debug_assert_eq!(self.state, RunState::Pending);
        let id = self.store.start_embedding_run(run)?;
        self.run_id = Some(id);
        self.state = RunState::Running;
        info!("Embedding run {id} started");
        Ok(id)
    }

    fn complete(&mut self, counts: &Counts) -> Result<(), StoreError> {
        let id = self.running_id()?;
        self.store.finish_embedding_run(
            id,
            RunStatus::Ok,
            "",
            Some(counts.rows),
            Some(counts.chunks_done),
        )?;
        self.state = RunState::Completed;
        info!(
            "Embedding run {id} completed: {} rows, {} chunks",
            counts.rows, counts.chunks_done
        );
        Ok(())
    }

    fn fail(&mut self, error: &PipelineError, counts: &Counts) -> Result<(), StoreError> {
        let id = self.running_id()?;
        self.store.finish_embedding_run(
            id,
            RunStatus::Failed,
            &error.to_string(),
            Some(counts.rows),
            Some(counts.chunks_done),
        )?;
        self.state = RunState::Failed;
        warn!("Embedding run {id} failed: {error}");
        Ok(())
    }

    fn running_id(&self) -> Result<i64, StoreError> {
        match (self.state, self.run_id) {
            (RunState::Running, Some(id)) => Ok(id),
            (_, id) => Err(StoreError::InvalidValue {
                field: "run state",
                value: format!("{:?} (run {id:?})", self.state),
            }),
        }
    }
}

/// How far a run got; recorded even when it fails.
#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    rows: usize,
    chunks_done: usize,
}

/// First 12 hex characters of the SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = format!("{digest:x}");
    hex.truncate(ROW_HASH_LEN);
    hex
}

/// Split records into chunks with content-derived ids.
///
/// Ids have the form `{base_id}__r{row}__c{chunk}__{hash}`, so the same input always yields
/// the same ids and rerunning an index overwrites instead of duplicating.
pub fn build_chunks(records: &[LawRecord], chunk_size: i64, chunk_overlap: i64) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for (row_idx, record) in records.iter().enumerate() {
        let base_id = match record.id.trim() {
            "" => format!("row_{row_idx}"),
            id => id.to_string(),
        };
        let row_hash = content_hash(&record.text);

        for (chunk_idx, text) in chunk_text(&record.text, chunk_size, chunk_overlap)
            .into_iter()
            .enumerate()
        {
            let mut meta = record.meta.clone();
            meta.insert("source_id".into(), Value::String(base_id.clone()));
            meta.insert("row_index".into(), Value::from(row_idx));
            meta.insert("chunk_index".into(), Value::from(chunk_idx));
            meta.insert("row_hash".into(), Value::String(row_hash.clone()));

            chunks.push(Chunk {
                id: format!("{base_id}__r{row_idx}__c{chunk_idx}__{row_hash}"),
                text,
                meta,
            });
        }
    }

    let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    for (chunk, id) in chunks.iter_mut().zip(disambiguate_ids(&ids)) {
        chunk.id = id;
    }

    chunks
}

/// Build a collection from the source table described by `job`.
///
/// The run is logged in `store`: a `running` record is written before any work and
/// updated once to `ok` or `failed`. `on_progress(done, total)` is called after every
/// batch. Batches already upserted when a later step fails stay in the index.
pub fn run_embedding<F>(
    provider: &EmbeddingProvider,
    store: &Store,
    job: &IndexJob<'_>,
    mut on_progress: F,
) -> Result<RunSummary, PipelineError>
where
    F: FnMut(usize, usize),
{
    let index_dir = job.index_dir.to_string_lossy();
    let device = provider.device().to_string();

    let mut tracker = RunTracker::new(store);
    let run_id = tracker.begin(&NewRun {
        model_id: provider.model_id(),
        device: &device,
        collection: job.collection,
        index_dir: &index_dir,
    })?;

    let mut counts = Counts::default();
    let outcome = execute(provider, job, &mut counts, &mut on_progress);

    match outcome {
        Ok(()) => {
            tracker.complete(&counts)?;
            Ok(RunSummary {
                run_id,
                total_rows: counts.rows,
                total_chunks: counts.chunks_done,
            })
        }
        Err(err) => {
            if let Err(log_err) = tracker.fail(&err, &counts) {
                warn!("Could not record failure of run {run_id}: {log_err}");
            }
            Err(err)
        }
    }
}

fn execute(
    provider: &EmbeddingProvider,
    job: &IndexJob<'_>,
    counts: &mut Counts,
    on_progress: &mut dyn FnMut(usize, usize),
) -> Result<(), PipelineError> {
    let mut index = VectorIndex::open(job.index_dir, job.collection)?;

    let records = loader::load(job.source_path)?;
    counts.rows = records.len();

    let chunks = build_chunks(&records, job.chunk_size, job.chunk_overlap);
    info!(
        "Prepared {} chunks from {} rows (size={}, overlap={})",
        chunks.len(),
        records.len(),
        job.chunk_size,
        job.chunk_overlap
    );

    index_chunks(provider, &mut index, &chunks, job.batch_size, counts, on_progress)
}

fn index_chunks(
    provider: &EmbeddingProvider,
    index: &mut VectorIndex,
    chunks: &[Chunk],
    batch_size: usize,
    counts: &mut Counts,
    on_progress: &mut dyn FnMut(usize, usize),
) -> Result<(), PipelineError> {
    let total = chunks.len();
    if total == 0 {
        return Ok(());
    }

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
        let vectors = provider.encode(&texts)?;

        let ids: Vec<String> = batch.iter().map(|c| c.id.clone()).collect();
        let docs: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let metas: Vec<Metadata> = batch.iter().map(|c| c.meta.clone()).collect();
        index.upsert(&ids, &docs, &vectors, &metas)?;

        counts.chunks_done += batch.len();
        debug!("Upserted {}/{} chunks", counts.chunks_done, total);
        on_progress(counts.chunks_done, total);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::embedder::{Device, Embedder};
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn record(id: &str, text: &str) -> LawRecord {
        LawRecord {
            id: id.to_string(),
            text: text.to_string(),
            meta: Metadata::new(),
        }
    }

    fn mock_provider() -> EmbeddingProvider {
        EmbeddingProvider::with_embedder("mock", Device::Cpu, Arc::new(MockEmbedder::new(32)))
    }

    #[test]
    fn test_content_hash() {
        let h = content_hash("Điều 1");
        assert_eq!(h.len(), 12);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, content_hash("Điều 1"));
        assert_ne!(h, content_hash("Điều 2"));
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb924...
        assert_eq!(content_hash(""), "e3b0c44298fc");
    }

    #[test]
    fn test_build_chunks_ids_and_meta() {
        let records = vec![record("A1", &"x".repeat(50)), record("  ", "ngắn")];
        let chunks = build_chunks(&records, 30, 5);

        assert_eq!(chunks.len(), 3);
        let hash = content_hash(&"x".repeat(50));
        assert_eq!(chunks[0].id, format!("A1__r0__c0__{hash}"));
        assert_eq!(chunks[1].id, format!("A1__r0__c1__{hash}"));
        assert!(chunks[2].id.starts_with("row_1__r1__c0__"));

        assert_eq!(chunks[1].meta["source_id"], "A1");
        assert_eq!(chunks[1].meta["chunk_index"], 1);
        assert_eq!(chunks[1].meta["row_index"], 0);
        assert_eq!(chunks[1].meta["row_hash"], hash.as_str());
    }

    #[test]
    fn test_build_chunks_stable_across_runs() {
        let records = vec![record("A1", "Điều 1 nội dung"), record("A1", "Điều 1 nội dung")];
        let first = build_chunks(&records, 8, 2);
        let second = build_chunks(&records, 8, 2);
        assert_eq!(first, second);

        // Same natural key on two rows still yields distinct ids.
        let ids: std::collections::HashSet<_> = first.iter().map(|c| &c.id).collect();
        assert_eq!(ids.len(), first.len());
    }

    #[test]
    fn test_blank_records_yield_no_chunks() {
        let records = vec![record("1", ""), record("2", "   ")];
        assert!(build_chunks(&records, 100, 10).is_empty());
    }

    #[test]
    fn test_run_embedding_progress_and_log() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("laws.csv");
        fs::write(
            &csv,
            format!(
                "dieu_id,dieu_ten,dieu_noidung\nA1,Điều 1,{}\nA2,Điều 2,{}\n",
                "x".repeat(50),
                "y".repeat(50)
            ),
        )
        .unwrap();
        let index_dir = dir.path().join("vector_db");

        let provider = mock_provider();
        let store = Store::open_in_memory().unwrap();
        let job = IndexJob {
            source_path: &csv,
            index_dir: &index_dir,
            collection: "laws",
            chunk_size: 30,
            chunk_overlap: 5,
            batch_size: 3,
        };

        let mut progress = Vec::new();
        let summary = run_embedding(&provider, &store, &job, |done, total| {
            progress.push((done, total))
        })
        .unwrap();

        // "Điều 1 xxxx..." is 57 chars → 3 windows of 30 with stride 25
        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.total_chunks, 6);
        assert_eq!(progress, vec![(3, 6), (6, 6)]);

        let run = store.get_embedding_run(summary.run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Ok);
        assert_eq!(run.total_chunks, Some(6));
        assert_eq!(run.device, "cpu");
        assert_eq!(run.model_id, "mock");

        let index = VectorIndex::open(&index_dir, "laws").unwrap();
        assert_eq!(index.count().unwrap(), 6);
    }

    #[test]
    fn test_missing_source_is_recorded_as_failed() {
        let dir = tempdir().unwrap();
        let provider = mock_provider();
        let store = Store::open_in_memory().unwrap();
        let missing = dir.path().join("missing.csv");
        let index_dir = dir.path().join("vector_db");
        let job = IndexJob {
            source_path: &missing,
            index_dir: &index_dir,
            collection: "laws",
            chunk_size: 1200,
            chunk_overlap: 120,
            batch_size: 128,
        };

        let err = run_embedding(&provider, &store, &job, |_, _| {}).unwrap_err();
        assert!(matches!(err, PipelineError::Load(LoaderError::NotFound(_))));

        let runs = store.embedding_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].note.contains("missing.csv"));
        assert!(runs[0].finished_at.is_some());
        assert!(!provider.is_loaded());
    }

    #[test]
    fn test_zero_chunks_completes_without_loading_model() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("empty.csv");
        fs::write(&csv, "dieu_id,dieu_ten,dieu_noidung\nA1,,\n").unwrap();
        let index_dir = dir.path().join("vector_db");

        let provider = mock_provider();
        let store = Store::open_in_memory().unwrap();
        let job = IndexJob {
            source_path: &csv,
            index_dir: &index_dir,
            collection: "laws",
            chunk_size: 100,
            chunk_overlap: 10,
            batch_size: 0,
        };

        let summary = run_embedding(&provider, &store, &job, |_, _| {}).unwrap();
        assert_eq!(summary.total_rows, 1);
        assert_eq!(summary.total_chunks, 0);
        assert!(!provider.is_loaded());

        let run = store.get_embedding_run(summary.run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Ok);
        assert_eq!(run.total_chunks, Some(0));
    }

    #[test]
    fn test_model_fetch_failure_is_recorded_as_failed() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("laws.csv");
        fs::write(&csv, "dieu_id,dieu_ten,dieu_noidung\nA1,Điều 1,Phạm vi điều chỉnh\n").unwrap();
        let index_dir = dir.path().join("vector_db");

        let provider = EmbeddingProvider::new(
            "keepitreal/vietnamese-sbert",
            Device::Cpu,
            Box::new(|id: &str, _: Device| -> Result<Arc<dyn Embedder>, EmbedderError> {
                Err(EmbedderError::ModelLoadFailed(format!(
                    "failed to fetch {id}: HTTP request failed: dns error"
                )))
            }),
        );
        let store = Store::open_in_memory().unwrap();
        let job = IndexJob {
            source_path: &csv,
            index_dir: &index_dir,
            collection: "laws",
            chunk_size: 1200,
            chunk_overlap: 120,
            batch_size: 128,
        };

        let err = run_embedding(&provider, &store, &job, |_, _| {}).unwrap_err();
        assert!(matches!(err, PipelineError::Embed(EmbedderError::ModelLoadFailed(_))));

        let runs = store.embedding_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].note.contains("failed to fetch keepitreal/vietnamese-sbert"));
        assert_eq!(runs[0].total_rows, Some(1));
        assert_eq!(runs[0].total_chunks, Some(0));
    }

    struct FailAfter {
        inner: MockEmbedder,
        calls: std::sync::atomic::AtomicUsize,
        limit: usize,
    }

    impl Embedder for FailAfter {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
            self.inner.embed(text)
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
            let n = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n >= self.limit {
                return Err(EmbedderError::InferenceFailed("device lost".into()));
            }
            texts.iter().map(|t| self.inner.embed(t)).collect()
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions
        }
    }

    #[test]
    fn test_failure_keeps_committed_batches() {
        let dir = tempdir().unwrap();
        let csv = dir.path().join("laws.csv");
        let mut body = String::from("dieu_id,dieu_noidung\n");
        for i in 0..5 {
            body.push_str(&format!("D{i},nội dung điều {i}\n"));
        }
        fs::write(&csv, body).unwrap();
        let index_dir = dir.path().join("vector_db");

        let embedder = FailAfter {
            inner: MockEmbedder::new(8),
            calls: Default::default(),
            limit: 1,
        };
        let provider = EmbeddingProvider::with_embedder("flaky", Device::Cpu, Arc::new(embedder));
        let store = Store::open_in_memory().unwrap();
        let job = IndexJob {
            source_path: &csv,
            index_dir: &index_dir,
            collection: "laws",
            chunk_size: 1200,
            chunk_overlap: 120,
            batch_size: 2,
        };

        let err = run_embedding(&provider, &store, &job, |_, _| {}).unwrap_err();
        assert!(matches!(err, PipelineError::Embed(_)));

        let run = &store.embedding_runs(1).unwrap()[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.note.contains("device lost"));
        assert_eq!(run.total_rows, Some(5));
        assert_eq!(run.total_chunks, Some(2));

        let index = VectorIndex::open(&index_dir, "laws").unwrap();
        assert_eq!(index.count().unwrap(), 2);
    }
}
