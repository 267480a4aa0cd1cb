//! # lawrag — retrieval over Vietnamese legal text
//!
//! Loads law articles from a CSV or spreadsheet, chunks and embeds them into a
//! local SQLite vector index, and answers questions by quoting the nearest
//! article together with its citation.
//!
//! ## Architecture
//!
//! - **[`config`]** — Flat JSON configuration with environment overrides
//! - **[`indexer`]** — Source table loading, chunking, and the logged indexing run
//! - **[`embedder`]** — Device selection, lazily loaded ONNX sentence embeddings
//! - **[`index`]** — SQLite + sqlite-vec collection store (upsert, nearest-neighbour query)
//! - **[`rag`]** — Top-k retrieval and citation-style answers
//! - **[`store`]** — Embedding run log and chat history
//! - **[`eval`]** — Precision@k, recall@k and MRR over labelled questions

pub mod config;
pub mod embedder;
pub mod eval;
pub mod index;
pub mod indexer;
pub mod rag;
pub mod store;
