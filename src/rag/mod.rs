//! Query-time retrieval and citation-style answers over the vector index.
use thiserror::Error;

use crate::embedder::EmbedderError;
use crate::index::IndexError;

pub mod citation;
pub mod engine;

pub use citation::{build_followups, format_citation};
pub use engine::{Answer, Retriever};

#[derive(Error, Debug)]
pub enum RagError {
    #[error("failed to embed question: {0}")]
    Embed(#[from] EmbedderError),

    #[error("index query failed: {0}")]
    Index(#[from] IndexError),
}
