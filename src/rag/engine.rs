use serde::Serialize;
use tracing::debug;

use super::RagError;
use super::citation::{NO_CITATION, build_followups, format_citation};
use crate::embedder::EmbeddingProvider;
use crate::index::VectorIndex;
use crate::index::models::Hit;

/// Longest passage quoted in an answer, in characters.
pub const MAX_PASSAGE_CHARS: usize = 1600;

pub const NOT_FOUND_ANSWER: &str = "Mình chưa tìm thấy Điều/Khoản phù hợp trong dữ liệu vector hiện có. \
     Bạn thử diễn đạt lại câu hỏi cụ thể hơn (hành vi + bối cảnh) nhé.";

const CITATION_LABEL: &str = "**Trích dẫn:**";
const FOLLOWUP_HEADING: &str = "**Cần mình làm rõ nhanh 2 ý này nhé:**";

/// A grounded answer: the nearest passage with its citation, plus clarifying questions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub hits: Vec<Hit>,
    pub followups: Vec<String>,
}

impl Answer {
    pub fn is_found(&self) -> bool {
        !self.hits.is_empty()
    }
}

/// Answers questions from one collection using one embedding provider.
pub struct Retriever<'a> {
    provider: &'a EmbeddingProvider,
    index: &'a VectorIndex,
    max_distance: Option<f32>,
}

impl<'a> Retriever<'a> {
    pub fn new(provider: &'a EmbeddingProvider, index: &'a VectorIndex) -> Self {
        Self {
            provider,
            index,
            max_distance: None,
        }
    }

    /// Drop hits farther than `max_distance` (cosine distance) from the question.
    pub fn with_max_distance(mut self, max_distance: Option<f32>) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// The `top_k` nearest chunks to `question`, nearest first.
    pub fn retrieve_topk(&self, question: &str, top_k: usize) -> Result<Vec<Hit>, RagError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query = self.provider.encode_one(question)?;
        let mut hits = self.index.query(&query, top_k)?;

        if let Some(limit) = self.max_distance {
            let before = hits.len();
            hits.retain(|h| h.distance <= limit);
            if hits.len() < before {
                debug!(
                    "Dropped {} hits beyond distance {limit}",
                    before - hits.len()
                );
            }
        }

        Ok(hits)
    }

    /// Quote the best passage with its citation, or the not-found text when nothing matches.
    pub fn answer_with_citations(&self, question: &str, top_k: usize) -> Result<Answer, RagError> {
        let hits = self.retrieve_topk(question, top_k)?;
        let followups = build_followups(question);

        let Some(best) = hits.first() else {
            return Ok(Answer {
                answer: NOT_FOUND_ANSWER.to_string(),
                hits,
                followups,
            });
        };

        let citation = match format_citation(&best.metadata) {
            c if c.is_empty() => NO_CITATION.to_string(),
            c => c,
        };

        let mut parts = Vec::with_capacity(3 + followups.len());
        let passage = truncate_passage(best.document.trim(), MAX_PASSAGE_CHARS);
        if !passage.is_empty() {
            parts.push(passage);
        }
        parts.push(format!("\n{CITATION_LABEL} {citation}"));
        parts.push(format!("\n{FOLLOWUP_HEADING}"));
        parts.extend(followups.iter().map(|f| format!("- {f}")));

        Ok(Answer {
            answer: parts.join("\n").trim().to_string(),
            hits,
            followups,
        })
    }
}

/// Cut `text` to `max_chars` characters, marking the cut with `" ..."`.
pub fn truncate_passage(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{} ...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}
