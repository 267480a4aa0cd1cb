//! Retrieval quality metrics over labelled questions (one gold source id per question).
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::rag::{RagError, Retriever};

/// 1.0 if `gold` is among the first `k` predictions, else 0.0.
pub fn precision_at_k(pred: &[String], gold: &str, k: usize) -> f64 {
    if pred.iter().take(k).any(|p| p == gold) { 1.0 } else { 0.0 }
}

/// With a single gold item recall@k and precision@k coincide.
pub fn recall_at_k(pred: &[String], gold: &str, k: usize) -> f64 {
    precision_at_k(pred, gold, k)
}

/// Reciprocal rank of `gold` in `pred`, 0.0 if absent.
pub fn mrr(pred: &[String], gold: &str) -> f64 {
    pred.iter()
        .position(|p| p == gold)
        .map(|i| 1.0 / (i + 1) as f64)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvalCase {
    pub question: String,
    pub gold_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvalReport {
    pub cases: usize,
    pub k: usize,
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub mrr: f64,
}

/// Read cases from a CSV with `question` and `gold_id` columns.
pub fn load_cases(path: &Path) -> Result<Vec<EvalCase>, csv::Error> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut cases = Vec::new();
    for row in reader.deserialize() {
        let case: EvalCase = row?;
        cases.push(case);
    }
    Ok(cases)
}

/// Run every case through `retriever` and average the metrics.
///
/// Predictions are the `source_id` of each hit, in rank order.
pub fn evaluate(retriever: &Retriever<'_>, cases: &[EvalCase], k: usize) -> Result<EvalReport, RagError> {
    let mut report = EvalReport {
        cases: cases.len(),
        k,
        precision_at_k: 0.0,
        recall_at_k: 0.0,
        mrr: 0.0,
    };
    if cases.is_empty() {
        return Ok(report);
    }

    for case in cases {
        let hits = retriever.retrieve_topk(&case.question, k)?;
        let pred: Vec<String> = hits
            .iter()
            .map(|h| h.meta_str("source_id").unwrap_or_else(|| h.id.clone()))
            .collect();
        let gold = case.gold_id.trim();

        report.precision_at_k += precision_at_k(&pred, gold, k);
        report.recall_at_k += recall_at_k(&pred, gold, k);
        report.mrr += mrr(&pred, gold);
    }

    let n = cases.len() as f64;
    report.precision_at_k /= n;
    report.recall_at_k /= n;
    report.mrr /= n;

    info!(
        "Evaluated {} cases at k={k}: P@k={:.3} MRR={:.3}",
        report.cases, report.precision_at_k, report.mrr
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use crate::embedder::{Device, EmbeddingProvider};
    use crate::index::VectorIndex;
    use crate::index::models::Metadata;
    use serde_json::json;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_metrics() {
        let pred = ids(&["A3", "A1", "A2"]);
        assert_eq!(precision_at_k(&pred, "A1", 1), 0.0);
        assert_eq!(precision_at_k(&pred, "A1", 2), 1.0);
        assert_eq!(recall_at_k(&pred, "A2", 3), 1.0);
        assert_eq!(mrr(&pred, "A3"), 1.0);
        assert_eq!(mrr(&pred, "A1"), 0.5);
        assert_eq!(mrr(&pred, "Z"), 0.0);
        assert_eq!(mrr(&[], "A1"), 0.0);
    }

    #[test]
    fn test_load_cases() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.csv");
        fs::write(&path, "question,gold_id\nVượt đèn đỏ?,A1\n\"Đặt cọc, hủy?\",B2\n").unwrap();

        let cases = load_cases(&path).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[1].question, "Đặt cọc, hủy?");
        assert_eq!(cases[1].gold_id, "B2");
    }

    #[test]
    fn test_evaluate_uses_source_id() {
        let provider =
            EmbeddingProvider::with_embedder("mock", Device::Cpu, Arc::new(MockEmbedder::new(16)));
        let mut index = VectorIndex::open_in_memory("laws").unwrap();
        let texts = ids(&["Điều 1 phạm vi", "Điều 2 đối tượng"]);
        let vectors = provider.encode(&["Điều 1 phạm vi", "Điều 2 đối tượng"]).unwrap();
        let metas: Vec<Metadata> = ["A1", "A2"]
            .iter()
            .map(|s| json!({"source_id": s}).as_object().cloned().unwrap())
            .collect();
        index
            .upsert(&ids(&["A1__r0__c0__x", "A2__r1__c0__y"]), &texts, &vectors, &metas)
            .unwrap();

        let retriever = Retriever::new(&provider, &index);
        let cases = vec![
            EvalCase { question: "Điều 1 phạm vi".into(), gold_id: "A1".into() },
            EvalCase { question: "Điều 2 đối tượng".into(), gold_id: "A2".into() },
        ];

        let report = evaluate(&retriever, &cases, 1).unwrap();
        assert_eq!(report.cases, 2);
        assert_eq!(report.precision_at_k, 1.0);
        assert_eq!(report.mrr, 1.0);

        let empty = evaluate(&retriever, &[], 5).unwrap();
        assert_eq!(empty.mrr, 0.0);
    }
}
