use crate::index::models::{Metadata, meta_str};

/// Used when none of the citation fields are present on the best hit.
pub const NO_CITATION: &str = "(không thấy Điều/Khoản cụ thể trong dữ liệu truy xuất)";

const ARTICLE_KEYS: &[&str] = &["dieu_ten", "ten", "mapc"];
const CLAUSE_KEYS: &[&str] = &["khoan", "khoan_so"];
const DOCUMENT_KEYS: &[&str] = &["vbqppl", "vb"];
const LINK_KEYS: &[&str] = &["vbqppl_link", "link"];

const TRAFFIC_TERMS: &[&str] = &["tai nạn", "va chạm", "tông", "đâm", "giao thông"];
const CONTRACT_TERMS: &[&str] = &["hợp đồng", "mua bán", "đặt cọc", "cho vay", "nợ"];

const TRAFFIC_FOLLOWUPS: [&str; 2] = [
    "Bạn cho mình biết **loại phương tiện** + **hành vi vi phạm** cụ thể (vượt đèn đỏ/đi ngược chiều/không đội mũ...)?",
    "Sự việc xảy ra **ở tỉnh/thành nào** và có **CSGT lập biên bản** chưa?",
];
const CONTRACT_FOLLOWUPS: [&str; 2] = [
    "Bạn cho mình biết **hợp đồng bằng miệng hay văn bản**? có chứng cứ gì (tin nhắn/chuyển khoản)?",
    "Bạn đang muốn hỏi về **quyền lợi**, **trách nhiệm**, hay **cách xử lý tranh chấp**?",
];
const GENERIC_FOLLOWUPS: [&str; 2] = [
    "Bạn cho mình biết **bối cảnh cụ thể** (ai – làm gì – ở đâu – thời điểm nào) để mình đối chiếu đúng Điều/Khoản hơn được không?",
    "Trường hợp này có **giấy tờ/biên bản/quyết định** nào liên quan không (nếu có, nói tên/loại văn bản)?",
];

fn first_present(meta: &Metadata, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| meta_str(meta, k))
}

/// Render `Điều …  Khoản N  (document)  link` from whichever fields the hit carries.
///
/// Returns an empty string when nothing is available; callers substitute [`NO_CITATION`].
pub fn format_citation(meta: &Metadata) -> String {
    let mut parts = Vec::with_capacity(4);
    if let Some(article) = first_present(meta, ARTICLE_KEYS) {
        parts.push(article);
    }
    if let Some(clause) = first_present(meta, CLAUSE_KEYS) {
        parts.push(format!("Khoản {clause}"));
    }
    if let Some(doc) = first_present(meta, DOCUMENT_KEYS) {
        parts.push(format!("({doc})"));
    }
    if let Some(link) = first_present(meta, LINK_KEYS) {
        parts.push(link);
    }
    parts.join(" ")
}

/// Two clarifying questions picked by keyword on the lowercased question.
pub fn build_followups(question: &str) -> Vec<String> {
    let q = question.to_lowercase();
    let picked = if TRAFFIC_TERMS.iter().any(|t| q.contains(t)) {
        TRAFFIC_FOLLOWUPS
    } else if CONTRACT_TERMS.iter().any(|t| q.contains(t)) {
        CONTRACT_FOLLOWUPS
    } else {
        GENERIC_FOLLOWUPS
    };
    picked.iter().map(|s| s.to_string()).collect()
}
