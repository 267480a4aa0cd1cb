use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Collapses runs of whitespace (including NBSP) into a single space and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Splits text into fixed-length windows of `chunk_size` characters that overlap by `overlap`.
///
/// Lengths are counted in `char`s. A non-positive `chunk_size` disables chunking and returns the
/// whole normalized text as one chunk. The stride is never below one character, so an overlap
/// at or above `chunk_size` still terminates.
pub fn chunk_text(text: &str, chunk_size: i64, overlap: i64) -> Vec<String> {
    let text = normalize_whitespace(text);
    if text.is_empty() {
        return Vec::new();
    }
    if chunk_size <= 0 {
        return vec![text];
    }

    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let size = chunk_size as usize;
    let step = (chunk_size - overlap.max(0)).max(1) as usize;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < n {
        let end = (start + size).min(n);
        chunks.push(chars[start..end].iter().collect());
        if end == n {
            break;
        }
        start += step;
    }

    chunks
}
