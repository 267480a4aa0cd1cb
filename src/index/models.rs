use serde::Serialize;

/// Free-form metadata attached to an indexed document.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One query result. `distance` is cosine distance: 0 for identical directions, lower is nearer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub distance: f32,
}

impl Hit {
    /// Look up a metadata value rendered as a non-empty string.
    ///
    /// Strings are trimmed, numbers and booleans are formatted, and
    /// null, blank or structured values count as absent.
    pub fn meta_str(&self, key: &str) -> Option<String> {
        meta_str(&self.metadata, key)
    }
}

pub fn meta_str(metadata: &Metadata, key: &str) -> Option<String> {
    let rendered = match metadata.get(key)? {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!rendered.is_empty()).then_some(rendered)
}
