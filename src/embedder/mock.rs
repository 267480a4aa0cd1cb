/// Mock embedder for testing purposes.
///
/// Generates deterministic embeddings based on text hash.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError, l2_normalize};

/// A mock embedder that produces deterministic vectors from text hashes.
///
/// Useful for testing without loading a real ONNX model.
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        // Centered values from a xorshift stream so unrelated texts land far apart
        let mut embedding = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            embedding.push((state % 2001) as f32 / 1000.0 - 1.0);
        }

        Ok(l2_normalize(&embedding))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
