/// Shared embedding provider owning one lazily loaded model.
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::info;

use super::download::{all_files_present, download_model_files};
use super::onnx::OnnxEmbedder;
use super::{Device, Embedder, EmbedderError, l2_normalize};

/// Constructs the model for a (model id, device) pair.
pub type ModelLoader =
    Box<dyn Fn(&str, Device) -> Result<Arc<dyn Embedder>, EmbedderError> + Send + Sync>;

/// Owns the embedding model for one model id on one device.
///
/// Built once at startup and passed by reference to the indexing pipeline and the
/// retriever. The model is loaded on the first [`encode`](Self::encode) and reused for
/// the lifetime of the provider; the check-then-load runs under a mutex so concurrent
/// first callers load it only once.
pub struct EmbeddingProvider {
    model_id: String,
    device: Device,
    loader: ModelLoader,
    model: Mutex<Option<Arc<dyn Embedder>>>,
}

impl EmbeddingProvider {
    pub fn new(model_id: impl Into<String>, device: Device, loader: ModelLoader) -> Self {
        Self {
            model_id: model_id.into(),
            device,
            loader,
            model: Mutex::new(None),
        }
    }

    /// Provider backed by an exported ONNX model in `model_dir`.
    ///
    /// Missing model files are fetched from the hub on first use, so a failed download
    /// surfaces as [`EmbedderError::ModelLoadFailed`] from the first `encode`.
    pub fn onnx(
        model_id: impl Into<String>,
        model_dir: PathBuf,
        device: Device,
        dimensions: usize,
    ) -> Self {
        Self::new(
            model_id,
            device,
            Box::new(move |id: &str, device: Device| -> Result<Arc<dyn Embedder>, EmbedderError> {
                if !all_files_present(&model_dir) {
                    info!("Model files missing in {}, downloading", model_dir.display());
                    download_model_files(id, &model_dir).map_err(|e| {
                        EmbedderError::ModelLoadFailed(format!("failed to fetch {id}: {e:#}"))
                    })?;
                }
                let embedder = OnnxEmbedder::new(&model_dir, device, dimensions)?;
                Ok(Arc::new(embedder) as Arc<dyn Embedder>)
            }),
        )
    }

    /// Provider around an already constructed embedder (tests, mocks).
    pub fn with_embedder(
        model_id: impl Into<String>,
        device: Device,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self::new(
            model_id,
            device,
            Box::new(move |_: &str, _: Device| Ok(embedder.clone())),
        )
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Whether the model has been loaded yet.
    pub fn is_loaded(&self) -> bool {
        self.model.lock().map(|m| m.is_some()).unwrap_or(false)
    }

    /// The cached model, loading it on first use.
    pub fn model(&self) -> Result<Arc<dyn Embedder>, EmbedderError> {
        let mut slot = self
            .model
            .lock()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("lock poisoned: {e}")))?;

        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }

        info!("Loading embedding model {} on {}", self.model_id, self.device);
        let started = Instant::now();
        let model = (self.loader)(&self.model_id, self.device)?;
        info!(
            "Embedding model ready in {:.1}s ({} dims)",
            started.elapsed().as_secs_f32(),
            model.dimensions()
        );

        *slot = Some(model.clone());
        Ok(model)
    }

    /// Encode texts into L2-normalized vectors, one per input.
    pub fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model()?;
        let vectors = model.embed_batch(texts)?;
        if vectors.len() != texts.len() {
            return Err(EmbedderError::InferenceFailed(format!(
                "model returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors.iter().map(|v| l2_normalize(v)).collect())
    }

    /// Encode a single text.
    pub fn encode_one(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let model = self.model()?;
        Ok(l2_normalize(&model.embed(text)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct Unnormalized;

    impl Embedder for Unnormalized {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedderError> {
            Ok(vec![3.0, 4.0])
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    fn counting_provider(loads: Arc<AtomicUsize>) -> EmbeddingProvider {
        EmbeddingProvider::new(
            "mock",
            Device::Cpu,
            Box::new(move |_: &str, _: Device| -> Result<Arc<dyn Embedder>, EmbedderError> {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(MockEmbedder::new(16)) as Arc<dyn Embedder>)
            }),
        )
    }

    #[test]
    fn test_model_loaded_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let provider = counting_provider(loads.clone());
        assert!(!provider.is_loaded());

        provider.encode(&["a"]).unwrap();
        provider.encode(&["b", "c"]).unwrap();
        provider.encode_one("d").unwrap();

        assert!(provider.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_use_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(counting_provider(loads.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let provider = provider.clone();
                thread::spawn(move || provider.encode_one(&format!("q{i}")).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().len(), 16);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_input_skips_loading() {
        let loads = Arc::new(AtomicUsize::new(0));
        let provider = counting_provider(loads.clone());
        assert!(provider.encode(&[]).unwrap().is_empty());
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_vectors_are_normalized() {
        let provider = EmbeddingProvider::with_embedder("raw", Device::Cpu, Arc::new(Unnormalized));
        let vecs = provider.encode(&["x"]).unwrap();
        assert!((vecs[0][0] - 0.6).abs() < 1e-6);
        assert!((vecs[0][1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_load_failure_is_reported_and_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let provider = EmbeddingProvider::new(
            "broken",
            Device::Cpu,
            Box::new(move |id: &str, _: Device| -> Result<Arc<dyn Embedder>, EmbedderError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(EmbedderError::ModelLoadFailed(format!("{id} unavailable")))
            }),
        );

        let err = provider.encode(&["x"]).unwrap_err();
        assert!(matches!(err, EmbedderError::ModelLoadFailed(ref m) if m.contains("broken")));
        assert!(provider.encode(&["y"]).is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(!provider.is_loaded());
    }
}
