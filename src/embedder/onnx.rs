/// ONNX Runtime sentence embedder using the `ort` crate.
///
/// Loads an exported sentence-transformer (`model.onnx` + `tokenizer.json`),
/// runs inference on the resolved device, applies mean pooling with the
/// attention mask, and L2-normalizes the result.
use std::path::Path;
use std::sync::Mutex;

use ort::execution_providers::CUDAExecutionProvider;
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use super::tokenizer::BertTokenizer;
use super::{Device, Embedder, EmbedderError, l2_normalize};

/// ONNX-backed embedder implementing the `Embedder` trait.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: BertTokenizer,
    dimensions: usize,
    /// BERT exports take `token_type_ids`; RoBERTa-family exports (PhoBERT) do not.
    token_type_ids: bool,
}

/// How to produce the files this embedder needs when a hub repo has no ONNX export.
fn export_hint(model_dir: &Path) -> String {
    format!(
        "export the model with `optimum-cli export onnx --model <model id> {}` \
         (or point EMBED_MODEL_DIR at a directory holding model.onnx and tokenizer.json)",
        model_dir.display()
    )
}

/// Whether the session declares a `token_type_ids` input.
fn declares_token_type_ids<'a>(mut input_names: impl Iterator<Item = &'a str>) -> bool {
    input_names.any(|name| name == "token_type_ids")
}

impl OnnxEmbedder {
    /// Load a model from `model_dir` onto `device`.
    ///
    /// Expects `model.onnx` and `tokenizer.json` in `model_dir`. `dimensions` is the
    /// hidden size of the model and is checked against every inference output.
    pub fn new(model_dir: &Path, device: Device, dimensions: usize) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");

        if !model_path.exists() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "model.onnx not found in {}; {}",
                model_dir.display(),
                export_hint(model_dir)
            )));
        }

        info!("Initializing ONNX Runtime on {device}...");

        let mut builder = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder error: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?
            .with_inter_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config error: {e}")))?;

        if device == Device::Cuda {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(|e| {
                    EmbedderError::ModelLoadFailed(format!("execution provider error: {e}"))
                })?;
        }

        let session = builder
            .commit_from_file(&model_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load error: {e}")))?;

        let token_type_ids = declares_token_type_ids(session.inputs().iter().map(|i| i.name()));
        info!("ONNX model loaded on {device} (token_type_ids input: {token_type_ids})");

        let tokenizer = BertTokenizer::from_model_dir(model_dir).map_err(|e| {
            EmbedderError::ModelLoadFailed(format!("tokenizer error: {e}; {}", export_hint(model_dir)))
        })?;

        info!("Tokenizer loaded (vocab size: {})", tokenizer.vocab_size());

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimensions,
            token_type_ids,
        })
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let tokens = self
            .tokenizer
            .tokenize(text)
            .map_err(|e| EmbedderError::TokenizerError(format!("tokenization failed: {e}")))?;

        let seq_len = tokens.input_ids.len();

        // (shape, data) tuple form avoids ndarray version coupling with ort
        let input_ids_val = Tensor::from_array(([1usize, seq_len], tokens.input_ids.clone()))
            .map_err(|e| EmbedderError::InferenceFailed(format!("input_ids error: {e}")))?;
        let attention_mask_val =
            Tensor::from_array(([1usize, seq_len], tokens.attention_mask.clone())).map_err(
                |e| EmbedderError::InferenceFailed(format!("attention_mask error: {e}")),
            )?;
        let mut inputs = ort::inputs![
            "input_ids" => input_ids_val,
            "attention_mask" => attention_mask_val,
        ];
        if self.token_type_ids {
            let token_type_ids_val = Tensor::from_array(([1usize, seq_len], vec![0i64; seq_len]))
                .map_err(|e| {
                    EmbedderError::InferenceFailed(format!("token_type_ids error: {e}"))
                })?;
            inputs.push(("token_type_ids".into(), token_type_ids_val.into()));
        }

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("lock poisoned: {e}")))?;
        let outputs = session
            .run(inputs)
            .map_err(|e| EmbedderError::InferenceFailed(format!("inference failed: {e}")))?;

        // Output shape: [batch_size=1, seq_length, hidden_size]
        let (_shape, hidden_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output extraction: {e}")))?;

        if hidden_data.len() != seq_len * self.dimensions {
            return Err(EmbedderError::InferenceFailed(format!(
                "unexpected output size {} for {seq_len} tokens x {} dims",
                hidden_data.len(),
                self.dimensions
            )));
        }

        let embedding = mean_pooling(
            hidden_data,
            &tokens.attention_mask,
            seq_len,
            self.dimensions,
        );

        Ok(l2_normalize(&embedding))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Mean pooling over hidden states weighted by attention mask.
///
/// `hidden_data` is a flat array with shape `[1, seq_len, hidden_size]`.
fn mean_pooling(
    hidden_data: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut result = vec![0.0f32; hidden_size];
    let mut mask_sum: f32 = 0.0;

    for t in 0..seq_len {
        let mask = attention_mask[t] as f32;
        mask_sum += mask;

        for h in 0..hidden_size {
            result[h] += hidden_data[t * hidden_size + h] * mask;
        }
    }

    if mask_sum > 0.0 {
        for v in &mut result {
            *v /= mask_sum;
        }
    }

    result
}
