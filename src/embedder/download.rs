/// Model snapshot download from the HuggingFace hub.
///
/// Downloads the exported ONNX model and tokenizer files for a model id if they
/// don't already exist locally.
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// Base URL for HuggingFace model files.
const HF_BASE: &str = "https://huggingface.co";

/// Files required for the embedder: (local name, path inside the model repo).
const MODEL_FILES: &[(&str, &str)] = &[
    ("model.onnx", "onnx/model.onnx"),
    ("tokenizer.json", "tokenizer.json"),
    ("config.json", "config.json"),
    ("special_tokens_map.json", "special_tokens_map.json"),
    ("tokenizer_config.json", "tokenizer_config.json"),
];

/// Directory name for a model id: `org/name` becomes `org__name`.
#[must_use]
pub fn safe_model_name(model_id: &str) -> String {
    model_id.trim().replace('/', "__")
}

/// Return the default local directory for `model_id`.
#[must_use]
pub fn default_model_dir(model_id: &str) -> PathBuf {
    Path::new("models").join(safe_model_name(model_id))
}

/// Check whether all required model files exist in `model_dir`.
#[must_use]
pub fn all_files_present(model_dir: &Path) -> bool {
    MODEL_FILES
        .iter()
        .all(|(name, _)| model_dir.join(name).exists())
}

fn file_url(model_id: &str, repo_path: &str) -> String {
    format!("{HF_BASE}/{}/resolve/main/{repo_path}", model_id.trim())
}

/// Download model files for `model_id` into `model_dir` if any are missing.
///
/// Creates the model directory if it doesn't exist.
/// Skips individual files that are already present.
pub fn download_model_files(model_id: &str, model_dir: &Path) -> Result<()> {
    info!("Checking model files in {}", model_dir.display());

    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create models directory: {}", model_dir.display()))?;

    if all_files_present(model_dir) {
        info!("All model files found, skipping download");
        return Ok(());
    }

    info!("Downloading {model_id} from HuggingFace (one-time, may take a while)...");

    for &(filename, repo_path) in MODEL_FILES {
        let dest = model_dir.join(filename);

        if dest.exists() {
            info!("File already exists: {filename}");
            continue;
        }

        let url = file_url(model_id, repo_path);
        info!("Downloading {filename}...");
        download_file(&dest, &url).with_context(|| format!("failed to download {filename}"))?;
    }

    info!("Model download complete: {}", model_dir.display());
    Ok(())
}

/// Download a single file with a progress bar.
fn download_file(dest: &Path, url: &str) -> Result<()> {
    let resp =
        reqwest::blocking::get(url).with_context(|| format!("HTTP request failed: {url}"))?;

    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        anyhow::bail!(
            "{url} not found: the repo does not publish this file; \
             export the model to ONNX locally and set EMBED_MODEL_DIR to its directory"
        );
    }
    if !resp.status().is_success() {
        anyhow::bail!("bad status: {} for {url}", resp.status());
    }

    let total = resp.content_length().unwrap_or(0);

    let pb = if total > 0 {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {percent}% ({bytes}/{total_bytes}) {msg}")
                .context("invalid progress template")?
                .progress_chars("█▓░"),
        );
        pb
    } else {
        ProgressBar::new_spinner()
    };

    // Write to a temp name first so an interrupted download is not mistaken for a complete file
    let partial = dest.with_extension("part");
    let mut file = fs::File::create(&partial)
        .with_context(|| format!("failed to create file: {}", partial.display()))?;

    let bytes = resp.bytes().context("failed to read response body")?;
    file.write_all(&bytes).context("failed to write file")?;
    pb.set_position(bytes.len() as u64);
    pb.finish_and_clear();

    fs::rename(&partial, dest)
        .with_context(|| format!("failed to move download into place: {}", dest.display()))?;
    Ok(())
}
