/// Configuration module for lawrag.
///
/// Settings are read from a flat JSON file, then overridden by environment variables.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::embedder::download::default_model_dir;

// ── Default value functions ──────────────────────────────────────────

fn default_csv_path() -> String {
    "data/pdchude.csv".to_string()
}

fn default_index_dir() -> String {
    "data/vector_db".to_string()
}

fn default_collection() -> String {
    "iuh_law_advisor_2026".to_string()
}

fn default_sqlite_path() -> String {
    "data/ui.sqlite3".to_string()
}

fn default_model_id() -> String {
    "keepitreal/vietnamese-sbert".to_string()
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_chunk_size() -> i64 {
    1200
}

fn default_chunk_overlap() -> i64 {
    120
}

fn default_batch_size() -> usize {
    128
}

fn default_dimensions() -> usize {
    768
}

// ── Config struct ────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_csv_path")]
    pub csv_path: String,

    #[serde(default = "default_index_dir")]
    pub index_dir: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Run log and chat history database.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Local directory with the exported ONNX model; derived from `model_id` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<String>,

    /// `auto`, `cpu` or `cuda`.
    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: i64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Hits farther than this cosine distance are not used for answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<f32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            csv_path: default_csv_path(),
            index_dir: default_index_dir(),
            collection: default_collection(),
            sqlite_path: default_sqlite_path(),
            model_id: default_model_id(),
            model_dir: None,
            device: default_device(),
            top_k: default_top_k(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            batch_size: default_batch_size(),
            dimensions: default_dimensions(),
            max_distance: None,
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file, then apply environment overrides.
    ///
    /// If `config_path` is empty, defaults to `"config.json"`.
    /// If the file does not exist, defaults are used and a template is generated
    /// for the default path.
    pub fn load(config_path: &str) -> Result<Self> {
        let mut cfg = Self::load_file(config_path)?;
        cfg.apply_env();
        Ok(cfg)
    }

    fn load_file(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "config.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == "config.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Override settings from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Override settings from `lookup`; blank values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("CSV_PATH") {
            self.csv_path = v;
        }
        if let Some(v) = get("INDEX_DIR") {
            self.index_dir = v;
        }
        if let Some(v) = get("INDEX_COLLECTION") {
            self.collection = v;
        }
        if let Some(v) = get("SQLITE_PATH") {
            self.sqlite_path = v;
        }
        if let Some(v) = get("EMBED_MODEL_ID") {
            self.model_id = v;
        }
        if let Some(v) = get("EMBED_MODEL_DIR") {
            self.model_dir = Some(v);
        }
        if let Some(v) = get("EMBED_DEVICE") {
            self.device = v.to_lowercase();
        }
        if let Some(v) = get("DEFAULT_TOP_K") {
            match v.parse() {
                Ok(k) => self.top_k = k,
                Err(e) => warn!("Ignoring DEFAULT_TOP_K={v}: {e}"),
            }
        }
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.top_k > 0, "top_k must be positive");
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.dimensions > 0, "dimensions must be positive");
        anyhow::ensure!(
            !self.collection.trim().is_empty(),
            "collection must not be empty"
        );
        if let Some(d) = self.max_distance {
            anyhow::ensure!(d >= 0.0, "max_distance must not be negative");
        }
        Ok(())
    }

    /// Directory holding the ONNX model and tokenizer files.
    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        match &self.model_dir {
            Some(dir) => PathBuf::from(dir),
            None => default_model_dir(&self.model_id),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
