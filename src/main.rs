use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use lawrag::config::Config;
use lawrag::embedder::download::download_model_files;
use lawrag::embedder::{EmbeddingProvider, device, resolve_device};
use lawrag::eval;
use lawrag::index::VectorIndex;
use lawrag::indexer::pipeline::{IndexJob, run_embedding};
use lawrag::rag::Retriever;
use lawrag::store::Store;

#[derive(Parser, Debug)]
#[command(
    name = "lawrag",
    version,
    about = "Index Vietnamese law articles and answer questions with citations"
)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long, env = "LAWRAG_CONFIG", default_value = "config.json", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed the source table into the vector index
    Index {
        /// Source CSV or spreadsheet (defaults to the configured path)
        #[arg(long)]
        source: Option<PathBuf>,

        #[arg(long)]
        collection: Option<String>,

        #[arg(long)]
        chunk_size: Option<i64>,

        #[arg(long)]
        chunk_overlap: Option<i64>,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Answer a question with the nearest article and its citation
    Ask {
        question: String,

        #[arg(long)]
        top_k: Option<usize>,

        /// Do not record the exchange in the chat history
        #[arg(long, default_value_t = false)]
        no_history: bool,
    },

    /// Print the raw top-k hits for a question
    Retrieve {
        question: String,

        #[arg(long)]
        top_k: Option<usize>,

        /// Print hits as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List recent embedding runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show or clear the chat history
    History {
        #[arg(long, default_value_t = 200)]
        limit: usize,

        #[arg(long, default_value_t = false)]
        clear: bool,
    },

    /// Score retrieval against a CSV of `question,gold_id` cases
    Eval {
        cases: PathBuf,

        #[arg(long, default_value_t = 5)]
        k: usize,
    },

    /// Download the configured model files
    Download,

    /// Show which compute device would be used
    Device,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    match cli.command {
        Command::Index {
            source,
            collection,
            chunk_size,
            chunk_overlap,
            batch_size,
        } => {
            let source = source.unwrap_or_else(|| PathBuf::from(&config.csv_path));
            let collection = collection.unwrap_or_else(|| config.collection.clone());
            let job = IndexJob {
                source_path: &source,
                index_dir: Path::new(&config.index_dir),
                collection: &collection,
                chunk_size: chunk_size.unwrap_or(config.chunk_size),
                chunk_overlap: chunk_overlap.unwrap_or(config.chunk_overlap),
                batch_size: batch_size.unwrap_or(config.batch_size),
            };
            cmd_index(&config, &job)
        }
        Command::Ask {
            question,
            top_k,
            no_history,
        } => cmd_ask(&config, &question, top_k.unwrap_or(config.top_k), !no_history),
        Command::Retrieve {
            question,
            top_k,
            json,
        } => cmd_retrieve(&config, &question, top_k.unwrap_or(config.top_k), json),
        Command::Runs { limit } => cmd_runs(&config, limit),
        Command::History { limit, clear } => cmd_history(&config, limit, clear),
        Command::Eval { cases, k } => cmd_eval(&config, &cases, k),
        Command::Download => {
            let model_dir = config.model_dir();
            download_model_files(&config.model_id, &model_dir)?;
            println!("Model files ready in {}", model_dir.display());
            Ok(())
        }
        Command::Device => {
            let resolved = resolve_device(&config.device);
            println!(
                "requested={} resolved={} cuda_available={}",
                config.device,
                resolved,
                device::cuda_available()
            );
            Ok(())
        }
    }
}

/// Build the embedding provider. The model is fetched and loaded on first use.
fn build_provider(config: &Config) -> EmbeddingProvider {
    EmbeddingProvider::onnx(
        config.model_id.clone(),
        config.model_dir(),
        resolve_device(&config.device),
        config.dimensions,
    )
}

fn open_index(config: &Config) -> Result<VectorIndex> {
    VectorIndex::open(&config.index_dir, &config.collection)
        .with_context(|| format!("failed to open index at {}", config.index_dir))
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.sqlite_path)
        .with_context(|| format!("failed to open record store at {}", config.sqlite_path))
}

fn cmd_index(config: &Config, job: &IndexJob<'_>) -> Result<()> {
    let provider = build_provider(config);
    let store = open_store(config)?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} chunks ({eta})")
            .context("invalid progress template")?
            .progress_chars("█▓░"),
    );

    let result = run_embedding(&provider, &store, job, |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    });
    pb.finish_and_clear();

    let summary = result.context("embedding run failed")?;
    println!(
        "Run {}: {} rows, {} chunks into {} ({})",
        summary.run_id,
        summary.total_rows,
        summary.total_chunks,
        job.collection,
        job.index_dir.display()
    );
    Ok(())
}

fn cmd_ask(config: &Config, question: &str, top_k: usize, record: bool) -> Result<()> {
    let provider = build_provider(config);
    let index = open_index(config)?;
    let retriever = Retriever::new(&provider, &index).with_max_distance(config.max_distance);

    let answer = retriever.answer_with_citations(question, top_k)?;
    println!("{}", answer.answer);
    if !answer.is_found() {
        println!();
        for followup in &answer.followups {
            println!("- {followup}");
        }
    }

    if record {
        let store = open_store(config)?;
        store.add_chat_message("user", question)?;
        store.add_chat_message("assistant", &answer.answer)?;
    }
    Ok(())
}

fn cmd_retrieve(config: &Config, question: &str, top_k: usize, json: bool) -> Result<()> {
    let provider = build_provider(config);
    let index = open_index(config)?;
    let retriever = Retriever::new(&provider, &index).with_max_distance(config.max_distance);

    let hits = retriever.retrieve_topk(question, top_k)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        warn!("No hits in collection {}", config.collection);
    }
    for (rank, hit) in hits.iter().enumerate() {
        let title = hit.meta_str("dieu_ten").unwrap_or_default();
        println!("#{} [{:.4}] {} {}", rank + 1, hit.distance, hit.id, title);
    }
    Ok(())
}

fn cmd_runs(config: &Config, limit: usize) -> Result<()> {
    let store = open_store(config)?;
    for run in store.embedding_runs(limit)? {
        let finished = run
            .finished_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>4}  {:<7}  {}  {}  rows={} chunks={}  {}@{}  {}",
            run.id,
            run.status.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            finished,
            run.total_rows.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
            run.total_chunks.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
            run.model_id,
            run.device,
            run.note
        );
    }
    Ok(())
}

fn cmd_history(config: &Config, limit: usize, clear: bool) -> Result<()> {
    let store = open_store(config)?;
    if clear {
        let removed = store.clear_chat_messages()?;
        println!("Removed {removed} messages");
        return Ok(());
    }

    for message in store.chat_messages(limit)? {
        println!("[{}] {}:\n{}\n", message.created_at.format("%H:%M:%S"), message.role, message.content);
    }
    Ok(())
}

fn cmd_eval(config: &Config, cases: &Path, k: usize) -> Result<()> {
    let cases = eval::load_cases(cases)
        .with_context(|| format!("failed to read eval cases from {}", cases.display()))?;
    let provider = build_provider(config);
    let index = open_index(config)?;
    let retriever = Retriever::new(&provider, &index).with_max_distance(config.max_distance);

    let report = eval::evaluate(&retriever, &cases, k)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
