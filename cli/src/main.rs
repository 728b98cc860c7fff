//! `docsim`: embed text files into an index snapshot and query it by meaning.
//!
//! ```sh
//! docsim --config docsim.toml index --out index.json notes/*.txt
//! docsim --config docsim.toml query --index index.json -k 3 "vector databases"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docsim_retrieval::{
    Document, IndexSnapshot, RetrievalConfig, SemanticRetriever, SimilarityResult,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Semantic document retrieval over text files.
#[derive(Parser, Debug)]
#[command(
    name = "docsim",
    version,
    about = "Semantic document retrieval over text files"
)]
struct Cli {
    /// TOML configuration file; built-in defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Embed each file as one document and save the index snapshot.
    Index {
        /// Where to write the JSON snapshot.
        #[arg(short, long)]
        out: PathBuf,

        /// Text files to index.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Rank the documents of a saved index against a query.
    Query {
        /// JSON snapshot written by `docsim index`.
        #[arg(short, long)]
        index: PathBuf,

        /// Number of results (defaults to `query.default_k`).
        #[arg(short)]
        k: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,

        /// Query text.
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Index { out, files } => index(config, &out, &files).await,
        Commands::Query {
            index,
            k,
            json,
            text,
        } => query(config, &index, k, json, &text).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<RetrievalConfig> {
    match path {
        Some(path) => RetrievalConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(RetrievalConfig::default()),
    }
}

async fn index(config: RetrievalConfig, out: &Path, files: &[PathBuf]) -> Result<()> {
    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let content = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?;
        if content.trim().is_empty() {
            warn!("Skipping empty file {}", file.display());
            continue;
        }
        let path = file.display().to_string();
        documents.push(Document::new(content).with_field("path", path));
    }

    let retriever = SemanticRetriever::from_config(config).await?;
    let count = retriever.index_documents(documents).await?;
    let snapshot = retriever
        .snapshot()
        .await
        .context("retriever has no local index to save")?;

    let json = serde_json::to_string(&snapshot)?;
    tokio::fs::write(out, json)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;

    info!("Wrote {count} documents to {}", out.display());
    println!("indexed {count} documents into {}", out.display());
    Ok(())
}

async fn query(
    config: RetrievalConfig,
    index: &Path,
    k: Option<usize>,
    json: bool,
    text: &str,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(index)
        .await
        .with_context(|| format!("failed to read index {}", index.display()))?;
    let snapshot: IndexSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("invalid index snapshot {}", index.display()))?;

    let k = k.unwrap_or(config.query.default_k);
    let retriever = SemanticRetriever::from_snapshot(config, snapshot).await?;
    let results = retriever.search(text, k).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for (rank, result) in results.iter().enumerate() {
            println!("{}", format_result(rank + 1, result));
        }
    }
    Ok(())
}

fn format_result(rank: usize, result: &SimilarityResult) -> String {
    let label = result
        .metadata
        .get("path")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| preview(&result.content));
    format!("{rank:>3}. {:.4}  {label}", result.score)
}

fn preview(content: &str) -> String {
    const MAX_CHARS: usize = 60;
    let line = content.lines().next().unwrap_or_default().trim();
    if line.chars().count() > MAX_CHARS {
        let cut: String = line.chars().take(MAX_CHARS).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}
