//! Build a subject's vector index from a directory of plain-text course material.
//! PDFs must be converted to `.txt` or `.md` first.

use anyhow::{Context as _, bail};
use clap::Parser;
use qizhen_core::{Config, DashScopeEmbedder, Embedder, SubjectProfile, VectorIndex, retrieval::chunk_text};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "build-index", about = "Embed course material into a subject's vector index")]
struct Cli {
    /// Subject slug, e.g. mayuan or xigai
    subject: String,

    /// Directory holding the raw .txt/.md files
    raw_dir: PathBuf,

    /// Override the output directory (defaults to the subject's index directory)
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, default_value_t = 1000)]
    chunk_size: usize,

    #[arg(long, default_value_t = 100)]
    overlap: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    qizhen_service::init_tracing();
    let cli = Cli::parse();

    let config = Config::from_env().context("invalid configuration")?;
    let subject = SubjectProfile::by_slug(&cli.subject)
        .with_context(|| format!("unknown subject {}", cli.subject))?;
    let output = cli.output.unwrap_or_else(|| config.index_dir(subject));

    let files = source_files(&cli.raw_dir).await?;
    if files.is_empty() {
        bail!("no .txt or .md files found in {}", cli.raw_dir.display());
    }

    let mut chunks = Vec::new();
    for file in &files {
        let text = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?;
        let before = chunks.len();
        chunks.extend(chunk_text(&text, cli.chunk_size, cli.overlap));
        info!(file = %file.display(), chunks = chunks.len() - before, "split source file");
    }
    if chunks.is_empty() {
        bail!("source files contain no text");
    }

    let embedder = DashScopeEmbedder::from_config(&config)?;
    let documents = embedder.embed_documents(chunks).await?;
    let index = VectorIndex::from_documents(embedder.model(), documents)?;

    let path = index.save(&output).await?;
    info!(
        subject = subject.slug,
        documents = index.len(),
        dimension = index.dimension,
        path = %path.display(),
        "vector index written"
    );
    Ok(())
}

/// `.txt` and `.md` files under `dir`, recursively, in a stable order.
async fn source_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut pending = vec![dir.to_path_buf()];
    let mut files = Vec::new();

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .with_context(|| format!("failed to list {}", current.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("txt" | "md")
            ) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
