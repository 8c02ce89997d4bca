//! # PDF RAG CLI (`pdf-rag`)
//!
//! Ingest PDFs, ask questions about them, and run the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! pdf-rag --config ./config/pdf-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pdf-rag serve` | Start the HTTP API server |
//! | `pdf-rag ingest <file.pdf>` | Extract, chunk, embed and store a PDF |
//! | `pdf-rag ask "<question>"` | Answer a question from stored documents |
//! | `pdf-rag status` | Show vector store status |
//! | `pdf-rag clear --yes` | Delete every stored entry |
//! | `pdf-rag provider` | Show the configured LLM and embedding provider |
//!
//! The config file is optional; environment variables (and a `.env` file)
//! select providers and supply API keys.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use pdf_rag::chat::ChatEngine;
use pdf_rag::config::{self, Config};
use pdf_rag::embedding;
use pdf_rag::ingest::DocumentProcessor;
use pdf_rag::llm;
use pdf_rag::logging;
use pdf_rag::server;
use pdf_rag::store::{SqliteVectorStore, VectorStore};

/// PDF RAG: chat with your PDF documents.
#[derive(Parser)]
#[command(
    name = "pdf-rag",
    about = "PDF RAG: upload PDFs and answer questions from their content",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/pdf-rag.toml`; a missing file means built-in
    /// defaults plus environment overrides.
    #[arg(long, global = true, default_value = "./config/pdf-rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server on `[server].bind`.
    Serve,

    /// Ingest a PDF into the vector store.
    ///
    /// Re-ingesting a file with the same name replaces its previous
    /// entries unless `[store].on_duplicate = "append"`.
    Ingest {
        /// Path to the PDF.
        path: PathBuf,

        /// Source name to record instead of the file name.
        #[arg(long)]
        name: Option<String>,
    },

    /// Answer a question from the stored documents.
    Ask {
        question: String,

        /// Number of chunks to retrieve (defaults to `[retrieval].default_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Show vector store status.
    Status,

    /// Delete every stored entry. Irreversible.
    Clear {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },

    /// Show the configured LLM and embedding provider.
    Provider,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { path, name } => {
            run_ingest(&cfg, &path, name).await?;
        }
        Commands::Ask { question, k } => {
            run_ask(&cfg, &question, k).await?;
        }
        Commands::Status => {
            let store = open_store(&cfg).await?;
            let status = store.status().await?;
            println!("status");
            println!("  {}", status.message());
            println!("  persist directory: {}", status.persist_directory);
            if let (Some(model), Some(dims)) = (&status.embedding_model, status.embedding_dims) {
                println!("  embedding model: {} ({} dims)", model, dims);
            }
            store.close().await;
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("Refusing to clear the vector store without --yes");
            }
            let store = open_store(&cfg).await?;
            let removed = store.clear().await?;
            store.close().await;
            println!("Vector store cleared successfully ({} entries removed)", removed);
        }
        Commands::Provider => {
            let info = llm::provider_info(&cfg);
            println!("{} ({})", info.name, info.provider);
            println!("  llm: {}", info.models.llm);
            println!("  embeddings: {}", info.models.embeddings);
            println!("  cost: {}", info.cost);
            if !info.requires.is_empty() {
                println!("  requires: {}", info.requires.join(", "));
            }
        }
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> Result<Arc<SqliteVectorStore>> {
    Ok(Arc::new(
        SqliteVectorStore::open(&cfg.store.persist_directory).await?,
    ))
}

async fn run_ingest(cfg: &Config, path: &Path, name: Option<String>) -> Result<()> {
    let filename = match name {
        Some(name) => name,
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("Invalid file path: {}", path.display()))?,
    };

    let store = open_store(cfg).await?;
    let embedder = embedding::create_provider(cfg)?;
    let processor = DocumentProcessor::from_config(cfg, store.clone(), embedder);

    let outcome = processor.process_pdf(path, &filename).await;
    store.close().await;
    let outcome = outcome?;

    println!("ingest {}", outcome.filename);
    println!("  text length: {} chars", outcome.text_length);
    println!("  chunks created: {}", outcome.chunks_created);
    if outcome.chunks_replaced > 0 {
        println!("  chunks replaced: {}", outcome.chunks_replaced);
    }
    println!("  total documents: {}", outcome.total_documents);
    println!("ok");
    Ok(())
}

async fn run_ask(cfg: &Config, question: &str, k: Option<usize>) -> Result<()> {
    let store = open_store(cfg).await?;
    let embedder = embedding::create_provider(cfg)?;
    let llm = llm::create_chat_model(cfg)?;
    let engine = ChatEngine::from_config(cfg, store.clone(), embedder, llm);

    let answer = engine.chat(question, k).await;
    store.close().await;
    let answer = answer?;

    println!("{}", answer.answer);
    println!();
    println!("Sources:");
    for (i, source) in answer.sources.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} (chunk {})",
            i + 1,
            source.score,
            source.source,
            source.chunk_index
        );
    }
    Ok(())
}
