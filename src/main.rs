//! # Study Harness CLI (`study`)
//!
//! ## Usage
//!
//! ```bash
//! study --config ./config/study.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `study serve` | Start the HTTP API |
//! | `study extract <pdf>` | Print the text extracted from a PDF |
//! | `study validate "<text>"` | Check a query against the validator |
//! | `study ask "<question>" --pdf notes.pdf` | One-shot question over local PDFs |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use study_harness::config::{self, Config};
use study_harness::extract::TextExtractor;
use study_harness::index::InMemoryIndex;
use study_harness::orchestrator::Orchestrator;
use study_harness::retriever::Retriever;
use study_harness::server::{self, Components};
use study_harness::validate::Validator;

/// Study Harness: chat with, and quiz yourself on, your PDF notes.
#[derive(Parser)]
#[command(name = "study", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// `extract` and `validate` fall back to built-in defaults when the file
    /// does not exist.
    #[arg(long, global = true, default_value = "./config/study.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Extract a PDF's text (OCR fallback included) and print it.
    Extract {
        pdf: PathBuf,

        /// Print chunk boundaries instead of the raw text.
        #[arg(long)]
        chunks: bool,
    },

    /// Validate a query the way `/chat` does. Exits non-zero when rejected.
    Validate { text: String },

    /// Ingest PDFs and answer a single question from them.
    Ask {
        question: String,

        /// PDF files to ingest (repeatable).
        #[arg(long = "pdf")]
        pdfs: Vec<PathBuf>,

        /// Directory searched recursively for `*.pdf` files.
        #[arg(long)]
        notes: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// The config at `path`, or defaults when no file exists there.
fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Serve => {
            let cfg = config::load_config(&cli.config)?;
            server::run_server(&cfg).await?;
        }
        Commands::Extract { pdf, chunks } => {
            let cfg = load_or_default(&cli.config)?;
            run_extract(&cfg, pdf, chunks).await?;
        }
        Commands::Validate { text } => {
            let cfg = load_or_default(&cli.config)?;
            let validator = Validator::new(&cfg.validation)?;
            match validator.validate_query(&text) {
                Ok(()) => println!("ok"),
                Err(rejection) => bail!("{}", rejection),
            }
        }
        Commands::Ask {
            question,
            pdfs,
            notes,
        } => {
            let cfg = config::load_config(&cli.config)?;
            run_ask(&cfg, &question, pdfs, notes.as_deref()).await?;
        }
    }

    Ok(())
}

/// Extraction runs on the blocking pool so a panic inside the PDF parser
/// surfaces as an error instead of aborting the command.
async fn run_extract(cfg: &Config, pdf: PathBuf, show_chunks: bool) -> anyhow::Result<()> {
    let extractor = TextExtractor::from_config(&cfg.extraction);
    let path = pdf.clone();
    let text = tokio::task::spawn_blocking(move || extractor.extract(&path))
        .await
        .with_context(|| format!("PDF parser crashed on {}", pdf.display()))?
        .with_context(|| format!("Could not extract text from {}", pdf.display()))?;

    if !show_chunks {
        print!("{}", text);
        return Ok(());
    }
    let filename = pdf
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.pdf");
    for chunk in study_harness::chunk::chunk_document(filename, &text, &cfg.chunking) {
        println!("--- {} ({} chars)", chunk.id, chunk.text.chars().count());
        println!("{}", chunk.text);
    }
    Ok(())
}

fn collect_pdfs(mut pdfs: Vec<PathBuf>, notes: Option<&Path>) -> Vec<PathBuf> {
    if let Some(dir) = notes {
        let mut found: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|x| x.to_str())
                    .is_some_and(|x| x.eq_ignore_ascii_case("pdf"))
            })
            .collect();
        found.sort();
        pdfs.extend(found);
    }
    pdfs
}

async fn run_ask(
    cfg: &Config,
    question: &str,
    pdfs: Vec<PathBuf>,
    notes: Option<&Path>,
) -> anyhow::Result<()> {
    Validator::new(&cfg.validation)?
        .validate_query(question)
        .map_err(|r| anyhow::anyhow!("{}", r))?;

    let pdfs = collect_pdfs(pdfs, notes);
    if pdfs.is_empty() {
        bail!("No PDFs given. Use --pdf <file> or --notes <dir>.");
    }

    let components = Components::from_config(cfg)?;
    let retriever = Retriever::new(
        components.extractor,
        Arc::new(InMemoryIndex::new(components.embedder)),
        cfg.chunking.clone(),
    );
    let orchestrator = Orchestrator::new(components.model);

    for path in &pdfs {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf");
        match retriever.ingest(path, filename).await {
            Ok(report) => eprintln!("{}: {}", report.filename, report.message),
            Err(e) => eprintln!("{}: skipped ({})", filename, e),
        }
    }

    let retrieved = retriever
        .retrieve_context(question, cfg.retrieval.top_k)
        .await?;
    let answer = orchestrator
        .chat(&retrieved.context, question, &[])
        .await?;

    println!("{}", answer.trim());
    if !retrieved.sources.is_empty() {
        println!();
        println!("Sources: {}", retrieved.sources.join(", "));
    }
    Ok(())
}
