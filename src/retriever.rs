//! Ingestion and retrieval over the chunk index.
//!
//! ```text
//! ingest:   PDF ──▶ TextExtractor ──▶ chunk_document ──▶ VectorIndex::add
//! retrieve: query ──▶ VectorIndex::query ──▶ "\n"-joined context + chunk ids
//! sample:   VectorIndex::sample ──▶ "\n"-joined context
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info};

use crate::chunk::chunk_document;
use crate::config::ChunkingConfig;
use crate::extract::{ExtractError, TextExtractor};
use crate::index::VectorIndex;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Could not extract text: {0}")]
    ExtractionFailed(#[source] ExtractError),
    #[error("File was empty")]
    EmptyDocument,
    #[error("Failed to index chunks: {0}")]
    Index(anyhow::Error),
    #[error("Extraction task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub filename: String,
    pub chunks: usize,
    pub message: String,
}

/// Context assembled for a chat query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievedContext {
    /// Retrieved chunk texts joined with `\n`.
    pub context: String,
    /// Ids of the retrieved chunks, best match first.
    pub sources: Vec<String>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

pub struct Retriever {
    extractor: Arc<TextExtractor>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkingConfig,
}

impl Retriever {
    pub fn new(
        extractor: TextExtractor,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            extractor: Arc::new(extractor),
            index,
            chunking,
        }
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    /// Extract, chunk and index the PDF at `path` under `filename`.
    ///
    /// The index is untouched unless extraction produced text.
    pub async fn ingest(&self, path: &Path, filename: &str) -> Result<IngestReport, IngestError> {
        let extractor = Arc::clone(&self.extractor);
        let owned_path = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || extractor.extract(&owned_path))
            .await
            .map_err(|e| IngestError::Task(e.to_string()))?
            .map_err(IngestError::ExtractionFailed)?;

        if text.trim().is_empty() {
            return Err(IngestError::EmptyDocument);
        }
        let chunks = chunk_document(filename, &text, &self.chunking);
        if chunks.is_empty() {
            return Err(IngestError::EmptyDocument);
        }

        self.index.add(&chunks).await.map_err(IngestError::Index)?;
        info!(filename, chunks = chunks.len(), chars = text.len(), "ingested document");

        Ok(IngestReport {
            filename: filename.to_string(),
            chunks: chunks.len(),
            message: format!("Processed {} chunks", chunks.len()),
        })
    }

    /// The `k` chunks most similar to `query`.
    ///
    /// An empty index (or no hits) gives an empty context and no sources.
    pub async fn retrieve_context(&self, query: &str, k: usize) -> Result<RetrievedContext> {
        if self.index.count().await == 0 {
            return Ok(RetrievedContext::default());
        }
        let hits = self.index.query(query, k).await?;
        debug!(hits = hits.len(), "retrieved context");

        Ok(RetrievedContext {
            context: hits
                .iter()
                .map(|h| h.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            sources: hits.into_iter().map(|h| h.id).collect(),
        })
    }

    /// Up to `n` indexed chunks as non-query-specific context, or `""` when
    /// nothing has been ingested.
    pub async fn sample_context(&self, n: usize) -> String {
        self.index
            .sample(n)
            .await
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
