//! Vector index over document chunks.
//!
//! The [`VectorIndex`] trait is the storage seam used by the retriever.
//! [`InMemoryIndex`] keeps chunks and their embeddings in process memory
//! behind a `tokio::sync::RwLock`; nothing is persisted. Embeddings are
//! computed by the index's own [`EmbeddingProvider`] before the lock is
//! taken, and similarity is brute-force cosine over every stored vector.
//!
//! The collection is append-only: there is no deletion path. Adding a
//! chunk whose id already exists replaces it in place (last write wins).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embedding::{cosine_similarity, embed_query, EmbeddingProvider};
use crate::models::{Chunk, QueryHit};

/// Abstract chunk index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](VectorIndex::add) | Embed and store chunks |
/// | [`query`](VectorIndex::query) | k nearest chunks to a text |
/// | [`count`](VectorIndex::count) | Number of stored chunks |
/// | [`sample`](VectorIndex::sample) | Up to n stored chunks, insertion order |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, chunks: &[Chunk]) -> Result<()>;

    /// Returns hits ordered by descending similarity. An empty index yields
    /// an empty result without calling the embedder.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryHit>>;

    async fn count(&self) -> usize;

    async fn sample(&self, n: usize) -> Vec<Chunk>;
}

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Entries {
    chunks: Vec<StoredChunk>,
    positions: HashMap<String, usize>,
}

pub struct InMemoryIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: RwLock<Entries>,
}

impl InMemoryIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Entries::default()),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn add(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            bail!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let mut entries = self.entries.write().await;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            let stored = StoredChunk {
                chunk: chunk.clone(),
                vector,
            };
            match entries.positions.get(&chunk.id).copied() {
                Some(pos) => entries.chunks[pos] = stored,
                None => {
                    let pos = entries.chunks.len();
                    entries.positions.insert(chunk.id.clone(), pos);
                    entries.chunks.push(stored);
                }
            }
        }
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryHit>> {
        if k == 0 || self.count().await == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(self.embedder.as_ref(), text).await?;

        let entries = self.entries.read().await;
        let mut hits: Vec<QueryHit> = entries
            .chunks
            .iter()
            .map(|sc| QueryHit {
                id: sc.chunk.id.clone(),
                text: sc.chunk.text.clone(),
                source: sc.chunk.source.clone(),
                score: cosine_similarity(&query_vec, &sc.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> usize {
        self.entries.read().await.chunks.len()
    }

    async fn sample(&self, n: usize) -> Vec<Chunk> {
        let entries = self.entries.read().await;
        entries
            .chunks
            .iter()
            .take(n)
            .map(|sc| sc.chunk.clone())
            .collect()
    }
}
