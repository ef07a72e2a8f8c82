use futures::stream::{self, StreamExt};
use ingest::{Chunk, Chunker, ChunkerConfig, Document};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::embeddings::Embedder;
use crate::error::{IndexError, StoreError};
use crate::retry::RetryPolicy;
use crate::vector_store::{ChunkMetadata, VectorStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassageConfig {
    pub chunking: ChunkerConfig,
    pub max_concurrency: usize,
}

impl Default for PassageConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkerConfig::default(),
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub chunks: usize,
    pub indexed: usize,
    pub failed_embeddings: usize,
}

/// Chunk, embed and upsert narrative text into the vector store.
pub struct PassageIndexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chunker: Chunker,
    max_concurrency: usize,
    retry: RetryPolicy,
}

impl PassageIndexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        config: PassageConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            store,
            chunker: Chunker::new(config.chunking),
            max_concurrency: config.max_concurrency.max(1),
            retry,
        }
    }

    pub async fn index(&self, documents: &[Document]) -> Result<IndexReport, IndexError> {
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| self.chunker.chunk_document(doc))
            .collect();

        let mut report = IndexReport {
            chunks: chunks.len(),
            ..Default::default()
        };
        info!(documents = documents.len(), chunks = chunks.len(), "Indexing passages");

        let chunk_refs = &chunks;
        let mut embedded: Vec<(usize, Vec<f32>)> = stream::iter(0..chunks.len())
            .map(|idx| async move {
                let chunk = &chunk_refs[idx];
                match self.embedder.embed(&chunk.text).await {
                    Ok(vector) => Some((idx, vector)),
                    Err(e) => {
                        warn!(chunk_id = %chunk.chunk_id, doc_id = %chunk.doc_id, "Embedding failed: {:#}", e);
                        None
                    }
                }
            })
            .buffer_unordered(self.max_concurrency)
            .filter_map(|result| async move { result })
            .collect()
            .await;
        embedded.sort_by_key(|(idx, _)| *idx);
        report.failed_embeddings = chunks.len() - embedded.len();

        if let Some((_, first)) = embedded.first() {
            let dimension = first.len();
            self.retry
                .retry_when("vector_store_init", || self.store.init(dimension), StoreError::is_transient)
                .await
                .map_err(IndexError::VectorStore)?;
        }

        for (idx, vector) in embedded {
            let chunk = &chunks[idx];
            let metadata = ChunkMetadata {
                document_id: chunk.doc_id.clone(),
                char_range: chunk.char_range,
                text: chunk.text.clone(),
                title: chunk.title.clone(),
            };

            self.retry
                .retry_when(
                    "vector_upsert",
                    || self.store.upsert(&chunk.chunk_id, vector.clone(), metadata.clone()),
                    StoreError::is_transient,
                )
                .await
                .map_err(IndexError::VectorStore)?;

            debug!(chunk_id = %chunk.chunk_id, "Upserted passage");
            report.indexed += 1;
        }

        info!(
            indexed = report.indexed,
            failed_embeddings = report.failed_embeddings,
            "Passage indexing finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::InMemoryVectorStore;
    use anyhow::Result;
    use async_trait::async_trait;

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("RUSAK") {
                anyhow::bail!("model crashed");
            }
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    fn document(title: &str, text: &str) -> Document {
        Document::new("stories.csv", Some(0), title.to_string(), text.to_string())
    }

    fn indexer(store: Arc<InMemoryVectorStore>) -> PassageIndexer {
        let config = PassageConfig {
            chunking: ChunkerConfig { chunk_size: 40, stride: 30 },
            max_concurrency: 2,
        };
        PassageIndexer::new(Arc::new(LengthEmbedder), store, config, RetryPolicy::new(0, 1, 1))
    }

    #[tokio::test]
    async fn test_reindexing_is_idempotent() {
        let store = Arc::new(InMemoryVectorStore::new());
        let indexer = indexer(store.clone());
        let docs = vec![document(
            "Sakri Lahir",
            "Sakri lahir dari ayah Resi Palasara. Prabu Basukesti bertahta di Wirata.",
        )];

        let first = indexer.index(&docs).await.unwrap();
        let count = store.count().await.unwrap();
        let second = indexer.index(&docs).await.unwrap();

        assert!(first.chunks > 1);
        assert_eq!(first.indexed, first.chunks);
        assert_eq!(second.indexed, first.indexed);
        assert_eq!(store.count().await.unwrap(), count);
    }

    #[tokio::test]
    async fn test_failed_embedding_skips_chunk() {
        let store = Arc::new(InMemoryVectorStore::new());
        let docs = vec![document("Rusak", "RUSAK")];

        let report = indexer(store.clone()).index(&docs).await.unwrap();

        assert_eq!(report.chunks, 1);
        assert_eq!(report.failed_embeddings, 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
