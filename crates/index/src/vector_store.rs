use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Payload stored next to each passage vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub char_range: (usize, usize),
    pub text: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageMatch {
    pub chunk_id: String,
    pub metadata: ChunkMetadata,
    pub similarity: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Prepare storage for vectors of `dimension`. Called once per build.
    async fn init(&self, _dimension: usize) -> Result<(), StoreError> {
        Ok(())
    }

    /// Insert or replace the vector stored under `chunk_id`.
    async fn upsert(
        &self,
        chunk_id: &str,
        vector: Vec<f32>,
        metadata: ChunkMetadata,
    ) -> Result<(), StoreError>;

    /// Best matches first.
    async fn nearest_neighbors(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<PassageMatch>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Brute-force cosine search over a `DashMap`.
#[derive(Default)]
pub struct InMemoryVectorStore {
    points: DashMap<String, (Vec<f32>, ChunkMetadata)>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        chunk_id: &str,
        vector: Vec<f32>,
        metadata: ChunkMetadata,
    ) -> Result<(), StoreError> {
        self.points.insert(chunk_id.to_string(), (vector, metadata));
        Ok(())
    }

    async fn nearest_neighbors(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<PassageMatch>, StoreError> {
        let mut matches: Vec<PassageMatch> = self
            .points
            .iter()
            .map(|entry| {
                let (vector, metadata) = entry.value();
                PassageMatch {
                    chunk_id: entry.key().clone(),
                    metadata: metadata.clone(),
                    similarity: cosine_similarity(query_vector, vector),
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.points.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(text: &str) -> ChunkMetadata {
        ChunkMetadata {
            document_id: "d1".into(),
            char_range: (0, text.chars().count()),
            text: text.into(),
            title: "Sakri Lahir".into(),
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_search_ranks() {
        let store = InMemoryVectorStore::new();
        store.upsert("c1", vec![1.0, 0.0], metadata("one")).await.unwrap();
        store.upsert("c2", vec![0.6, 0.8], metadata("two")).await.unwrap();
        store.upsert("c1", vec![1.0, 0.0], metadata("one")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);

        let hits = store.nearest_neighbors(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c2");
        assert!((hits[0].similarity - 0.8).abs() < 1e-6);
    }
}
