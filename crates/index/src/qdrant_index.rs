use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::StoreError;
use crate::vector_store::{ChunkMetadata, PassageMatch, VectorStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6333".to_string(),
            collection: "wayang_passages".to_string(),
        }
    }
}

/// Vector store speaking the Qdrant REST API.
pub struct QdrantVectorStore {
    base_url: String,
    collection_name: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: u64,
    vector: Vec<f32>,
    payload: Payload,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    chunk_id: String,
    doc_id: String,
    char_start: usize,
    char_end: usize,
    text: String,
    title: String,
}

#[derive(Deserialize)]
struct CollectionList {
    result: CollectionResult,
}

#[derive(Deserialize)]
struct CollectionResult {
    collections: Vec<Collection>,
}

#[derive(Deserialize)]
struct Collection {
    name: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: Payload,
}

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

/// Qdrant wants integer or UUID ids; chunk ids are hex SHA-256 prefixes,
/// so the first 16 hex digits give a stable u64.
pub fn point_id(chunk_id: &str) -> u64 {
    let prefix: String = chunk_id.chars().take(16).collect();
    u64::from_str_radix(&prefix, 16).unwrap_or_else(|_| {
        // Not hex: fold the bytes (FNV-1a) so the id is still stable
        chunk_id.bytes().fold(0xcbf29ce484222325, |hash, byte| {
            (hash ^ byte as u64).wrapping_mul(0x100000001b3)
        })
    })
}

impl QdrantVectorStore {
    pub fn new(config: &QdrantConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            collection_name: config.collection.clone(),
            client: reqwest::Client::new(),
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::from_status(status, body))
    }

    async fn collection_exists(&self) -> Result<bool, StoreError> {
        let url = format!("{}/collections", self.base_url);
        let response = Self::check(self.client.get(&url).send().await?).await?;
        let list: CollectionList = response.json().await?;
        Ok(list
            .result
            .collections
            .iter()
            .any(|c| c.name == self.collection_name))
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn init(&self, dimension: usize) -> Result<(), StoreError> {
        if self.collection_exists().await? {
            info!(collection = %self.collection_name, "Collection already exists");
            return Ok(());
        }

        let url = format!("{}/collections/{}", self.base_url, self.collection_name);
        let create_req = CreateCollection {
            vectors: VectorParams {
                size: dimension,
                distance: "Cosine",
            },
        };
        Self::check(self.client.put(&url).json(&create_req).send().await?).await?;

        info!(collection = %self.collection_name, dimension, "Collection created");
        Ok(())
    }

    async fn upsert(
        &self,
        chunk_id: &str,
        vector: Vec<f32>,
        metadata: ChunkMetadata,
    ) -> Result<(), StoreError> {
        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection_name
        );

        let point = Point {
            id: point_id(chunk_id),
            vector,
            payload: Payload {
                chunk_id: chunk_id.to_string(),
                doc_id: metadata.document_id,
                char_start: metadata.char_range.0,
                char_end: metadata.char_range.1,
                text: metadata.text,
                title: metadata.title,
            },
        };

        let request = UpsertPoints { points: vec![point] };
        Self::check(self.client.put(&url).json(&request).send().await?).await?;
        Ok(())
    }

    async fn nearest_neighbors(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<PassageMatch>, StoreError> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection_name
        );
        let body = json!({
            "vector": query_vector,
            "limit": k,
            "with_payload": true
        });

        let response = Self::check(self.client.post(&url).json(&body).send().await?).await?;
        let search: SearchResponse = response.json().await?;

        Ok(search
            .result
            .into_iter()
            .map(|point| PassageMatch {
                chunk_id: point.payload.chunk_id,
                metadata: ChunkMetadata {
                    document_id: point.payload.doc_id,
                    char_range: (point.payload.char_start, point.payload.char_end),
                    text: point.payload.text,
                    title: point.payload.title,
                },
                similarity: point.score,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let url = format!(
            "{}/collections/{}/points/count",
            self.base_url, self.collection_name
        );
        let response = Self::check(
            self.client
                .post(&url)
                .json(&json!({ "exact": true }))
                .send()
                .await?,
        )
        .await?;
        let count: CountResponse = response.json().await?;
        Ok(count.result.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_stable() {
        let chunk_id = ingest::Chunk::generate_chunk_id("doc", (0, 800));
        assert_eq!(point_id(&chunk_id), point_id(&chunk_id));
        assert_ne!(point_id(&chunk_id), point_id(&ingest::Chunk::generate_chunk_id("doc", (600, 1400))));
        assert_eq!(point_id("00000000000000ff"), 255);
        assert_eq!(point_id("not-hex"), point_id("not-hex"));
    }

    #[test]
    fn test_payload_shape() {
        let point = Point {
            id: 1,
            vector: vec![0.5],
            payload: Payload {
                chunk_id: "c".into(),
                doc_id: "d".into(),
                char_start: 0,
                char_end: 10,
                text: "Sakri".into(),
                title: "Sakri Lahir".into(),
            },
        };
        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["payload"]["doc_id"], "d");
        assert_eq!(json["payload"]["char_end"], 10);
    }
}
