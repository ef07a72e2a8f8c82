pub mod embeddings;
pub mod error;
pub mod graph_store;
pub mod graph_writer;
pub mod neo4j_index;
pub mod passage_indexer;
pub mod pipeline;
pub mod qdrant_index;
pub mod retry;
pub mod vector_store;

pub use embeddings::{CacheStats, CachedEmbedder, Embedder, EmbeddingClient, EmbeddingConfig};
pub use error::{GraphWriteError, IndexError, StoreError};
pub use graph_store::{EntityNode, GraphFact, GraphStats, GraphStore, InMemoryGraphStore};
pub use graph_writer::{GraphWriter, WriteReport};
pub use neo4j_index::{Neo4jConfig, Neo4jGraphStore};
pub use passage_indexer::{IndexReport, PassageConfig, PassageIndexer};
pub use pipeline::{BuildReport, GraphReport, Indexer};
pub use qdrant_index::{QdrantConfig, QdrantVectorStore};
pub use retry::{RetryConfig, RetryPolicy};
pub use vector_store::{ChunkMetadata, InMemoryVectorStore, PassageMatch, VectorStore, cosine_similarity};
