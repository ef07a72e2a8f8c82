use extract::{CanonicalEntity, Relationship};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{GraphWriteError, IndexError, StoreError};
use crate::graph_store::{EntityNode, GraphStore};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteReport {
    pub entities_written: usize,
    pub relationships_written: usize,
    /// Relationships refused by validation
    pub skipped: usize,
}

/// The only component that mutates the graph.
pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
    retry: RetryPolicy,
}

impl GraphWriter {
    pub fn new(store: Arc<dyn GraphStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Upsert a batch. Invalid relationships are skipped; a store that keeps
    /// failing aborts the batch.
    pub async fn write(
        &self,
        entities: &[CanonicalEntity],
        relationships: &[Relationship],
    ) -> Result<WriteReport, IndexError> {
        let mut report = WriteReport::default();

        for entity in entities {
            let node = EntityNode::from(entity);
            self.with_retry("upsert_entity", || self.store.upsert_entity(&node))
                .await?;
            report.entities_written += 1;
        }

        let batch_ids: HashSet<&str> = entities.iter().map(|e| e.entity_id.as_str()).collect();

        // Same key twice in one batch: merge before writing
        let mut merged: BTreeMap<_, Relationship> = BTreeMap::new();
        for rel in relationships {
            match merged.get_mut(&rel.key()) {
                Some(existing) => existing.merge(rel),
                None => {
                    merged.insert(rel.key(), rel.clone());
                }
            }
        }

        for rel in merged.into_values() {
            if let Err(e) = self.validate(&rel, &batch_ids).await? {
                warn!(
                    subject = %rel.subject_entity_id,
                    predicate = %rel.predicate,
                    object = %rel.object_entity_id,
                    "Skipping relationship: {}",
                    e
                );
                report.skipped += 1;
                continue;
            }

            self.with_retry("upsert_relationship", || self.store.upsert_relationship(&rel))
                .await?;
            report.relationships_written += 1;
        }

        info!(
            entities = report.entities_written,
            relationships = report.relationships_written,
            skipped = report.skipped,
            "Graph batch written"
        );

        Ok(report)
    }

    /// Outer error: store failure. Inner error: the relationship is invalid.
    async fn validate(
        &self,
        rel: &Relationship,
        batch_ids: &HashSet<&str>,
    ) -> Result<Result<(), GraphWriteError>, IndexError> {
        if !rel.predicate.is_edge() {
            return Ok(Err(GraphWriteError::NotAnEdge));
        }
        if rel.subject_entity_id == rel.object_entity_id {
            return Ok(Err(GraphWriteError::SelfRelationship(rel.subject_entity_id.clone())));
        }

        for id in [&rel.subject_entity_id, &rel.object_entity_id] {
            if batch_ids.contains(id.as_str()) {
                continue;
            }
            let exists = self
                .with_retry("entity_exists", || self.store.entity_exists(id))
                .await?;
            if !exists {
                return Ok(Err(GraphWriteError::UnknownEntity(id.clone())));
            }
        }

        Ok(Ok(()))
    }

    async fn with_retry<F, Fut, T>(&self, operation: &str, f: F) -> Result<T, IndexError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        self.retry
            .retry_when(operation, f, StoreError::is_transient)
            .await
            .map_err(IndexError::GraphStore)
    }
}
