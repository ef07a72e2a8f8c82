use extract::{AliasTable, EntityResolver, Predicate};
use index::{Embedder, GraphFact, GraphStore, PassageMatch, StoreError, VectorStore};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

use crate::router::RoutingDecision;

const MAX_NGRAM: usize = 4;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("query embedding failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Structured path: question entities -> seed ids -> bounded subgraph.
pub struct GraphRetriever {
    store: Arc<dyn GraphStore>,
    resolver: EntityResolver,
    aliases: Arc<RwLock<AliasTable>>,
    max_hops: usize,
}

impl GraphRetriever {
    pub fn new(
        store: Arc<dyn GraphStore>,
        resolver: EntityResolver,
        aliases: Arc<RwLock<AliasTable>>,
        max_hops: usize,
    ) -> Self {
        Self {
            store,
            resolver,
            aliases,
            max_hops,
        }
    }

    /// Map the question onto canonical ids. Recognized mentions are tried
    /// first (typed, then untyped); if none resolve, every word n-gram of the
    /// question is looked up.
    pub fn seed_ids(&self, decision: &RoutingDecision, question: &str) -> Vec<String> {
        let table = match self.aliases.read() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut seeds = BTreeSet::new();
        for mention in &decision.entities {
            let mut ids =
                self.resolver
                    .lookup(&mention.surface_text, Some(mention.predicted_type), &table);
            if ids.is_empty() {
                ids = self.resolver.lookup(&mention.surface_text, None, &table);
            }
            seeds.extend(ids);
        }

        if seeds.is_empty() {
            let words: Vec<&str> = question
                .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '\'')
                .filter(|w| !w.is_empty())
                .collect();
            for n in (1..=MAX_NGRAM.min(words.len())).rev() {
                for window in words.windows(n) {
                    if window.iter().all(|w| self.resolver.normalizer().is_honorific(w)) {
                        continue;
                    }
                    seeds.extend(self.resolver.lookup(&window.join(" "), None, &table));
                }
            }
        }

        seeds.into_iter().collect()
    }

    pub async fn retrieve(
        &self,
        decision: &RoutingDecision,
        question: &str,
    ) -> Result<GraphFact, RetrievalError> {
        let seeds = self.seed_ids(decision, question);
        if seeds.is_empty() {
            debug!("No question entity found in alias table");
            return Ok(GraphFact::default());
        }

        let fact = self.store.query_subgraph(&seeds, self.max_hops).await?;
        let fact = focus(fact, &decision.predicate_hints);
        debug!(
            seeds = seeds.len(),
            entities = fact.entities.len(),
            relationships = fact.relationships.len(),
            "Graph path finished"
        );
        Ok(fact)
    }
}

/// Keep only relationships touching a seed with a hinted predicate, unless
/// that would leave nothing.
fn focus(mut fact: GraphFact, hints: &[Predicate]) -> GraphFact {
    if hints.is_empty() {
        return fact;
    }

    let seeds: BTreeSet<&str> = fact.seeds.iter().map(String::as_str).collect();
    let focused: Vec<_> = fact
        .relationships
        .iter()
        .filter(|(rel, _)| {
            hints.contains(&rel.predicate)
                && (seeds.contains(rel.subject_entity_id.as_str())
                    || seeds.contains(rel.object_entity_id.as_str()))
        })
        .cloned()
        .collect();
    if focused.is_empty() {
        return fact;
    }

    let mut keep: BTreeSet<String> = fact.seeds.iter().cloned().collect();
    for (rel, _) in &focused {
        keep.insert(rel.subject_entity_id.clone());
        keep.insert(rel.object_entity_id.clone());
    }
    fact.entities.retain(|(node, _)| keep.contains(&node.entity_id));
    fact.relationships = focused;
    fact
}

/// Unstructured path: embed the question, nearest neighbours above a floor.
pub struct VectorRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    top_k: usize,
    min_similarity: f32,
}

impl VectorRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        top_k: usize,
        min_similarity: f32,
    ) -> Self {
        Self {
            embedder,
            store,
            top_k,
            min_similarity,
        }
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<PassageMatch>, RetrievalError> {
        let vector = self
            .embedder
            .embed(question)
            .await
            .map_err(|e| RetrievalError::Embedding(format!("{:#}", e)))?;

        let mut matches = self.store.nearest_neighbors(&vector, self.top_k).await?;
        let total = matches.len();
        matches.retain(|m| m.similarity >= self.min_similarity);
        debug!(
            retrieved = total,
            kept = matches.len(),
            "Vector path finished"
        );
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouteState;
    use anyhow::Result;
    use async_trait::async_trait;
    use extract::{CharSpan, EntityMention, EntityType, Provenance, Relationship};
    use index::{ChunkMetadata, EntityNode, InMemoryGraphStore, InMemoryVectorStore};

    fn decision(entities: Vec<EntityMention>, hints: Vec<Predicate>) -> RoutingDecision {
        RoutingDecision {
            state: RouteState::Structured,
            entities,
            predicate_hints: hints,
            structured_signal: 2.0,
            narrative_signal: 0.0,
        }
    }

    fn mention(text: &str) -> EntityMention {
        EntityMention {
            source_document_id: "query".into(),
            char_span: CharSpan::new(0, text.chars().count()),
            surface_text: text.into(),
            predicted_type: EntityType::Person,
            ner_label: "PER".into(),
            score: 0.9,
        }
    }

    fn node(id: &str, name: &str) -> EntityNode {
        EntityNode {
            entity_id: id.into(),
            display_name: name.into(),
            entity_type: EntityType::Person,
            aliases: vec![name.into()],
        }
    }

    fn rel(s: &str, p: Predicate, o: &str) -> Relationship {
        Relationship {
            subject_entity_id: s.into(),
            predicate: p,
            object_entity_id: o.into(),
            confidence: 0.9,
            provenance: vec![Provenance::new("d1", CharSpan::new(0, 30))],
        }
    }

    async fn family() -> GraphRetriever {
        let store = Arc::new(InMemoryGraphStore::new());
        for (id, name) in [("sakri", "Sakri"), ("palasara", "Resi Palasara"), ("parasara", "Parasara")] {
            store.upsert_entity(&node(id, name)).await.unwrap();
        }
        store.upsert_relationship(&rel("sakri", Predicate::SonOf, "palasara")).await.unwrap();
        store.upsert_relationship(&rel("sakri", Predicate::EnemyOf, "parasara")).await.unwrap();

        let resolver = EntityResolver::default();
        let mut table = AliasTable::new();
        for (name, id) in [("Sakri", "sakri"), ("Resi Palasara", "palasara"), ("Parasara", "parasara")] {
            table.register_alias(resolver.normalizer(), name, EntityType::Person, id);
        }

        GraphRetriever::new(store, resolver, Arc::new(RwLock::new(table)), 2)
    }

    #[tokio::test]
    async fn test_hints_focus_the_subgraph() {
        let retriever = family().await;

        let fact = retriever
            .retrieve(
                &decision(vec![mention("Sakri")], vec![Predicate::SonOf, Predicate::FatherOf]),
                "Siapa ayah Sakri?",
            )
            .await
            .unwrap();

        assert_eq!(fact.seeds, vec!["sakri"]);
        assert_eq!(fact.relationships.len(), 1);
        assert_eq!(fact.relationships[0].0.object_entity_id, "palasara");
        assert!(fact.entity("parasara").is_none());
    }

    #[tokio::test]
    async fn test_ngram_fallback_without_mentions() {
        let retriever = family().await;

        let seeds = retriever.seed_ids(&decision(vec![], vec![]), "siapa resi palasara itu");
        assert_eq!(seeds, vec!["palasara"]);

        let fact = retriever
            .retrieve(&decision(vec![], vec![]), "kisah resi palasara")
            .await
            .unwrap();
        // two hops reach Parasara through Sakri
        assert_eq!(fact.relationships.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_entity_gives_empty_fact() {
        let retriever = family().await;

        let fact = retriever
            .retrieve(&decision(vec![mention("Gatotkaca")], vec![]), "Siapa Gatotkaca?")
            .await
            .unwrap();
        assert!(fact.is_empty());
    }

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(if text.contains("lahir") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
        }
    }

    #[tokio::test]
    async fn test_vector_path_applies_similarity_floor() {
        let store = Arc::new(InMemoryVectorStore::new());
        let metadata = |text: &str| ChunkMetadata {
            document_id: "d1".into(),
            char_range: (0, text.chars().count()),
            text: text.into(),
            title: "Sakri Lahir".into(),
        };
        store.upsert("c1", vec![1.0, 0.0], metadata("Sakri lahir")).await.unwrap();
        store.upsert("c2", vec![0.1, 1.0], metadata("Perang besar")).await.unwrap();

        let retriever = VectorRetriever::new(Arc::new(AxisEmbedder), store, 5, 0.3);
        let matches = retriever.retrieve("kapan Sakri lahir").await.unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].chunk_id, "c1");
    }
}
