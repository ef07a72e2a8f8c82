use extract::{
    AliasTable, EntityExtractor, EntityResolver, Predicate, RelationExtractor, Relationship,
    Resolution, build_windows,
};
use futures::future::join_all;
use ingest::Document;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::error::IndexError;
use crate::graph_writer::{GraphWriter, WriteReport};
use crate::passage_indexer::{IndexReport, PassageIndexer};

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphReport {
    pub documents: usize,
    pub failed_documents: usize,
    pub mentions: usize,
    pub entities: usize,
    pub relationships_extracted: usize,
    pub rejected_candidates: usize,
    pub failed_windows: usize,
    pub aliases_registered: usize,
    pub alias_version: u64,
    pub write: WriteReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub graph: GraphReport,
    pub passages: IndexReport,
}

/// Runs the graph pipeline (extract, resolve, relate, write) and the passage
/// pipeline (chunk, embed, upsert) over one corpus.
pub struct Indexer {
    extractor: EntityExtractor,
    resolver: EntityResolver,
    relations: RelationExtractor,
    writer: GraphWriter,
    passages: PassageIndexer,
}

impl Indexer {
    pub fn new(
        extractor: EntityExtractor,
        resolver: EntityResolver,
        relations: RelationExtractor,
        writer: GraphWriter,
        passages: PassageIndexer,
    ) -> Self {
        Self {
            extractor,
            resolver,
            relations,
            writer,
            passages,
        }
    }

    pub fn writer(&self) -> &GraphWriter {
        &self.writer
    }

    pub fn passages(&self) -> &PassageIndexer {
        &self.passages
    }

    /// Both pipelines run concurrently; only the graph pipeline touches `aliases`.
    pub async fn build(
        &self,
        documents: &[Document],
        aliases: &mut AliasTable,
    ) -> Result<BuildReport, IndexError> {
        let (graph, passages) = tokio::join!(
            self.build_graph(documents, aliases),
            self.passages.index(documents)
        );

        Ok(BuildReport {
            graph: graph?,
            passages: passages?,
        })
    }

    /// Build independent corpora in parallel, each against a private alias
    /// draft. Drafts are merged back in corpus order.
    pub async fn build_corpora(
        &self,
        corpora: &[Vec<Document>],
        aliases: &mut AliasTable,
    ) -> Result<Vec<BuildReport>, IndexError> {
        let mut drafts: Vec<AliasTable> = corpora.iter().map(|_| aliases.draft()).collect();

        let results = join_all(
            corpora
                .iter()
                .zip(drafts.iter_mut())
                .map(|(documents, draft)| self.build(documents, draft)),
        )
        .await;

        let conflicts = aliases.merge_drafts(drafts);
        if conflicts > 0 {
            warn!(conflicts, "Alias drafts disagreed");
        }

        results.into_iter().collect()
    }

    pub async fn build_graph(
        &self,
        documents: &[Document],
        aliases: &mut AliasTable,
    ) -> Result<GraphReport, IndexError> {
        let mut report = GraphReport {
            documents: documents.len(),
            ..Default::default()
        };

        let mut resolution = Resolution::default();
        let mut windows = Vec::new();

        for doc in documents {
            let mentions = match self.extractor.extract(&doc.document_id, &doc.text).await {
                Ok(mentions) => mentions,
                Err(e) => {
                    warn!(document_id = %doc.document_id, "Skipping document: {}", e);
                    report.failed_documents += 1;
                    continue;
                }
            };
            report.mentions += mentions.len();

            let doc_resolution = self.resolver.resolve(mentions, aliases);
            windows.extend(build_windows(
                &doc.document_id,
                &doc.text,
                &doc_resolution,
                self.relations.config(),
            ));
            resolution.merge(doc_resolution);
        }

        report.entities = resolution.entities.len();
        info!(
            documents = report.documents,
            entities = report.entities,
            windows = windows.len(),
            "Entities resolved"
        );

        let batch = self.relations.extract_all(&windows).await;
        report.relationships_extracted = batch.relationships.len();
        report.rejected_candidates = batch.rejected_candidates;
        report.failed_windows = batch.failed_windows;

        let (alias_rels, edges): (Vec<Relationship>, Vec<Relationship>) = batch
            .relationships
            .into_iter()
            .partition(|rel| rel.predicate == Predicate::AliasOf);

        // Entities folded away by ALIAS_OF are written under their canonical
        // id, so the next build (which resolves them there) sees the same graph.
        let mut redirects: BTreeMap<String, String> = BTreeMap::new();
        for rel in &alias_rels {
            let from = follow(&redirects, &rel.subject_entity_id);
            let to = follow(&redirects, &rel.object_entity_id);
            if let Some(registered) = self.register_alias(&from, &to, &resolution, aliases) {
                report.aliases_registered += registered;
                resolution.redirect(&from, &to);
                redirects.insert(from, to);
            }
        }
        report.alias_version = aliases.version();
        report.entities = resolution.entities.len();

        let edges = redirect_edges(edges, &redirects);
        report.write = self.writer.write(&resolution.entities, &edges).await?;
        Ok(report)
    }

    /// `X ALIAS_OF Y`: every name of X now resolves to Y. `None` when the
    /// pair cannot be aliased.
    fn register_alias(
        &self,
        alias_id: &str,
        canonical_id: &str,
        resolution: &Resolution,
        aliases: &mut AliasTable,
    ) -> Option<usize> {
        let alias = resolution.entity(alias_id)?;
        let canonical = resolution.entity(canonical_id)?;
        if alias.entity_id == canonical.entity_id || alias.entity_type != canonical.entity_type {
            warn!(
                alias = %alias.display_name,
                canonical = %canonical.display_name,
                "Ignoring alias between incompatible entities"
            );
            return None;
        }

        let registered = alias
            .aliases
            .iter()
            .filter(|name| {
                aliases.register_alias(
                    self.resolver.normalizer(),
                    name,
                    canonical.entity_type,
                    &canonical.entity_id,
                )
            })
            .count();
        Some(registered)
    }
}

fn follow(redirects: &BTreeMap<String, String>, entity_id: &str) -> String {
    let mut current = entity_id;
    // Bounded so a cycle cannot spin forever.
    for _ in 0..=redirects.len() {
        match redirects.get(current) {
            Some(next) => current = next,
            None => break,
        }
    }
    current.to_string()
}

/// Re-point edge endpoints through `redirects` and fold edges that now share
/// a key.
fn redirect_edges(
    edges: Vec<Relationship>,
    redirects: &BTreeMap<String, String>,
) -> Vec<Relationship> {
    if redirects.is_empty() {
        return edges;
    }

    let mut merged: BTreeMap<(String, Predicate, String), Relationship> = BTreeMap::new();
    for mut rel in edges {
        rel.subject_entity_id = follow(redirects, &rel.subject_entity_id);
        rel.object_entity_id = follow(redirects, &rel.object_entity_id);
        match merged.get_mut(&rel.key()) {
            Some(existing) => existing.merge(&rel),
            None => {
                merged.insert(rel.key(), rel);
            }
        }
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Embedder;
    use crate::graph_store::{GraphStore, InMemoryGraphStore};
    use crate::passage_indexer::PassageConfig;
    use crate::retry::RetryPolicy;
    use crate::vector_store::{InMemoryVectorStore, VectorStore};
    use anyhow::Result;
    use async_trait::async_trait;
    use extract::{LanguageModel, NerConfig, NerModel, NerSpan, RelationConfig};
    use std::sync::Arc;

    /// Tags every occurrence of a known name.
    struct GazetteerNer(Vec<(&'static str, &'static str)>);

    #[async_trait]
    impl NerModel for GazetteerNer {
        async fn recognize(&self, text: &str) -> Result<Vec<NerSpan>> {
            let mut spans = Vec::new();
            for (name, label) in &self.0 {
                for (byte, _) in text.match_indices(name) {
                    let start = text[..byte].chars().count();
                    spans.push(NerSpan {
                        start,
                        end: start + name.chars().count(),
                        label: label.to_string(),
                        score: 0.9,
                    });
                }
            }
            Ok(spans)
        }
    }

    struct FixedLlm(&'static str);

    #[async_trait]
    impl LanguageModel for FixedLlm {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }

        async fn generate_json(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, text.len() as f32])
        }
    }

    fn indexer(
        llm_output: &'static str,
        graph: Arc<InMemoryGraphStore>,
        vectors: Arc<InMemoryVectorStore>,
    ) -> Indexer {
        let ner = GazetteerNer(vec![
            ("Sakri", "PER"),
            ("Resi Palasara", "PER"),
            ("Satrukem", "PER"),
        ]);
        Indexer::new(
            EntityExtractor::new(Arc::new(ner), NerConfig::default()),
            EntityResolver::default(),
            RelationExtractor::new(Arc::new(FixedLlm(llm_output)), RelationConfig::default()),
            GraphWriter::new(graph, RetryPolicy::new(0, 1, 1)),
            PassageIndexer::new(
                Arc::new(UnitEmbedder),
                vectors,
                PassageConfig::default(),
                RetryPolicy::new(0, 1, 1),
            ),
        )
    }

    fn corpus(text: &str, part: usize) -> Vec<Document> {
        vec![Document::new("stories.csv", Some(part), "Sakri Lahir".into(), text.into())]
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let vectors = Arc::new(InMemoryVectorStore::new());
        let indexer = indexer(
            r#"{"relations": [{"subject": "Sakri", "predicate": "SON_OF", "object": "Resi Palasara", "confidence": 0.9}]}"#,
            graph.clone(),
            vectors.clone(),
        );
        let docs = corpus("Sakri lahir dari ayah Resi Palasara.", 0);
        let mut aliases = AliasTable::new();

        let first = indexer.build(&docs, &mut aliases).await.unwrap();
        let stats = graph.stats().await.unwrap();
        let chunks = vectors.count().await.unwrap();
        let version = aliases.version();
        let second = indexer.build(&docs, &mut aliases).await.unwrap();

        assert_eq!(first.graph.entities, 2);
        assert_eq!(first.graph.write.relationships_written, 1);
        assert_eq!(second.graph.write.relationships_written, 1);
        assert_eq!(graph.stats().await.unwrap(), stats);
        assert_eq!(stats.relationship_count, 1);
        assert_eq!(vectors.count().await.unwrap(), chunks);
        assert_eq!(aliases.version(), version);
    }

    #[tokio::test]
    async fn test_alias_relation_rebuild_is_idempotent() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let indexer = indexer(
            r#"[{"subject": "Satrukem", "predicate": "ALIAS_OF", "object": "Sakri", "confidence": 0.9},
                {"subject": "Satrukem", "predicate": "SON_OF", "object": "Resi Palasara", "confidence": 0.9}]"#,
            graph.clone(),
            Arc::new(InMemoryVectorStore::new()),
        );
        let docs = corpus("Sakri, juga disebut Satrukem, putra Resi Palasara.", 0);
        let mut aliases = AliasTable::new();

        let first = indexer.build(&docs, &mut aliases).await.unwrap();
        let stats = graph.stats().await.unwrap();
        indexer.build(&docs, &mut aliases).await.unwrap();

        assert_eq!(first.graph.entities, 2);
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.relationship_count, 1);
        assert_eq!(graph.stats().await.unwrap(), stats);

        let sakri = aliases
            .lookup("sakri", extract::EntityType::Person)
            .unwrap()
            .to_string();
        let fact = graph.query_subgraph(&[sakri.clone()], 1).await.unwrap();
        let (rel, _) = &fact.relationships[0];
        assert_eq!(rel.subject_entity_id, sakri);
        assert_eq!(rel.predicate, Predicate::SonOf);
        assert!(fact.entity(&sakri).unwrap().aliases.contains(&"Satrukem".to_string()));
    }

    #[test]
    fn test_redirected_edges_fold_together() {
        let rel = |subject: &str, confidence: f32, start: usize| Relationship {
            subject_entity_id: subject.to_string(),
            predicate: Predicate::SonOf,
            object_entity_id: "palasara".to_string(),
            confidence,
            provenance: vec![extract::Provenance::new("d1", extract::CharSpan::new(start, start + 10))],
        };
        let redirects: BTreeMap<String, String> = [
            ("satrukem".to_string(), "sakri".to_string()),
            ("sakri-muda".to_string(), "satrukem".to_string()),
        ]
        .into_iter()
        .collect();

        let edges = redirect_edges(
            vec![rel("sakri", 0.7, 0), rel("satrukem", 0.9, 20), rel("sakri-muda", 0.8, 40)],
            &redirects,
        );

        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].subject_entity_id, "sakri");
        assert_eq!(edges[0].confidence, 0.9);
        assert_eq!(edges[0].provenance.len(), 3);
    }

    #[tokio::test]
    async fn test_alias_relation_extends_table() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let indexer = indexer(
            r#"[{"subject": "Satrukem", "predicate": "ALIAS_OF", "object": "Sakri"}]"#,
            graph.clone(),
            Arc::new(InMemoryVectorStore::new()),
        );
        let docs = corpus("Sakri, juga disebut Satrukem, pergi bertapa.", 0);
        let mut aliases = AliasTable::new();

        let report = indexer.build(&docs, &mut aliases).await.unwrap();

        assert_eq!(report.graph.aliases_registered, 1);
        assert_eq!(report.graph.write.relationships_written, 0);
        assert_eq!(
            aliases.lookup("satrukem", extract::EntityType::Person),
            aliases.lookup("sakri", extract::EntityType::Person)
        );
    }

    #[tokio::test]
    async fn test_build_corpora_merges_drafts() {
        let indexer = indexer(
            "[]",
            Arc::new(InMemoryGraphStore::new()),
            Arc::new(InMemoryVectorStore::new()),
        );
        let corpora = vec![
            corpus("Sakri lahir dari ayah Resi Palasara.", 0),
            corpus("Satrukem bertemu Sakri.", 1),
        ];
        let mut aliases = AliasTable::new();

        let reports = indexer.build_corpora(&corpora, &mut aliases).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert!(aliases.lookup("sakri", extract::EntityType::Person).is_some());
        assert!(aliases.lookup("palasara", extract::EntityType::Person).is_some());
        assert!(aliases.lookup("satrukem", extract::EntityType::Person).is_some());
    }
}
