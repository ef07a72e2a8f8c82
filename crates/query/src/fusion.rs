//! Fusion of graph facts and passage matches into one bounded context.
//!
//! Items from both paths are scored by a [`ScoringStrategy`], deduplicated,
//! interleaved by score and cut to a character budget. When both paths
//! returned something, the best item of each is always kept.

use extract::{CharSpan, Provenance};
use index::{GraphFact, PassageMatch};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Graph,
    Vector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub source: SourceKind,
    pub content: String,
    pub score: f32,
    /// Provenance of a graph fact, entity id of a lone seed, or the passage location
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum DegradationReason {
    TimedOut,
    Failed(String),
}

impl fmt::Display for DegradationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradationReason::TimedOut => f.write_str("timed out"),
            DegradationReason::Failed(message) => write!(f, "failed: {}", message),
        }
    }
}

/// One retrieval path did not contribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub path: SourceKind,
    pub reason: DegradationReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedContext {
    pub items: Vec<ContextItem>,
    pub budget: usize,
    pub total_chars: usize,
    pub dropped: usize,
    pub degraded: Option<Degradation>,
}

impl FusedContext {
    pub fn items_from(&self, source: SourceKind) -> impl Iterator<Item = &ContextItem> {
        self.items.iter().filter(move |item| item.source == source)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FusionError {
    #[error("no evidence found in graph or passages")]
    NoEvidenceFound,
}

/// Puts graph facts and passages on one scale.
pub trait ScoringStrategy: Send + Sync {
    fn score_graph(&self, distance: usize, confidence: f32) -> f32;

    fn score_passage(&self, similarity: f32) -> f32;
}

/// Inverse hop distance for graph facts, clamped cosine for passages.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultScoring;

impl ScoringStrategy for DefaultScoring {
    fn score_graph(&self, distance: usize, _confidence: f32) -> f32 {
        1.0 / (1.0 + distance as f32)
    }

    fn score_passage(&self, similarity: f32) -> f32 {
        similarity.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub max_chars: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { max_chars: 4000 }
    }
}

pub struct FusionRanker {
    strategy: Arc<dyn ScoringStrategy>,
    config: FusionConfig,
}

impl FusionRanker {
    pub fn new(strategy: Arc<dyn ScoringStrategy>, config: FusionConfig) -> Self {
        Self { strategy, config }
    }

    pub fn fuse(
        &self,
        graph: &GraphFact,
        passages: &[PassageMatch],
        degraded: Option<Degradation>,
    ) -> Result<FusedContext, FusionError> {
        let mut candidates = self.graph_items(graph);
        let (passage_items, duplicates) = self.passage_items(graph, passages);
        candidates.extend(passage_items);
        if candidates.is_empty() {
            return Err(FusionError::NoEvidenceFound);
        }

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.content.cmp(&b.content))
        });

        let budget = self.config.max_chars;
        let mut chosen: Vec<Option<ContextItem>> = vec![None; candidates.len()];
        let mut remaining = budget;

        let best_graph = candidates.iter().position(|c| c.source == SourceKind::Graph);
        let best_vector = candidates.iter().position(|c| c.source == SourceKind::Vector);
        let reserved: Vec<(usize, usize)> = match (best_graph, best_vector) {
            (Some(g), Some(v)) => {
                let (g_cap, v_cap) =
                    split_budget(char_len(&candidates[g]), char_len(&candidates[v]), budget);
                vec![(g, g_cap), (v, v_cap)]
            }
            (Some(only), None) | (None, Some(only)) => vec![(only, budget)],
            (None, None) => Vec::new(),
        };

        for (idx, cap) in reserved {
            let item = truncate(&candidates[idx], cap.min(remaining));
            if item.content.is_empty() {
                continue;
            }
            remaining -= char_len(&item);
            chosen[idx] = Some(item);
        }

        for (idx, candidate) in candidates.iter().enumerate() {
            if chosen[idx].is_some() {
                continue;
            }
            let len = char_len(candidate);
            if len <= remaining {
                remaining -= len;
                chosen[idx] = Some(candidate.clone());
            }
        }

        let items: Vec<ContextItem> = chosen.into_iter().flatten().collect();
        let total_chars = budget - remaining;
        let dropped = duplicates + (candidates.len() - items.len());

        debug!(
            items = items.len(),
            total_chars,
            dropped,
            degraded = degraded.is_some(),
            "Fused context"
        );

        Ok(FusedContext {
            items,
            budget,
            total_chars,
            dropped,
            degraded,
        })
    }

    fn graph_items(&self, graph: &GraphFact) -> Vec<ContextItem> {
        let name = |id: &str| {
            graph
                .entity(id)
                .map(|node| node.display_name.clone())
                .unwrap_or_else(|| id.to_string())
        };

        let mut covered = BTreeSet::new();
        let mut items = Vec::new();
        for (rel, distance) in &graph.relationships {
            covered.insert(rel.subject_entity_id.as_str());
            covered.insert(rel.object_entity_id.as_str());
            items.push(ContextItem {
                source: SourceKind::Graph,
                content: format!(
                    "{} {} {}",
                    name(&rel.subject_entity_id),
                    rel.predicate,
                    name(&rel.object_entity_id)
                ),
                score: self.strategy.score_graph(*distance, rel.confidence),
                reference: rel
                    .provenance
                    .iter()
                    .map(Provenance::encode)
                    .collect::<Vec<_>>()
                    .join(";"),
            });
        }

        for seed in &graph.seeds {
            if covered.contains(seed.as_str()) {
                continue;
            }
            let Some((node, distance)) = graph.entities.iter().find(|(n, _)| &n.entity_id == seed)
            else {
                continue;
            };

            let others: Vec<&str> = node
                .aliases
                .iter()
                .map(String::as_str)
                .filter(|alias| *alias != node.display_name)
                .collect();
            let content = if others.is_empty() {
                format!("{} ({})", node.display_name, node.entity_type)
            } else {
                format!(
                    "{} ({}), also known as {}",
                    node.display_name,
                    node.entity_type,
                    others.join(", ")
                )
            };

            items.push(ContextItem {
                source: SourceKind::Graph,
                content,
                score: self.strategy.score_graph(*distance, 1.0),
                reference: node.entity_id.clone(),
            });
        }

        items
    }

    /// Returns the surviving passage items and how many were dropped as
    /// duplicates of another passage or of a graph fact's source span.
    fn passage_items(&self, graph: &GraphFact, passages: &[PassageMatch]) -> (Vec<ContextItem>, usize) {
        let spans: Vec<&Provenance> = graph
            .relationships
            .iter()
            .flat_map(|(rel, _)| rel.provenance.iter())
            .collect();

        let mut seen_ids = HashSet::new();
        let mut seen_texts = HashSet::new();
        let mut duplicates = 0;
        let mut items = Vec::new();

        for m in passages {
            let range = CharSpan::new(m.metadata.char_range.0, m.metadata.char_range.1);
            let inside_fact = spans.iter().any(|p| {
                p.source_document_id == m.metadata.document_id && p.char_span.contains(&range)
            });
            if !seen_ids.insert(m.chunk_id.as_str())
                || !seen_texts.insert(m.metadata.text.trim())
                || inside_fact
            {
                duplicates += 1;
                continue;
            }

            items.push(ContextItem {
                source: SourceKind::Vector,
                content: m.metadata.text.clone(),
                score: self.strategy.score_passage(m.similarity),
                reference: Provenance::new(m.metadata.document_id.clone(), range).encode(),
            });
        }

        (items, duplicates)
    }
}

impl Default for FusionRanker {
    fn default() -> Self {
        Self::new(Arc::new(DefaultScoring), FusionConfig::default())
    }
}

fn char_len(item: &ContextItem) -> usize {
    item.content.chars().count()
}

fn truncate(item: &ContextItem, max_chars: usize) -> ContextItem {
    let mut item = item.clone();
    if char_len(&item) > max_chars {
        item.content = item.content.chars().take(max_chars).collect();
    }
    item
}

/// Caps for the two reserved items so that together they fit `budget`.
fn split_budget(first: usize, second: usize, budget: usize) -> (usize, usize) {
    if first + second <= budget {
        return (first, second);
    }
    let half = budget / 2;
    match (first.cmp(&half), second.cmp(&half)) {
        (Ordering::Less | Ordering::Equal, _) => (first, budget - first),
        (_, Ordering::Less | Ordering::Equal) => (budget - second, second),
        _ => (budget - half, half),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{EntityType, Predicate, Relationship};
    use index::{ChunkMetadata, EntityNode};

    fn node(id: &str, name: &str, aliases: &[&str]) -> EntityNode {
        EntityNode {
            entity_id: id.into(),
            display_name: name.into(),
            entity_type: EntityType::Person,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn sakri_fact() -> GraphFact {
        GraphFact {
            seeds: vec!["sakri".into()],
            entities: vec![
                (node("sakri", "Sakri", &["Sakri"]), 0),
                (node("palasara", "Resi Palasara", &["Palasara", "Resi Palasara"]), 1),
            ],
            relationships: vec![(
                Relationship {
                    subject_entity_id: "sakri".into(),
                    predicate: Predicate::SonOf,
                    object_entity_id: "palasara".into(),
                    confidence: 0.9,
                    provenance: vec![Provenance::new("d1", CharSpan::new(0, 100))],
                },
                0,
            )],
        }
    }

    fn passage(id: &str, doc: &str, range: (usize, usize), text: &str, similarity: f32) -> PassageMatch {
        PassageMatch {
            chunk_id: id.into(),
            metadata: ChunkMetadata {
                document_id: doc.into(),
                char_range: range,
                text: text.into(),
                title: "Sakri Lahir".into(),
            },
            similarity,
        }
    }

    fn ranker(max_chars: usize) -> FusionRanker {
        FusionRanker::new(Arc::new(DefaultScoring), FusionConfig { max_chars })
    }

    #[test]
    fn test_graph_items_use_display_names() {
        let context = ranker(4000).fuse(&sakri_fact(), &[], None).unwrap();

        assert_eq!(context.items.len(), 1);
        assert_eq!(context.items[0].content, "Sakri SON_OF Resi Palasara");
        assert_eq!(context.items[0].score, 1.0);
        assert_eq!(context.items[0].reference, "d1@0..100");
    }

    #[test]
    fn test_lone_seed_lists_aliases() {
        let fact = GraphFact {
            seeds: vec!["palasara".into()],
            entities: vec![(node("palasara", "Resi Palasara", &["Palasara", "Resi Palasara"]), 0)],
            relationships: vec![],
        };

        let context = ranker(4000).fuse(&fact, &[], None).unwrap();

        assert_eq!(
            context.items[0].content,
            "Resi Palasara (Person), also known as Palasara"
        );
    }

    #[test]
    fn test_passage_dedup() {
        let passages = vec![
            passage("c1", "d2", (0, 20), "Wirata diserang.", 0.8),
            passage("c1", "d2", (0, 20), "Wirata diserang.", 0.8),
            passage("c2", "d3", (0, 20), "Wirata diserang.", 0.7),
            // inside the SON_OF provenance span
            passage("c3", "d1", (10, 60), "Sakri lahir dari ayah Resi Palasara.", 0.9),
            // same document but outside the span
            passage("c4", "d1", (80, 200), "Sakri bertapa di gunung.", 0.6),
        ];

        let context = ranker(4000).fuse(&sakri_fact(), &passages, None).unwrap();

        let kept: Vec<&str> = context
            .items_from(SourceKind::Vector)
            .map(|i| i.reference.as_str())
            .collect();
        assert_eq!(kept, vec!["d2@0..20", "d1@80..200"]);
        assert_eq!(context.dropped, 3);
    }

    #[test]
    fn test_interleaved_by_score_graph_first_on_ties() {
        let passages = vec![
            passage("c1", "d2", (0, 10), "tinggi", 1.0),
            passage("c2", "d2", (10, 20), "rendah", 0.4),
        ];

        let context = ranker(4000).fuse(&sakri_fact(), &passages, None).unwrap();

        let order: Vec<SourceKind> = context.items.iter().map(|i| i.source).collect();
        assert_eq!(order, vec![SourceKind::Graph, SourceKind::Vector, SourceKind::Vector]);
        assert_eq!(context.items[2].content, "rendah");
    }

    #[test]
    fn test_budget_keeps_both_kinds() {
        let long = "Sakri bertapa di hutan. ".repeat(20);
        let passages = vec![
            passage("c1", "d2", (0, 500), &long, 0.95),
            passage("c2", "d2", (500, 1000), &long.to_uppercase(), 0.9),
        ];

        let context = ranker(60).fuse(&sakri_fact(), &passages, None).unwrap();

        assert!(context.total_chars <= 60);
        let content: usize = context.items.iter().map(|i| i.content.chars().count()).sum();
        assert_eq!(content, context.total_chars);
        assert_eq!(context.items_from(SourceKind::Graph).count(), 1);
        assert_eq!(context.items_from(SourceKind::Vector).count(), 1);
        assert_eq!(context.dropped, 1);
    }

    #[test]
    fn test_single_kind_truncated_to_budget() {
        let long = "Perang besar di Kurusetra. ".repeat(10);
        let passages = vec![passage("c1", "d2", (0, 270), &long, 0.8)];

        let context = ranker(25).fuse(&GraphFact::default(), &passages, None).unwrap();

        assert_eq!(context.items.len(), 1);
        assert_eq!(context.total_chars, 25);
    }

    #[test]
    fn test_degradation_is_carried() {
        let degraded = Degradation {
            path: SourceKind::Vector,
            reason: DegradationReason::TimedOut,
        };

        let context = ranker(4000)
            .fuse(&sakri_fact(), &[], Some(degraded.clone()))
            .unwrap();

        assert_eq!(context.degraded, Some(degraded));
    }

    #[test]
    fn test_no_evidence() {
        let err = ranker(4000).fuse(&GraphFact::default(), &[], None).unwrap_err();
        assert_eq!(err, FusionError::NoEvidenceFound);
    }

    #[test]
    fn test_split_budget() {
        assert_eq!(split_budget(10, 20, 100), (10, 20));
        assert_eq!(split_budget(10, 200, 100), (10, 90));
        assert_eq!(split_budget(200, 10, 100), (90, 10));
        assert_eq!(split_budget(200, 300, 101), (51, 50));
    }
}
