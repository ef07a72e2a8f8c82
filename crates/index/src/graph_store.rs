use async_trait::async_trait;
use extract::{CanonicalEntity, EntityType, Relationship};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::StoreError;

/// What the graph keeps about an entity; mentions stay in the build run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    pub entity_id: String,
    pub display_name: String,
    pub entity_type: EntityType,
    pub aliases: Vec<String>,
}

impl EntityNode {
    /// Union aliases and keep the preferred display name.
    pub fn merge(&mut self, other: &EntityNode) {
        self.display_name =
            extract::schema::preferred_display_name(&self.display_name, &other.display_name)
                .to_string();
        let mut aliases: BTreeSet<String> = self.aliases.drain(..).collect();
        aliases.extend(other.aliases.iter().cloned());
        self.aliases = aliases.into_iter().collect();
    }
}

impl From<&CanonicalEntity> for EntityNode {
    fn from(entity: &CanonicalEntity) -> Self {
        Self {
            entity_id: entity.entity_id.clone(),
            display_name: entity.display_name.clone(),
            entity_type: entity.entity_type,
            aliases: entity.aliases.iter().cloned().collect(),
        }
    }
}

/// Neighbourhood of a set of seed entities, with hop distances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphFact {
    pub seeds: Vec<String>,
    pub entities: Vec<(EntityNode, usize)>,
    pub relationships: Vec<(Relationship, usize)>,
}

impl GraphFact {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn entity(&self, entity_id: &str) -> Option<&EntityNode> {
        self.entities
            .iter()
            .map(|(node, _)| node)
            .find(|node| node.entity_id == entity_id)
    }

    /// Fixed order: nearest first, then by id / key.
    pub fn sort(&mut self) {
        self.entities
            .sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.entity_id.cmp(&b.0.entity_id)));
        self.relationships.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.key().cmp(&b.0.key())));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relationship_count: usize,
}

/// Storage seam for the knowledge graph. Upserts must be idempotent:
/// re-writing an entity unions aliases, re-writing a relationship keeps the
/// highest confidence and appends unseen provenance.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_entity(&self, entity: &EntityNode) -> Result<(), StoreError>;

    /// Both endpoints must already exist.
    async fn upsert_relationship(&self, relationship: &Relationship) -> Result<(), StoreError>;

    async fn entity_exists(&self, entity_id: &str) -> Result<bool, StoreError>;

    /// Breadth-first expansion up to `max_hops`, ignoring edge direction.
    async fn query_subgraph(
        &self,
        seed_ids: &[String],
        max_hops: usize,
    ) -> Result<GraphFact, StoreError>;

    async fn stats(&self) -> Result<GraphStats, StoreError>;
}

#[derive(Default)]
struct GraphState {
    graph: DiGraph<EntityNode, Relationship>,
    index: HashMap<String, NodeIndex>,
}

/// Process-local graph on `petgraph`, for tests and single-node runs.
#[derive(Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, GraphState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("graph lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GraphState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("graph lock poisoned".to_string()))
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_entity(&self, entity: &EntityNode) -> Result<(), StoreError> {
        let mut state = self.write()?;
        match state.index.get(&entity.entity_id).copied() {
            Some(idx) => state.graph[idx].merge(entity),
            None => {
                let mut node = entity.clone();
                node.aliases.sort();
                node.aliases.dedup();
                let idx = state.graph.add_node(node);
                state.index.insert(entity.entity_id.clone(), idx);
            }
        }
        Ok(())
    }

    async fn upsert_relationship(&self, relationship: &Relationship) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let endpoint = |id: &str| {
            state
                .index
                .get(id)
                .copied()
                .ok_or_else(|| StoreError::Protocol(format!("unknown endpoint {}", id)))
        };
        let subject = endpoint(&relationship.subject_entity_id)?;
        let object = endpoint(&relationship.object_entity_id)?;

        let existing = state
            .graph
            .edges_connecting(subject, object)
            .find(|edge| edge.weight().predicate == relationship.predicate)
            .map(|edge| edge.id());

        match existing {
            Some(edge) => state.graph[edge].merge(relationship),
            None => {
                state.graph.add_edge(subject, object, relationship.clone());
            }
        }
        Ok(())
    }

    async fn entity_exists(&self, entity_id: &str) -> Result<bool, StoreError> {
        Ok(self.read()?.index.contains_key(entity_id))
    }

    async fn query_subgraph(
        &self,
        seed_ids: &[String],
        max_hops: usize,
    ) -> Result<GraphFact, StoreError> {
        let state = self.read()?;

        let mut distance: HashMap<NodeIndex, usize> = HashMap::new();
        let mut queue = VecDeque::new();
        let mut seeds = Vec::new();
        for id in seed_ids {
            if let Some(&idx) = state.index.get(id) {
                if distance.insert(idx, 0).is_none() {
                    seeds.push(id.clone());
                    queue.push_back(idx);
                }
            }
        }

        while let Some(idx) = queue.pop_front() {
            let hops = distance[&idx];
            if hops >= max_hops {
                continue;
            }
            let neighbours: Vec<NodeIndex> = state
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .chain(state.graph.neighbors_directed(idx, Direction::Incoming))
                .collect();
            for next in neighbours {
                if !distance.contains_key(&next) {
                    distance.insert(next, hops + 1);
                    queue.push_back(next);
                }
            }
        }

        let entities = distance
            .iter()
            .map(|(&idx, &hops)| (state.graph[idx].clone(), hops))
            .collect();

        let relationships = state
            .graph
            .edge_references()
            .filter_map(|edge| {
                let s = distance.get(&edge.source())?;
                let o = distance.get(&edge.target())?;
                Some((edge.weight().clone(), (*s).min(*o)))
            })
            .collect();

        let mut fact = GraphFact {
            seeds,
            entities,
            relationships,
        };
        fact.sort();
        Ok(fact)
    }

    async fn stats(&self) -> Result<GraphStats, StoreError> {
        let state = self.read()?;
        Ok(GraphStats {
            entity_count: state.graph.node_count(),
            relationship_count: state.graph.edge_count(),
        })
    }
}
