use anyhow::{Context, Result};
use async_trait::async_trait;
use extract::{EntityType, Predicate, Provenance, Relationship};
use neo4rs::{Graph, Query};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::graph_store::{EntityNode, GraphFact, GraphStats, GraphStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
        }
    }
}

/// Graph store backed by Neo4j. Every predicate is stored on one
/// `RELATION` relationship type with a `type` property.
pub struct Neo4jGraphStore {
    graph: Graph,
}

fn unavailable(err: neo4rs::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn protocol(err: impl std::fmt::Display) -> StoreError {
    StoreError::Protocol(err.to_string())
}

impl Neo4jGraphStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(config: &Neo4jConfig) -> Result<Self> {
        let graph = Graph::new(&config.uri, &config.user, &config.password)
            .await
            .context(format!("Failed to connect to Neo4j at {}", config.uri))?;
        Ok(Self::new(graph))
    }

    async fn count(&self, cypher: &str) -> Result<usize, StoreError> {
        let mut result = self
            .graph
            .execute(Query::new(cypher.to_string()))
            .await
            .map_err(unavailable)?;

        match result.next().await.map_err(unavailable)? {
            Some(row) => Ok(row.get::<i64>("count").map_err(protocol)?.max(0) as usize),
            None => Ok(0),
        }
    }

    /// Breadth-first expansion, one round trip per hop.
    async fn expand(
        &self,
        seeds: &[String],
        max_hops: usize,
    ) -> Result<HashMap<String, usize>, StoreError> {
        let mut distance: HashMap<String, usize> =
            seeds.iter().map(|id| (id.clone(), 0)).collect();
        let mut frontier: Vec<String> = seeds.to_vec();

        for hop in 1..=max_hops {
            if frontier.is_empty() {
                break;
            }

            let query = Query::new(
                r#"
                MATCH (e:Entity)-[:RELATION]-(neighbor:Entity)
                WHERE e.id IN $entity_ids
                RETURN DISTINCT neighbor.id AS neighbor_id
                "#
                .to_string(),
            )
            .param("entity_ids", frontier.clone());

            let mut result = self.graph.execute(query).await.map_err(unavailable)?;
            let mut next = Vec::new();
            while let Some(row) = result.next().await.map_err(unavailable)? {
                let neighbor_id: String = row.get("neighbor_id").map_err(protocol)?;
                if !distance.contains_key(&neighbor_id) {
                    distance.insert(neighbor_id.clone(), hop);
                    next.push(neighbor_id);
                }
            }
            frontier = next;
        }

        Ok(distance)
    }

    async fn entity_nodes(&self, ids: Vec<String>) -> Result<Vec<EntityNode>, StoreError> {
        let query = Query::new(
            r#"
            MATCH (e:Entity)
            WHERE e.id IN $entity_ids
            RETURN e.id AS id, e.name AS name, e.type AS type, e.aliases AS aliases
            "#
            .to_string(),
        )
        .param("entity_ids", ids);

        let mut result = self.graph.execute(query).await.map_err(unavailable)?;
        let mut nodes = Vec::new();
        while let Some(row) = result.next().await.map_err(unavailable)? {
            let entity_type: String = row.get("type").map_err(protocol)?;
            nodes.push(EntityNode {
                entity_id: row.get("id").map_err(protocol)?,
                display_name: row.get("name").map_err(protocol)?,
                entity_type: EntityType::from_ner_label(&entity_type),
                aliases: row.get("aliases").unwrap_or_default(),
            });
        }
        Ok(nodes)
    }

    async fn relationships_among(&self, ids: Vec<String>) -> Result<Vec<Relationship>, StoreError> {
        let query = Query::new(
            r#"
            MATCH (source:Entity)-[r:RELATION]->(target:Entity)
            WHERE source.id IN $entity_ids AND target.id IN $entity_ids
            RETURN source.id AS subject, r.type AS predicate, target.id AS object,
                   r.confidence AS confidence, r.provenance AS provenance
            "#
            .to_string(),
        )
        .param("entity_ids", ids);

        let mut result = self.graph.execute(query).await.map_err(unavailable)?;
        let mut relationships = Vec::new();
        while let Some(row) = result.next().await.map_err(unavailable)? {
            let predicate: String = row.get("predicate").map_err(protocol)?;
            let Ok(predicate) = predicate.parse::<Predicate>() else {
                warn!(predicate = %predicate, "Skipping edge with unknown predicate");
                continue;
            };

            let provenance: Vec<String> = row.get("provenance").unwrap_or_default();
            relationships.push(Relationship {
                subject_entity_id: row.get("subject").map_err(protocol)?,
                predicate,
                object_entity_id: row.get("object").map_err(protocol)?,
                confidence: row.get::<f64>("confidence").unwrap_or(1.0) as f32,
                provenance: provenance.iter().filter_map(|p| Provenance::decode(p)).collect(),
            });
        }
        Ok(relationships)
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn init(&self) -> Result<(), StoreError> {
        for statement in [
            "CREATE CONSTRAINT entity_id_unique IF NOT EXISTS FOR (e:Entity) REQUIRE e.id IS UNIQUE",
            "CREATE INDEX entity_name_index IF NOT EXISTS FOR (e:Entity) ON (e.name)",
        ] {
            self.graph
                .run(Query::new(statement.to_string()))
                .await
                .map_err(unavailable)?;
        }
        info!("Neo4j schema ready");
        Ok(())
    }

    async fn upsert_entity(&self, entity: &EntityNode) -> Result<(), StoreError> {
        let query = Query::new(
            r#"
            MERGE (e:Entity {id: $id})
            ON CREATE SET e.name = $name, e.type = $type, e.aliases = $aliases
            ON MATCH SET
                e.aliases = reduce(acc = coalesce(e.aliases, []), a IN $aliases |
                    CASE WHEN a IN acc THEN acc ELSE acc + a END),
                e.name = CASE
                    WHEN size($name) > size(e.name)
                      OR (size($name) = size(e.name) AND $name < e.name) THEN $name
                    ELSE e.name END
            "#
            .to_string(),
        )
        .param("id", entity.entity_id.clone())
        .param("name", entity.display_name.clone())
        .param("type", entity.entity_type.as_str())
        .param("aliases", entity.aliases.clone());

        self.graph.run(query).await.map_err(unavailable)
    }

    async fn upsert_relationship(&self, relationship: &Relationship) -> Result<(), StoreError> {
        let provenance: Vec<String> = relationship.provenance.iter().map(Provenance::encode).collect();

        let query = Query::new(
            r#"
            MATCH (source:Entity {id: $source_id})
            MATCH (target:Entity {id: $target_id})
            MERGE (source)-[r:RELATION {type: $relation_type}]->(target)
            ON CREATE SET r.confidence = $confidence, r.provenance = $provenance
            ON MATCH SET
                r.confidence = CASE WHEN $confidence > r.confidence THEN $confidence ELSE r.confidence END,
                r.provenance = reduce(acc = coalesce(r.provenance, []), p IN $provenance |
                    CASE WHEN p IN acc THEN acc ELSE acc + p END)
            RETURN count(r) AS count
            "#
            .to_string(),
        )
        .param("source_id", relationship.subject_entity_id.clone())
        .param("target_id", relationship.object_entity_id.clone())
        .param("relation_type", relationship.predicate.as_str())
        .param("confidence", relationship.confidence as f64)
        .param("provenance", provenance);

        let mut result = self.graph.execute(query).await.map_err(unavailable)?;
        let written = match result.next().await.map_err(unavailable)? {
            Some(row) => row.get::<i64>("count").map_err(protocol)?,
            None => 0,
        };

        if written == 0 {
            return Err(StoreError::Protocol(format!(
                "endpoint missing for {} {} {}",
                relationship.subject_entity_id, relationship.predicate, relationship.object_entity_id
            )));
        }
        Ok(())
    }

    async fn entity_exists(&self, entity_id: &str) -> Result<bool, StoreError> {
        let query = Query::new("MATCH (e:Entity {id: $id}) RETURN count(e) AS count".to_string())
            .param("id", entity_id.to_string());

        let mut result = self.graph.execute(query).await.map_err(unavailable)?;
        match result.next().await.map_err(unavailable)? {
            Some(row) => Ok(row.get::<i64>("count").map_err(protocol)? > 0),
            None => Ok(false),
        }
    }

    async fn query_subgraph(
        &self,
        seed_ids: &[String],
        max_hops: usize,
    ) -> Result<GraphFact, StoreError> {
        if seed_ids.is_empty() {
            return Ok(GraphFact::default());
        }

        let distance = self.expand(seed_ids, max_hops).await?;
        let ids: Vec<String> = distance.keys().cloned().collect();

        let nodes = self.entity_nodes(ids.clone()).await?;
        let present: HashSet<&str> = nodes.iter().map(|n| n.entity_id.as_str()).collect();
        let seeds = seed_ids
            .iter()
            .filter(|id| present.contains(id.as_str()))
            .cloned()
            .collect();

        let relationships = self
            .relationships_among(ids)
            .await?
            .into_iter()
            .filter_map(|rel| {
                let s = distance.get(&rel.subject_entity_id)?;
                let o = distance.get(&rel.object_entity_id)?;
                let hops = (*s).min(*o);
                Some((rel, hops))
            })
            .collect();

        let entities = nodes
            .into_iter()
            .filter_map(|node| {
                let hops = *distance.get(&node.entity_id)?;
                Some((node, hops))
            })
            .collect();

        let mut fact = GraphFact {
            seeds,
            entities,
            relationships,
        };
        fact.sort();

        debug!(
            seeds = fact.seeds.len(),
            entities = fact.entities.len(),
            relationships = fact.relationships.len(),
            max_hops,
            "Expanded subgraph"
        );
        Ok(fact)
    }

    async fn stats(&self) -> Result<GraphStats, StoreError> {
        Ok(GraphStats {
            entity_count: self.count("MATCH (e:Entity) RETURN count(e) AS count").await?,
            relationship_count: self
                .count("MATCH ()-[r:RELATION]->() RETURN count(r) AS count")
                .await?,
        })
    }
}
