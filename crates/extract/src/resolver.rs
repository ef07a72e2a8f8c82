use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::alias::AliasTable;
use crate::normalizer::EntityNormalizer;
use crate::schema::{CanonicalEntity, EntityMention, EntityType, generate_entity_id};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionAssignment {
    pub mention: EntityMention,
    pub entity_id: String,
}

/// Canonical entities plus where every mention went.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub entities: Vec<CanonicalEntity>,
    pub assignments: Vec<MentionAssignment>,
}

impl Resolution {
    pub fn entity(&self, entity_id: &str) -> Option<&CanonicalEntity> {
        self.entities
            .binary_search_by(|e| e.entity_id.as_str().cmp(entity_id))
            .ok()
            .map(|idx| &self.entities[idx])
    }

    /// Fold another document's resolution into this one.
    pub fn merge(&mut self, other: Resolution) {
        let mut by_id: BTreeMap<String, CanonicalEntity> = std::mem::take(&mut self.entities)
            .into_iter()
            .map(|e| (e.entity_id.clone(), e))
            .collect();

        for entity in other.entities {
            match by_id.get_mut(&entity.entity_id) {
                Some(existing) => existing.merge(entity),
                None => {
                    by_id.insert(entity.entity_id.clone(), entity);
                }
            }
        }

        self.entities = by_id.into_values().collect();
        self.assignments.extend(other.assignments);
    }

    /// Fold entity `from` into entity `to`: names and mentions move over and
    /// every assignment to `from` now points at `to`. No-op unless both exist.
    pub fn redirect(&mut self, from: &str, to: &str) {
        if from == to || self.entity(to).is_none() {
            return;
        }
        let Ok(idx) = self
            .entities
            .binary_search_by(|e| e.entity_id.as_str().cmp(from))
        else {
            return;
        };

        let mut absorbed = self.entities.remove(idx);
        absorbed.entity_id = to.to_string();
        if let Ok(target) = self
            .entities
            .binary_search_by(|e| e.entity_id.as_str().cmp(to))
        {
            self.entities[target].merge(absorbed);
        }

        for assignment in &mut self.assignments {
            if assignment.entity_id == from {
                assignment.entity_id = to.to_string();
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityResolver {
    normalizer: EntityNormalizer,
}

impl EntityResolver {
    pub fn new(normalizer: EntityNormalizer) -> Self {
        Self { normalizer }
    }

    pub fn normalizer(&self) -> &EntityNormalizer {
        &self.normalizer
    }

    /// Cluster mentions into canonical entities, growing `aliases` as new
    /// names appear.
    ///
    /// A mention joins an entity only through a same-type alias entry. A name
    /// already bound to a different type becomes a separate entity rather than
    /// risk a wrong merge. Mentions are sorted by (document, span, surface)
    /// first, so the result does not depend on input order.
    pub fn resolve(&self, mut mentions: Vec<EntityMention>, aliases: &mut AliasTable) -> Resolution {
        mentions.sort_by(|a, b| {
            (&a.source_document_id, a.char_span, &a.surface_text)
                .cmp(&(&b.source_document_id, b.char_span, &b.surface_text))
        });

        let mut entities: BTreeMap<String, CanonicalEntity> = BTreeMap::new();
        let mut assignments = Vec::with_capacity(mentions.len());

        for mention in mentions {
            let normalized = self.normalizer.normalize(&mention.surface_text);
            if normalized.is_empty() {
                warn!(
                    document_id = %mention.source_document_id,
                    surface = %mention.surface_text,
                    "Mention normalizes to nothing, skipping"
                );
                continue;
            }

            let entity_type = mention.predicted_type;
            let entity_id = match aliases.lookup(&normalized, entity_type) {
                Some(id) => id.to_string(),
                None => {
                    let other_types: Vec<EntityType> = aliases
                        .candidates(&normalized)
                        .into_iter()
                        .map(|(ty, _)| ty)
                        .collect();
                    if !other_types.is_empty() {
                        debug!(
                            name = %normalized,
                            %entity_type,
                            ?other_types,
                            "Name already bound to another type, keeping entities apart"
                        );
                    }

                    let id = generate_entity_id(&normalized, entity_type);
                    aliases.insert(normalized, entity_type, id.clone());
                    id
                }
            };

            entities
                .entry(entity_id.clone())
                .or_insert_with(|| {
                    CanonicalEntity::new(entity_id.clone(), mention.surface_text.clone(), entity_type)
                })
                .absorb_mention(mention.clone());

            assignments.push(MentionAssignment { mention, entity_id });
        }

        Resolution {
            entities: entities.into_values().collect(),
            assignments,
        }
    }

    /// Read-only lookup used at query time. `entity_type = None` accepts any type.
    pub fn lookup(
        &self,
        surface: &str,
        entity_type: Option<EntityType>,
        aliases: &AliasTable,
    ) -> Vec<String> {
        let normalized = self.normalizer.normalize(surface);
        match entity_type {
            Some(ty) => aliases
                .lookup(&normalized, ty)
                .map(|id| vec![id.to_string()])
                .unwrap_or_default(),
            None => aliases
                .candidates(&normalized)
                .into_iter()
                .map(|(_, id)| id.to_string())
                .collect(),
        }
    }
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new(EntityNormalizer::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CharSpan;

    fn mention(doc: &str, start: usize, surface: &str, ty: EntityType) -> EntityMention {
        EntityMention {
            source_document_id: doc.to_string(),
            char_span: CharSpan::new(start, start + surface.chars().count()),
            surface_text: surface.to_string(),
            predicted_type: ty,
            ner_label: String::new(),
            score: 0.9,
        }
    }

    #[test]
    fn test_alias_resolution() {
        let resolver = EntityResolver::default();
        let mut aliases = AliasTable::new();

        let resolution = resolver.resolve(
            vec![
                mention("d1", 0, "Resi Palasara", EntityType::Person),
                mention("d1", 40, "Palasara", EntityType::Person),
                mention("d1", 60, "Sakri", EntityType::Person),
            ],
            &mut aliases,
        );

        assert_eq!(resolution.entities.len(), 2);
        let palasara = &resolution.assignments[0].entity_id;
        assert_eq!(&resolution.assignments[1].entity_id, palasara);

        let entity = resolution.entity(palasara).unwrap();
        assert_eq!(entity.display_name, "Resi Palasara");
        assert_eq!(entity.source_mentions.len(), 2);
        assert!(entity.aliases.contains("Palasara"));
    }

    #[test]
    fn test_redirect_folds_entity() {
        let resolver = EntityResolver::default();
        let mut aliases = AliasTable::new();
        let mut resolution = resolver.resolve(
            vec![
                mention("d1", 0, "Sakri", EntityType::Person),
                mention("d1", 20, "Satrukem", EntityType::Person),
            ],
            &mut aliases,
        );
        let sakri = resolution.assignments[0].entity_id.clone();
        let satrukem = resolution.assignments[1].entity_id.clone();

        resolution.redirect(&satrukem, &sakri);

        assert_eq!(resolution.entities.len(), 1);
        assert!(resolution.entity(&satrukem).is_none());
        let entity = resolution.entity(&sakri).unwrap();
        assert!(entity.aliases.contains("Satrukem"));
        assert_eq!(entity.source_mentions.len(), 2);
        assert!(resolution.assignments.iter().all(|a| a.entity_id == sakri));
    }

    #[test]
    fn test_type_mismatch_keeps_entities_apart() {
        let resolver = EntityResolver::default();
        let mut aliases = AliasTable::new();

        let resolution = resolver.resolve(
            vec![
                mention("d1", 0, "Medang Kamulan", EntityType::Location),
                mention("d1", 30, "Medang Kamulan", EntityType::Other),
            ],
            &mut aliases,
        );

        assert_eq!(resolution.entities.len(), 2);
        assert_ne!(
            resolution.assignments[0].entity_id,
            resolution.assignments[1].entity_id
        );
    }

    #[test]
    fn test_seeded_alias_is_used() {
        let resolver = EntityResolver::default();
        let mut aliases = AliasTable::new();
        let id = aliases.seed(
            resolver.normalizer(),
            "Basukesti",
            "Prabu Basukesti",
            EntityType::Person,
        );

        let resolution = resolver.resolve(
            vec![mention("d1", 0, "Basukesti", EntityType::Person)],
            &mut aliases,
        );

        assert_eq!(resolution.assignments[0].entity_id, id);
    }

    #[test]
    fn test_permutation_does_not_change_ids() {
        let resolver = EntityResolver::default();
        let mentions = vec![
            mention("d1", 0, "Prabu Basukesti", EntityType::Person),
            mention("d1", 20, "Wirata", EntityType::Location),
            mention("d1", 40, "Basukesti", EntityType::Person),
            mention("d1", 60, "Patih Jayaloka", EntityType::Person),
        ];
        let mut reversed = mentions.clone();
        reversed.reverse();

        let mut aliases_a = AliasTable::new();
        let mut aliases_b = AliasTable::new();
        let a = resolver.resolve(mentions, &mut aliases_a);
        let b = resolver.resolve(reversed, &mut aliases_b);

        assert_eq!(a, b);
        assert_eq!(aliases_a, aliases_b);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let resolver = EntityResolver::default();
        let mentions = vec![
            mention("d1", 0, "Sakri", EntityType::Person),
            mention("d1", 20, "Resi Palasara", EntityType::Person),
        ];

        let mut aliases = AliasTable::new();
        let first = resolver.resolve(mentions.clone(), &mut aliases);
        let version = aliases.version();
        let second = resolver.resolve(mentions, &mut aliases);

        assert_eq!(first, second);
        assert_eq!(aliases.version(), version);
    }

    #[test]
    fn test_merge_across_documents() {
        let resolver = EntityResolver::default();
        let mut aliases = AliasTable::new();

        let mut total = resolver.resolve(
            vec![mention("d1", 0, "Sakri", EntityType::Person)],
            &mut aliases,
        );
        total.merge(resolver.resolve(
            vec![mention("d2", 5, "Bambang Sakri", EntityType::Person)],
            &mut aliases,
        ));

        assert_eq!(total.entities.len(), 1);
        assert_eq!(total.entities[0].display_name, "Bambang Sakri");
        assert_eq!(total.assignments.len(), 2);
        assert_eq!(
            resolver.lookup("sakri", None, &aliases),
            vec![total.entities[0].entity_id.clone()]
        );
    }
}
