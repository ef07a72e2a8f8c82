use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::normalizer::EntityNormalizer;
use crate::schema::{EntityType, generate_entity_id};

/// Versioned mapping `normalized name -> {type -> entity_id}`.
///
/// Owned by the caller and handed to the resolver by reference. Keying by type
/// keeps a Person and a Location that share a name apart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AliasTable {
    version: u64,
    entries: BTreeMap<String, BTreeMap<EntityType, String>>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of (name, type) entries
    pub fn len(&self) -> usize {
        self.entries.values().map(|by_type| by_type.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, normalized: &str, entity_type: EntityType) -> Option<&str> {
        self.entries
            .get(normalized)
            .and_then(|by_type| by_type.get(&entity_type))
            .map(String::as_str)
    }

    /// Every entity the name points at, whatever its type
    pub fn candidates(&self, normalized: &str) -> Vec<(EntityType, &str)> {
        self.entries
            .get(normalized)
            .map(|by_type| {
                by_type
                    .iter()
                    .map(|(ty, id)| (*ty, id.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Point a name at an entity. Bumps the version only when something changed;
    /// returns the id it previously pointed at, if any.
    pub fn insert(
        &mut self,
        normalized: String,
        entity_type: EntityType,
        entity_id: String,
    ) -> Option<String> {
        let by_type = self.entries.entry(normalized).or_default();
        if by_type.get(&entity_type) == Some(&entity_id) {
            return Some(entity_id);
        }

        self.version += 1;
        by_type.insert(entity_type, entity_id)
    }

    /// Seed domain knowledge: `alias` and `canonical` both resolve to the
    /// canonical name's entity id.
    pub fn seed(
        &mut self,
        normalizer: &EntityNormalizer,
        alias: &str,
        canonical: &str,
        entity_type: EntityType,
    ) -> String {
        let canonical_norm = normalizer.normalize(canonical);
        let entity_id = generate_entity_id(&canonical_norm, entity_type);

        self.insert(canonical_norm, entity_type, entity_id.clone());
        let alias_norm = normalizer.normalize(alias);
        if !alias_norm.is_empty() {
            self.insert(alias_norm, entity_type, entity_id.clone());
        }

        entity_id
    }

    /// Runtime extension, e.g. when relation extraction reports `X ALIAS_OF Y`.
    /// Returns true if the table changed.
    pub fn register_alias(
        &mut self,
        normalizer: &EntityNormalizer,
        alias_surface: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> bool {
        let normalized = normalizer.normalize(alias_surface);
        if normalized.is_empty() {
            return false;
        }

        let before = self.version;
        let previous = self.insert(normalized.clone(), entity_type, entity_id.to_string());
        if let Some(previous) = previous.filter(|p| p != entity_id) {
            warn!(
                alias = %normalized,
                %entity_type,
                previous = %previous,
                current = %entity_id,
                "Alias re-pointed to a different entity"
            );
        }
        self.version != before
    }

    /// Private copy for a parallel worker; fold it back with [`merge_drafts`].
    ///
    /// [`merge_drafts`]: AliasTable::merge_drafts
    pub fn draft(&self) -> AliasTable {
        self.clone()
    }

    /// Apply each draft's changes relative to this table, in order. When two
    /// drafts point the same alias at different entities the later draft wins
    /// and the conflict is logged. Returns the number of conflicts.
    pub fn merge_drafts(&mut self, drafts: impl IntoIterator<Item = AliasTable>) -> usize {
        let base = self.clone();
        let mut conflicts = 0;

        for (draft_idx, draft) in drafts.into_iter().enumerate() {
            for (name, by_type) in draft.entries {
                for (entity_type, entity_id) in by_type {
                    let base_id = base.lookup(&name, entity_type);
                    if base_id == Some(entity_id.as_str()) {
                        continue; // unchanged by this draft
                    }

                    let current = self.lookup(&name, entity_type).map(str::to_string);
                    if let Some(current) = current.filter(|c| Some(c.as_str()) != base_id && *c != entity_id) {
                        conflicts += 1;
                        warn!(
                            alias = %name,
                            %entity_type,
                            overwritten = %current,
                            winner = %entity_id,
                            draft = draft_idx,
                            "Alias conflict between drafts, last writer wins"
                        );
                    }

                    self.insert(name.clone(), entity_type, entity_id);
                }
            }
        }

        debug!(version = self.version, conflicts, "Merged alias drafts");
        conflicts
    }

    /// Load a persisted table; a missing file yields an empty table.
    pub async fn load(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            info!("No alias table at {:?}, starting empty", path);
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)
            .await
            .context(format!("Failed to read alias table: {:?}", path))?;
        serde_json::from_str(&content).context("Failed to parse alias table")
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .await
            .context(format!("Failed to write alias table: {:?}", path))
    }
}
