use futures::stream::{self, StreamExt};
use ingest::{Chunker, ChunkerConfig, char_slice};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::RelationExtractionError;
use crate::llm::{LanguageModel, strip_code_fences};
use crate::normalizer::EntityNormalizer;
use crate::prompt::build_relation_prompt;
use crate::resolver::Resolution;
use crate::schema::{CharSpan, EntityType, Predicate, Provenance, Relationship};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationConfig {
    pub confidence_threshold: f32,
    pub max_concurrency: usize,
    pub window_chars: usize,
    pub window_stride: usize,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            max_concurrency: 3,
            window_chars: 1500,
            window_stride: 1200,
        }
    }
}

/// An entity as the model sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEntity {
    pub entity_id: String,
    pub display_name: String,
    pub entity_type: EntityType,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationWindow {
    pub document_id: String,
    pub span: CharSpan,
    pub text: String,
    pub entities: Vec<WindowEntity>,
}

/// Cut a document into windows and attach the entities mentioned in each.
/// Windows mentioning fewer than two distinct entities are left out.
pub fn build_windows(
    document_id: &str,
    text: &str,
    resolution: &Resolution,
    config: &RelationConfig,
) -> Vec<RelationWindow> {
    let chunker = Chunker::new(ChunkerConfig {
        chunk_size: config.window_chars,
        stride: config.window_stride,
    });

    let doc_assignments: Vec<_> = resolution
        .assignments
        .iter()
        .filter(|a| a.mention.source_document_id == document_id)
        .collect();

    chunker
        .windows(text)
        .into_iter()
        .filter_map(|(start, end)| {
            let span = CharSpan::new(start, end);

            let mut ids: Vec<&str> = doc_assignments
                .iter()
                .filter(|a| span.contains(&a.mention.char_span))
                .map(|a| a.entity_id.as_str())
                .collect();
            ids.sort_unstable();
            ids.dedup();
            if ids.len() < 2 {
                return None;
            }

            let entities = ids
                .into_iter()
                .filter_map(|id| resolution.entity(id))
                .map(|e| WindowEntity {
                    entity_id: e.entity_id.clone(),
                    display_name: e.display_name.clone(),
                    entity_type: e.entity_type,
                    aliases: e.aliases.iter().cloned().collect(),
                })
                .collect();

            Some(RelationWindow {
                document_id: document_id.to_string(),
                span,
                text: char_slice(text, start, end).to_string(),
                entities,
            })
        })
        .collect()
}

/// Outcome of a batch of windows, in window order.
#[derive(Debug, Clone, Default)]
pub struct RelationBatch {
    pub relationships: Vec<Relationship>,
    pub rejected_candidates: usize,
    pub failed_windows: usize,
}

pub struct RelationExtractor {
    llm: Arc<dyn LanguageModel>,
    normalizer: EntityNormalizer,
    config: RelationConfig,
}

impl RelationExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, config: RelationConfig) -> Self {
        Self {
            llm,
            normalizer: EntityNormalizer::default(),
            config,
        }
    }

    pub fn with_normalizer(mut self, normalizer: EntityNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &RelationConfig {
        &self.config
    }

    /// Candidate relationships for one window. Bad candidates are logged and
    /// dropped; only unusable model output fails the window.
    pub async fn extract(
        &self,
        window: &RelationWindow,
    ) -> Result<(Vec<Relationship>, usize), RelationExtractionError> {
        if window.entities.len() < 2 {
            return Ok((Vec::new(), 0));
        }

        let prompt = build_relation_prompt(&window.text, &window.entities);
        let raw = self
            .llm
            .generate_json(&prompt)
            .await
            .map_err(|e| RelationExtractionError::Model(format!("{:#}", e)))?;

        let candidates = parse_candidates(&raw)?;
        let mut relationships = Vec::with_capacity(candidates.len());
        let mut rejected = 0;

        for candidate in &candidates {
            match self.validate(candidate, window) {
                Ok(Some(rel)) => relationships.push(rel),
                Ok(None) => {}
                Err(e) => {
                    rejected += 1;
                    warn!(
                        document_id = %window.document_id,
                        window = %window.span,
                        "Discarding candidate: {}",
                        e
                    );
                }
            }
        }

        debug!(
            document_id = %window.document_id,
            window = %window.span,
            candidates = candidates.len(),
            accepted = relationships.len(),
            "Extracted relations"
        );

        Ok((relationships, rejected))
    }

    /// Run many windows through a bounded pool; results come back in input order.
    pub async fn extract_all(&self, windows: &[RelationWindow]) -> RelationBatch {
        let concurrency = self.config.max_concurrency.max(1);

        let mut results: Vec<_> = stream::iter(0..windows.len())
            .map(|idx| async move { (idx, self.extract(&windows[idx]).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        results.sort_by_key(|(idx, _)| *idx);

        let mut batch = RelationBatch::default();
        for (idx, result) in results {
            match result {
                Ok((relationships, rejected)) => {
                    batch.relationships.extend(relationships);
                    batch.rejected_candidates += rejected;
                }
                Err(e) => {
                    batch.failed_windows += 1;
                    warn!(
                        document_id = %windows[idx].document_id,
                        window = %windows[idx].span,
                        "Window failed: {}",
                        e
                    );
                }
            }
        }

        info!(
            windows = windows.len(),
            relationships = batch.relationships.len(),
            rejected = batch.rejected_candidates,
            failed = batch.failed_windows,
            "Relation extraction finished"
        );

        batch
    }

    /// `Ok(None)` means valid but below the confidence threshold.
    fn validate(
        &self,
        candidate: &Value,
        window: &RelationWindow,
    ) -> Result<Option<Relationship>, RelationExtractionError> {
        let field = |name: &str| {
            candidate
                .get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| RelationExtractionError::MalformedOutput(candidate.to_string()))
        };

        let predicate: Predicate = field("predicate")?
            .parse()
            .map_err(RelationExtractionError::UnknownPredicate)?;
        let subject = self.entity_ref(field("subject")?, window)?;
        let object = self.entity_ref(field("object")?, window)?;

        let confidence = match candidate.get("confidence") {
            None | Some(Value::Null) => 1.0,
            Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN) as f32,
            Some(Value::String(s)) => s.trim().parse::<f32>().unwrap_or(f32::NAN),
            Some(_) => f32::NAN,
        };
        if !confidence.is_finite() {
            return Err(RelationExtractionError::InvalidConfidence(confidence));
        }
        let confidence = confidence.clamp(0.0, 1.0);

        if confidence < self.config.confidence_threshold {
            debug!(%predicate, confidence, "Candidate below threshold");
            return Ok(None);
        }

        let evidence = candidate.get("evidence").and_then(Value::as_str);
        let span = evidence
            .and_then(|quote| locate_evidence(&window.text, quote))
            .map(|(start, end)| CharSpan::new(window.span.start + start, window.span.start + end))
            .unwrap_or(window.span);

        Ok(Some(Relationship {
            subject_entity_id: subject,
            predicate,
            object_entity_id: object,
            confidence,
            provenance: vec![Provenance::new(window.document_id.clone(), span)],
        }))
    }

    /// Map an id, display name or alias onto a window entity id.
    fn entity_ref(&self, name: &str, window: &RelationWindow) -> Result<String, RelationExtractionError> {
        if let Some(e) = window.entities.iter().find(|e| e.entity_id == name) {
            return Ok(e.entity_id.clone());
        }

        let wanted = self.normalizer.normalize(name);
        let mut matches: BTreeSet<&str> = BTreeSet::new();
        for entity in &window.entities {
            let hit = std::iter::once(&entity.display_name)
                .chain(entity.aliases.iter())
                .any(|alias| self.normalizer.normalize(alias) == wanted);
            if hit {
                matches.insert(entity.entity_id.as_str());
            }
        }

        // Ambiguous names (same name, different types) are refused
        match (matches.len(), matches.first()) {
            (1, Some(id)) => Ok(id.to_string()),
            _ => Err(RelationExtractionError::UnknownEntity(name.to_string())),
        }
    }
}

/// Accept `{"relations": [...]}` or a bare array.
fn parse_candidates(raw: &str) -> Result<Vec<Value>, RelationExtractionError> {
    let value: Value = serde_json::from_str(strip_code_fences(raw))
        .map_err(|e| RelationExtractionError::MalformedOutput(e.to_string()))?;

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("relations") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(RelationExtractionError::MalformedOutput(
                "expected a \"relations\" array".to_string(),
            )),
        },
        other => Err(RelationExtractionError::MalformedOutput(format!(
            "unexpected JSON: {}",
            other
        ))),
    }
}

/// Char offsets of `quote` inside `text`, compared case-insensitively.
fn locate_evidence(text: &str, quote: &str) -> Option<(usize, usize)> {
    let quote: Vec<char> = quote.trim().chars().collect();
    if quote.is_empty() {
        return None;
    }
    let text: Vec<char> = text.chars().collect();
    if quote.len() > text.len() {
        return None;
    }

    let same = |a: char, b: char| a == b || a.to_lowercase().eq(b.to_lowercase());
    (0..=text.len() - quote.len())
        .find(|&start| {
            text[start..start + quote.len()]
                .iter()
                .zip(&quote)
                .all(|(a, b)| same(*a, *b))
        })
        .map(|start| (start, start + quote.len()))
}
