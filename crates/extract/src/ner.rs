use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::schema::{CharSpan, EntityMention, EntityType, report_label};

/// Raw span as reported by a token-classification model. Offsets are chars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NerSpan {
    pub start: usize,
    pub end: usize,
    pub label: String,
    pub score: f32,
}

#[async_trait]
pub trait NerModel: Send + Sync {
    /// Must return `Ok(vec![])` for empty text.
    async fn recognize(&self, text: &str) -> Result<Vec<NerSpan>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NerConfig {
    pub url: String,
    pub api_token: Option<String>,
    pub min_score: f32,
    pub min_chars: usize,
    /// Function words the model likes to tag as names
    pub blocklist: Vec<String>,
}

impl Default for NerConfig {
    fn default() -> Self {
        let blocklist = [
            "Sang", "Para", "Yang", "Dan", "Di", "Ke", "Dari", "Saat", "Ketika", "Maka", "Lalu",
            "Akan", "Telah", "Sudah", "Ia", "Dia", "Mereka", "Hal",
        ];

        Self {
            url: "http://localhost:8000/ner".to_string(),
            api_token: None,
            min_score: 0.60,
            min_chars: 3,
            blocklist: blocklist.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Client for a Hugging Face style token-classification endpoint with
/// `aggregation_strategy=simple`.
#[derive(Clone)]
pub struct HttpNerClient {
    url: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct NerRequest<'a> {
    inputs: &'a str,
}

#[derive(Deserialize)]
struct NerEntity {
    #[serde(alias = "entity")]
    entity_group: String,
    score: f32,
    start: Option<usize>,
    end: Option<usize>,
}

impl HttpNerClient {
    pub fn new(url: String, api_token: Option<String>) -> Self {
        Self {
            url,
            api_token,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &NerConfig) -> Self {
        Self::new(config.url.clone(), config.api_token.clone())
    }
}

#[async_trait]
impl NerModel for HttpNerClient {
    async fn recognize(&self, text: &str) -> Result<Vec<NerSpan>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.url).json(&NerRequest { inputs: text });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("Failed to send request to NER service")?;

        if !response.status().is_success() {
            anyhow::bail!("NER request failed: {}", response.status());
        }

        let entities: Vec<NerEntity> = response
            .json()
            .await
            .context("Failed to parse NER response")?;

        Ok(entities
            .into_iter()
            .filter_map(|e| {
                Some(NerSpan {
                    start: e.start?,
                    end: e.end?,
                    label: e.entity_group,
                    score: e.score,
                })
            })
            .collect())
    }
}

const STRIP_CHARS: &[char] = &[' ', '.', ',', ':', ';', '!', '?', '"', '\'', '(', ')', '#'];

/// Turns raw NER spans into clean, non-overlapping mentions.
#[derive(Clone)]
pub struct EntityExtractor {
    model: Arc<dyn NerModel>,
    config: NerConfig,
}

impl EntityExtractor {
    pub fn new(model: Arc<dyn NerModel>, config: NerConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &NerConfig {
        &self.config
    }

    /// Mentions sorted by span start. A model failure fails this document only.
    pub async fn extract(
        &self,
        document_id: &str,
        text: &str,
    ) -> Result<Vec<EntityMention>, ExtractionError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let spans = self
            .model
            .recognize(text)
            .await
            .map_err(|e| ExtractionError::Model {
                document_id: document_id.to_string(),
                message: format!("{:#}", e),
            })?;

        let chars: Vec<char> = text.chars().collect();
        let mut mentions = Vec::with_capacity(spans.len());

        for span in spans {
            let char_span = CharSpan::new(span.start, span.end);
            if !char_span.fits(chars.len()) {
                let err = ExtractionError::MalformedSpan {
                    start: span.start,
                    end: span.end,
                    text_len: chars.len(),
                };
                warn!(document_id, "{}", err);
                continue;
            }

            if span.score < self.config.min_score {
                continue;
            }

            match self.clean_span(&chars, char_span) {
                Some((char_span, surface_text)) => mentions.push(EntityMention {
                    source_document_id: document_id.to_string(),
                    char_span,
                    surface_text,
                    predicted_type: EntityType::from_ner_label(&span.label),
                    ner_label: span.label.clone(),
                    score: span.score,
                }),
                None => debug!(document_id, span = %char_span, "Dropped junk span"),
            }
        }

        Ok(resolve_overlaps(mentions))
    }

    /// Repair a cut-off name, trim punctuation and reject junk.
    fn clean_span(&self, chars: &[char], span: CharSpan) -> Option<(CharSpan, String)> {
        let mut end = span.end;
        while end < chars.len() && chars[end].is_alphanumeric() {
            end += 1;
        }

        let mut start = span.start;
        while start < end && STRIP_CHARS.contains(&chars[start]) {
            start += 1;
        }
        while end > start && STRIP_CHARS.contains(&chars[end - 1]) {
            end -= 1;
        }

        if end - start < self.config.min_chars {
            return None;
        }

        let surface: String = chars[start..end].iter().collect();
        if self.config.blocklist.iter().any(|b| *b == surface) {
            return None;
        }

        Some((CharSpan::new(start, end), surface))
    }
}

/// Keep the earliest, then longest span; drop anything overlapping a kept one.
pub fn resolve_overlaps(mut mentions: Vec<EntityMention>) -> Vec<EntityMention> {
    mentions.sort_by(|a, b| {
        a.char_span
            .start
            .cmp(&b.char_span.start)
            .then(b.char_span.len().cmp(&a.char_span.len()))
    });

    let mut kept: Vec<EntityMention> = Vec::with_capacity(mentions.len());
    for mention in mentions {
        let free = kept
            .last()
            .is_none_or(|last| mention.char_span.start >= last.char_span.end);
        if free {
            kept.push(mention);
        }
    }
    kept
}

/// One row of the NER report: a unique name across the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub name: String,
    pub label: String,
    pub confidence: f32,
    pub stories: Vec<String>,
}

/// Aggregate `(story title, mention)` pairs by surface text. Mentions whose
/// NER tag has no reporting label (see [`report_label`]) are left out. The
/// first label seen for a name is kept; confidence is the best score.
pub fn summarize_mentions<'a>(
    mentions: impl IntoIterator<Item = (&'a str, &'a EntityMention)>,
) -> Vec<EntitySummary> {
    let mut by_name: BTreeMap<&str, (&'static str, f32, BTreeSet<&str>)> = BTreeMap::new();

    for (story, mention) in mentions {
        let Some(label) = report_label(&mention.ner_label) else {
            continue;
        };
        let row = by_name
            .entry(mention.surface_text.as_str())
            .or_insert((label, mention.score, BTreeSet::new()));
        row.1 = row.1.max(mention.score);
        row.2.insert(story);
    }

    by_name
        .into_iter()
        .map(|(name, (label, score, stories))| EntitySummary {
            name: name.to_string(),
            label: label.to_string(),
            confidence: score,
            stories: stories.into_iter().map(str::to_string).collect(),
        })
        .collect()
}
