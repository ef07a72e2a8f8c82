use extract::{EntityExtractor, EntityMention, Predicate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    Unclassified,
    Structured,
    Unstructured,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub min_signal: f32,
    /// Word or phrase -> predicates it asks about
    pub predicate_keywords: BTreeMap<String, Vec<Predicate>>,
    pub factual_markers: Vec<String>,
    pub narrative_markers: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        use Predicate::*;

        let parent = vec![SonOf, DaughterOf, FatherOf, MotherOf];
        let keywords: Vec<(&str, Vec<Predicate>)> = vec![
            ("ayah", vec![SonOf, FatherOf]),
            ("bapak", vec![SonOf, FatherOf]),
            ("father", vec![SonOf, FatherOf]),
            ("ibu", vec![MotherOf, SonOf, DaughterOf]),
            ("mother", vec![MotherOf, SonOf, DaughterOf]),
            ("anak", parent.clone()),
            ("putra", parent.clone()),
            ("putri", parent.clone()),
            ("son", parent.clone()),
            ("daughter", parent.clone()),
            ("child", parent),
            ("saudara", vec![SiblingOf]),
            ("kakak", vec![SiblingOf]),
            ("adik", vec![SiblingOf]),
            ("sibling", vec![SiblingOf]),
            ("brother", vec![SiblingOf]),
            ("sister", vec![SiblingOf]),
            ("istri", vec![MarriedTo]),
            ("suami", vec![MarriedTo]),
            ("menikah", vec![MarriedTo]),
            ("wife", vec![MarriedTo]),
            ("husband", vec![MarriedTo]),
            ("married", vec![MarriedTo]),
            ("dibunuh", vec![KilledBy]),
            ("membunuh", vec![KilledBy]),
            ("tewas", vec![KilledBy]),
            ("killed", vec![KilledBy]),
            ("sekutu", vec![AllyOf]),
            ("ally", vec![AllyOf]),
            ("musuh", vec![EnemyOf]),
            ("enemy", vec![EnemyOf]),
            ("raja", vec![KingOf]),
            ("king", vec![KingOf]),
            ("pemimpin", vec![LeaderOf]),
            ("leader", vec![LeaderOf]),
            ("tinggal", vec![LocatedIn]),
            ("lives", vec![LocatedIn]),
            ("senjata", vec![UsesWeapon]),
            ("pusaka", vec![UsesWeapon]),
            ("weapon", vec![UsesWeapon]),
            ("guru", vec![MentorOf, StudentOf]),
            ("mentor", vec![MentorOf, StudentOf]),
            ("teacher", vec![MentorOf, StudentOf]),
            ("murid", vec![StudentOf, MentorOf]),
            ("student", vec![StudentOf, MentorOf]),
        ];

        let factual = [
            "siapa", "who", "dimana", "di mana", "where", "which", "mana", "kapan", "when",
        ];
        let narrative = [
            "how", "why", "what happened", "bagaimana", "mengapa", "kenapa", "apa yang terjadi",
            "ceritakan", "jelaskan", "describe", "tell me",
        ];

        Self {
            min_signal: 1.0,
            predicate_keywords: keywords
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            factual_markers: factual.iter().map(|s| s.to_string()).collect(),
            narrative_markers: narrative.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Why a question went where it went.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub state: RouteState,
    pub entities: Vec<EntityMention>,
    pub predicate_hints: Vec<Predicate>,
    pub structured_signal: f32,
    pub narrative_signal: f32,
}

pub struct QueryRouter {
    extractor: EntityExtractor,
    config: RouterConfig,
}

impl QueryRouter {
    pub fn new(extractor: EntityExtractor, config: RouterConfig) -> Self {
        Self { extractor, config }
    }

    pub async fn classify(&self, question: &str) -> RoutingDecision {
        let entities = match self.extractor.extract("query", question).await {
            Ok(entities) => entities,
            Err(e) => {
                warn!("Entity extraction failed for question, routing without entities: {}", e);
                Vec::new()
            }
        };

        let tokens = tokenize(question);
        let mut predicate_hints = BTreeSet::new();
        for (keyword, predicates) in &self.config.predicate_keywords {
            if contains_phrase(&tokens, keyword) {
                predicate_hints.extend(predicates.iter().copied());
            }
        }

        let factual = self
            .config
            .factual_markers
            .iter()
            .any(|m| contains_phrase(&tokens, m));
        let narrative = self
            .config
            .narrative_markers
            .iter()
            .any(|m| contains_phrase(&tokens, m));

        let mut structured_signal = 0.0;
        if !predicate_hints.is_empty() {
            structured_signal += 1.0;
        }
        if factual {
            structured_signal += if entities.is_empty() { 0.5 } else { 1.0 };
        }
        let narrative_signal = if narrative { 1.0 } else { 0.0 };

        let threshold = self.config.min_signal;
        let state = match (structured_signal >= threshold, narrative_signal >= threshold) {
            (true, false) => RouteState::Structured,
            (false, true) => RouteState::Unstructured,
            _ => RouteState::Hybrid,
        };

        debug!(
            route = ?state,
            structured_signal,
            narrative_signal,
            entities = entities.len(),
            "Classified question"
        );

        RoutingDecision {
            state,
            entities,
            predicate_hints: predicate_hints.into_iter().collect(),
            structured_signal,
            narrative_signal,
        }
    }
}

/// Lower-cased words with punctuation removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whole-word (or whole-phrase) match.
fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let words = tokenize(phrase);
    if words.is_empty() || words.len() > tokens.len() {
        return false;
    }
    tokens.windows(words.len()).any(|window| window == words.as_slice())
}
