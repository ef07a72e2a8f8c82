use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Half-open `[start, end)` range counted in chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, other: &CharSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn fits(&self, text_len: usize) -> bool {
        self.start < self.end && self.end <= text_len
    }
}

impl fmt::Display for CharSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Person,
    Location,
    Weapon,
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "Person",
            EntityType::Location => "Location",
            EntityType::Weapon => "Weapon",
            EntityType::Other => "Other",
        }
    }

    /// Map an NER label (`PER`, `B-LOC`, `Location`, ...) onto the coarse types.
    pub fn from_ner_label(label: &str) -> Self {
        let label = label.trim().to_uppercase();
        let label = label
            .strip_prefix("B-")
            .or_else(|| label.strip_prefix("I-"))
            .unwrap_or(&label);

        match label {
            "PER" | "PERSON" => EntityType::Person,
            "LOC" | "GPE" | "LOCATION" => EntityType::Location,
            "WEAPON" | "WPN" | "WEA" => EntityType::Weapon,
            _ => EntityType::Other,
        }
    }
}

/// Reporting label for a raw NER tag: `PER`, `ORG` and `LOC` map to
/// `Person`, `Organization` and `Location`; every other tag has none.
pub fn report_label(label: &str) -> Option<&'static str> {
    let label = label.trim().to_uppercase();
    let label = label
        .strip_prefix("B-")
        .or_else(|| label.strip_prefix("I-"))
        .unwrap_or(&label);

    match label {
        "PER" | "PERSON" => Some("Person"),
        "ORG" | "ORGANIZATION" => Some("Organization"),
        "LOC" | "LOCATION" => Some("Location"),
        _ => None,
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    pub source_document_id: String,
    pub char_span: CharSpan,
    pub surface_text: String,
    pub predicted_type: EntityType,
    /// Tag as emitted by the NER model, before mapping to `predicted_type`
    #[serde(default)]
    pub ner_label: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub entity_id: String,
    pub display_name: String,
    pub entity_type: EntityType,
    pub aliases: BTreeSet<String>,
    pub source_mentions: Vec<EntityMention>,
}

impl CanonicalEntity {
    pub fn new(entity_id: String, display_name: String, entity_type: EntityType) -> Self {
        let mut aliases = BTreeSet::new();
        aliases.insert(display_name.clone());

        Self {
            entity_id,
            display_name,
            entity_type,
            aliases,
            source_mentions: Vec::new(),
        }
    }

    pub fn absorb_mention(&mut self, mention: EntityMention) {
        self.offer_display_name(&mention.surface_text);
        self.aliases.insert(mention.surface_text.clone());
        self.source_mentions.push(mention);
    }

    /// Union aliases and mentions of another record of the same entity.
    pub fn merge(&mut self, other: CanonicalEntity) {
        debug_assert_eq!(self.entity_id, other.entity_id);
        self.offer_display_name(&other.display_name);
        self.aliases.extend(other.aliases);
        for mention in other.source_mentions {
            if !self.source_mentions.contains(&mention) {
                self.source_mentions.push(mention);
            }
        }
    }

    /// Longest surface form wins, ties go to the lexicographically smaller one.
    fn offer_display_name(&mut self, candidate: &str) {
        if preferred_display_name(&self.display_name, candidate) == candidate {
            self.display_name = candidate.to_string();
        }
    }
}

/// Pick the display name between two surface forms, independent of argument order.
pub fn preferred_display_name<'a>(current: &'a str, candidate: &'a str) -> &'a str {
    let (cur_len, cand_len) = (current.chars().count(), candidate.chars().count());
    if cand_len > cur_len || (cand_len == cur_len && candidate < current) {
        candidate
    } else {
        current
    }
}

/// Stable entity id: a pure function of the normalized name and type.
pub fn generate_entity_id(normalized_name: &str, entity_type: EntityType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(normalized_name.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Closed set of relationship types the graph accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Predicate {
    FatherOf,
    MotherOf,
    SonOf,
    DaughterOf,
    SiblingOf,
    MarriedTo,
    KilledBy,
    AllyOf,
    EnemyOf,
    KingOf,
    LeaderOf,
    LocatedIn,
    UsesWeapon,
    MentorOf,
    StudentOf,
    AliasOf,
}

impl Predicate {
    pub const ALL: [Predicate; 16] = [
        Predicate::FatherOf,
        Predicate::MotherOf,
        Predicate::SonOf,
        Predicate::DaughterOf,
        Predicate::SiblingOf,
        Predicate::MarriedTo,
        Predicate::KilledBy,
        Predicate::AllyOf,
        Predicate::EnemyOf,
        Predicate::KingOf,
        Predicate::LeaderOf,
        Predicate::LocatedIn,
        Predicate::UsesWeapon,
        Predicate::MentorOf,
        Predicate::StudentOf,
        Predicate::AliasOf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Predicate::FatherOf => "FATHER_OF",
            Predicate::MotherOf => "MOTHER_OF",
            Predicate::SonOf => "SON_OF",
            Predicate::DaughterOf => "DAUGHTER_OF",
            Predicate::SiblingOf => "SIBLING_OF",
            Predicate::MarriedTo => "MARRIED_TO",
            Predicate::KilledBy => "KILLED_BY",
            Predicate::AllyOf => "ALLY_OF",
            Predicate::EnemyOf => "ENEMY_OF",
            Predicate::KingOf => "KING_OF",
            Predicate::LeaderOf => "LEADER_OF",
            Predicate::LocatedIn => "LOCATED_IN",
            Predicate::UsesWeapon => "USES_WEAPON",
            Predicate::MentorOf => "MENTOR_OF",
            Predicate::StudentOf => "STUDENT_OF",
            Predicate::AliasOf => "ALIAS_OF",
        }
    }

    /// `ALIAS_OF` feeds the alias table and is never stored as an edge.
    pub fn is_edge(&self) -> bool {
        *self != Predicate::AliasOf
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Predicate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_uppercase().replace([' ', '-'], "_");
        // Misspelling seen in model output and older graphs
        let key = if key == "SIBILING_OF" { "SIBLING_OF".to_string() } else { key };

        Predicate::ALL
            .iter()
            .find(|p| p.as_str() == key)
            .copied()
            .ok_or_else(|| s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Provenance {
    pub source_document_id: String,
    pub char_span: CharSpan,
}

impl Provenance {
    pub fn new(source_document_id: impl Into<String>, char_span: CharSpan) -> Self {
        Self {
            source_document_id: source_document_id.into(),
            char_span,
        }
    }

    /// Compact form used as a graph property: `<doc>@<start>..<end>`
    pub fn encode(&self) -> String {
        format!("{}@{}", self.source_document_id, self.char_span)
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        let (doc, range) = encoded.rsplit_once('@')?;
        let (start, end) = range.split_once("..")?;
        Some(Self::new(
            doc,
            CharSpan::new(start.parse().ok()?, end.parse().ok()?),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub subject_entity_id: String,
    pub predicate: Predicate,
    pub object_entity_id: String,
    pub confidence: f32,
    pub provenance: Vec<Provenance>,
}

impl Relationship {
    pub fn key(&self) -> (String, Predicate, String) {
        (
            self.subject_entity_id.clone(),
            self.predicate,
            self.object_entity_id.clone(),
        )
    }

    /// Fold a re-observation of the same edge: max confidence, provenance appended once.
    pub fn merge(&mut self, other: &Relationship) {
        debug_assert_eq!(self.key(), other.key());
        self.confidence = self.confidence.max(other.confidence);
        for prov in &other.provenance {
            if !self.provenance.contains(prov) {
                self.provenance.push(prov.clone());
            }
        }
    }
}
