pub mod alias;
pub mod error;
pub mod llm;
pub mod ner;
pub mod normalizer;
pub mod prompt;
pub mod relations;
pub mod resolver;
pub mod schema;

pub use alias::AliasTable;
pub use error::{ExtractionError, RelationExtractionError};
pub use llm::{LanguageModel, LlmConfig, OllamaClient};
pub use ner::{EntityExtractor, EntitySummary, HttpNerClient, NerConfig, NerModel, NerSpan, summarize_mentions};
pub use normalizer::{EntityNormalizer, NormalizerConfig};
pub use relations::{RelationBatch, RelationConfig, RelationExtractor, RelationWindow, WindowEntity, build_windows};
pub use resolver::{EntityResolver, MentionAssignment, Resolution};
pub use schema::{
    CanonicalEntity, CharSpan, EntityMention, EntityType, Predicate, Provenance, Relationship,
    generate_entity_id, report_label,
};
