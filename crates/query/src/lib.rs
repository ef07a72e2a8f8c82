pub mod answer;
pub mod fusion;
pub mod hybrid_search;
pub mod retrieval;
pub mod router;

pub use answer::{AnswerSynthesizer, build_answer_prompt, build_context};
pub use fusion::{
    ContextItem, DefaultScoring, Degradation, DegradationReason, FusedContext, FusionConfig,
    FusionError, FusionRanker, ScoringStrategy, SourceKind,
};
pub use hybrid_search::{ChatResponse, HybridSearchEngine, QueryConfig, QueryError};
pub use retrieval::{GraphRetriever, RetrievalError, VectorRetriever};
pub use router::{QueryRouter, RouteState, RouterConfig, RoutingDecision};
