use index::{GraphFact, PassageMatch};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::answer::AnswerSynthesizer;
use crate::fusion::{Degradation, DegradationReason, FusedContext, FusionError, FusionRanker, SourceKind};
use crate::retrieval::{GraphRetriever, RetrievalError, VectorRetriever};
use crate::router::{QueryRouter, RouteState, RoutingDecision};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub top_k: usize,
    pub max_hops: usize,
    pub min_similarity: f32,
    pub graph_timeout_ms: u64,
    pub vector_timeout_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_hops: 2,
            min_similarity: 0.30,
            graph_timeout_ms: 5000,
            vector_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no evidence found for the question")]
    NoEvidenceFound,

    #[error("all retrieval paths failed (graph {graph}; vector {vector})")]
    AllPathsFailed {
        graph: DegradationReason,
        vector: DegradationReason,
    },

    #[error("answer synthesis failed: {0}")]
    Answer(String),
}

impl From<FusionError> for QueryError {
    fn from(err: FusionError) -> Self {
        match err {
            FusionError::NoEvidenceFound => QueryError::NoEvidenceFound,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub context: FusedContext,
    pub route: RoutingDecision,
}

/// Routes a question, runs the graph and/or vector path under deadlines,
/// fuses what came back and hands it to the answer synthesizer.
pub struct HybridSearchEngine {
    router: QueryRouter,
    graph: GraphRetriever,
    vector: VectorRetriever,
    fusion: FusionRanker,
    answer: AnswerSynthesizer,
    graph_timeout: Duration,
    vector_timeout: Duration,
}

impl HybridSearchEngine {
    pub fn new(
        router: QueryRouter,
        graph: GraphRetriever,
        vector: VectorRetriever,
        fusion: FusionRanker,
        answer: AnswerSynthesizer,
        config: &QueryConfig,
    ) -> Self {
        Self {
            router,
            graph,
            vector,
            fusion,
            answer,
            graph_timeout: Duration::from_millis(config.graph_timeout_ms),
            vector_timeout: Duration::from_millis(config.vector_timeout_ms),
        }
    }

    pub async fn retrieve(
        &self,
        question: &str,
    ) -> Result<(RoutingDecision, FusedContext), QueryError> {
        let start = Instant::now();
        let decision = self.router.classify(question).await;

        let (graph, vector) = match decision.state {
            RouteState::Structured => {
                let graph = self.graph_path(&decision, question).await;
                let vector = match graph {
                    Ok(_) => None,
                    Err(_) => Some(self.vector_path(question).await),
                };
                (Some(graph), vector)
            }
            RouteState::Unstructured => {
                let vector = self.vector_path(question).await;
                let graph = match vector {
                    Ok(_) => None,
                    Err(_) => Some(self.graph_path(&decision, question).await),
                };
                (graph, Some(vector))
            }
            RouteState::Hybrid | RouteState::Unclassified => {
                let (graph, vector) = tokio::join!(
                    self.graph_path(&decision, question),
                    self.vector_path(question)
                );
                (Some(graph), Some(vector))
            }
        };

        let (fact, passages, degraded) = match (graph, vector) {
            (Some(Err(graph)), Some(Err(vector))) => {
                warn!(%graph, %vector, "Both retrieval paths failed");
                return Err(QueryError::AllPathsFailed { graph, vector });
            }
            (Some(Err(reason)), vector) => (
                GraphFact::default(),
                vector.and_then(Result::ok).unwrap_or_default(),
                Some(Degradation {
                    path: SourceKind::Graph,
                    reason,
                }),
            ),
            (graph, Some(Err(reason))) => (
                graph.and_then(Result::ok).unwrap_or_default(),
                Vec::new(),
                Some(Degradation {
                    path: SourceKind::Vector,
                    reason,
                }),
            ),
            (graph, vector) => (
                graph.and_then(Result::ok).unwrap_or_default(),
                vector.and_then(Result::ok).unwrap_or_default(),
                None,
            ),
        };

        if let Some(degradation) = &degraded {
            warn!(
                path = ?degradation.path,
                reason = %degradation.reason,
                "Answering from a single retrieval path"
            );
        }

        let context = self.fusion.fuse(&fact, &passages, degraded)?;
        info!(
            route = ?decision.state,
            items = context.items.len(),
            degraded = context.degraded.is_some(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Retrieved context"
        );
        Ok((decision, context))
    }

    pub async fn ask(&self, question: &str) -> Result<ChatResponse, QueryError> {
        let (route, context) = self.retrieve(question).await?;
        let answer = self
            .answer
            .synthesize(question, &context)
            .await
            .map_err(|e| QueryError::Answer(format!("{:#}", e)))?;

        Ok(ChatResponse {
            answer,
            context,
            route,
        })
    }

    async fn graph_path(
        &self,
        decision: &RoutingDecision,
        question: &str,
    ) -> Result<GraphFact, DegradationReason> {
        with_deadline(self.graph_timeout, self.graph.retrieve(decision, question)).await
    }

    async fn vector_path(&self, question: &str) -> Result<Vec<PassageMatch>, DegradationReason> {
        with_deadline(self.vector_timeout, self.vector.retrieve(question)).await
    }
}

/// Dropping the inner future on timeout cancels its store call.
async fn with_deadline<T, F>(limit: Duration, path: F) -> Result<T, DegradationReason>
where
    F: Future<Output = Result<T, RetrievalError>>,
{
    match tokio::time::timeout(limit, path).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DegradationReason::Failed(e.to_string())),
        Err(_) => Err(DegradationReason::TimedOut),
    }
}
