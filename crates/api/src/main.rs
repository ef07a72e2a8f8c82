mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use extract::{
    AliasTable, EntityExtractor, EntityNormalizer, EntityResolver, HttpNerClient, LanguageModel,
    NerModel, OllamaClient, RelationExtractor,
};
use index::{
    BuildReport, CacheStats, CachedEmbedder, Embedder, EmbeddingClient, GraphStats, GraphStore,
    GraphWriter, InMemoryGraphStore, InMemoryVectorStore, Indexer, Neo4jGraphStore,
    PassageIndexer, QdrantVectorStore, RetryPolicy, VectorStore,
};
use ingest::ReadReport;
use query::{
    AnswerSynthesizer, ChatResponse, DefaultScoring, FusionRanker, GraphRetriever,
    HybridSearchEngine, QueryError, QueryRouter, VectorRetriever,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::{AppConfig, StoreBackend};
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

struct AppState {
    config: AppConfig,
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    query_cache: Option<Arc<CachedEmbedder>>,
    aliases: Arc<RwLock<AliasTable>>,
    indexer: Indexer,
    engine: HybridSearchEngine,
    /// One build at a time; queries keep reading the published alias table
    build_lock: Mutex<()>,
    metrics: Arc<Metrics>,
}

#[derive(Serialize)]
struct HealthResponse {
    graph: String,
    vectors: String,
}

#[derive(Deserialize)]
struct BuildRequest {
    path: String,
}

#[derive(Serialize)]
struct BuildResponse {
    corpus: ReadReport,
    alias_count: usize,
    report: BuildReport,
}

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

#[derive(Serialize)]
struct QueryResponse {
    query_id: Uuid,
    #[serde(flatten)]
    response: ChatResponse,
}

#[derive(Serialize)]
struct StatsResponse {
    graph: GraphStats,
    chunk_count: usize,
    alias_count: usize,
    alias_version: u64,
    embedding_cache: Option<CacheStats>,
}

/// JSON error body with a stable machine-readable code.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    query_id: Option<Uuid>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            query_id: None,
        }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", err.to_string())
    }

    fn with_query_id(mut self, query_id: Uuid) -> Self {
        self.query_id = Some(query_id);
        self
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let (status, code) = match &err {
            QueryError::NoEvidenceFound => (StatusCode::NOT_FOUND, "no_evidence_found"),
            QueryError::AllPathsFailed { .. } => (StatusCode::SERVICE_UNAVAILABLE, "all_paths_failed"),
            QueryError::Answer(_) => (StatusCode::BAD_GATEWAY, "answer_failed"),
        };
        Self::new(status, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.code,
            "message": self.message,
            "query_id": self.query_id,
        });
        (self.status, Json(body)).into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::load()?;
    let bind_addr = config.server.bind_addr.clone();
    let state = Arc::new(build_state(config).await?);

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context(format!("Failed to bind {}", bind_addr))?;

    info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/build", post(build_corpus))
        .route("/query", post(answer_question))
        .route("/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// `RUST_LOG` filters (default `info`); `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn build_state(config: AppConfig) -> Result<AppState> {
    let (graph, vectors): (Arc<dyn GraphStore>, Arc<dyn VectorStore>) = match config.backend {
        StoreBackend::Remote => {
            let neo4j = Neo4jGraphStore::connect(&config.neo4j).await?;
            neo4j
                .init()
                .await
                .context("Failed to initialize graph schema")?;
            (
                Arc::new(neo4j),
                Arc::new(QdrantVectorStore::new(&config.qdrant)),
            )
        }
        StoreBackend::Memory => {
            warn!("Using in-memory stores, nothing survives a restart");
            (
                Arc::new(InMemoryGraphStore::new()),
                Arc::new(InMemoryVectorStore::new()),
            )
        }
    };

    let ner: Arc<dyn NerModel> = Arc::new(HttpNerClient::from_config(&config.ner));
    let llm: Arc<dyn LanguageModel> = Arc::new(OllamaClient::new(config.llm.clone()));
    let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::new(&config.embedding));
    let extractor = EntityExtractor::new(ner, config.ner.clone());
    let normalizer = EntityNormalizer::new(config.normalizer.clone());
    let retry = RetryPolicy::from_config(&config.retry);

    let aliases = AliasTable::load(&config.server.alias_table_path).await?;
    info!(
        aliases = aliases.len(),
        version = aliases.version(),
        "Alias table loaded"
    );
    let aliases = Arc::new(RwLock::new(aliases));

    let indexer = Indexer::new(
        extractor.clone(),
        EntityResolver::new(normalizer.clone()),
        RelationExtractor::new(llm.clone(), config.relations.clone())
            .with_normalizer(normalizer.clone()),
        GraphWriter::new(graph.clone(), retry.clone()),
        PassageIndexer::new(
            embedder.clone(),
            vectors.clone(),
            config.passages.clone(),
            retry,
        ),
    );

    let query_cache = config
        .cache
        .enabled
        .then(|| Arc::new(CachedEmbedder::new(embedder.clone(), config.cache.max_entries)));
    let query_embedder: Arc<dyn Embedder> = match &query_cache {
        Some(cache) => cache.clone() as Arc<dyn Embedder>,
        None => embedder,
    };

    let engine = HybridSearchEngine::new(
        QueryRouter::new(extractor, config.router.clone()),
        GraphRetriever::new(
            graph.clone(),
            EntityResolver::new(normalizer),
            aliases.clone(),
            config.query.max_hops,
        ),
        VectorRetriever::new(
            query_embedder,
            vectors.clone(),
            config.query.top_k,
            config.query.min_similarity,
        ),
        FusionRanker::new(Arc::new(DefaultScoring), config.fusion.clone()),
        AnswerSynthesizer::new(llm),
        &config.query,
    );

    Ok(AppState {
        config,
        graph,
        vectors,
        query_cache,
        aliases,
        indexer,
        engine,
        build_lock: Mutex::new(()),
        metrics: Metrics::new(),
    })
}

fn alias_snapshot(state: &AppState) -> AliasTable {
    match state.aliases.read() {
        Ok(table) => table.draft(),
        Err(poisoned) => poisoned.into_inner().draft(),
    }
}

fn alias_counts(state: &AppState) -> (usize, u64) {
    let table = match state.aliases.read() {
        Ok(table) => table,
        Err(poisoned) => poisoned.into_inner(),
    };
    (table.len(), table.version())
}

async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let graph = match state.graph.stats().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    };
    let vectors = match state.vectors.count().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let status = if graph == "ok" && vectors == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(HealthResponse { graph, vectors }))
}

async fn build_corpus(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BuildRequest>,
) -> Result<Json<BuildResponse>, ApiError> {
    let path = PathBuf::from(&req.path);
    if !path.exists() {
        state.metrics.record_request(false);
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "path_not_found",
            format!("{} does not exist", req.path),
        ));
    }

    let _guard = state.build_lock.lock().await;
    let timer = TimedOperation::start();

    let result = run_build(&state, &path).await;
    state.metrics.record_request(result.is_ok());

    let (corpus, alias_count, report) = result.map_err(|e| {
        error!("Build failed: {:#}", e);
        ApiError::internal(format!("{:#}", e))
    })?;
    state.metrics.record_build(timer.elapsed(), &report);

    Ok(Json(BuildResponse {
        corpus,
        alias_count,
        report,
    }))
}

/// Build against a private copy of the alias table and publish it only
/// once the build succeeded.
async fn run_build(state: &AppState, path: &Path) -> Result<(ReadReport, usize, BuildReport)> {
    let corpus = ingest::read_corpus(path).await?;
    let mut draft = alias_snapshot(state);

    let report = state.indexer.build(&corpus.documents, &mut draft).await?;

    draft
        .save(&state.config.server.alias_table_path)
        .await?;
    let alias_count = draft.len();
    match state.aliases.write() {
        Ok(mut table) => *table = draft,
        Err(poisoned) => *poisoned.into_inner() = draft,
    }

    info!(
        documents = corpus.documents.len(),
        skipped_files = corpus.report.skipped_files,
        skipped_rows = corpus.report.skipped_rows,
        entities = report.graph.entities,
        relationships = report.graph.write.relationships_written,
        chunks = report.passages.indexed,
        "Build finished"
    );
    Ok((corpus.report, alias_count, report))
}

async fn answer_question(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let query_id = Uuid::new_v4();
    if req.question.trim().is_empty() {
        state.metrics.record_request(false);
        return Err(
            ApiError::new(StatusCode::BAD_REQUEST, "empty_question", "question is empty")
                .with_query_id(query_id),
        );
    }

    let timer = TimedOperation::start();
    let result = state.engine.ask(req.question.trim()).await;
    state.metrics.record_request(result.is_ok());

    match result {
        Ok(response) => {
            state
                .metrics
                .record_query(timer.elapsed(), response.context.degraded.is_some());
            info!(%query_id, route = ?response.route.state, "Answered question");
            Ok(Json(QueryResponse { query_id, response }))
        }
        Err(err) => {
            if matches!(err, QueryError::NoEvidenceFound) {
                state.metrics.record_no_evidence();
            }
            warn!(%query_id, "Query failed: {}", err);
            Err(ApiError::from(err).with_query_id(query_id))
        }
    }
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, ApiError> {
    let graph = state.graph.stats().await.map_err(ApiError::internal)?;
    let chunk_count = state.vectors.count().await.map_err(ApiError::internal)?;
    let (alias_count, alias_version) = alias_counts(&state);

    Ok(Json(StatsResponse {
        graph,
        chunk_count,
        alias_count,
        alias_version,
        embedding_cache: state.query_cache.as_ref().map(|cache| cache.stats()),
    }))
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use query::DegradationReason;
    use tower::ServiceExt;

    async fn memory_app() -> Router {
        let mut config = AppConfig::default();
        config.backend = StoreBackend::Memory;
        config.server.alias_table_path =
            std::env::temp_dir().join(format!("aliases-{}.json", Uuid::new_v4()));
        router(Arc::new(build_state(config).await.unwrap()))
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_with_memory_stores() {
        let app = memory_app().await;

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["graph"], "ok");
        assert_eq!(body["vectors"], "ok");
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let app = memory_app().await;

        let response = app
            .oneshot(
                Request::post("/query")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"question": "   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "empty_question");
        assert!(body["query_id"].is_string());
    }

    #[tokio::test]
    async fn test_build_of_missing_path_is_not_found() {
        let app = memory_app().await;

        let response = app
            .oneshot(
                Request::post("/build")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"path": "/nonexistent/wayang"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "path_not_found");
    }

    #[tokio::test]
    async fn test_stats_on_fresh_state() {
        let app = memory_app().await;

        let response = app
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["chunk_count"], 0);
        assert_eq!(body["alias_count"], 0);
        assert_eq!(body["embedding_cache"]["hits"], 0);
    }

    #[test]
    fn test_query_errors_map_to_distinct_statuses() {
        let no_evidence = ApiError::from(QueryError::NoEvidenceFound);
        assert_eq!(no_evidence.status, StatusCode::NOT_FOUND);
        assert_eq!(no_evidence.code, "no_evidence_found");

        let failed = ApiError::from(QueryError::AllPathsFailed {
            graph: DegradationReason::TimedOut,
            vector: DegradationReason::Failed("qdrant down".into()),
        });
        assert_eq!(failed.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(failed.code, "all_paths_failed");
        assert!(failed.message.contains("qdrant down"));
    }
}
