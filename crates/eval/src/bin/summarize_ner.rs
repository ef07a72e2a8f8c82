use anyhow::{Context, Result};
use extract::{EntityExtractor, HttpNerClient, NerConfig, summarize_mentions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Run the NER service over a corpus and write the per-name summary that
/// `evaluate_ner` scores.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let corpus_path = args
        .next()
        .map(PathBuf::from)
        .context("usage: summarize_ner <corpus> [output.json]")?;
    let output = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data/ner_results.json"));

    let mut config = NerConfig::default();
    if let Ok(url) = std::env::var("NER_URL") {
        config.url = url;
    }
    config.api_token = std::env::var("NER_API_TOKEN").ok();
    let extractor = EntityExtractor::new(Arc::new(HttpNerClient::from_config(&config)), config);

    let corpus = ingest::read_corpus(&corpus_path).await?;
    let documents = corpus.documents;
    info!(
        documents = documents.len(),
        skipped_files = corpus.report.skipped_files,
        skipped_rows = corpus.report.skipped_rows,
        "Read corpus"
    );

    let mut per_story = Vec::with_capacity(documents.len());
    for doc in &documents {
        match extractor.extract(&doc.document_id, &doc.text).await {
            Ok(mentions) => per_story.push((doc.title.as_str(), mentions)),
            Err(e) => warn!(document = %doc.document_id, "Skipping document: {}", e),
        }
    }

    let summary = summarize_mentions(
        per_story
            .iter()
            .flat_map(|(title, mentions)| mentions.iter().map(move |m| (*title, m))),
    );

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&output, serde_json::to_string_pretty(&summary)?)?;
    info!(names = summary.len(), "Wrote NER summary to {:?}", output);
    Ok(())
}
