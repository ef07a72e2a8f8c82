use anyhow::Result;
use eval::{GOLD_STANDARD, NerReport, evaluate, load_predictions};
use std::path::PathBuf;
use tracing::info;

const DEFAULT_RESULTS: &str = "data/ner_results.json";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS));

    let predictions = load_predictions(&path)?;
    info!(predictions = predictions.len(), "Loaded NER results from {:?}", path);

    let report = evaluate(&predictions, GOLD_STANDARD);
    print_report(&report);

    if std::env::args().any(|arg| arg == "--json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn print_report(report: &NerReport) {
    println!("\n=== NER EVALUATION ===\n");
    println!("  Gold Standard Size : {}", report.gold_size);
    println!("  Matches Found      : {}", report.matches_found);
    println!("  Perfect Matches    : {}", report.true_positives);
    println!("  Label Errors       : {}", report.label_errors);
    println!("  False Negatives    : {}", report.false_negatives);
    println!();
    println!("  Recall             : {:.2}%", report.recall * 100.0);
    println!("  Precision (strict) : {:.2}%", report.strict_precision * 100.0);
    println!("  F1                 : {:.2}%", report.f1 * 100.0);
    println!("  Label Accuracy     : {:.2}%", report.label_accuracy * 100.0);

    if !report.mismatches.is_empty() {
        println!("\nLabel errors:");
        for m in &report.mismatches {
            println!("  - {}: gold {} vs model {}", m.name, m.gold, m.predicted);
        }
    }
}
