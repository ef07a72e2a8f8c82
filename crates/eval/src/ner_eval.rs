use anyhow::{Context, Result};
use extract::EntitySummary;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoldEntity {
    pub name: &'static str,
    pub label: &'static str,
}

const fn gold(name: &'static str, label: &'static str) -> GoldEntity {
    GoldEntity { name, label }
}

/// Hand-labelled names from the opening stories of the wayang corpus. Partial:
/// names outside this list are neither rewarded nor penalized.
pub const GOLD_STANDARD: &[GoldEntity] = &[
    // Person
    gold("Prabu Basukesti", "Person"),
    gold("Patih Jayaloka", "Person"),
    gold("Resi Suganda", "Person"),
    gold("Empu Dewayasa", "Person"),
    gold("Empu Purbageni", "Person"),
    gold("Empu Prawa", "Person"),
    gold("Empu Kanomayasa", "Person"),
    gold("Dewi Kaniraras", "Person"),
    gold("Dewi Marapi", "Person"),
    gold("Resi Kuswala", "Person"),
    gold("Bambang Daneswara", "Person"),
    gold("Prabu Cingkaradewa", "Person"),
    gold("Sri Maharaja Purwacandra", "Person"),
    gold("Ditya Citradana", "Person"),
    gold("Putut Margana", "Person"),
    gold("Indramarkata", "Person"),
    gold("Kalayaksa", "Person"),
    gold("Gajah Barigu", "Person"),
    gold("Garuda Urna", "Person"),
    gold("Naga Wiswana", "Person"),
    gold("Resi Manumanasa", "Person"),
    gold("Bambang Satrukem", "Person"),
    gold("Dewi Nilawati", "Person"),
    gold("Janggan Smara", "Person"),
    gold("Prabu Durapati", "Person"),
    gold("Prabu Basupati", "Person"),
    gold("Prabu Hastimurti", "Person"),
    gold("Resi Basunanda", "Person"),
    gold("Patih Basundara", "Person"),
    gold("Raden Wasanta", "Person"),
    gold("Arya Basusara", "Person"),
    gold("Prabu Daneswara", "Person"),
    gold("Dewi Awanti", "Person"),
    gold("Brahmana Wisaka", "Person"),
    gold("Prabu Sriwahana", "Person"),
    // Location
    gold("Utarakanda", "Location"),
    gold("Purwakanda", "Location"),
    gold("Daksinakanda", "Location"),
    gold("Pracimakanda", "Location"),
    gold("Padepokan Saptaarga", "Location"),
    gold("Gunung Saptaarga", "Location"),
    gold("Tanah Hindustan", "Location"),
    gold("Tanah Jawa", "Location"),
    gold("Hutan Minangsraya", "Location"),
    gold("Medang Kamulan", "Location"),
    // Organization
    gold("Kerajaan Wirata", "Organization"),
    gold("Kerajaan Duhyapura", "Organization"),
    gold("Kerajaan Gajahoya", "Organization"),
    gold("Kerajaan Medang Kamulan", "Organization"),
    gold("Gilingwesi", "Organization"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelMismatch {
    pub name: String,
    pub gold: String,
    pub predicted: String,
}

/// Scores are fractions in `[0, 1]`.
#[derive(Debug, Clone, Serialize)]
pub struct NerReport {
    pub gold_size: usize,
    pub matches_found: usize,
    pub true_positives: usize,
    pub label_errors: usize,
    /// Gold names not found, plus those found with the wrong label
    pub false_negatives: usize,
    pub recall: f64,
    pub strict_precision: f64,
    pub f1: f64,
    pub label_accuracy: f64,
    pub mismatches: Vec<LabelMismatch>,
}

/// Compare predictions against a gold list by case-insensitive name.
///
/// Strict precision only looks at gold names the model found, so extra
/// predictions outside the gold list do not count against it.
pub fn evaluate(predictions: &[EntitySummary], gold: &[GoldEntity]) -> NerReport {
    let predicted: HashMap<String, &EntitySummary> = predictions
        .iter()
        .map(|p| (p.name.to_lowercase(), p))
        .collect();

    let mut true_positives = 0;
    let mut false_negatives = 0;
    let mut mismatches = Vec::new();

    for item in gold {
        match predicted.get(&item.name.to_lowercase()) {
            Some(p) if p.label.eq_ignore_ascii_case(item.label) => true_positives += 1,
            Some(p) => {
                mismatches.push(LabelMismatch {
                    name: item.name.to_string(),
                    gold: item.label.to_string(),
                    predicted: p.label.clone(),
                });
                false_negatives += 1;
            }
            None => false_negatives += 1,
        }
    }

    let label_errors = mismatches.len();
    let matches_found = true_positives + label_errors;
    let recall = ratio(true_positives, gold.len());
    let strict_precision = ratio(true_positives, matches_found);
    let f1 = if recall + strict_precision > 0.0 {
        2.0 * recall * strict_precision / (recall + strict_precision)
    } else {
        0.0
    };

    NerReport {
        gold_size: gold.len(),
        matches_found,
        true_positives,
        label_errors,
        false_negatives,
        recall,
        strict_precision,
        f1,
        label_accuracy: strict_precision,
        mismatches,
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

pub fn load_predictions(path: &Path) -> Result<Vec<EntitySummary>> {
    let content = std::fs::read_to_string(path)
        .context(format!("Failed to read NER results: {:?}", path))?;
    serde_json::from_str(&content).context("Failed to parse NER results")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predicted(name: &str, label: &str) -> EntitySummary {
        EntitySummary {
            name: name.to_string(),
            label: label.to_string(),
            confidence: 0.9,
            stories: vec!["Sakri Lahir".to_string()],
        }
    }

    const SMALL_GOLD: &[GoldEntity] = &[
        gold("Prabu Basukesti", "Person"),
        gold("Medang Kamulan", "Location"),
        gold("Kerajaan Wirata", "Organization"),
        gold("Resi Suganda", "Person"),
    ];

    #[test]
    fn test_matching_ignores_case() {
        let report = evaluate(
            &[predicted("prabu basukesti", "person"), predicted("MEDANG KAMULAN", "Location")],
            SMALL_GOLD,
        );

        assert_eq!(report.true_positives, 2);
        assert_eq!(report.label_errors, 0);
        assert_eq!(report.false_negatives, 2);
        assert!((report.recall - 0.5).abs() < 1e-9);
        assert_eq!(report.strict_precision, 1.0);
    }

    #[test]
    fn test_wrong_label_is_error_and_miss() {
        let report = evaluate(
            &[
                predicted("Prabu Basukesti", "Person"),
                predicted("Medang Kamulan", "Person"),
                predicted("Kerajaan Wirata", "Other"),
                predicted("Sakri", "Person"),
            ],
            SMALL_GOLD,
        );

        assert_eq!(report.matches_found, 3);
        assert_eq!(report.true_positives, 1);
        assert_eq!(report.label_errors, 2);
        assert_eq!(report.false_negatives, 3);
        assert!((report.recall - 0.25).abs() < 1e-9);
        assert!((report.strict_precision - 1.0 / 3.0).abs() < 1e-9);
        assert!((report.f1 - 2.0 / 7.0).abs() < 1e-9);
        assert_eq!(report.label_accuracy, report.strict_precision);
        assert_eq!(
            report.mismatches[0],
            LabelMismatch {
                name: "Medang Kamulan".into(),
                gold: "Location".into(),
                predicted: "Person".into(),
            }
        );
    }

    #[test]
    fn test_organization_tags_score_against_gold() {
        use extract::{CharSpan, EntityMention, EntityType, summarize_mentions};

        let mention = |surface: &str, label: &str| EntityMention {
            source_document_id: "d1".into(),
            char_span: CharSpan::new(0, surface.chars().count()),
            surface_text: surface.into(),
            predicted_type: EntityType::from_ner_label(label),
            ner_label: label.into(),
            score: 0.9,
        };
        let wirata = mention("Kerajaan Wirata", "ORG");
        let basukesti = mention("Prabu Basukesti", "PER");
        let misc = mention("Medang Kamulan", "MISC");

        let summary = summarize_mentions(vec![
            ("Wirata", &wirata),
            ("Wirata", &basukesti),
            ("Wirata", &misc),
        ]);
        let report = evaluate(&summary, SMALL_GOLD);

        assert_eq!(summary.len(), 2);
        assert_eq!(report.true_positives, 2);
        assert_eq!(report.label_errors, 0);
        assert_eq!(report.strict_precision, 1.0);
        assert!((report.recall - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_no_overlap_scores_zero() {
        let report = evaluate(&[predicted("Sakri", "Person")], SMALL_GOLD);

        assert_eq!(report.matches_found, 0);
        assert_eq!(report.recall, 0.0);
        assert_eq!(report.strict_precision, 0.0);
        assert_eq!(report.f1, 0.0);
    }

    #[test]
    fn test_gold_standard_has_no_duplicates() {
        let mut names: Vec<String> = GOLD_STANDARD.iter().map(|g| g.name.to_lowercase()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), GOLD_STANDARD.len());
        assert_eq!(GOLD_STANDARD.len(), 50);
    }

    #[test]
    fn test_reads_summary_json() {
        let path = std::env::temp_dir().join("ner_eval_summary_test.json");
        let rows = vec![predicted("Resi Suganda", "Person")];
        std::fs::write(&path, serde_json::to_string(&rows).unwrap()).unwrap();

        let loaded = load_predictions(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, rows);
    }
}
