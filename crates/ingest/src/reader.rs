use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::document::Document;
use crate::preprocess::preprocess_text;

pub struct FileReader;

/// What was read, and what had to be left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadReport {
    pub files: usize,
    pub documents: usize,
    pub skipped_files: usize,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub documents: Vec<Document>,
    pub report: ReadReport,
}

impl Corpus {
    fn extend(&mut self, other: Corpus) {
        self.documents.extend(other.documents);
        self.report.files += other.report.files;
        self.report.skipped_files += other.report.skipped_files;
        self.report.skipped_rows += other.report.skipped_rows;
        self.report.documents = self.documents.len();
    }
}

/// Row layout of the story spreadsheets: title, subtitle, body.
#[derive(Debug, Deserialize)]
struct StoryRow {
    #[serde(rename = "Judul", default)]
    title: Option<String>,
    #[serde(rename = "Subjudul", default)]
    subtitle: Option<String>,
    #[serde(rename = "Teks", default)]
    text: Option<String>,
}

impl FileReader {
    /// Read one file. Unreadable files are an error here; a bad CSV row is
    /// skipped and counted.
    pub async fn read_file(path: &Path) -> Result<Corpus> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let source = path.to_string_lossy().to_string();

        let mut corpus = match extension {
            "txt" | "md" => {
                let content = fs::read_to_string(path)
                    .await
                    .context(format!("Failed to read file: {:?}", path))?;
                let title = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                let text = preprocess_text(&content);
                let mut corpus = Corpus::default();
                if !text.is_empty() {
                    corpus.documents.push(Document::new(&source, None, title, text));
                }
                corpus
            }
            "csv" => {
                let content = fs::read(path)
                    .await
                    .context(format!("Failed to read file: {:?}", path))?;
                Self::parse_csv(&content, &source)
            }
            _ => anyhow::bail!("Unsupported file format: {}", extension),
        };

        corpus.report.files = 1;
        corpus.report.documents = corpus.documents.len();
        Ok(corpus)
    }

    /// One document per row with a non-empty body. Rows that fail to decode
    /// are logged and skipped; row numbers (and so document ids) stay stable.
    pub fn parse_csv(content: &[u8], source: &str) -> Corpus {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(content);

        let mut corpus = Corpus::default();

        for (row_idx, row) in reader.deserialize::<StoryRow>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(source, row = row_idx + 1, "Skipping malformed CSV row: {}", e);
                    corpus.report.skipped_rows += 1;
                    continue;
                }
            };

            let text = preprocess_text(row.text.as_deref().unwrap_or(""));
            if text.is_empty() {
                debug!(source, row = row_idx + 1, "Skipping row without text");
                continue;
            }

            let title = match (row.title, row.subtitle) {
                (Some(t), Some(s)) if !s.trim().is_empty() => format!("{} - {}", t.trim(), s.trim()),
                (Some(t), _) => t.trim().to_string(),
                (None, _) => "Unknown Story".to_string(),
            };

            corpus
                .documents
                .push(Document::new(source, Some(row_idx), title, text));
        }

        corpus.report.documents = corpus.documents.len();
        corpus
    }

    /// Walk `dir` recursively; files are read in path order so document order
    /// is stable. A file that cannot be read is skipped, not fatal.
    pub async fn read_directory(dir: &Path) -> Result<Corpus> {
        let mut paths: Vec<_> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("txt" | "md" | "csv")
                )
            })
            .collect();
        paths.sort();

        let mut corpus = Corpus::default();
        for path in &paths {
            match Self::read_file(path).await {
                Ok(file) => corpus.extend(file),
                Err(e) => {
                    warn!(path = ?path, "Skipping file: {:#}", e);
                    corpus.report.files += 1;
                    corpus.report.skipped_files += 1;
                }
            }
        }

        info!(
            files = corpus.report.files,
            documents = corpus.report.documents,
            skipped_files = corpus.report.skipped_files,
            skipped_rows = corpus.report.skipped_rows,
            "Read corpus directory {:?}",
            dir
        );

        Ok(corpus)
    }
}
