use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::chunk::{Chunk, char_slice};
use crate::document::Document;

/// Window geometry, in chars. `stride < chunk_size` gives overlapping windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub stride: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            stride: 600,
        }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    pub fn chunk_document(&self, doc: &Document) -> Vec<Chunk> {
        self.chunk_text(&doc.document_id, &doc.title, &doc.text, &doc.source)
    }

    pub fn chunk_text(&self, doc_id: &str, title: &str, text: &str, source: &str) -> Vec<Chunk> {
        self.windows(text)
            .into_iter()
            .filter_map(|(start, end)| {
                let window = char_slice(text, start, end);
                if window.trim().is_empty() {
                    return None;
                }
                Some(Chunk::new(
                    doc_id.to_string(),
                    title.to_string(),
                    window.to_string(),
                    source.to_string(),
                    (start, end),
                ))
            })
            .collect()
    }

    /// Char ranges of the windows covering `text`.
    ///
    /// A window ends on the last word boundary past its midpoint when there is
    /// one; the next window starts `stride` chars after the previous start but
    /// never past the previous end, so no text is skipped.
    pub fn windows(&self, text: &str) -> Vec<(usize, usize)> {
        let char_offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let total = char_offsets.len();
        if total == 0 {
            return Vec::new();
        }

        let size = self.config.chunk_size.max(1);
        let stride = self.config.stride.clamp(1, size);

        // Word-segment starts as char offsets, ascending
        let boundaries: Vec<usize> = text
            .split_word_bound_indices()
            .filter_map(|(byte, _)| char_offsets.binary_search(&byte).ok())
            .collect();

        let mut ranges = Vec::new();
        let mut start = 0;

        loop {
            let hard_end = (start + size).min(total);
            let end = if hard_end == total {
                total
            } else {
                boundaries
                    .iter()
                    .rev()
                    .find(|&&b| b <= hard_end && b > start + size / 2)
                    .copied()
                    .unwrap_or(hard_end)
            };

            ranges.push((start, end));
            if end >= total {
                break;
            }
            start = (start + stride).min(end);
        }

        ranges
    }
}
