use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub chunk_id: String,
    pub title: String,
    pub text: String,
    pub source: String,
    pub char_range: (usize, usize), // [start, end) in chars
}

impl Chunk {
    pub fn new(
        doc_id: String,
        title: String,
        text: String,
        source: String,
        char_range: (usize, usize),
    ) -> Self {
        let chunk_id = Self::generate_chunk_id(&doc_id, char_range);

        Self {
            doc_id,
            chunk_id,
            title,
            text,
            source,
            char_range,
        }
    }

    /// Chunk identity depends only on where it sits in its document,
    /// so re-chunking unchanged text upserts the same ids.
    pub fn generate_chunk_id(doc_id: &str, char_range: (usize, usize)) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(b"|");
        hasher.update(char_range.0.to_string().as_bytes());
        hasher.update(b"..");
        hasher.update(char_range.1.to_string().as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

/// Number of chars in `text`; all spans in the pipeline are counted in chars.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Slice `text` by a char range, clamping out-of-range bounds.
pub fn char_slice(text: &str, start: usize, end: usize) -> &str {
    if start >= end {
        return "";
    }

    let mut indices = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len()));
    let Some(byte_start) = indices.nth(start) else {
        return "";
    };
    let byte_end = indices.nth(end - start - 1).unwrap_or(text.len());

    &text[byte_start..byte_end]
}
