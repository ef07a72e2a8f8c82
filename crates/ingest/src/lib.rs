pub mod chunk;
pub mod chunker;
pub mod document;
pub mod preprocess;
pub mod reader;

pub use chunk::{Chunk, char_len, char_slice};
pub use chunker::{Chunker, ChunkerConfig};
pub use document::{Document, generate_doc_id};
pub use preprocess::preprocess_text;
pub use reader::{Corpus, FileReader, ReadReport};

use anyhow::Result;
use std::path::Path;

/// Read a corpus from a single file or a directory tree
pub async fn read_corpus(path: &Path) -> Result<Corpus> {
    if path.is_dir() {
        FileReader::read_directory(path).await
    } else {
        FileReader::read_file(path).await
    }
}
