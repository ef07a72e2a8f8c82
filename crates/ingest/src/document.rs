use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One narrative unit of the corpus: a text file or a single story row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub title: String,
    pub source: String,
    pub text: String,
}

impl Document {
    pub fn new(source: &str, part: Option<usize>, title: String, text: String) -> Self {
        let key = match part {
            Some(part) => format!("{}#{}", source, part),
            None => source.to_string(),
        };

        Self {
            document_id: generate_doc_id(&key),
            title,
            source: source.to_string(),
            text,
        }
    }
}

/// Generate a stable document ID from its source key
pub fn generate_doc_id(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}
