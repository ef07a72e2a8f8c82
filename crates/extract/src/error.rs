use thiserror::Error;

/// Failures of the NER step. Span errors are logged and the span dropped;
/// model errors skip the document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("NER model call failed for document {document_id}: {message}")]
    Model { document_id: String, message: String },

    #[error("malformed span {start}..{end} for text of {text_len} chars")]
    MalformedSpan {
        start: usize,
        end: usize,
        text_len: usize,
    },
}

/// Failures of relation extraction. Each one discards a single candidate
/// (or, for `MalformedOutput` / `Model`, a single window).
#[derive(Debug, Error)]
pub enum RelationExtractionError {
    #[error("unknown predicate '{0}'")]
    UnknownPredicate(String),

    #[error("entity reference '{0}' is not among the window's entities")]
    UnknownEntity(String),

    #[error("invalid confidence {0}")]
    InvalidConfidence(f32),

    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    #[error("language model call failed: {0}")]
    Model(String),
}
