pub mod ner_eval;

pub use ner_eval::{GOLD_STANDARD, GoldEntity, LabelMismatch, NerReport, evaluate, load_predictions};
