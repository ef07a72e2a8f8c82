use anyhow::{Context, Result};
use extract::LanguageModel;
use std::sync::Arc;

use crate::fusion::{FusedContext, SourceKind};

/// Turns a fused context into a natural-language answer.
pub struct AnswerSynthesizer {
    llm: Arc<dyn LanguageModel>,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    pub async fn synthesize(&self, question: &str, context: &FusedContext) -> Result<String> {
        let prompt = build_answer_prompt(question, context);
        let answer = self
            .llm
            .generate(&prompt)
            .await
            .context("Failed to generate answer")?;
        Ok(answer.trim().to_string())
    }
}

pub fn build_context(context: &FusedContext) -> String {
    let mut out = String::new();

    let facts: Vec<_> = context.items_from(SourceKind::Graph).collect();
    if !facts.is_empty() {
        out.push_str("KNOWLEDGE GRAPH FACTS:\n");
        for item in facts {
            out.push_str(&format!("- {} [{}]\n", item.content, item.reference));
        }
    }

    let passages: Vec<_> = context.items_from(SourceKind::Vector).collect();
    if !passages.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("RELEVANT PASSAGES:\n");
        for (i, item) in passages.iter().enumerate() {
            out.push_str(&format!("[Passage {}: {}] {}\n\n", i + 1, item.reference, item.content));
        }
    }

    out
}

pub fn build_answer_prompt(question: &str, context: &FusedContext) -> String {
    format!(
        r#"You are an expert on wayang stories answering questions from the provided context.

CONTEXT:
{}
USER QUESTION: {}

INSTRUCTIONS:
- Answer using only the facts and passages above
- Prefer knowledge graph facts for who/where questions
- If the context doesn't contain enough information, say so
- Answer in the language of the question, concisely

ANSWER:"#,
        build_context(context),
        question
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::ContextItem;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn context() -> FusedContext {
        FusedContext {
            items: vec![
                ContextItem {
                    source: SourceKind::Graph,
                    content: "Sakri SON_OF Resi Palasara".into(),
                    score: 1.0,
                    reference: "d1@0..36".into(),
                },
                ContextItem {
                    source: SourceKind::Vector,
                    content: "Sakri bertapa di hutan.".into(),
                    score: 0.7,
                    reference: "d2@0..23".into(),
                },
            ],
            budget: 4000,
            total_chars: 49,
            dropped: 0,
            degraded: None,
        }
    }

    #[derive(Default)]
    struct RecordingLlm(Mutex<Vec<String>>);

    #[async_trait]
    impl LanguageModel for RecordingLlm {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.0.lock().unwrap().push(prompt.to_string());
            Ok("  Resi Palasara.\n".into())
        }

        async fn generate_json(&self, _prompt: &str) -> Result<String> {
            anyhow::bail!("not used")
        }
    }

    #[test]
    fn test_context_sections() {
        let text = build_context(&context());

        assert!(text.starts_with("KNOWLEDGE GRAPH FACTS:\n- Sakri SON_OF Resi Palasara [d1@0..36]\n"));
        assert!(text.contains("RELEVANT PASSAGES:\n[Passage 1: d2@0..23] Sakri bertapa di hutan."));
    }

    #[tokio::test]
    async fn test_synthesize_sends_context() {
        let llm = Arc::new(RecordingLlm::default());
        let synthesizer = AnswerSynthesizer::new(llm.clone());

        let answer = synthesizer.synthesize("Siapa ayah Sakri?", &context()).await.unwrap();

        assert_eq!(answer, "Resi Palasara.");
        let prompts = llm.0.lock().unwrap();
        assert!(prompts[0].contains("USER QUESTION: Siapa ayah Sakri?"));
        assert!(prompts[0].contains("Sakri SON_OF Resi Palasara"));
    }
}
