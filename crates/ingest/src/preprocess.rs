use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static GLUED_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.,!?;:])(\p{L})").unwrap());
static OPEN_PAREN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\(\s*").unwrap());
static CLOSE_PAREN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*\)\s*").unwrap());

/// Clean raw story text before NER sees it: single spaces, a space after
/// sentence punctuation, tidy parentheses.
pub fn preprocess_text(text: &str) -> String {
    let text = WHITESPACE.replace_all(text, " ");
    let text = GLUED_PUNCT.replace_all(&text, "$1 $2");
    let text = OPEN_PAREN.replace_all(&text, " (");
    let text = CLOSE_PAREN.replace_all(&text, ") ");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess() {
        assert_eq!(
            preprocess_text("  Prabu Basukesti\n\n berkata.Lalu   pergi  "),
            "Prabu Basukesti berkata. Lalu pergi"
        );
        assert_eq!(
            preprocess_text("Sakri( putra Satrukem )lahir"),
            "Sakri (putra Satrukem) lahir"
        );
        assert_eq!(preprocess_text(""), "");
    }
}
