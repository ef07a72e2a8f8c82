use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.,!?;:'"`()\[\]{}]"#).unwrap());
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_/]+").unwrap());

/// Rule set for turning surface text into a comparable name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Leading title words dropped before comparison ("Resi Palasara" -> "palasara")
    pub honorifics: Vec<String>,
    pub strip_diacritics: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        let honorifics = [
            "prabu", "resi", "dewi", "bambang", "raden", "arya", "patih", "empu", "sang",
            "sri", "maharaja", "begawan", "batara", "bathara", "ditya", "putut", "janggan",
            "brahmana", "kerajaan",
        ];

        Self {
            honorifics: honorifics.iter().map(|s| s.to_string()).collect(),
            strip_diacritics: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityNormalizer {
    honorifics: HashSet<String>,
    strip_diacritics: bool,
}

impl EntityNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        let mut normalizer = Self {
            honorifics: HashSet::new(),
            strip_diacritics: config.strip_diacritics,
        };
        // Honorifics go through the same folding as names
        normalizer.honorifics = config
            .honorifics
            .iter()
            .map(|h| normalizer.fold(h))
            .filter(|h| !h.is_empty())
            .collect();
        normalizer
    }

    /// Normalize entity name: fold case and diacritics, drop punctuation,
    /// collapse spaces, strip leading honorifics.
    pub fn normalize(&self, name: &str) -> String {
        let folded = self.fold(name);
        let tokens: Vec<&str> = folded.split_whitespace().collect();

        let first_name = tokens
            .iter()
            .position(|t| !self.honorifics.contains(*t))
            .unwrap_or(0); // nothing but titles: keep them all

        tokens[first_name..].join(" ")
    }

    fn fold(&self, text: &str) -> String {
        let text: String = if self.strip_diacritics {
            text.nfd().filter(|c| !is_combining_mark(*c)).collect()
        } else {
            text.to_string()
        };

        let lowered = text.to_lowercase();
        let no_punct = PUNCTUATION.replace_all(&lowered, "");
        let spaced = SEPARATORS.replace_all(&no_punct, " ");

        spaced.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn is_honorific(&self, word: &str) -> bool {
        self.honorifics.contains(&self.fold(word))
    }
}

impl Default for EntityNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}
