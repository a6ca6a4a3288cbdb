// 🔤 Text Normalizer
// Case folding + Greek accent stripping so keyword tables match
// "Πλήρωσα", "ΠΛΗΡΩΣΑ" and "πληρωσα" identically.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lower-case, NFD-decompose, drop combining marks and collapse whitespace.
///
/// Every General_Category=Mark character goes (Mn, Mc and Me), not only the
/// nonspacing ones. Greek tonos and dialytika are Mn after NFD, so Greek text
/// folds the same either way.
///
/// Total and idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split normalized text into word tokens (maximal alphanumeric runs).
pub fn tokenize(normalized: &str) -> Vec<String> {
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// UTTERANCE
// ============================================================================

/// One inbound chat message, normalized once and shared by every extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Original text, trimmed. Numeric and date regexes run on this.
    pub raw: String,
    /// Output of [`normalize`]. Keyword matching runs on this.
    pub normalized: String,
    /// Word tokens of `normalized`.
    pub tokens: Vec<String>,
}

impl Utterance {
    pub fn new(raw: &str) -> Self {
        let raw = raw.trim().to_string();
        let normalized = normalize(&raw);
        let tokens = tokenize(&normalized);
        Utterance {
            raw,
            normalized,
            tokens,
        }
    }

    /// Tokens joined by single spaces, i.e. the text with punctuation removed.
    pub fn token_text(&self) -> String {
        self.tokens.join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_greek_accents_and_case() {
        assert_eq!(normalize("Πλήρωσα"), "πληρωσα");
        assert_eq!(normalize("ΠΛΗΡΩΣΑ"), "πληρωσα");
        assert_eq!(normalize("Βουρβουρού"), "βουρβουρου");
        assert_eq!(normalize("Μαΐου"), "μαιου");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize("  νερό \t  20€\n"), "νερο 20€");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_latin_diacritics() {
        assert_eq!(normalize("Café Crème"), "cafe creme");
    }

    #[test]
    fn test_drops_spacing_and_enclosing_marks_too() {
        // U+093E DEVANAGARI VOWEL SIGN AA is Mc, U+20DD COMBINING ENCLOSING CIRCLE is Me
        assert_eq!(normalize("\u{915}\u{93E}"), "\u{915}");
        assert_eq!(normalize("a\u{20DD}"), "a");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "Πλήρωσα νερό Βουρβουρού 20€ 05/01/2026",
            "ΈΣΟΔΑ Ιανουαρίου",
            "İstanbul ΣΟΦΟΣ",
            "Δώσε μου έξοδα από 6/1/2026 έως 8/1/2026",
            "ϊΐΰ ά έ ή",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_utterance_tokens() {
        let u = Utterance::new("Πλήρωσα νερό, 20€ (05/01/2026)!");
        assert_eq!(u.raw, "Πλήρωσα νερό, 20€ (05/01/2026)!");
        assert_eq!(
            u.tokens,
            vec!["πληρωσα", "νερο", "20", "05", "01", "2026"]
        );
        assert_eq!(u.token_text(), "πληρωσα νερο 20 05 01 2026");
    }

    #[test]
    fn test_empty_utterance() {
        let u = Utterance::new("  !! ");
        assert!(u.is_empty());
        assert_eq!(u.token_text(), "");
    }
}
