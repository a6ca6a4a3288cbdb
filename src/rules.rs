// 🏷️ Keyword Rules - Rules as Data
// Ordered keyword tables used by every extractor and the intent classifier

use serde::{Deserialize, Serialize};

use crate::normalize::{normalize, tokenize, Utterance};

// ============================================================================
// PATTERN
// ============================================================================

/// A keyword or phrase matched against the token stream of an utterance.
///
/// Words are compared whole. A word ending in `*` is a stem and matches any
/// token starting with it, so `πληρωσ*` covers `πληρωσα`, `πληρωσαμε`, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    /// Source text as written in the vocabulary (for debugging / rule ids)
    pub source: String,
    words: Vec<PatternWord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternWord {
    Exact(String),
    Stem(String),
}

impl PatternWord {
    fn matches(&self, token: &str) -> bool {
        match self {
            PatternWord::Exact(w) => token == w,
            PatternWord::Stem(s) => token.starts_with(s.as_str()),
        }
    }

    fn len(&self) -> usize {
        match self {
            PatternWord::Exact(w) | PatternWord::Stem(w) => w.chars().count(),
        }
    }
}

impl Pattern {
    /// Compile a pattern. Returns `None` when nothing matchable remains
    /// after normalization (empty string, pure punctuation, lone `*`).
    pub fn parse(source: &str) -> Option<Self> {
        let normalized = normalize(source);
        let mut words = Vec::new();

        for raw_word in normalized.split(' ') {
            let mut tokens = tokenize(raw_word);
            // Only the last token of a starred word becomes a stem
            let stem = if raw_word.ends_with('*') { tokens.pop() } else { None };
            words.extend(tokens.into_iter().map(PatternWord::Exact));
            words.extend(stem.map(PatternWord::Stem));
        }

        if words.is_empty() {
            return None;
        }

        Some(Pattern {
            source: source.to_string(),
            words,
        })
    }

    /// Check if the pattern occurs as a contiguous token window
    pub fn matches_tokens(&self, tokens: &[String]) -> bool {
        self.find_in(tokens).is_some()
    }

    /// Index of the first token window the pattern matches
    pub fn find_in(&self, tokens: &[String]) -> Option<usize> {
        if self.words.len() > tokens.len() {
            return None;
        }
        (0..=tokens.len() - self.words.len()).find(|&start| {
            self.words
                .iter()
                .zip(&tokens[start..])
                .all(|(word, token)| word.matches(token))
        })
    }

    /// Check if the pattern matches the start of the token stream
    pub fn matches_prefix(&self, tokens: &[String]) -> bool {
        self.find_in(tokens) == Some(0)
    }

    pub fn matches(&self, utterance: &Utterance) -> bool {
        self.matches_tokens(&utterance.tokens)
    }

    /// Check if the pattern covers the whole utterance exactly
    pub fn matches_exactly(&self, tokens: &[String]) -> bool {
        self.words.len() == tokens.len() && self.matches_prefix(tokens)
    }

    /// Number of matchable characters (used for longest-match tie-breaks)
    pub fn weight(&self) -> usize {
        self.words.iter().map(PatternWord::len).sum()
    }
}

// ============================================================================
// KEYWORD SET
// ============================================================================

/// Unordered set of patterns: matches if any pattern matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet {
    patterns: Vec<Pattern>,
}

impl KeywordSet {
    pub fn new<S: AsRef<str>>(sources: &[S]) -> Self {
        KeywordSet {
            patterns: sources
                .iter()
                .filter_map(|s| Pattern::parse(s.as_ref()))
                .collect(),
        }
    }

    pub fn matches(&self, utterance: &Utterance) -> bool {
        self.patterns.iter().any(|p| p.matches(utterance))
    }

    /// First pattern (in table order) that matches
    pub fn first_match(&self, utterance: &Utterance) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.matches(utterance))
    }

    /// Any pattern matches at the very start of the utterance
    pub fn matches_prefix(&self, utterance: &Utterance) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_prefix(&utterance.tokens))
    }

    /// Any pattern covers the whole utterance
    pub fn matches_exactly(&self, utterance: &Utterance) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_exactly(&utterance.tokens))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

// ============================================================================
// RULE TABLE
// ============================================================================

/// One row of an ordered rule table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordRule<T> {
    /// Value produced when the rule fires
    pub value: T,

    /// Keywords (see [`Pattern`] for the syntax)
    pub keywords: Vec<String>,

    /// Priority (higher = applied first). Equal priorities keep table order.
    #[serde(default)]
    pub priority: i32,
}

/// Ordered list of (keyword set, value) pairs; first match wins.
#[derive(Debug, Clone)]
pub struct RuleTable<T> {
    rules: Vec<(KeywordSet, T)>,
}

impl<T: Clone> RuleTable<T> {
    /// Create an empty table
    pub fn new() -> Self {
        RuleTable { rules: Vec::new() }
    }

    /// Build from rows, sorted by priority (stable, so file order breaks ties)
    pub fn from_rules(mut rules: Vec<KeywordRule<T>>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        RuleTable {
            rules: rules
                .into_iter()
                .map(|r| (KeywordSet::new(&r.keywords), r.value))
                .collect(),
        }
    }

    /// Append a rule at the lowest precedence
    pub fn push<S: AsRef<str>>(&mut self, keywords: &[S], value: T) {
        self.rules.push((KeywordSet::new(keywords), value));
    }

    /// Value of the first rule whose keywords match
    pub fn classify(&self, utterance: &Utterance) -> Option<T> {
        self.rules
            .iter()
            .find(|(set, _)| set.matches(utterance))
            .map(|(_, value)| value.clone())
    }

    /// Get number of rules loaded
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl<T: Clone> Default for RuleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
