// 🔍 Field Extractors
// Independent detectors over one utterance. Keyword detectors read the
// normalized text, numeric/date detectors read the raw text.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::Lexicon;
use crate::model::{round_amount, EntryType, UNCATEGORIZED};
use crate::normalize::Utterance;

/// Day/month/year that does not exist on the calendar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid calendar date: {day}/{month}/{year}")]
pub struct InvalidDate {
    pub day: u32,
    pub month: u32,
    pub year: i32,
}

// Compiled regex patterns
static DATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4}|\d{2})\b").unwrap());

/// Anything date-shaped, removed before looking for amounts
static DATE_LIKE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{4}-\d{1,2}-\d{1,2}\b|\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b|\b\d{1,2}/\d{1,2}\b").unwrap()
});

static AMOUNT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:€|eur\b)?\s*\b(?P<num>\d{1,3}(?:[.,]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?)\b\s*(?:€|eur(?:o|os)?\b|ευρώ|ευρω)?",
    )
    .unwrap()
});

// ============================================================================
// DETECTORS
// ============================================================================

/// Income keywords are checked first: they are rarer and more specific.
pub fn detect_type(lexicon: &Lexicon, utterance: &Utterance) -> Option<EntryType> {
    if lexicon.income.matches(utterance) {
        Some(EntryType::Income)
    } else if lexicon.expense.matches(utterance) {
        Some(EntryType::Expense)
    } else {
        None
    }
}

/// First property (in registry order) with a matching alias
pub fn detect_property(lexicon: &Lexicon, utterance: &Utterance) -> Option<String> {
    lexicon.property_table.classify(utterance)
}

/// Last currency-shaped number in the text, ignoring date-shaped substrings
pub fn detect_amount(raw: &str) -> Option<f64> {
    let without_dates = DATE_LIKE_PATTERN.replace_all(raw, " ");

    AMOUNT_PATTERN
        .captures_iter(&without_dates)
        .filter_map(|caps| caps.name("num").and_then(|m| parse_number(m.as_str())))
        .last()
        .map(round_amount)
}

/// Parse "20", "20,5", "1.200", "1,250.50" into a value.
///
/// The last separator is decimal when followed by one or two digits; every
/// other separator is thousands grouping.
pub fn parse_number(token: &str) -> Option<f64> {
    let last_sep = token.rfind(['.', ',']);

    let (int_part, frac_part) = match last_sep {
        Some(pos) if token.len() - pos - 1 <= 2 => (&token[..pos], &token[pos + 1..]),
        _ => (token, "0"),
    };

    let digits: String = int_part.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    format!("{}.{}", digits, frac_part).parse::<f64>().ok()
}

/// `D/M/Y` or `D-M-Y` date. Two-digit years are read as 20YY.
pub fn detect_date(raw: &str) -> Result<Option<NaiveDate>, InvalidDate> {
    let Some(caps) = DATE_PATTERN.captures(raw) else {
        return Ok(None);
    };

    let day: u32 = caps[1].parse().unwrap_or(0);
    let month: u32 = caps[2].parse().unwrap_or(0);
    let year: i32 = caps[3].parse().unwrap_or(0);

    make_date(year, month, day).map(Some)
}

fn expand_year(year: i32) -> i32 {
    if year < 100 {
        2000 + year
    } else {
        year
    }
}

fn make_date(year: i32, month: u32, day: u32) -> Result<NaiveDate, InvalidDate> {
    let year = expand_year(year);
    NaiveDate::from_ymd_opt(year, month, day).ok_or(InvalidDate { day, month, year })
}

/// Parse one date token from a report range: ISO `YYYY-MM-DD`, `D/M/Y`,
/// `D-M-Y` or year-less `D/M` (takes `default_year`).
pub fn parse_date_token(token: &str, default_year: i32) -> Result<NaiveDate, InvalidDate> {
    let parts: Vec<&str> = token.split(['/', '-']).collect();
    let num = |s: &str| s.parse::<u32>().unwrap_or(0);

    match parts.as_slice() {
        [y, m, d] if y.len() == 4 => make_date(y.parse().unwrap_or(0), num(m), num(d)),
        [d, m, y] => make_date(y.parse().unwrap_or(0), num(m), num(d)),
        [d, m] => make_date(default_year, num(m), num(d)),
        _ => Err(InvalidDate {
            day: 0,
            month: 0,
            year: default_year,
        }),
    }
}

/// First matching category rule, else `uncategorized`
pub fn detect_category(lexicon: &Lexicon, utterance: &Utterance) -> String {
    lexicon
        .categories
        .classify(utterance)
        .unwrap_or_else(|| UNCATEGORIZED.to_string())
}

/// The trimmed message as a free-text label, unless it carries nothing
/// descriptive (no letters, a noise word, or a lone property alias).
pub fn extract_label(lexicon: &Lexicon, utterance: &Utterance) -> Option<String> {
    if !utterance.raw.chars().any(char::is_alphabetic) {
        return None;
    }
    if lexicon.label_noise.matches_exactly(utterance) {
        return None;
    }
    if utterance.tokens.len() == 1 && lexicon.property_aliases.matches_exactly(utterance) {
        return None;
    }
    Some(utterance.raw.clone())
}

/// Month of the year named in the text (1-12)
pub fn detect_month(lexicon: &Lexicon, utterance: &Utterance) -> Option<u32> {
    lexicon.months.classify(utterance)
}

/// Four-digit year token (19xx / 20xx) anywhere in the text
pub fn detect_year(utterance: &Utterance) -> Option<i32> {
    utterance
        .tokens
        .iter()
        .filter(|t| t.len() == 4 && (t.starts_with("19") || t.starts_with("20")))
        .find_map(|t| t.parse().ok())
}

/// Keep the year only if it is plausible relative to `today`
pub fn plausible_year(year: i32, today: NaiveDate) -> bool {
    (today.year() - 50..=today.year() + 50).contains(&year)
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Everything the detectors found in one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub entry_type: Option<EntryType>,
    pub property: Option<String>,
    pub amount: Option<f64>,
    pub date: Option<NaiveDate>,
    pub category: String,
    pub label: Option<String>,
    pub has_action_verb: bool,
}

impl Extraction {
    /// Run every detector. An impossible date counts as no date.
    pub fn from_utterance(lexicon: &Lexicon, utterance: &Utterance) -> Self {
        let date = match detect_date(&utterance.raw) {
            Ok(date) => date,
            Err(e) => {
                warn!("Ignoring date in message: {}", e);
                None
            }
        };

        Extraction {
            entry_type: detect_type(lexicon, utterance),
            property: detect_property(lexicon, utterance),
            amount: detect_amount(&utterance.raw),
            date,
            category: detect_category(lexicon, utterance),
            label: extract_label(lexicon, utterance),
            has_action_verb: lexicon.action_verbs.matches(utterance),
        }
    }

    pub fn has_specific_category(&self) -> bool {
        self.category != UNCATEGORIZED
    }
}

// ============================================================================
// TESTS
// ============================================================================
