// 🧭 Intent Classifier
// Pure, per-message decision of what the caller wants. The checks run in a
// fixed order and the first one that holds decides.

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::Lexicon;
use crate::extract::Extraction;
use crate::normalize::Utterance;
use crate::report::resolve_range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Whole message is a greeting → usage hint
    Greeting,
    /// Cancel/reset word → clear pending state
    Cancel,
    /// Report trigger plus a resolvable range
    Report,
    /// Action verb + amount: start over, discarding any pending entry
    NewEntry,
    /// Pending entry exists; merge into it
    Continuation,
    /// No pending entry, but enough signal to start one
    FreshEntry,
    /// Nothing usable
    NotRecognized,
}

impl Intent {
    /// Intents that begin a new pending entry
    pub fn starts_entry(&self) -> bool {
        matches!(self, Intent::NewEntry | Intent::FreshEntry)
    }
}

/// Report vocabulary at the start of the message, or anywhere as a hint word
pub fn is_report_trigger(lexicon: &Lexicon, utterance: &Utterance) -> bool {
    lexicon.report_prefixes.matches_prefix(utterance) || lexicon.report_hints.matches(utterance)
}

/// The whole message is a cancel phrase, or opens with one and carries no
/// amount. "ακύρωση" inside an entry ("τέλος ακύρωσης 20€") is just a word.
pub fn is_cancel(lexicon: &Lexicon, utterance: &Utterance, extraction: &Extraction) -> bool {
    lexicon.cancel.matches_exactly(utterance)
        || (extraction.amount.is_none() && lexicon.cancel.matches_prefix(utterance))
}

pub fn classify(
    lexicon: &Lexicon,
    utterance: &Utterance,
    extraction: &Extraction,
    has_pending: bool,
    today: NaiveDate,
) -> Intent {
    if utterance.is_empty() {
        return Intent::NotRecognized;
    }

    if lexicon.greetings.matches_exactly(utterance) {
        return Intent::Greeting;
    }

    if is_cancel(lexicon, utterance, extraction) {
        return Intent::Cancel;
    }

    if is_report_trigger(lexicon, utterance) && resolve_range(lexicon, utterance, today).is_some() {
        return Intent::Report;
    }

    if extraction.has_action_verb && extraction.amount.is_some() {
        return Intent::NewEntry;
    }

    if has_pending {
        return Intent::Continuation;
    }

    let enough_signal = extraction.amount.is_some()
        && (extraction.property.is_some()
            || extraction.entry_type.is_some()
            || extraction.has_action_verb
            || extraction.has_specific_category());

    if enough_signal {
        Intent::FreshEntry
    } else {
        Intent::NotRecognized
    }
}
