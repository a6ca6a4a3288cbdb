// 📒 Ledger Model
// Committed entries, in-progress entries and report requests

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Only currency handled by the ledger
pub const CURRENCY: &str = "EUR";

/// Category assigned when no rule or merchant mapping applies
pub const UNCATEGORIZED: &str = "uncategorized";

// ============================================================================
// ENTRY TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Money going out
    Expense,

    /// Money coming in
    Income,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Expense => "expense",
            EntryType::Income => "income",
        }
    }

    /// Greek display name used in replies
    pub fn label(&self) -> &'static str {
        match self {
            EntryType::Expense => "Έξοδο",
            EntryType::Income => "Έσοδο",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "expense" => Some(EntryType::Expense),
            "income" => Some(EntryType::Income),
            _ => None,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Round to cents
pub fn round_amount(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

// ============================================================================
// LEDGER ENTRY
// ============================================================================

/// A committed ledger line. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Stable identity (UUID)
    pub id: String,
    pub entry_date: NaiveDate,
    pub property_slug: String,
    pub entry_type: EntryType,
    /// Non-negative, rounded to 2 decimals
    pub amount: f64,
    pub currency: String,
    pub category: String,
    pub label: Option<String>,
    /// Originating message(s), one per line
    pub raw_text: String,
}

impl LedgerEntry {
    /// Compute idempotency hash for double-booking detection
    /// NOTE: This is for DEDUPLICATION, not IDENTITY (that is `id`)
    ///
    /// `window` scopes the guard in time (see [`duplicate_window`]): the same
    /// message twice within one window is a duplicate, later it is a new entry.
    pub fn idempotency_hash(&self, conversation_id: &str, caller_id: &str, window: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{:.2}\u{1f}{}",
            window,
            conversation_id,
            caller_id,
            self.entry_date,
            self.property_slug,
            self.entry_type,
            self.amount,
            self.raw_text
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// Index of the aligned time bucket of length `span` (at least a minute)
/// containing `now`
pub fn duplicate_window(now: DateTime<Utc>, span: chrono::Duration) -> i64 {
    now.timestamp().div_euclid(span.num_seconds().max(60))
}

// ============================================================================
// PENDING ENTRY
// ============================================================================

/// Required slots, in the order they are asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Amount,
    Property,
    Type,
}

/// Partially filled entry awaiting more turns from the same caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub entry_date: Option<NaiveDate>,
    pub property_slug: Option<String>,
    pub entry_type: Option<EntryType>,
    pub amount: Option<f64>,
    pub category: String,
    pub label: Option<String>,
    pub raw_text: String,

    /// Optimistic concurrency version (0 = never stored)
    #[serde(default)]
    pub version: i64,

    /// Last time a turn touched this entry (TTL)
    pub updated_at: DateTime<Utc>,
}

impl PendingEntry {
    pub fn new(now: DateTime<Utc>) -> Self {
        PendingEntry {
            entry_date: None,
            property_slug: None,
            entry_type: None,
            amount: None,
            category: UNCATEGORIZED.to_string(),
            label: None,
            raw_text: String::new(),
            version: 0,
            updated_at: now,
        }
    }

    /// Append a message to the audit trail, skipping exact repeats
    pub fn append_raw(&mut self, message: &str) {
        let message = message.trim();
        if message.is_empty() || self.raw_text.lines().any(|l| l == message) {
            return;
        }
        if !self.raw_text.is_empty() {
            self.raw_text.push('\n');
        }
        self.raw_text.push_str(message);
    }

    pub fn has_category(&self) -> bool {
        self.category != UNCATEGORIZED
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.updated_at > ttl
    }
}

/// Identifies one caller inside one conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingKey {
    pub conversation_id: String,
    pub caller_id: String,
}

impl PendingKey {
    pub fn new(conversation_id: &str, caller_id: &str) -> Self {
        PendingKey {
            conversation_id: conversation_id.to_string(),
            caller_id: caller_id.to_string(),
        }
    }
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.conversation_id, self.caller_id)
    }
}

// ============================================================================
// REPORT REQUEST
// ============================================================================

/// Parsed report query. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub entry_type: Option<EntryType>,
    pub property_slug: Option<String>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

impl ReportRequest {
    /// Build a request, swapping the bounds if given out of order
    pub fn new(
        entry_type: Option<EntryType>,
        property_slug: Option<String>,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Self {
        let (date_from, date_to) = if date_from <= date_to {
            (date_from, date_to)
        } else {
            (date_to, date_from)
        };
        ReportRequest {
            entry_type,
            property_slug,
            date_from,
            date_to,
        }
    }
}

// ============================================================================
// MERCHANT MAPPING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantMapping {
    /// Normalized token
    pub token: String,
    pub category: String,
}

// ============================================================================
// TESTS
// ============================================================================
