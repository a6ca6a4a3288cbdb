// 🗄️ Storage Interfaces
// The engine only sees these traits. Backends: `memory` (tests, embedding)
// and `db` (SQLite).

use chrono::{DateTime, Local, NaiveDate, Utc};
use std::sync::RwLock;
use thiserror::Error;

use crate::model::{EntryType, LedgerEntry, MerchantMapping, PendingEntry, PendingKey};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or failing; the request may be retried
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Pending entry changed between read and write
    #[error("pending entry {key} was modified concurrently")]
    Conflict { key: String },

    /// A stored record could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Lock poisoning means another request panicked mid-write
pub(crate) fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Same idempotency hash already stored; nothing written
    Duplicate,
}

/// Optional filters for listing; `None` means "all"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerFilter {
    pub property_slug: Option<String>,
    pub entry_type: Option<EntryType>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl LedgerFilter {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(property) = &self.property_slug {
            if &entry.property_slug != property {
                return false;
            }
        }
        if let Some(entry_type) = self.entry_type {
            if entry.entry_type != entry_type {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if entry.entry_date < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if entry.entry_date > to {
                return false;
            }
        }
        true
    }
}

pub trait Ledger: Send + Sync {
    /// Insert a committed entry unless its idempotency hash is already stored
    fn insert(
        &self,
        entry: &LedgerEntry,
        idempotency_hash: &str,
    ) -> Result<InsertOutcome, StoreError>;

    /// Matching entries ordered by date, then insertion
    fn list(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Remove an entry by id; returns whether it existed
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

// ============================================================================
// PENDING STATE
// ============================================================================

pub trait PendingStore: Send + Sync {
    fn get(&self, key: &PendingKey) -> Result<Option<PendingEntry>, StoreError>;

    /// Write `entry` if the stored version still equals `entry.version`
    /// (0 = nothing stored). Returns the stored copy with the bumped version,
    /// or `StoreError::Conflict`.
    fn upsert(&self, key: &PendingKey, entry: &PendingEntry) -> Result<PendingEntry, StoreError>;

    /// Claim the pending entry for commit: delete it only if the stored
    /// version still equals `expected_version` (0 = nothing may be stored),
    /// otherwise `StoreError::Conflict`.
    fn take(&self, key: &PendingKey, expected_version: i64) -> Result<(), StoreError>;

    fn clear(&self, key: &PendingKey) -> Result<(), StoreError>;
}

// ============================================================================
// MERCHANT MEMORY
// ============================================================================

pub trait MerchantStore: Send + Sync {
    /// All mappings in storage order
    fn get_all(&self) -> Result<Vec<MerchantMapping>, StoreError>;

    /// Insert or replace; keeps the original storage position on replace
    fn upsert(&self, token: &str, category: &str) -> Result<(), StoreError>;
}

// ============================================================================
// CLOCK
// ============================================================================

/// Source of "now" and "today" so tests can pin the calendar
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a fixed instant; can be moved forward
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        FixedClock {
            now: RwLock::new(now),
        }
    }

    /// Noon UTC on the given day
    pub fn on(date: NaiveDate) -> Self {
        let noon = date.and_hms_opt(12, 0, 0).unwrap_or_default();
        FixedClock::new(noon.and_utc())
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.write() {
            *now += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.read().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CURRENCY;

    fn entry(date: (i32, u32, u32), property: &str, entry_type: EntryType) -> LedgerEntry {
        LedgerEntry {
            id: "x".to_string(),
            entry_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            property_slug: property.to_string(),
            entry_type,
            amount: 10.0,
            currency: CURRENCY.to_string(),
            category: "garden".to_string(),
            label: None,
            raw_text: String::new(),
        }
    }

    #[test]
    fn test_filter_bounds_are_inclusive() {
        let filter = LedgerFilter {
            date_from: NaiveDate::from_ymd_opt(2026, 1, 6),
            date_to: NaiveDate::from_ymd_opt(2026, 1, 8),
            ..Default::default()
        };
        assert!(filter.matches(&entry((2026, 1, 6), "athens", EntryType::Expense)));
        assert!(filter.matches(&entry((2026, 1, 8), "athens", EntryType::Income)));
        assert!(!filter.matches(&entry((2026, 1, 9), "athens", EntryType::Expense)));
    }

    #[test]
    fn test_filter_property_and_type() {
        let filter = LedgerFilter {
            property_slug: Some("vourvourou".to_string()),
            entry_type: Some(EntryType::Expense),
            ..Default::default()
        };
        assert!(filter.matches(&entry((2026, 1, 6), "vourvourou", EntryType::Expense)));
        assert!(!filter.matches(&entry((2026, 1, 6), "vourvourou", EntryType::Income)));
        assert!(!filter.matches(&entry((2026, 1, 6), "athens", EntryType::Expense)));
        assert!(LedgerFilter::default().matches(&entry((1999, 1, 1), "athens", EntryType::Income)));
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::on(NaiveDate::from_ymd_opt(2026, 1, 10).unwrap());
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 1, 10).unwrap());
        clock.advance(chrono::Duration::hours(13));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 1, 11).unwrap());
    }
}
