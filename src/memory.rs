// 🧠 In-Memory Stores
// RwLock-guarded implementations of the storage traits. Used by tests and
// by embedders that do not need persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::model::{LedgerEntry, MerchantMapping, PendingEntry, PendingKey};
use crate::store::{
    poisoned, InsertOutcome, Ledger, LedgerFilter, MerchantStore, PendingStore, StoreError,
};

#[derive(Debug, Default)]
pub struct MemoryLedger {
    /// (entry, idempotency hash) in insertion order
    entries: RwLock<Vec<(LedgerEntry, String)>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ledger for MemoryLedger {
    fn insert(
        &self,
        entry: &LedgerEntry,
        idempotency_hash: &str,
    ) -> Result<InsertOutcome, StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;

        if entries
            .iter()
            .any(|(e, hash)| hash == idempotency_hash || e.id == entry.id)
        {
            return Ok(InsertOutcome::Duplicate);
        }

        entries.push((entry.clone(), idempotency_hash.to_string()));
        Ok(InsertOutcome::Inserted)
    }

    fn list(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        let entries = self.entries.read().map_err(poisoned)?;

        let mut matching: Vec<LedgerEntry> = entries
            .iter()
            .map(|(e, _)| e)
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        // Stable: same-day entries keep insertion order
        matching.sort_by_key(|e| e.entry_date);

        Ok(matching)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|(e, _)| e.id != id);
        Ok(entries.len() != before)
    }
}

#[derive(Debug, Default)]
pub struct MemoryPendingStore {
    entries: RwLock<HashMap<PendingKey, PendingEntry>>,
}

impl MemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PendingStore for MemoryPendingStore {
    fn get(&self, key: &PendingKey) -> Result<Option<PendingEntry>, StoreError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn upsert(&self, key: &PendingKey, entry: &PendingEntry) -> Result<PendingEntry, StoreError> {
        // Read-compare-write under one write lock
        let mut entries = self.entries.write().map_err(poisoned)?;

        let stored_version = entries.get(key).map(|e| e.version).unwrap_or(0);
        if stored_version != entry.version {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        let mut stored = entry.clone();
        stored.version = stored_version + 1;
        entries.insert(key.clone(), stored.clone());
        Ok(stored)
    }

    fn take(&self, key: &PendingKey, expected_version: i64) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;

        let stored_version = entries.get(key).map(|e| e.version).unwrap_or(0);
        if stored_version != expected_version {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        entries.remove(key);
        Ok(())
    }

    fn clear(&self, key: &PendingKey) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryMerchantStore {
    mappings: RwLock<Vec<MerchantMapping>>,
}

impl MemoryMerchantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MerchantStore for MemoryMerchantStore {
    fn get_all(&self) -> Result<Vec<MerchantMapping>, StoreError> {
        Ok(self.mappings.read().map_err(poisoned)?.clone())
    }

    fn upsert(&self, token: &str, category: &str) -> Result<(), StoreError> {
        let mut mappings = self.mappings.write().map_err(poisoned)?;

        match mappings.iter_mut().find(|m| m.token == token) {
            Some(existing) => existing.category = category.to_string(),
            None => mappings.push(MerchantMapping {
                token: token.to_string(),
                category: category.to_string(),
            }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryType, CURRENCY};
    use chrono::{NaiveDate, Utc};

    fn entry(id: &str, day: u32) -> LedgerEntry {
        LedgerEntry {
            id: id.to_string(),
            entry_date: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            property_slug: "athens".to_string(),
            entry_type: EntryType::Expense,
            amount: 12.5,
            currency: CURRENCY.to_string(),
            category: "fuel".to_string(),
            label: Some("βενζίνη".to_string()),
            raw_text: format!("βενζίνη {}", id),
        }
    }

    #[test]
    fn test_ledger_orders_by_date_then_insertion() {
        let ledger = MemoryLedger::new();
        ledger.insert(&entry("b", 7), "h1").unwrap();
        ledger.insert(&entry("a", 5), "h2").unwrap();
        ledger.insert(&entry("c", 7), "h3").unwrap();

        let ids: Vec<String> = ledger
            .list(&LedgerFilter::default())
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ledger_rejects_duplicate_hash() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.insert(&entry("a", 5), "same").unwrap(), InsertOutcome::Inserted);
        assert_eq!(ledger.insert(&entry("b", 5), "same").unwrap(), InsertOutcome::Duplicate);
        assert_eq!(ledger.list(&LedgerFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_ledger_delete() {
        let ledger = MemoryLedger::new();
        ledger.insert(&entry("a", 5), "h1").unwrap();
        assert!(ledger.delete("a").unwrap());
        assert!(!ledger.delete("a").unwrap());
        assert!(ledger.list(&LedgerFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_pending_version_check() {
        let store = MemoryPendingStore::new();
        let key = PendingKey::new("ledger", "device-1");
        let fresh = PendingEntry::new(Utc::now());

        let stored = store.upsert(&key, &fresh).unwrap();
        assert_eq!(stored.version, 1);

        // A second writer that also started from "absent" loses
        let err = store.upsert(&key, &fresh).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let again = store.upsert(&key, &stored).unwrap();
        assert_eq!(again.version, 2);

        store.clear(&key).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn test_pending_take_claims_once() {
        let store = MemoryPendingStore::new();
        let key = PendingKey::new("ledger", "device-1");
        let stored = store.upsert(&key, &PendingEntry::new(Utc::now())).unwrap();

        assert!(matches!(store.take(&key, 0), Err(StoreError::Conflict { .. })));
        store.take(&key, stored.version).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);

        let err = store.take(&key, stored.version).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        store.take(&key, 0).unwrap();
    }

    #[test]
    fn test_merchant_upsert_keeps_position() {
        let store = MemoryMerchantStore::new();
        store.upsert("lidl", "groceries").unwrap();
        store.upsert("shell", "fuel").unwrap();
        store.upsert("lidl", "supplies").unwrap();

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].token, "lidl");
        assert_eq!(all[0].category, "supplies");
    }
}
