// 💾 SQLite Storage
// One connection behind a mutex implements all three storage traits.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::model::{EntryType, LedgerEntry, MerchantMapping, PendingEntry, PendingKey};
use crate::store::{
    poisoned, InsertOutcome, Ledger, LedgerFilter, MerchantStore, PendingStore, StoreError,
};

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Ledger (committed entries, append-only apart from explicit deletes)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_entries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_uuid TEXT UNIQUE NOT NULL,
            idempotency_hash TEXT UNIQUE NOT NULL,
            entry_date TEXT NOT NULL,
            property_slug TEXT NOT NULL,
            entry_type TEXT NOT NULL,
            amount REAL NOT NULL,
            currency TEXT NOT NULL,
            category TEXT NOT NULL,
            label TEXT,
            raw_text TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Pending entries (one row per conversation + caller)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pending_entries (
            conversation_id TEXT NOT NULL,
            caller_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            version INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (conversation_id, caller_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Merchant memory
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS merchant_memory (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            token TEXT UNIQUE NOT NULL,
            category TEXT NOT NULL,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ledger_date ON ledger_entries(entry_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ledger_property ON ledger_entries(property_slug)",
        [],
    )?;

    Ok(())
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database: {:?}", path.as_ref()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn).context("Failed to set up database schema")?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(poisoned)
    }

    /// Number of committed entries
    pub fn entry_count(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM ledger_entries", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Row as stored, before decoding dates and enums
struct LedgerRow {
    id: String,
    entry_date: String,
    property_slug: String,
    entry_type: String,
    amount: f64,
    currency: String,
    category: String,
    label: Option<String>,
    raw_text: String,
}

impl LedgerRow {
    fn into_entry(self) -> Result<LedgerEntry, StoreError> {
        let entry_date = NaiveDate::parse_from_str(&self.entry_date, DATE_FORMAT)
            .map_err(|e| StoreError::Corrupt(format!("entry {} date: {}", self.id, e)))?;
        let entry_type = EntryType::parse(&self.entry_type).ok_or_else(|| {
            StoreError::Corrupt(format!("entry {} type: {}", self.id, self.entry_type))
        })?;

        Ok(LedgerEntry {
            id: self.id,
            entry_date,
            property_slug: self.property_slug,
            entry_type,
            amount: self.amount,
            currency: self.currency,
            category: self.category,
            label: self.label,
            raw_text: self.raw_text,
        })
    }
}

impl Ledger for SqliteStore {
    fn insert(
        &self,
        entry: &LedgerEntry,
        idempotency_hash: &str,
    ) -> Result<InsertOutcome, StoreError> {
        let conn = self.lock()?;

        let result = conn.execute(
            "INSERT INTO ledger_entries (
                entry_uuid, idempotency_hash, entry_date, property_slug, entry_type,
                amount, currency, category, label, raw_text
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.id,
                idempotency_hash,
                entry.entry_date.format(DATE_FORMAT).to_string(),
                entry.property_slug,
                entry.entry_type.as_str(),
                entry.amount,
                entry.currency,
                entry.category,
                entry.label,
                entry.raw_text,
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                debug!("Duplicate ledger entry skipped: {}", idempotency_hash);
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut sql = String::from(
            "SELECT entry_uuid, entry_date, property_slug, entry_type, amount,
                    currency, category, label, raw_text
             FROM ledger_entries
             WHERE 1 = 1",
        );
        let mut args: Vec<String> = Vec::new();

        if let Some(property) = &filter.property_slug {
            args.push(property.clone());
            sql.push_str(&format!(" AND property_slug = ?{}", args.len()));
        }
        if let Some(entry_type) = filter.entry_type {
            args.push(entry_type.as_str().to_string());
            sql.push_str(&format!(" AND entry_type = ?{}", args.len()));
        }
        if let Some(from) = filter.date_from {
            args.push(from.format(DATE_FORMAT).to_string());
            sql.push_str(&format!(" AND entry_date >= ?{}", args.len()));
        }
        if let Some(to) = filter.date_to {
            args.push(to.format(DATE_FORMAT).to_string());
            sql.push_str(&format!(" AND entry_date <= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY entry_date, seq");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok(LedgerRow {
                    id: row.get(0)?,
                    entry_date: row.get(1)?,
                    property_slug: row.get(2)?,
                    entry_type: row.get(3)?,
                    amount: row.get(4)?,
                    currency: row.get(5)?,
                    category: row.get(6)?,
                    label: row.get(7)?,
                    raw_text: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(LedgerRow::into_entry).collect()
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM ledger_entries WHERE entry_uuid = ?1", [id])?;
        Ok(removed > 0)
    }
}

impl PendingStore for SqliteStore {
    fn get(&self, key: &PendingKey) -> Result<Option<PendingEntry>, StoreError> {
        let conn = self.lock()?;

        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT payload, version FROM pending_entries
                 WHERE conversation_id = ?1 AND caller_id = ?2",
                params![key.conversation_id, key.caller_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((payload, version)) => {
                let mut entry: PendingEntry = serde_json::from_str(&payload)?;
                entry.version = version;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn upsert(&self, key: &PendingKey, entry: &PendingEntry) -> Result<PendingEntry, StoreError> {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock before the version read
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored_version: i64 = tx
            .query_row(
                "SELECT version FROM pending_entries
                 WHERE conversation_id = ?1 AND caller_id = ?2",
                params![key.conversation_id, key.caller_id],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);

        if stored_version != entry.version {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        let mut stored = entry.clone();
        stored.version = stored_version + 1;
        let payload = serde_json::to_string(&stored)?;

        tx.execute(
            "INSERT INTO pending_entries (conversation_id, caller_id, payload, version, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(conversation_id, caller_id) DO UPDATE SET
                payload = excluded.payload,
                version = excluded.version,
                updated_at = excluded.updated_at",
            params![
                key.conversation_id,
                key.caller_id,
                payload,
                stored.version,
                stored.updated_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        Ok(stored)
    }

    fn take(&self, key: &PendingKey, expected_version: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;

        let claimed = if expected_version == 0 {
            // Nothing may be stored; claiming an absent row is a read
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT version FROM pending_entries
                     WHERE conversation_id = ?1 AND caller_id = ?2",
                    params![key.conversation_id, key.caller_id],
                    |row| row.get(0),
                )
                .optional()?;
            exists.is_none()
        } else {
            let removed = conn.execute(
                "DELETE FROM pending_entries
                 WHERE conversation_id = ?1 AND caller_id = ?2 AND version = ?3",
                params![key.conversation_id, key.caller_id, expected_version],
            )?;
            removed == 1
        };

        if claimed {
            Ok(())
        } else {
            Err(StoreError::Conflict {
                key: key.to_string(),
            })
        }
    }

    fn clear(&self, key: &PendingKey) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM pending_entries WHERE conversation_id = ?1 AND caller_id = ?2",
            params![key.conversation_id, key.caller_id],
        )?;
        Ok(())
    }
}

impl MerchantStore for SqliteStore {
    fn get_all(&self) -> Result<Vec<MerchantMapping>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT token, category FROM merchant_memory ORDER BY seq")?;

        let mappings = stmt
            .query_map([], |row| {
                Ok(MerchantMapping {
                    token: row.get(0)?,
                    category: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(mappings)
    }

    fn upsert(&self, token: &str, category: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO merchant_memory (token, category) VALUES (?1, ?2)
             ON CONFLICT(token) DO UPDATE SET
                category = excluded.category,
                updated_at = CURRENT_TIMESTAMP",
            params![token, category],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CURRENCY;
    use chrono::Utc;

    fn create_test_entry(id: &str, day: u32, amount: f64, entry_type: EntryType) -> LedgerEntry {
        LedgerEntry {
            id: id.to_string(),
            entry_date: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            property_slug: "vourvourou".to_string(),
            entry_type,
            amount,
            currency: CURRENCY.to_string(),
            category: "utilities".to_string(),
            label: Some("Πλήρωσα νερό".to_string()),
            raw_text: "Πλήρωσα νερό".to_string(),
        }
    }

    #[test]
    fn test_entry_round_trip_is_lossless() {
        let store = SqliteStore::open_in_memory().unwrap();
        let entry = create_test_entry("e-1", 5, 20.05, EntryType::Expense);

        let hash = entry.idempotency_hash("ledger", "c", 0);
        let outcome = Ledger::insert(&store, &entry, &hash).unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let listed = store.list(&LedgerFilter::default()).unwrap();
        assert_eq!(listed, vec![entry]);
    }

    #[test]
    fn test_idempotency_insert_twice() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = create_test_entry("e-1", 5, 20.0, EntryType::Expense);
        let mut retry = first.clone();
        retry.id = "e-2".to_string();

        let hash = first.idempotency_hash("ledger", "c", 0);
        assert_eq!(Ledger::insert(&store, &first, &hash).unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            Ledger::insert(&store, &retry, &retry.idempotency_hash("ledger", "c", 0)).unwrap(),
            InsertOutcome::Duplicate,
            "Same content from the same caller should not be booked twice"
        );
        assert_eq!(store.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_list_filters_and_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let entries = vec![
            create_test_entry("a", 9, 10.0, EntryType::Expense),
            create_test_entry("b", 6, 11.0, EntryType::Income),
            create_test_entry("c", 6, 12.0, EntryType::Expense),
            create_test_entry("d", 7, 13.0, EntryType::Expense),
        ];
        for (i, e) in entries.iter().enumerate() {
            Ledger::insert(&store, e, &format!("h{}", i)).unwrap();
        }

        let filter = LedgerFilter {
            entry_type: Some(EntryType::Expense),
            date_from: NaiveDate::from_ymd_opt(2026, 1, 6),
            date_to: NaiveDate::from_ymd_opt(2026, 1, 8),
            ..Default::default()
        };
        let ids: Vec<String> = store.list(&filter).unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["c", "d"]);

        let all: Vec<String> = store
            .list(&LedgerFilter::default())
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(all, vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn test_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        let entry = create_test_entry("e-1", 5, 20.0, EntryType::Expense);
        Ledger::insert(&store, &entry, "h").unwrap();

        assert!(store.delete("e-1").unwrap());
        assert!(!store.delete("e-1").unwrap());
        assert_eq!(store.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_pending_optimistic_versioning() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = PendingKey::new("ledger", "device-1");

        let mut pending = PendingEntry::new(Utc::now());
        pending.amount = Some(60.0);
        pending.category = "garden".to_string();

        let stored = PendingStore::upsert(&store, &key, &pending).unwrap();
        assert_eq!(stored.version, 1);

        let loaded = store.get(&key).unwrap().unwrap();
        assert_eq!(loaded, stored);

        // Stale writer (still at version 0) must not overwrite
        let err = PendingStore::upsert(&store, &key, &pending).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        store.clear(&key).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);
    }

    #[test]
    fn test_pending_take_is_compare_and_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = PendingKey::new("ledger", "device-1");

        // Nothing stored: only a claim at version 0 succeeds
        store.take(&key, 0).unwrap();
        assert!(matches!(store.take(&key, 1), Err(StoreError::Conflict { .. })));

        let stored = PendingStore::upsert(&store, &key, &PendingEntry::new(Utc::now())).unwrap();
        assert!(matches!(store.take(&key, 0), Err(StoreError::Conflict { .. })));

        store.take(&key, stored.version).unwrap();
        assert_eq!(store.get(&key).unwrap(), None);

        // Second claim of the same version loses
        assert!(matches!(store.take(&key, stored.version), Err(StoreError::Conflict { .. })));
    }

    #[test]
    fn test_merchant_memory_last_write_wins() {
        let store = SqliteStore::open_in_memory().unwrap();
        MerchantStore::upsert(&store, "lidl", "groceries").unwrap();
        MerchantStore::upsert(&store, "shell", "fuel").unwrap();
        MerchantStore::upsert(&store, "lidl", "supplies").unwrap();

        let all = store.get_all().unwrap();
        assert_eq!(
            all,
            vec![
                MerchantMapping { token: "lidl".to_string(), category: "supplies".to_string() },
                MerchantMapping { token: "shell".to_string(), category: "fuel".to_string() },
            ]
        );
    }

    #[test]
    fn test_reopen_keeps_data() {
        let path = std::env::temp_dir().join(format!("chat-ledger-{}.db", uuid::Uuid::new_v4()));
        {
            let store = SqliteStore::open(&path).unwrap();
            let entry = create_test_entry("e-1", 5, 20.0, EntryType::Income);
            Ledger::insert(&store, &entry, "h").unwrap();
        }
        {
            let store = SqliteStore::open(&path).unwrap();
            assert_eq!(store.entry_count().unwrap(), 1);
        }
        let _ = std::fs::remove_file(&path);
    }
}
