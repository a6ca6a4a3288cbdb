// Chat Ledger - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod normalize;  // Text normalizer + Utterance
pub mod rules;      // Keyword patterns and ordered rule tables
pub mod config;     // Vocabulary, Lexicon, EngineConfig, Settings
pub mod model;      // Ledger / pending / report types
pub mod extract;    // Field extractors
pub mod intent;     // Intent classifier
pub mod store;      // Storage traits + Clock
pub mod memory;     // In-memory stores
pub mod db;         // SQLite stores (WAL)
pub mod merchant;   // Merchant memory
pub mod report;     // Report query engine
pub mod export;     // CSV export
pub mod engine;     // Slot-filling engine / dispatcher

#[cfg(feature = "server")]
pub mod server;     // axum HTTP API

// Re-export commonly used types
pub use config::{EngineConfig, Lexicon, Settings, TypePolicy, Vocabulary};
pub use db::{setup_database, SqliteStore};
pub use engine::{ChatLedger, EngineError, Outcome, Reply};
pub use export::{export_csv, write_csv};
pub use extract::{Extraction, InvalidDate};
pub use intent::{classify, Intent};
pub use memory::{MemoryLedger, MemoryMerchantStore, MemoryPendingStore};
pub use merchant::MerchantMemory;
pub use model::{
    EntryType, LedgerEntry, MerchantMapping, PendingEntry, PendingKey, ReportRequest, Slot,
};
pub use normalize::{normalize, Utterance};
pub use report::{ExportQuery, RangeSource, ReportEngine, ReportReply, ReportSummary};
pub use store::{
    Clock, FixedClock, InsertOutcome, Ledger, LedgerFilter, MerchantStore, PendingStore,
    StoreError, SystemClock,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
