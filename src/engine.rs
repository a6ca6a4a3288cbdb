// 💬 Slot-Filling Engine
// handle(message, conversation, caller) → reply
//
// classify → merge into pending (or start fresh) → first missing slot →
// ask, or commit the finished entry.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, Lexicon, TypePolicy};
use crate::extract::Extraction;
use crate::intent::{classify, Intent};
use crate::memory::{MemoryLedger, MemoryMerchantStore, MemoryPendingStore};
use crate::merchant::MerchantMemory;
use crate::model::{
    duplicate_window, round_amount, EntryType, LedgerEntry, PendingEntry, PendingKey, Slot,
    CURRENCY,
};
use crate::normalize::Utterance;
use crate::report::{ReportEngine, ReportReply, ReportSummary};
use crate::store::{Clock, InsertOutcome, Ledger, MerchantStore, PendingStore, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether the caller may simply send the same message again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Store(StoreError::Unavailable(_))
                | EngineError::Store(StoreError::Conflict { .. })
        )
    }

    /// Apology shown instead of the raw error
    pub fn user_message(&self) -> &'static str {
        match self {
            EngineError::Store(StoreError::Corrupt(_)) => {
                "⚠️ Συγγνώμη, κάτι πήγε στραβά με τα αποθηκευμένα δεδομένα. Δοκίμασε ξανά αργότερα."
            }
            EngineError::Store(_) => {
                "⚠️ Συγγνώμη, η αποθήκευση δεν είναι διαθέσιμη αυτή τη στιγμή. Στείλε ξανά το μήνυμα σε λίγο."
            }
        }
    }
}

// ============================================================================
// REPLIES
// ============================================================================

/// What a turn did, for callers that need more than the text
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Greeting,
    Cancelled { had_pending: bool },
    AskSlot { slot: Slot },
    Committed { entry: LedgerEntry },
    Duplicate,
    Report { summary: ReportSummary, export_link: String },
    NotRecognized,
    RepeatRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub text: String,
    pub intent: Intent,
    pub outcome: Outcome,
}

impl Reply {
    fn new(intent: Intent, outcome: Outcome, text: impl Into<String>) -> Self {
        Reply {
            text: text.into(),
            intent,
            outcome,
        }
    }

    pub fn export_link(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Report { export_link, .. } => Some(export_link),
            _ => None,
        }
    }
}

const GREETING: &str = "👋 Γεια! Γράψε μια κίνηση, π.χ. «Πλήρωσα νερό Βουρβουρού 20€», \
ή ζήτα αναφορά, π.χ. «Δώσε μου έξοδα από 1/1/2026 έως 31/1/2026».";

const NOT_RECOGNIZED: &str = "🤔 Δεν το αναγνώρισα ως κίνηση. Γράψε ποσό και ακίνητο, \
π.χ. «Πλήρωσα ρεύμα Αθήνα 45€».";

const REPEAT: &str = "🔁 Το μήνυμα συνέπεσε με άλλη αλλαγή. \
Παρακαλώ επανάλαβε το τελευταίο σου μήνυμα.";

// ============================================================================
// ENGINE
// ============================================================================

pub struct ChatLedger {
    lexicon: Arc<Lexicon>,
    config: EngineConfig,
    ledger: Arc<dyn Ledger>,
    pending: Arc<dyn PendingStore>,
    merchants: MerchantMemory,
    reports: ReportEngine,
    clock: Arc<dyn Clock>,
}

impl ChatLedger {
    pub fn new(
        lexicon: Arc<Lexicon>,
        config: EngineConfig,
        ledger: Arc<dyn Ledger>,
        pending: Arc<dyn PendingStore>,
        merchants: Arc<dyn MerchantStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reports =
            ReportEngine::new(lexicon.clone(), ledger.clone(), clock.clone(), config.clone());

        ChatLedger {
            lexicon,
            config,
            ledger,
            pending,
            merchants: MerchantMemory::new(merchants),
            reports,
            clock,
        }
    }

    /// Engine over fresh in-memory stores
    pub fn in_memory(lexicon: Lexicon, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        ChatLedger::new(
            Arc::new(lexicon),
            config,
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryPendingStore::new()),
            Arc::new(MemoryMerchantStore::new()),
            clock,
        )
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn merchants(&self) -> &MerchantMemory {
        &self.merchants
    }

    pub fn reports(&self) -> &ReportEngine {
        &self.reports
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Process one chat message. A pending-state conflict is retried once
    /// with fresh state, then answered with a request to repeat.
    pub fn handle(
        &self,
        message: &str,
        conversation_id: &str,
        caller_id: &str,
    ) -> Result<Reply, EngineError> {
        let key = PendingKey::new(conversation_id, caller_id);
        let utterance = Utterance::new(message);
        let extraction = Extraction::from_utterance(&self.lexicon, &utterance);

        match self.turn(&key, &utterance, &extraction) {
            Err(EngineError::Store(StoreError::Conflict { .. })) => {
                warn!("Pending entry {} changed concurrently, retrying turn", key);
                match self.turn(&key, &utterance, &extraction) {
                    Err(EngineError::Store(StoreError::Conflict { .. })) => {
                        warn!("Pending entry {} still conflicting, asking caller to repeat", key);
                        Ok(Reply::new(Intent::NotRecognized, Outcome::RepeatRequest, REPEAT))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Report flow on its own (no intent gate, no pending state)
    pub fn handle_report(
        &self,
        message: &str,
        conversation_id: &str,
    ) -> Result<ReportReply, EngineError> {
        Ok(self.reports.handle_report(message, conversation_id)?)
    }

    fn turn(
        &self,
        key: &PendingKey,
        utterance: &Utterance,
        extraction: &Extraction,
    ) -> Result<Reply, EngineError> {
        let now = self.clock.now();
        let pending = self.load_pending(key)?;
        let intent = classify(
            &self.lexicon,
            utterance,
            extraction,
            pending.is_some(),
            self.clock.today(),
        );
        debug!("Intent for {}: {:?} (pending: {})", key, intent, pending.is_some());

        match intent {
            Intent::Greeting => Ok(Reply::new(intent, Outcome::Greeting, GREETING)),

            Intent::Cancel => {
                let had_pending = pending.is_some();
                if had_pending {
                    self.pending.clear(key)?;
                    info!("Pending entry {} cancelled", key);
                }
                let text = if had_pending {
                    "🗑️ Η εκκρεμής καταχώρηση ακυρώθηκε."
                } else {
                    "👌 Δεν υπάρχει εκκρεμής καταχώρηση."
                };
                Ok(Reply::new(intent, Outcome::Cancelled { had_pending }, text))
            }

            Intent::Report => {
                let report = self.reports.handle_utterance(utterance, &key.conversation_id)?;
                Ok(Reply::new(
                    intent,
                    Outcome::Report {
                        summary: report.summary,
                        export_link: report.export_link,
                    },
                    report.text,
                ))
            }

            Intent::NewEntry | Intent::FreshEntry => {
                let mut entry = PendingEntry::new(now);
                if let Some(previous) = &pending {
                    info!("Discarding pending entry {} for a new explicit entry", key);
                    // Carry the version so the replacement is not seen as a conflict
                    entry.version = previous.version;
                }
                self.merge(&mut entry, utterance, extraction, now);
                self.advance(intent, key, entry)
            }

            Intent::Continuation => match pending {
                Some(mut entry) => {
                    self.merge(&mut entry, utterance, extraction, now);
                    self.advance(intent, key, entry)
                }
                None => Ok(Reply::new(
                    Intent::NotRecognized,
                    Outcome::NotRecognized,
                    NOT_RECOGNIZED,
                )),
            },

            Intent::NotRecognized => Ok(Reply::new(intent, Outcome::NotRecognized, NOT_RECOGNIZED)),
        }
    }

    /// Stored pending entry, unless it has outlived the TTL
    fn load_pending(&self, key: &PendingKey) -> Result<Option<PendingEntry>, EngineError> {
        match self.pending.get(key)? {
            Some(entry) if entry.is_expired(self.clock.now(), self.config.pending_ttl()) => {
                debug!("Pending entry {} expired", key);
                self.pending.clear(key)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Fill empty slots only. A specific category replaces an existing one.
    fn merge(
        &self,
        entry: &mut PendingEntry,
        utterance: &Utterance,
        extraction: &Extraction,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        if entry.entry_type.is_none() {
            entry.entry_type = extraction.entry_type;
        }
        if entry.property_slug.is_none() {
            entry.property_slug = extraction.property.clone();
        }
        if entry.amount.is_none() {
            entry.amount = extraction.amount;
        }
        if entry.entry_date.is_none() {
            entry.entry_date = extraction.date;
        }
        if entry.label.is_none() {
            entry.label = extraction.label.clone();
        }
        if extraction.has_specific_category() {
            entry.category = extraction.category.clone();
        }
        entry.append_raw(&utterance.raw);
        entry.updated_at = now;
    }

    /// Type to commit with: explicit, else per policy once an amount exists
    fn effective_type(&self, entry: &PendingEntry) -> Option<EntryType> {
        if entry.entry_type.is_some() {
            return entry.entry_type;
        }
        match self.config.type_policy {
            TypePolicy::DefaultExpense if entry.amount.is_some() => Some(
                self.lexicon
                    .implied_types
                    .get(&entry.category)
                    .copied()
                    .unwrap_or(EntryType::Expense),
            ),
            _ => None,
        }
    }

    fn missing_slot(&self, entry: &PendingEntry) -> Option<Slot> {
        if entry.amount.is_none() {
            Some(Slot::Amount)
        } else if entry.property_slug.is_none() {
            Some(Slot::Property)
        } else if self.effective_type(entry).is_none() {
            Some(Slot::Type)
        } else {
            None
        }
    }

    fn question(&self, slot: Slot) -> String {
        match slot {
            Slot::Amount => "💶 Τι ποσό; (π.χ. 35€)".to_string(),
            Slot::Property => format!(
                "🏠 Για ποιο ακίνητο; ({})",
                self.lexicon.property_choices().join(", ")
            ),
            Slot::Type => "↕️ Έσοδο ή έξοδο;".to_string(),
        }
    }

    fn advance(
        &self,
        intent: Intent,
        key: &PendingKey,
        mut entry: PendingEntry,
    ) -> Result<Reply, EngineError> {
        if !entry.has_category() {
            let context = Utterance::new(&entry.raw_text);
            if let Some(category) = self.merchants.guess(&context)? {
                entry.category = category;
            }
        }

        if let Some(slot) = self.missing_slot(&entry) {
            self.pending.upsert(key, &entry)?;
            debug!("Pending entry {} waiting for {:?}", key, slot);
            return Ok(Reply::new(intent, Outcome::AskSlot { slot }, self.question(slot)));
        }

        self.commit(intent, key, entry)
    }

    fn commit(
        &self,
        intent: Intent,
        key: &PendingKey,
        pending: PendingEntry,
    ) -> Result<Reply, EngineError> {
        let entry_type = self.effective_type(&pending);
        let (Some(amount), Some(property_slug), Some(entry_type)) =
            (pending.amount, pending.property_slug.clone(), entry_type)
        else {
            // missing_slot() guarantees these; never write a partial entry
            return Ok(Reply::new(intent, Outcome::NotRecognized, NOT_RECOGNIZED));
        };

        let entry = LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            entry_date: pending.entry_date.unwrap_or_else(|| self.clock.today()),
            property_slug,
            entry_type,
            amount: round_amount(amount),
            currency: CURRENCY.to_string(),
            category: pending.category.clone(),
            label: pending.label.clone(),
            raw_text: pending.raw_text.clone(),
        };
        let window = duplicate_window(self.clock.now(), self.config.pending_ttl());
        let hash = entry.idempotency_hash(&key.conversation_id, &key.caller_id, window);

        // Claim the pending state this turn read; a concurrent turn that got
        // there first turns this into a conflict instead of a second booking
        self.pending.take(key, pending.version)?;

        match self.ledger.insert(&entry, &hash)? {
            InsertOutcome::Inserted => {
                info!(
                    "Committed {} {:.2} {} for {} on {} ({})",
                    entry.entry_type,
                    entry.amount,
                    entry.currency,
                    entry.property_slug,
                    entry.entry_date,
                    entry.category
                );
                let text = self.confirmation(&entry);
                Ok(Reply::new(intent, Outcome::Committed { entry }, text))
            }
            InsertOutcome::Duplicate => {
                info!("Duplicate entry for {} not booked again", key);
                Ok(Reply::new(
                    intent,
                    Outcome::Duplicate,
                    "ℹ️ Αυτή η κίνηση έχει ήδη καταχωρηθεί.",
                ))
            }
        }
    }

    fn confirmation(&self, entry: &LedgerEntry) -> String {
        let mut text = format!(
            "✅ Καταχωρήθηκε: {} {:.2} € | {} | {} | {}",
            entry.entry_type.label(),
            entry.amount,
            self.lexicon.property_name(&entry.property_slug),
            entry.entry_date.format("%d/%m/%Y"),
            entry.category
        );
        if let Some(label) = &entry.label {
            text.push_str(&format!("\n📝 {}", label));
        }
        text
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FixedClock, LedgerFilter};
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 10).unwrap()
    }

    fn engine_with(config: EngineConfig) -> (ChatLedger, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::on(today()));
        let engine = ChatLedger::in_memory(Lexicon::builtin().unwrap(), config, clock.clone());
        (engine, clock)
    }

    fn engine() -> ChatLedger {
        engine_with(EngineConfig::default()).0
    }

    fn committed(reply: &Reply) -> &LedgerEntry {
        match &reply.outcome {
            Outcome::Committed { entry } => entry,
            other => panic!("expected commit, got {:?}", other),
        }
    }

    fn pending(engine: &ChatLedger, caller: &str) -> Option<PendingEntry> {
        engine.pending.get(&PendingKey::new("ledger", caller)).unwrap()
    }

    #[test]
    fn test_single_turn_commit() {
        let e = engine();
        let reply = e
            .handle("Πλήρωσα νερό Βουρβουρού 20€ 05/01/2026", "ledger", "c1")
            .unwrap();
        let entry = committed(&reply);

        assert_eq!(entry.entry_type, EntryType::Expense);
        assert_eq!(entry.property_slug, "vourvourou");
        assert_eq!(entry.amount, 20.0);
        assert_eq!(entry.entry_date, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        assert_eq!(entry.category, "utilities");
        assert!(reply.text.contains("Βουρβουρού"));
        assert_eq!(pending(&e, "c1"), None);
    }

    #[test]
    fn test_asks_for_property_only() {
        let e = engine();
        let reply = e.handle("Πλήρωσα 35€", "ledger", "c1").unwrap();

        assert_eq!(reply.outcome, Outcome::AskSlot { slot: Slot::Property });
        let p = pending(&e, "c1").unwrap();
        assert_eq!(p.amount, Some(35.0));
        assert_eq!(p.entry_type, Some(EntryType::Expense));
    }

    #[test]
    fn test_amount_asked_first() {
        let e = engine();
        let key = PendingKey::new("ledger", "c1");
        e.pending.upsert(&key, &PendingEntry::new(e.clock.now())).unwrap();

        let reply = e.handle("Αθήνα", "ledger", "c1").unwrap();
        assert_eq!(reply.intent, Intent::Continuation);
        assert_eq!(reply.outcome, Outcome::AskSlot { slot: Slot::Amount });
        assert_eq!(pending(&e, "c1").unwrap().property_slug.as_deref(), Some("athens"));
    }

    #[test]
    fn test_two_turn_merge_keeps_amount_and_category() {
        let e = engine();
        let first = e.handle("60€ κήπο", "ledger", "c1").unwrap();
        assert_eq!(first.outcome, Outcome::AskSlot { slot: Slot::Property });

        let second = e.handle("Βουρβουρού", "ledger", "c1").unwrap();
        let entry = committed(&second);
        assert_eq!(entry.amount, 60.0);
        assert_eq!(entry.category, "garden");
        assert_eq!(entry.property_slug, "vourvourou");
        assert_eq!(entry.entry_type, EntryType::Expense);
        assert_eq!(entry.entry_date, today());
        assert_eq!(entry.raw_text, "60€ κήπο\nΒουρβουρού");
    }

    #[test]
    fn test_callers_are_isolated() {
        let e = engine();
        e.handle("60€ κήπο", "ledger", "phone").unwrap();
        e.handle("Πλήρωσα 35€", "ledger", "laptop").unwrap();

        assert_eq!(pending(&e, "phone").unwrap().amount, Some(60.0));
        assert_eq!(pending(&e, "laptop").unwrap().amount, Some(35.0));
    }

    #[test]
    fn test_new_entry_replaces_pending() {
        let e = engine();
        e.handle("60€ κήπο", "ledger", "c1").unwrap();
        let reply = e.handle("Πλήρωσα ρεύμα 45€", "ledger", "c1").unwrap();

        assert_eq!(reply.intent, Intent::NewEntry);
        let p = pending(&e, "c1").unwrap();
        assert_eq!(p.amount, Some(45.0));
        assert_eq!(p.category, "utilities");
        assert_eq!(p.raw_text, "Πλήρωσα ρεύμα 45€");
    }

    #[test]
    fn test_specific_category_upgrades() {
        let e = engine();
        e.handle("Πλήρωσα 35€", "ledger", "c1").unwrap();
        e.handle("για κηπουρό", "ledger", "c1").unwrap();
        assert_eq!(pending(&e, "c1").unwrap().category, "garden");

        let reply = e.handle("Θεσσαλονίκη", "ledger", "c1").unwrap();
        assert_eq!(committed(&reply).category, "garden");
    }

    #[test]
    fn test_implied_income_category() {
        let e = engine();
        let reply = e.handle("ενοίκιο Αθήνα 450€", "ledger", "c1").unwrap();
        let entry = committed(&reply);
        assert_eq!(entry.entry_type, EntryType::Income);
        assert_eq!(entry.category, "rent");
    }

    #[test]
    fn test_ask_policy_asks_for_type() {
        let (e, _) = engine_with(EngineConfig {
            type_policy: TypePolicy::Ask,
            ..EngineConfig::default()
        });
        let reply = e.handle("60€ κήπο Αθήνα", "ledger", "c1").unwrap();
        assert_eq!(reply.outcome, Outcome::AskSlot { slot: Slot::Type });

        let reply = e.handle("έξοδο", "ledger", "c1").unwrap();
        assert_eq!(committed(&reply).entry_type, EntryType::Expense);
    }

    #[test]
    fn test_later_type_cue_is_kept_under_default_policy() {
        let e = engine();
        e.handle("300€ κήπος", "ledger", "c1").unwrap();
        let reply = e.handle("έσοδο Αθήνα", "ledger", "c1").unwrap();
        assert_eq!(committed(&reply).entry_type, EntryType::Income);
    }

    #[test]
    fn test_merchant_memory_fills_category() {
        let e = engine();
        e.merchants().set("Πλαίσιο", "supplies").unwrap();

        let reply = e.handle("Αγόρασα λάμπες Πλαίσιο Αθήνα 25€", "ledger", "c1").unwrap();
        assert_eq!(committed(&reply).category, "supplies");

        // Rules win over memory
        e.merchants().set("νερό", "groceries").unwrap();
        let reply = e.handle("Πλήρωσα νερό Αθήνα 15€", "ledger", "c1").unwrap();
        assert_eq!(committed(&reply).category, "utilities");
    }

    #[test]
    fn test_duplicate_is_not_booked_twice() {
        let e = engine();
        let msg = "Πλήρωσα νερό Βουρβουρού 20€ 05/01/2026";
        let first = e.handle(msg, "ledger", "c1").unwrap();
        assert!(matches!(first.outcome, Outcome::Committed { .. }));
        assert_eq!(e.handle(msg, "ledger", "c1").unwrap().outcome, Outcome::Duplicate);
        assert_eq!(e.ledger().list(&LedgerFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_identical_entry_later_is_booked() {
        let (e, clock) = engine_with(EngineConfig::default());
        let msg = "Πλήρωσα καθαρισμό Αθήνα 40€ 10/01/2026";
        let first = e.handle(msg, "ledger", "c1").unwrap();
        assert!(matches!(first.outcome, Outcome::Committed { .. }));

        // Second cleaning the same day, well after the first
        clock.advance(chrono::Duration::hours(3));
        let second = e.handle(msg, "ledger", "c1").unwrap();
        assert!(matches!(second.outcome, Outcome::Committed { .. }));
        assert_eq!(e.ledger().list(&LedgerFilter::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_pending_expires() {
        let (e, clock) = engine_with(EngineConfig::default());
        e.handle("60€ κήπο", "ledger", "c1").unwrap();

        clock.advance(chrono::Duration::minutes(31));
        let reply = e.handle("Βουρβουρού", "ledger", "c1").unwrap();
        assert_eq!(reply.outcome, Outcome::NotRecognized);
        assert_eq!(pending(&e, "c1"), None);
    }

    #[test]
    fn test_greeting_and_report_leave_pending_alone() {
        let e = engine();
        e.handle("Πλήρωσα 35€", "ledger", "c1").unwrap();
        let before = pending(&e, "c1");

        assert_eq!(e.handle("Γεια σου", "ledger", "c1").unwrap().outcome, Outcome::Greeting);
        let reply = e.handle("Δώσε μου έξοδα Ιανουαρίου", "ledger", "c1").unwrap();
        assert!(reply.export_link().is_some());
        assert_eq!(pending(&e, "c1"), before);
    }

    /// Pending store that reports a conflict for the first `conflicts` writes
    struct ContendedPending {
        inner: MemoryPendingStore,
        conflicts: std::sync::Mutex<u32>,
    }

    impl PendingStore for ContendedPending {
        fn get(&self, key: &PendingKey) -> Result<Option<PendingEntry>, StoreError> {
            self.inner.get(key)
        }

        fn upsert(
            &self,
            key: &PendingKey,
            entry: &PendingEntry,
        ) -> Result<PendingEntry, StoreError> {
            let mut left = self.conflicts.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(StoreError::Conflict { key: key.to_string() });
            }
            self.inner.upsert(key, entry)
        }

        fn take(&self, key: &PendingKey, expected_version: i64) -> Result<(), StoreError> {
            self.inner.take(key, expected_version)
        }

        fn clear(&self, key: &PendingKey) -> Result<(), StoreError> {
            self.inner.clear(key)
        }
    }

    fn contended_engine(conflicts: u32) -> ChatLedger {
        ChatLedger::new(
            Arc::new(Lexicon::builtin().unwrap()),
            EngineConfig::default(),
            Arc::new(MemoryLedger::new()),
            Arc::new(ContendedPending {
                inner: MemoryPendingStore::new(),
                conflicts: std::sync::Mutex::new(conflicts),
            }),
            Arc::new(MemoryMerchantStore::new()),
            Arc::new(FixedClock::on(today())),
        )
    }

    #[test]
    fn test_conflict_is_retried_once() {
        let e = contended_engine(1);
        let reply = e.handle("Πλήρωσα 35€", "ledger", "c1").unwrap();
        assert_eq!(reply.outcome, Outcome::AskSlot { slot: Slot::Property });
        assert_eq!(pending(&e, "c1").unwrap().amount, Some(35.0));
    }

    #[test]
    fn test_persistent_conflict_asks_to_repeat() {
        let e = contended_engine(2);
        let reply = e.handle("Πλήρωσα 35€", "ledger", "c1").unwrap();
        assert_eq!(reply.outcome, Outcome::RepeatRequest);
        assert_eq!(pending(&e, "c1"), None);
    }

    /// Pending store whose reads can be pinned to an old snapshot, so two
    /// turns see the same version
    struct StaleReadPending {
        inner: MemoryPendingStore,
        pinned: std::sync::Mutex<Option<Option<PendingEntry>>>,
    }

    impl StaleReadPending {
        fn pin(&self, key: &PendingKey) {
            *self.pinned.lock().unwrap() = Some(self.inner.get(key).unwrap());
        }
    }

    impl PendingStore for StaleReadPending {
        fn get(&self, key: &PendingKey) -> Result<Option<PendingEntry>, StoreError> {
            match self.pinned.lock().unwrap().clone() {
                Some(snapshot) => Ok(snapshot),
                None => self.inner.get(key),
            }
        }

        fn upsert(
            &self,
            key: &PendingKey,
            entry: &PendingEntry,
        ) -> Result<PendingEntry, StoreError> {
            self.inner.upsert(key, entry)
        }

        fn take(&self, key: &PendingKey, expected_version: i64) -> Result<(), StoreError> {
            self.inner.take(key, expected_version)
        }

        fn clear(&self, key: &PendingKey) -> Result<(), StoreError> {
            self.inner.clear(key)
        }
    }

    #[test]
    fn test_one_pending_entry_commits_once() {
        let ledger = Arc::new(MemoryLedger::new());
        let pending = Arc::new(StaleReadPending {
            inner: MemoryPendingStore::new(),
            pinned: std::sync::Mutex::new(None),
        });
        let e = ChatLedger::new(
            Arc::new(Lexicon::builtin().unwrap()),
            EngineConfig::default(),
            ledger.clone(),
            pending.clone(),
            Arc::new(MemoryMerchantStore::new()),
            Arc::new(FixedClock::on(today())),
        );

        e.handle("60€ κήπο", "ledger", "c1").unwrap();
        pending.pin(&PendingKey::new("ledger", "c1"));

        // Both turns merge into the same version-1 pending entry
        let first = e.handle("Βουρβουρού", "ledger", "c1").unwrap();
        assert_eq!(committed(&first).property_slug, "vourvourou");

        let second = e.handle("Αθήνα", "ledger", "c1").unwrap();
        assert_eq!(second.outcome, Outcome::RepeatRequest);

        let entries = ledger.list(&LedgerFilter::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, 60.0);
    }

    #[test]
    fn test_single_turn_commit_respects_concurrent_pending() {
        let ledger = Arc::new(MemoryLedger::new());
        let pending = Arc::new(StaleReadPending {
            inner: MemoryPendingStore::new(),
            pinned: std::sync::Mutex::new(Some(None)),
        });
        let e = ChatLedger::new(
            Arc::new(Lexicon::builtin().unwrap()),
            EngineConfig::default(),
            ledger.clone(),
            pending.clone(),
            Arc::new(MemoryMerchantStore::new()),
            Arc::new(FixedClock::on(today())),
        );

        // Stored by another turn after this one read "absent"
        let key = PendingKey::new("ledger", "c1");
        pending.inner.upsert(&key, &PendingEntry::new(e.clock.now())).unwrap();

        let reply = e.handle("Πλήρωσα νερό Βουρβουρού 20€", "ledger", "c1").unwrap();
        assert_eq!(reply.outcome, Outcome::RepeatRequest);
        assert!(ledger.list(&LedgerFilter::default()).unwrap().is_empty());
        assert_eq!(pending.inner.get(&key).unwrap().unwrap().version, 1);
    }

    #[test]
    fn test_storage_errors_are_retryable() {
        let err = EngineError::from(StoreError::Unavailable("down".to_string()));
        assert!(err.is_retryable());
        assert!(err.user_message().contains("Συγγνώμη"));
        assert!(!EngineError::from(StoreError::Corrupt("x".to_string())).is_retryable());
    }
}
