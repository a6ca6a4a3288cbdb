// ⚙️ Configuration - Vocabulary, engine knobs and process settings
//
// Every keyword list the extractors use lives in `Vocabulary` so a
// deployment can swap the property registry or add synonyms with a JSON
// file instead of a rebuild. Keywords are normalized when compiled, so the
// file may use accents and capitals freely.

use anyhow::{Context as AnyhowContext, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::EntryType;
use crate::normalize::normalize;
use crate::rules::{KeywordRule, KeywordSet, RuleTable};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("property registry is empty")]
    NoProperties,

    #[error("duplicate property slug: {0}")]
    DuplicateProperty(String),

    #[error("invalid range pattern: {0}")]
    Pattern(#[from] regex::Error),
}

// ============================================================================
// VOCABULARY (serializable)
// ============================================================================

/// A managed property and the words people use for it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyDef {
    pub slug: String,
    /// Display name used in replies (defaults to the slug)
    #[serde(default)]
    pub name: Option<String>,
    pub aliases: Vec<String>,
}

/// Category rule: first matching rule (by priority, then order) wins
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryRule {
    pub category: String,
    pub keywords: Vec<String>,
    /// Entry type implied by this category when the message names none
    #[serde(default)]
    pub implies: Option<EntryType>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonthNames {
    pub month: u32,
    pub names: Vec<String>,
}

/// All keyword tables. Missing fields in a JSON file fall back to the
/// built-in Greek/English profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Vocabulary {
    pub properties: Vec<PropertyDef>,
    pub income_keywords: Vec<String>,
    pub expense_keywords: Vec<String>,
    pub action_verbs: Vec<String>,
    pub categories: Vec<CategoryRule>,
    pub greetings: Vec<String>,
    pub cancel_keywords: Vec<String>,
    pub report_prefixes: Vec<String>,
    pub report_hints: Vec<String>,
    pub label_noise: Vec<String>,
    pub months: Vec<MonthNames>,
    pub this_month: Vec<String>,
    pub last_month: Vec<String>,
    pub today: Vec<String>,
    pub this_year: Vec<String>,
    pub range_from: Vec<String>,
    pub range_to: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn category(name: &str, keywords: &[&str], implies: Option<EntryType>) -> CategoryRule {
    CategoryRule {
        category: name.to_string(),
        keywords: words(keywords),
        implies,
        priority: 0,
    }
}

fn month(month: u32, names: &[&str]) -> MonthNames {
    MonthNames {
        month,
        names: words(names),
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Vocabulary {
            properties: vec![
                PropertyDef {
                    slug: "vourvourou".to_string(),
                    name: Some("Βουρβουρού".to_string()),
                    aliases: words(&["Βουρβουρού", "Βουρβουρ*", "vourvourou", "σιθωνία"]),
                },
                PropertyDef {
                    slug: "thessaloniki".to_string(),
                    name: Some("Θεσσαλονίκη".to_string()),
                    aliases: words(&[
                        "Θεσσαλονίκη",
                        "Θεσσαλονίκ*",
                        "Σαλονίκ*",
                        "thessaloniki",
                        "saloniki",
                    ]),
                },
                PropertyDef {
                    slug: "athens".to_string(),
                    name: Some("Αθήνα".to_string()),
                    aliases: words(&["Αθήνα", "Αθήν*", "athens", "athina"]),
                },
            ],
            income_keywords: words(&[
                "έσοδ*", "εισόδημα", "εισπράξ*", "εισέπραξ*", "εισπράχθηκ*", "έλαβα", "λάβαμε",
                "πληρώθηκα", "πληρωθήκαμε", "income", "received", "got paid", "payout", "earned",
            ]),
            expense_keywords: words(&[
                "έξοδ*", "πλήρωσ*", "πληρωμή", "πληρωμές", "αγόρασ*", "ψώνισ*", "ξόδεψ*",
                "χρέωση", "χρεώθηκ*", "expense*", "paid", "pay", "bought", "buy", "spent",
                "purchase*", "bill",
            ]),
            action_verbs: words(&[
                "πλήρωσ*", "πληρώθηκ*", "αγόρασ*", "ψώνισ*", "ξόδεψ*", "εισέπραξ*", "εισπράξαμε",
                "έλαβα", "λάβαμε", "χρεώθηκ*", "paid", "pay", "bought", "buy", "spent",
                "received", "receive", "got paid",
            ]),
            categories: vec![
                category(
                    "gambling",
                    &[
                        "στοίχημα", "στοιχήματ*", "ΟΠΑΠ", "opap", "καζίνο", "casino", "λόττο",
                        "lotto", "τζόκερ", "joker", "bet",
                    ],
                    None,
                ),
                category(
                    "utilities",
                    &[
                        "νερό", "νερού", "ΕΥΔΑΠ", "ΔΕΥΑ*", "ρεύμα*", "ΔΕΗ", "ηλεκτρικ*", "internet",
                        "ίντερνετ", "τηλέφων*", "cosmote", "vodafone", "nova", "water",
                        "electricity", "power bill",
                        "φυσικό αέριο",
                    ],
                    None,
                ),
                category(
                    "cleaning",
                    &["καθαρισμ*", "καθαρίστρι*", "καθαριστ*", "cleaning", "cleaner"],
                    None,
                ),
                category(
                    "garden",
                    &["κήπ*", "κηπουρ*", "γκαζόν", "πότισμα", "garden*"],
                    None,
                ),
                category(
                    "maintenance",
                    &[
                        "επισκευ*", "υδραυλικ*", "ηλεκτρολόγ*", "μάστορ*", "βάψιμο", "repair*",
                        "plumber", "maintenance",
                    ],
                    None,
                ),
                category(
                    "taxes",
                    &["εφορία", "φόρο*", "φόρος", "ΕΝΦΙΑ", "δημοτικά τέλη", "tax*"],
                    None,
                ),
                category(
                    "rent",
                    &["ενοίκι*", "νοίκι*", "rent*"],
                    Some(EntryType::Income),
                ),
                category(
                    "booking",
                    &["κράτηση", "κρατήσ*", "booking*", "airbnb"],
                    Some(EntryType::Income),
                ),
                category(
                    "supplies",
                    &["αναλώσιμ*", "σεντόν*", "πετσέτ*", "supplies", "linen*", "towel*"],
                    None,
                ),
                category(
                    "fuel",
                    &["βενζίν*", "καύσιμ*", "πετρέλαι*", "fuel", "diesel"],
                    None,
                ),
                category(
                    "groceries",
                    &[
                        "σούπερ μάρκετ", "σουπερμάρκετ", "super market", "supermarket",
                        "σκλαβενίτ*", "μασούτ*", "lidl", "λιντλ", "τρόφιμ*", "ψώνια",
                        "groceries", "grocery",
                    ],
                    None,
                ),
            ],
            greetings: words(&[
                "γεια", "γεια σου", "γεια σας", "καλημέρα", "καλησπέρα", "χαίρετε", "hello", "hi",
                "hey", "help", "βοήθεια", "start",
            ]),
            cancel_keywords: words(&[
                "ακύρωσ*", "άκυρο", "άστο", "ξέχασέ το", "cancel", "reset", "stop",
            ]),
            report_prefixes: words(&[
                "δώσε μου", "δείξε μου", "θέλω αναφορά", "πόσα", "πόσο", "λίστα", "report",
                "show me", "give me", "how much", "list",
            ]),
            report_hints: words(&[
                "αναφορ*", "σύνολο", "συνολικά", "σύνοψη", "κινήσεις", "report", "summary",
                "export", "csv",
            ]),
            label_noise: words(&[
                "έξοδο", "έξοδα", "έσοδο", "έσοδα", "expense", "income", "πληρωμή", "είσπραξη",
                "ναι", "όχι", "yes", "no", "ok", "οκ", "εντάξει",
            ]),
            months: vec![
                month(1, &["ιανουάρι*", "jan", "january"]),
                month(2, &["φεβρουάρι*", "feb", "february"]),
                month(3, &["μάρτι*", "mar", "march"]),
                month(4, &["απρίλι*", "apr", "april"]),
                month(5, &["μάιος", "μαΐου", "μάη", "may"]),
                month(6, &["ιούνι*", "jun", "june"]),
                month(7, &["ιούλι*", "jul", "july"]),
                month(8, &["αύγουστ*", "aug", "august"]),
                month(9, &["σεπτέμβρ*", "sep", "sept", "september"]),
                month(10, &["οκτώβρ*", "oct", "october"]),
                month(11, &["νοέμβρ*", "nov", "november"]),
                month(12, &["δεκέμβρ*", "dec", "december"]),
            ],
            this_month: words(&[
                "αυτό το μήνα", "αυτόν τον μήνα", "τρέχοντα μήνα", "μήνα", "μήνας", "μηνιαί*",
                "this month", "month", "monthly",
            ]),
            last_month: words(&[
                "προηγούμενο μήνα", "προηγούμενου μήνα", "περασμένο μήνα", "περασμένου μήνα",
                "last month", "previous month",
            ]),
            today: words(&["σήμερα", "today"]),
            this_year: words(&["φέτος", "εφέτος", "this year"]),
            range_from: words(&["από", "from", "since"]),
            range_to: words(&["έως", "μέχρι", "ως", "to", "until", "till"]),
        }
    }
}

impl Vocabulary {
    /// Load vocabulary from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read vocabulary file: {:?}", path.as_ref()))?;

        let vocabulary: Vocabulary =
            serde_json::from_str(&content).context("Failed to parse vocabulary JSON")?;

        Ok(vocabulary)
    }
}

// ============================================================================
// LEXICON (compiled)
// ============================================================================

/// Matching-ready form of a [`Vocabulary`]
#[derive(Debug, Clone)]
pub struct Lexicon {
    pub property_table: RuleTable<String>,
    /// Slugs in registry order
    pub property_slugs: Vec<String>,
    pub property_aliases: KeywordSet,
    pub property_names: HashMap<String, String>,
    pub income: KeywordSet,
    pub expense: KeywordSet,
    pub action_verbs: KeywordSet,
    pub categories: RuleTable<String>,
    pub implied_types: HashMap<String, EntryType>,
    pub greetings: KeywordSet,
    pub cancel: KeywordSet,
    pub report_prefixes: KeywordSet,
    pub report_hints: KeywordSet,
    pub label_noise: KeywordSet,
    pub months: RuleTable<u32>,
    pub this_month: KeywordSet,
    pub last_month: KeywordSet,
    pub today: KeywordSet,
    pub this_year: KeywordSet,
    /// "from X to Y" over normalized text; captures the two date tokens
    pub range_pattern: Regex,
}

/// Date token accepted inside report ranges (ISO, D/M[/Y], D-M-Y)
pub const RANGE_DATE: &str = r"\d{4}-\d{1,2}-\d{1,2}|\d{1,2}/\d{1,2}(?:/\d{2,4})?|\d{1,2}-\d{1,2}-\d{2,4}";

fn alternation(list: &[String]) -> String {
    let mut seen = HashSet::new();
    let mut alts: Vec<String> = list
        .iter()
        .map(|w| normalize(w))
        .filter(|w| !w.is_empty() && seen.insert(w.clone()))
        .map(|w| regex::escape(&w))
        .collect();
    // Longest first so "εως" wins over "ως"
    alts.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
    alts.join("|")
}

impl Lexicon {
    pub fn compile(vocabulary: &Vocabulary) -> std::result::Result<Self, ConfigError> {
        if vocabulary.properties.is_empty() {
            return Err(ConfigError::NoProperties);
        }

        let mut slugs = HashSet::new();
        let mut property_slugs = Vec::new();
        let mut property_names = HashMap::new();
        let mut all_aliases = Vec::new();
        let mut property_rules = Vec::new();
        for p in &vocabulary.properties {
            if !slugs.insert(p.slug.clone()) {
                return Err(ConfigError::DuplicateProperty(p.slug.clone()));
            }
            property_slugs.push(p.slug.clone());
            property_names.insert(
                p.slug.clone(),
                p.name.clone().unwrap_or_else(|| p.slug.clone()),
            );
            all_aliases.extend(p.aliases.iter().cloned());
            property_rules.push(KeywordRule {
                value: p.slug.clone(),
                keywords: p.aliases.clone(),
                priority: 0,
            });
        }

        let categories = RuleTable::from_rules(
            vocabulary
                .categories
                .iter()
                .map(|c| KeywordRule {
                    value: c.category.clone(),
                    keywords: c.keywords.clone(),
                    priority: c.priority,
                })
                .collect(),
        );
        let implied_types = vocabulary
            .categories
            .iter()
            .filter_map(|c| c.implies.map(|t| (c.category.clone(), t)))
            .collect();

        let months = RuleTable::from_rules(
            vocabulary
                .months
                .iter()
                .filter(|m| (1..=12).contains(&m.month))
                .map(|m| KeywordRule {
                    value: m.month,
                    keywords: m.names.clone(),
                    priority: 0,
                })
                .collect(),
        );

        let range_pattern = Regex::new(&format!(
            r"\b(?:{})\s+({d})\s+(?:{})\s+({d})",
            alternation(&vocabulary.range_from),
            alternation(&vocabulary.range_to),
            d = RANGE_DATE,
        ))?;

        Ok(Lexicon {
            property_table: RuleTable::from_rules(property_rules),
            property_slugs,
            property_aliases: KeywordSet::new(&all_aliases),
            property_names,
            income: KeywordSet::new(&vocabulary.income_keywords),
            expense: KeywordSet::new(&vocabulary.expense_keywords),
            action_verbs: KeywordSet::new(&vocabulary.action_verbs),
            categories,
            implied_types,
            greetings: KeywordSet::new(&vocabulary.greetings),
            cancel: KeywordSet::new(&vocabulary.cancel_keywords),
            report_prefixes: KeywordSet::new(&vocabulary.report_prefixes),
            report_hints: KeywordSet::new(&vocabulary.report_hints),
            label_noise: KeywordSet::new(&vocabulary.label_noise),
            months,
            this_month: KeywordSet::new(&vocabulary.this_month),
            last_month: KeywordSet::new(&vocabulary.last_month),
            today: KeywordSet::new(&vocabulary.today),
            this_year: KeywordSet::new(&vocabulary.this_year),
            range_pattern,
        })
    }

    /// Compile the built-in Greek/English profile
    pub fn builtin() -> std::result::Result<Self, ConfigError> {
        Lexicon::compile(&Vocabulary::default())
    }

    /// Display name of a property slug
    pub fn property_name<'a>(&'a self, slug: &'a str) -> &'a str {
        self.property_names
            .get(slug)
            .map(String::as_str)
            .unwrap_or(slug)
    }

    /// Display names of all properties, in registry order
    pub fn property_choices(&self) -> Vec<&str> {
        self.property_slugs
            .iter()
            .map(|slug| self.property_name(slug))
            .collect()
    }

    pub fn is_known_property(&self, slug: &str) -> bool {
        self.property_names.contains_key(slug)
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// What to do when a message names no entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypePolicy {
    /// Category-implied type, else expense (once an amount is known)
    DefaultExpense,
    /// Ask the caller
    Ask,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub type_policy: TypePolicy,
    /// Pending entries idle longer than this are discarded
    pub pending_ttl_minutes: i64,
    /// Categories listed in report summaries
    pub top_categories: usize,
    /// Path the export link points at
    pub export_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            type_policy: TypePolicy::DefaultExpense,
            pending_ttl_minutes: 30,
            top_categories: 5,
            export_path: "/api/export".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load engine settings from a JSON file; missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read engine config file: {:?}", path.as_ref()))?;

        serde_json::from_str(&content).context("Failed to parse engine config JSON")
    }

    pub fn pending_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pending_ttl_minutes)
    }
}

// ============================================================================
// PROCESS SETTINGS
// ============================================================================

/// Settings for the CLI and server binaries, read from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    pub bind_addr: String,
    pub vocabulary_path: Option<PathBuf>,
    pub engine_config_path: Option<PathBuf>,
    pub conversation_id: String,
}

impl Settings {
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        Settings {
            db_path: var("CHAT_LEDGER_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("chat-ledger.db")),
            bind_addr: var("CHAT_LEDGER_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            vocabulary_path: var("CHAT_LEDGER_VOCAB").map(PathBuf::from),
            engine_config_path: var("CHAT_LEDGER_ENGINE").map(PathBuf::from),
            conversation_id: var("CHAT_LEDGER_CONVERSATION")
                .unwrap_or_else(|| "ledger".to_string()),
        }
    }

    /// Vocabulary from `CHAT_LEDGER_VOCAB`, or the built-in one
    pub fn load_lexicon(&self) -> Result<Lexicon> {
        let vocabulary = match &self.vocabulary_path {
            Some(path) => Vocabulary::from_file(path)?,
            None => Vocabulary::default(),
        };
        Lexicon::compile(&vocabulary).context("Failed to compile vocabulary")
    }

    /// Engine settings from `CHAT_LEDGER_ENGINE`, or the defaults
    pub fn load_engine_config(&self) -> Result<EngineConfig> {
        match &self.engine_config_path {
            Some(path) => EngineConfig::from_file(path),
            None => Ok(EngineConfig::default()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
