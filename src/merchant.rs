// 🏪 Merchant Memory
// Learned token → category overrides, consulted when the keyword rules
// leave an entry uncategorized.

use std::sync::Arc;
use tracing::{debug, info};

use crate::model::MerchantMapping;
use crate::normalize::{normalize, Utterance};
use crate::store::{MerchantStore, StoreError};

/// Legal-form suffixes that carry no merchant identity
const SUFFIXES: &[&str] = &[
    " αε", " α ε", " οε", " επε", " ικε", " ee", " inc", " ltd", " llc", " corp", " co", ".gr",
    ".com",
];

/// Normalize a merchant token the way it is stored and compared.
///
/// - accents and case folded
/// - store/location codes (`*123`, `#456`) dropped
/// - legal-form suffixes (`ΑΕ`, `ΙΚΕ`, `Ltd`, ...) removed
pub fn normalize_token(raw: &str) -> String {
    let mut normalized = normalize(raw)
        .split(' ')
        .filter_map(|word| match word.strip_prefix(['*', '#']) {
            Some(rest) if rest.chars().all(|c| c.is_ascii_digit()) => None,
            Some(rest) => Some(rest.to_string()),
            None => Some(word.to_string()),
        })
        .collect::<Vec<_>>()
        .join(" ");

    for suffix in SUFFIXES {
        if normalized.len() > suffix.len() && normalized.ends_with(suffix) {
            normalized.truncate(normalized.len() - suffix.len());
        }
    }

    normalized.trim().to_string()
}

pub struct MerchantMemory {
    store: Arc<dyn MerchantStore>,
}

impl MerchantMemory {
    pub fn new(store: Arc<dyn MerchantStore>) -> Self {
        MerchantMemory { store }
    }

    /// Category of the longest stored token contained in the message.
    /// Equal lengths keep storage order.
    pub fn guess(&self, utterance: &Utterance) -> Result<Option<String>, StoreError> {
        let mappings = self.store.get_all()?;

        let mut best: Option<&MerchantMapping> = None;
        for mapping in &mappings {
            if mapping.token.is_empty() || !utterance.normalized.contains(mapping.token.as_str()) {
                continue;
            }
            let longer = best.map_or(true, |b| {
                mapping.token.chars().count() > b.token.chars().count()
            });
            if longer {
                best = Some(mapping);
            }
        }

        if let Some(m) = best {
            debug!("Merchant memory: '{}' → {}", m.token, m.category);
        }
        Ok(best.map(|m| m.category.clone()))
    }

    /// Remember `token → category` (last write wins). Returns `None` when the
    /// token is empty after normalization.
    pub fn set(&self, token: &str, category: &str) -> Result<Option<MerchantMapping>, StoreError> {
        let token = normalize_token(token);
        let category = category.trim().to_lowercase();
        if token.is_empty() || category.is_empty() {
            return Ok(None);
        }

        self.store.upsert(&token, &category)?;
        info!("Merchant memory updated: '{}' → {}", token, category);

        Ok(Some(MerchantMapping { token, category }))
    }

    pub fn all(&self) -> Result<Vec<MerchantMapping>, StoreError> {
        self.store.get_all()
    }
}
