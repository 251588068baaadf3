//! # Rendered-PDF Cache
//!
//! Memoizes the final PDF bytes for a (template, recipient-data) pair so
//! identical submissions skip the render entirely.
//!
//! The key is the template id plus a canonical serialization of the
//! recipient data with keys in lexicographic order, so two semantically
//! identical submissions hash identically regardless of insertion order.
//! The canonical string is used directly as the map key rather than a
//! digest: hits are collision-free by construction, which keeps the
//! byte-identity guarantee trivially true (see DESIGN.md).

use super::TtlStore;
use crate::model::RecipientData;
use log::debug;
use std::time::Duration;

/// Default time a rendered PDF stays valid.
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);
/// Default entry bound. Eviction is plain oldest-first.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// (templateId, recipientData) -> PDF bytes cache.
pub struct PdfCache {
    store: TtlStore<String, Vec<u8>>,
}

impl Default for PdfCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfCache {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_config(ttl: Duration, max_entries: usize) -> Self {
        Self {
            store: TtlStore::new(ttl, max_entries, 1),
        }
    }

    /// Derive the canonical cache key. RecipientData is a sorted map, so
    /// its JSON serialization is already order-independent; the template
    /// id is prefixed with a separator JSON cannot contain.
    pub fn cache_key(template_id: &str, data: &RecipientData) -> String {
        let canonical =
            serde_json::to_string(data).unwrap_or_else(|_| String::from("{}"));
        format!("{template_id}\n{canonical}")
    }

    pub fn get(&self, template_id: &str, data: &RecipientData) -> Option<Vec<u8>> {
        let found = self.store.get(&Self::cache_key(template_id, data));
        debug!(
            "pdf cache {} for template '{template_id}'",
            if found.is_some() { "hit" } else { "miss" }
        );
        found
    }

    pub fn set(&self, template_id: &str, data: &RecipientData, pdf: Vec<u8>) {
        self.store.insert(Self::cache_key(template_id, data), pdf);
    }

    /// Drop every cached render of one template. Used when the template's
    /// design changes and all prior renders go stale at once.
    pub fn invalidate_template(&self, template_id: &str) -> usize {
        let prefix = format!("{template_id}\n");
        self.store.remove_matching(|k| k.starts_with(&prefix))
    }

    /// Drop one exact (template, recipient-data) entry.
    pub fn invalidate_entry(&self, template_id: &str, data: &RecipientData) -> bool {
        self.store.remove(&Self::cache_key(template_id, data))
    }

    /// Combined invalidation for certificate re-issue: the exact entry
    /// plus, defensively, everything under the template.
    pub fn force_invalidate(&self, template_id: &str, data: &RecipientData) {
        self.invalidate_entry(template_id, data);
        self.invalidate_template(template_id);
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> &super::CacheStats {
        self.store.stats()
    }
}
