//! Cross-source deduplication.
//!
//! Two items are the same listing when they share an origin
//! (`source:external_id`) or a composite key built from the normalized
//! title, company and location (category for offers). The richer item
//! survives in the position of the first one seen; on a tie the first
//! one is kept.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::item::NormalizedItem;

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap());

/// Lower-case `text` and collapse every run of non-alphanumerics to one space.
pub fn normalize_text(text: &str) -> String {
    NON_ALNUM.replace_all(&text.to_lowercase(), " ").trim().to_string()
}

/// Composite key: `title|company|location-or-category`, each normalized.
pub fn dedup_key(item: &NormalizedItem) -> String {
    let place = item.location.as_deref().or(item.category.as_deref()).unwrap_or("");
    format!(
        "{}|{}|{}",
        normalize_text(&item.title),
        normalize_text(item.company.as_deref().unwrap_or("")),
        normalize_text(place)
    )
}

/// Strict key from the item's origin, when it has an external id.
fn origin_key(item: &NormalizedItem) -> Option<String> {
    let external_id = item.external_id.trim();
    (!external_id.is_empty()).then(|| format!("{}:{}", item.source, external_id))
}

fn has_text(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// One point each for salary text and an application URL.
pub fn richness(item: &NormalizedItem) -> u8 {
    u8::from(has_text(&item.salary)) + u8::from(has_text(&item.application_url))
}

/// Collapse duplicates, preserving the order of first appearance.
pub fn deduplicate(items: Vec<NormalizedItem>) -> Vec<NormalizedItem> {
    let mut kept: Vec<NormalizedItem> = Vec::with_capacity(items.len());
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut by_origin: HashMap<String, usize> = HashMap::new();

    for item in items {
        let key = dedup_key(&item);
        let origin = origin_key(&item);
        let existing = origin.as_ref().and_then(|o| by_origin.get(o)).or_else(|| by_key.get(&key)).copied();

        match existing {
            Some(idx) => {
                by_key.entry(key).or_insert(idx);
                if let Some(origin) = origin {
                    by_origin.entry(origin).or_insert(idx);
                }
                if richness(&item) > richness(&kept[idx]) {
                    tracing::trace!(kept = %item.id, dropped = %kept[idx].id, "duplicate replaced by richer item");
                    kept[idx] = item;
                } else {
                    tracing::trace!(kept = %kept[idx].id, dropped = %item.id, "duplicate dropped");
                }
            }
            None => {
                let idx = kept.len();
                by_key.insert(key, idx);
                if let Some(origin) = origin {
                    by_origin.insert(origin, idx);
                }
                kept.push(item);
            }
        }
    }

    kept
}
