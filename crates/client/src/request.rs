//! Search request parameters and cache key derivation.

use std::collections::BTreeMap;

use scout_core::cache::compute_cache_key;
use serde::{Deserialize, Serialize};

use crate::item::ItemKind;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// One search across the enabled sources of a kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free-text query.
    #[serde(default)]
    pub query: String,

    /// Structured filters passed through to adapters (e.g. `location`, `category`).
    #[serde(default)]
    pub filters: BTreeMap<String, String>,

    /// 1-based page number.
    #[serde(default = "default_page")]
    pub page: u32,

    /// Page size, 1 to [`MAX_LIMIT`].
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Provider ids to query. Empty means every enabled source.
    #[serde(default)]
    pub sources: Vec<String>,

    /// Serve from the cache when a fresh response exists.
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

fn default_page() -> u32 {
    DEFAULT_PAGE
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

fn default_use_cache() -> bool {
    true
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            filters: BTreeMap::new(),
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            sources: Vec::new(),
            use_cache: true,
        }
    }
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Default::default() }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Canonical form: trimmed query and filters, empty filters dropped,
    /// page and limit clamped, sources sorted and deduplicated.
    pub fn normalized(&self) -> Self {
        let filters = self
            .filters
            .iter()
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .collect();

        let mut sources: Vec<String> =
            self.sources.iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        sources.sort();
        sources.dedup();

        Self {
            query: self.query.trim().to_string(),
            filters,
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_LIMIT),
            sources,
            use_cache: self.use_cache,
        }
    }

    /// Whether `source` is selected by this request's source filter.
    pub fn wants_source(&self, source: &str) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|s| s == source)
    }

    /// Index of the first item on the requested page.
    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit as usize
    }

    /// Deterministic cache key for this request's response.
    ///
    /// Requests that differ only in query case or whitespace, source order,
    /// or `use_cache` share a key.
    pub fn cache_key(&self, kind: ItemKind) -> String {
        let req = self.normalized();
        let params = serde_json::json!({
            "query": req.query.to_lowercase(),
            "filters": req.filters,
            "page": req.page,
            "limit": req.limit,
            "sources": req.sources,
        });
        compute_cache_key(kind.tag(), &params.to_string())
    }
}
