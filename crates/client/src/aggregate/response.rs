//! Aggregated search response and per-source diagnostics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitState;
use crate::item::{ItemKind, NormalizedItem};
use crate::rate_limit::RateLimitStatus;
use crate::request::SearchRequest;

/// One page of merged, deduplicated results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<NormalizedItem>,

    /// Items each queried source returned, before deduplication. A source
    /// that failed reports 0.
    pub sources: BTreeMap<String, usize>,

    /// Deduplicated items across all pages.
    pub total: usize,
    pub page: u32,
    pub limit: u32,

    /// Whether this response was served from the cache.
    #[serde(default)]
    pub cached: bool,
}

impl SearchResponse {
    pub fn empty(request: &SearchRequest) -> Self {
        Self {
            items: Vec::new(),
            sources: BTreeMap::new(),
            total: 0,
            page: request.page,
            limit: request.limit,
            cached: false,
        }
    }

    pub fn has_more(&self) -> bool {
        (self.page as usize) * (self.limit as usize) < self.total
    }
}

/// Health of one registered source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub provider: String,
    pub kind: ItemKind,
    pub enabled: bool,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,

    /// `None` until the provider has been called.
    pub rate_limit: Option<RateLimitStatus>,
}
