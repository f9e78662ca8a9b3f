//! Upstream source adapters and the registry that enables them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use scout_core::RawError;
use serde_json::Value;

use crate::item::{ItemKind, NormalizedItem};
use crate::request::SearchRequest;

/// One upstream provider for one kind of item.
///
/// `search` performs the network call and returns the provider's raw
/// records. `normalize` maps a single record and returns `None` for
/// records that cannot be represented.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Provider id, used as the rate-limit, circuit and response-count key.
    fn id(&self) -> &str;

    fn kind(&self) -> ItemKind;

    /// Endpoint name reported in error contexts and logs.
    fn endpoint(&self) -> &str {
        "search"
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<Value>, RawError>;

    fn normalize(&self, raw: &Value) -> Option<NormalizedItem>;
}

struct Registered {
    adapter: Arc<dyn SourceAdapter>,
    enabled: bool,
}

/// Ordered set of adapters with a per-provider enabled flag.
///
/// Iteration follows registration order.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Registered>,
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.sources.iter().map(|s| (s.adapter.id(), s.adapter.kind(), s.enabled)))
            .finish()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an enabled adapter. An adapter with the same id and kind is
    /// replaced in place.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> &mut Self {
        let existing =
            self.sources.iter_mut().find(|s| s.adapter.id() == adapter.id() && s.adapter.kind() == adapter.kind());
        match existing {
            Some(slot) => {
                tracing::debug!("replacing source adapter {} ({})", adapter.id(), adapter.kind());
                slot.adapter = adapter;
                slot.enabled = true;
            }
            None => self.sources.push(Registered { adapter, enabled: true }),
        }
        self
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Enable or disable every adapter registered under `id`.
    ///
    /// Returns false if no adapter has that id.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        let mut found = false;
        for source in self.sources.iter_mut().filter(|s| s.adapter.id() == id) {
            source.enabled = enabled;
            found = true;
        }
        found
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.sources.iter().any(|s| s.enabled && s.adapter.id() == id)
    }

    /// Enabled adapters serving `kind`, in registration order.
    pub fn enabled(&self, kind: ItemKind) -> Vec<Arc<dyn SourceAdapter>> {
        self.sources
            .iter()
            .filter(|s| s.enabled && s.adapter.kind() == kind)
            .map(|s| Arc::clone(&s.adapter))
            .collect()
    }

    /// Distinct ids of every enabled adapter, in registration order.
    pub fn enabled_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for source in self.sources.iter().filter(|s| s.enabled) {
            let id = source.adapter.id();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn get(&self, kind: ItemKind, id: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.sources
            .iter()
            .find(|s| s.adapter.kind() == kind && s.adapter.id() == id)
            .map(|s| Arc::clone(&s.adapter))
    }

    /// Every registered adapter with its enabled flag.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<dyn SourceAdapter>, bool)> {
        self.sources.iter().map(|s| (&s.adapter, s.enabled))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
