//! In-memory source adapters for aggregator tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use scout_core::RawError;
use serde_json::{Value, json};

use crate::item::{ItemKind, NormalizedItem};
use crate::request::SearchRequest;
use crate::source::SourceAdapter;

/// Raw record in the shape [`StaticSource`] normalizes.
pub fn raw_job(id: &str, title: &str, location: &str) -> Value {
    json!({ "id": id, "title": title, "location": location })
}

/// Adapter that returns fixed records, or a fixed failure.
pub struct StaticSource {
    id: &'static str,
    kind: ItemKind,
    records: Vec<Value>,
    failure: Option<fn() -> RawError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(id: &'static str, kind: ItemKind, records: Vec<Value>) -> Self {
        Self { id, kind, records, failure: None, delay: Duration::ZERO, calls: AtomicUsize::new(0) }
    }

    pub fn failing(id: &'static str, kind: ItemKind, failure: fn() -> RawError) -> Self {
        Self { id, kind, records: Vec::new(), failure: Some(failure), delay: Duration::ZERO, calls: AtomicUsize::new(0) }
    }

    /// Sleep for `delay` before answering each search.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for StaticSource {
    fn id(&self) -> &str {
        self.id
    }

    fn kind(&self) -> ItemKind {
        self.kind
    }

    async fn search(&self, _request: &SearchRequest) -> Result<Vec<Value>, RawError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.failure {
            Some(failure) => Err(failure()),
            None => Ok(self.records.clone()),
        }
    }

    fn normalize(&self, raw: &Value) -> Option<NormalizedItem> {
        let id = raw.get("id")?.as_str()?;
        let title = raw.get("title")?.as_str()?;
        let mut item = NormalizedItem::new(self.id, id, title).with_metadata(raw.clone());
        if let Some(location) = raw.get("location").and_then(Value::as_str) {
            item = item.with_location(location);
        }
        if let Some(salary) = raw.get("salary").and_then(Value::as_str) {
            item = item.with_salary(salary);
        }
        Some(item)
    }
}
