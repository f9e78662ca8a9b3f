//! Common item shape every source normalizes into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which search a source serves, and the cache tag its responses carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Jobs,
    Offers,
}

impl ItemKind {
    pub fn tag(self) -> &'static str {
        match self {
            ItemKind::Jobs => "jobs",
            ItemKind::Offers => "offers",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A job or offer in provider-independent form.
///
/// `(source, external_id)` identifies where the item came from and is never
/// reused for a different item. `id` is derived from that pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub id: String,
    pub external_id: String,
    pub title: String,

    /// Provider id of the adapter that produced the item.
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,

    /// Set for jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Set for offers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Free-form salary or price text as published by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Application or tracking link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,

    /// Provider-specific payload kept verbatim.
    #[serde(default)]
    pub metadata: Value,
}

impl NormalizedItem {
    pub fn new(source: impl Into<String>, external_id: impl Into<String>, title: impl Into<String>) -> Self {
        let source = source.into();
        let external_id = external_id.into();
        Self { id: format!("{source}:{external_id}"), external_id, title: title.into(), source, ..Default::default() }
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_salary(mut self, salary: impl Into<String>) -> Self {
        self.salary = Some(salary.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_application_url(mut self, url: impl Into<String>) -> Self {
        self.application_url = Some(url.into());
        self
    }

    pub fn with_posted_at(mut self, posted_at: DateTime<Utc>) -> Self {
        self.posted_at = Some(posted_at);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_id() {
        let item = NormalizedItem::new("adzuna", "123", "Rust Developer");
        assert_eq!(item.id, "adzuna:123");
        assert_eq!(item.external_id, "123");
        assert_eq!(item.source, "adzuna");
        assert!(item.metadata.is_null());
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(ItemKind::Jobs.tag(), "jobs");
        assert_eq!(ItemKind::Offers.to_string(), "offers");
        assert_eq!(serde_json::to_string(&ItemKind::Offers).unwrap(), "\"offers\"");
    }

    #[test]
    fn test_serde_skips_empty_fields() {
        let item = NormalizedItem::new("adzuna", "1", "Dev").with_location("Berlin");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["location"], "Berlin");
        assert!(json.get("salary").is_none());

        let back: NormalizedItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }
}
