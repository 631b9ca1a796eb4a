//! Remote catalogue client.
//!
//! The catalogue is fetched with a single GET and treated as an opaque JSON
//! snapshot until it is parsed into [`CatalogueItem`]s. A failed fetch is
//! always an error, never "no change".

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use dataset_search_core::models::CatalogueItem;
use dataset_search_core::{Error, Result};
use regex::Regex;
use serde_json::Value;

use crate::config::CatalogueConfig;

/// Source of catalogue snapshots.
#[async_trait]
pub trait CatalogueSource: Send + Sync {
    /// Fetch the full list of raw catalogue records.
    async fn fetch_snapshot(&self) -> Result<Vec<Value>>;
}

pub struct HttpCatalogue {
    client: reqwest::Client,
    api_url: String,
}

impl HttpCatalogue {
    pub fn new(config: &CatalogueConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
        })
    }
}

#[async_trait]
impl CatalogueSource for HttpCatalogue {
    async fn fetch_snapshot(&self) -> Result<Vec<Value>> {
        tracing::debug!(url = %self.api_url, "fetching catalogue");
        let response = self
            .client
            .get(&self.api_url)
            .send()
            .await
            .map_err(|e| Error::fetch(&self.api_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(&self.api_url, format!("HTTP {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::fetch(&self.api_url, format!("invalid JSON: {}", e)))?;

        unwrap_envelope(body).ok_or_else(|| {
            Error::fetch(
                &self.api_url,
                "expected a JSON array of catalogue records",
            )
        })
    }
}

/// Accept a bare array, `{"result": [...]}` or `{"result": [[...]]}`.
fn unwrap_envelope(body: Value) -> Option<Vec<Value>> {
    let records = match body {
        Value::Array(records) => records,
        Value::Object(mut map) => match map.remove("result")? {
            Value::Array(records) => records,
            _ => return None,
        },
        _ => return None,
    };

    // Paged CKAN responses nest the record list one level deeper.
    if records.len() == 1 && records[0].is_array() {
        if let Some(Value::Array(inner)) = records.into_iter().next() {
            return Some(inner);
        }
        return None;
    }
    Some(records)
}

/// Convert raw records into catalogue items. Records that do not look like
/// catalogue items (no string `id`) are skipped.
pub fn parse_items(snapshot: &[Value]) -> Vec<CatalogueItem> {
    snapshot
        .iter()
        .filter_map(|record| {
            match serde_json::from_value::<CatalogueItem>(record.clone()) {
                Ok(item) if !item.id.trim().is_empty() => Some(item),
                Ok(_) => {
                    tracing::warn!("skipping catalogue record with empty id");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed catalogue record");
                    None
                }
            }
        })
        .collect()
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<]+?>").unwrap());

/// Remove markup tags and decode the common HTML entities.
pub fn strip_markup(text: &str) -> String {
    let without_tags = TAG_RE.replace_all(text, "");
    without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Text document synthesized for an item's notes.
pub fn notes_document(item: &CatalogueItem) -> String {
    format!(
        "Dataset Title: {}\n\nDescription:\n\n{}",
        item.title,
        strip_markup(item.notes.as_deref().unwrap_or_default())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_envelope_variants() {
        let record = json!({"id": "a"});
        assert_eq!(unwrap_envelope(json!([record.clone()])).unwrap().len(), 1);
        assert_eq!(
            unwrap_envelope(json!({"result": [record.clone()]})).unwrap().len(),
            1
        );
        assert_eq!(
            unwrap_envelope(json!({"result": [[record.clone(), record.clone()]]}))
                .unwrap()
                .len(),
            2
        );
        assert!(unwrap_envelope(json!({"success": false})).is_none());
        assert!(unwrap_envelope(json!("nope")).is_none());
        assert!(unwrap_envelope(json!([])).unwrap().is_empty());
    }

    #[test]
    fn test_parse_items_skips_bad_records() {
        let snapshot = vec![
            json!({"id": "a", "title": "A"}),
            json!({"title": "no id"}),
            json!({"id": "", "title": "empty id"}),
            json!(42),
        ];
        let items = parse_items(&snapshot);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "a");
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(
            strip_markup("<p>Retail &amp; <b>footfall</b></p>\n"),
            "Retail & footfall"
        );
        assert_eq!(strip_markup("a &lt;b&gt; c"), "a <b> c");
        assert_eq!(strip_markup("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_notes_document() {
        let item = CatalogueItem {
            id: "x".into(),
            title: "Index of Multiple Deprivation".into(),
            notes: Some("<p>Relative deprivation in <em>England</em>.</p>".into()),
            url: None,
            resources: vec![],
        };
        assert_eq!(
            notes_document(&item),
            "Dataset Title: Index of Multiple Deprivation\n\nDescription:\n\nRelative deprivation in England."
        );
    }
}
