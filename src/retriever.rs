//! HTTP client for the external vector store.
//!
//! The vector store is a black box: it receives the query string and the
//! validated parameters and answers with chunk-level hits. Before grouping,
//! hits are attached to their parent catalogue item so that chunks of a
//! dataset's profile, flyer and notes group into one result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dataset_search_core::models::RetrievalHit;
use dataset_search_core::pipeline::Retriever;
use dataset_search_core::query::ValidatedQuery;
use dataset_search_core::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::metadata::{MetadataIndex, MetadataStamp, MetadataStore};

/// Request body sent to the vector store.
#[derive(Debug, Serialize)]
pub struct RetrievalRequest<'a> {
    pub query: &'a str,
    pub top_k: usize,
    pub vector_store_query_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
}

impl<'a> RetrievalRequest<'a> {
    pub fn new(query: &'a str, params: &ValidatedQuery) -> Self {
        Self {
            query,
            top_k: params.top_k,
            vector_store_query_mode: params.mode.as_str(),
            alpha: params.alpha(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RetrievalResponse {
    #[serde(default)]
    hits: Vec<RetrievalHit>,
}

pub struct HttpRetriever {
    client: reqwest::Client,
    endpoint: String,
    metadata: MetadataStore,
    /// Rebuilt only when the metadata files change on disk.
    index: Mutex<Option<(MetadataStamp, Arc<MetadataIndex>)>>,
}

impl HttpRetriever {
    pub fn new(config: &RetrievalConfig, metadata: MetadataStore) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            metadata,
            index: Mutex::new(None),
        })
    }

    fn index(&self) -> Arc<MetadataIndex> {
        let stamp = self.metadata.stamp();
        if let Some((cached, index)) = self.index.lock().as_ref() {
            if *cached == stamp {
                return index.clone();
            }
        }

        match self.metadata.index() {
            Ok(index) => {
                let index = Arc::new(index);
                *self.index.lock() = Some((stamp, index.clone()));
                index
            }
            Err(e) => {
                tracing::warn!(error = %e, "catalogue metadata unavailable, hits left unenriched");
                Arc::new(MetadataIndex::default())
            }
        }
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, query: &str, params: &ValidatedQuery) -> Result<Vec<RetrievalHit>> {
        let body = RetrievalRequest::new(query, params);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Retrieval(format!("{}: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Retrieval(format!(
                "{} returned HTTP {}: {}",
                self.endpoint, status, text
            )));
        }

        let parsed: RetrievalResponse = response
            .json()
            .await
            .map_err(|e| Error::Retrieval(format!("invalid response from {}: {}", self.endpoint, e)))?;

        Ok(enrich(parsed.hits, &self.index()))
    }
}

/// Point each hit at its parent catalogue item and fill in missing
/// title/url from the catalogue. Hits that do not resolve are kept as-is.
pub fn enrich(hits: Vec<RetrievalHit>, index: &MetadataIndex) -> Vec<RetrievalHit> {
    hits.into_iter()
        .map(|mut hit| {
            if let Some(doc) = index.resolve(&hit.document_id) {
                hit.document_id = doc.id;
                hit.title = hit.title.or(Some(doc.title));
                hit.url = hit.url.or(doc.url);
            }
            hit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataset_search_core::models::{CatalogueItem, FileResource, ResourceKind};
    use dataset_search_core::query::{QueryDefaults, QueryMode, QueryParams};

    fn hit(doc: &str, score: f64) -> RetrievalHit {
        RetrievalHit {
            document_id: doc.to_string(),
            content: format!("text from {}", doc),
            score,
            title: None,
            url: None,
        }
    }

    fn index() -> MetadataIndex {
        let item = CatalogueItem {
            id: "a".into(),
            title: "Broadband Speed".into(),
            notes: Some("n".into()),
            url: Some("https://catalogue/dataset/a".into()),
            resources: vec![],
        };
        let resources = vec![FileResource {
            id: "r1".into(),
            parent_id: "a".into(),
            name: "Profile".into(),
            format: "pdf".into(),
            url: "https://h/r1.pdf".into(),
            kind: ResourceKind::Profile,
        }];
        MetadataIndex::new(&[item], &resources)
    }

    #[test]
    fn test_enrich_maps_entries_to_parent() {
        let hits = vec![hit("profile-r1.pdf", 0.8), hit("notes-a.txt", 0.6), hit("other", 0.5)];
        let out = enrich(hits, &index());
        assert_eq!(out[0].document_id, "a");
        assert_eq!(out[0].title.as_deref(), Some("Broadband Speed"));
        assert_eq!(out[0].url.as_deref(), Some("https://catalogue/dataset/a"));
        assert_eq!(out[1].document_id, "a");
        assert_eq!(out[2].document_id, "other");
        assert!(out[2].title.is_none());

        let grouped = dataset_search_core::grouping::group(&out, 10);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].chunks, 2);
    }

    #[test]
    fn test_index_is_reused_until_metadata_changes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = MetadataStore::new(tmp.path());
        store
            .save_snapshot(&[serde_json::json!({"id": "a", "title": "Broadband Speed"})])
            .unwrap();
        let config = RetrievalConfig {
            endpoint: "http://127.0.0.1:9/query".into(),
            top_k: 10,
            max_top_k: 50,
            alpha: 0.5,
            mode: "hybrid".into(),
            timeout_secs: 5,
        };
        let retriever = HttpRetriever::new(&config, store.clone()).unwrap();

        let first = retriever.index();
        assert!(Arc::ptr_eq(&first, &retriever.index()));
        assert_eq!(first.resolve("notes-a").unwrap().title, "Broadband Speed");

        store
            .save_snapshot(&[serde_json::json!({"id": "a", "title": "Broadband Speed 2024"})])
            .unwrap();
        let rebuilt = retriever.index();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(rebuilt.resolve("notes-a").unwrap().title, "Broadband Speed 2024");
    }

    #[test]
    fn test_enrich_keeps_title_from_store() {
        let mut h = hit("notes-a", 0.4);
        h.title = Some("Chunk title".into());
        let out = enrich(vec![h], &index());
        assert_eq!(out[0].title.as_deref(), Some("Chunk title"));
    }

    #[test]
    fn test_request_body_omits_alpha_outside_hybrid() {
        let defaults = QueryDefaults::default();
        let sparse = QueryParams {
            top_k: Some(3),
            mode: Some(QueryMode::Sparse),
            alpha: Some(0.9),
        }
        .validate(&defaults)
        .unwrap();
        let body = serde_json::to_value(RetrievalRequest::new("q", &sparse)).unwrap();
        assert_eq!(body["top_k"], 3);
        assert_eq!(body["vector_store_query_mode"], "sparse");
        assert!(body.get("alpha").is_none());

        let hybrid = QueryParams::default().validate(&defaults).unwrap();
        let body = serde_json::to_value(RetrievalRequest::new("q", &hybrid)).unwrap();
        assert_eq!(body["alpha"], 0.5);
    }
}
