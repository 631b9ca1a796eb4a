//! Query pipeline: validate, retrieve, group, store, answer.
//!
//! ```text
//! query + params
//!   ──▶ QueryParams::validate   (fail fast, no external call)
//!   ──▶ Retriever::retrieve     (external similarity search)
//!   ──▶ grouping::group         (one result per document)
//!   ──▶ ResultsSessions::create (results_id)
//!   ──▶ Response::Grouped | Response::Generated
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::explain::{self, Generator};
use crate::grouping;
use crate::models::{GroupedResult, Response, RetrievalHit};
use crate::query::{QueryDefaults, QueryParams, ValidatedQuery};
use crate::session::ResultsSessions;

/// External similarity search over the indexed chunks.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return chunk-level hits, best first.
    async fn retrieve(&self, query: &str, params: &ValidatedQuery) -> Result<Vec<RetrievalHit>>;
}

/// Outcome of [`QueryPipeline::submit`].
#[derive(Debug, Clone, Serialize)]
pub struct Submitted {
    pub results_id: String,
    pub response: Response,
}

#[derive(Clone)]
pub struct QueryPipeline {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    sessions: ResultsSessions,
    defaults: QueryDefaults,
}

impl QueryPipeline {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        sessions: ResultsSessions,
        defaults: QueryDefaults,
    ) -> Self {
        Self {
            retriever,
            generator,
            sessions,
            defaults,
        }
    }

    pub fn sessions(&self) -> &ResultsSessions {
        &self.sessions
    }

    /// Run a query and open a results session for it.
    ///
    /// With `summarize`, the grouped results are additionally passed to the
    /// generator and the answer is [`Response::Generated`]; the session
    /// still stores the grouped results so they stay explainable.
    pub async fn submit(
        &self,
        query: &str,
        params: &QueryParams,
        summarize: bool,
    ) -> Result<Submitted> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidParameter("query must not be empty".to_string()));
        }
        let validated = params.validate(&self.defaults)?;

        let hits = self.retriever.retrieve(query, &validated).await?;
        let grouped = grouping::group(&hits, validated.top_k);
        tracing::debug!(
            hits = hits.len(),
            grouped = grouped.len(),
            mode = %validated.mode,
            "retrieved"
        );

        let response = if summarize {
            explain::summarize(self.generator.as_ref(), query, &grouped).await?
        } else {
            Response::Grouped {
                results: grouped.clone(),
            }
        };

        let results_id = self.sessions.create(query, grouped).await?;
        Ok(Submitted {
            results_id,
            response,
        })
    }

    pub async fn results(&self, results_id: &str) -> Result<Vec<GroupedResult>> {
        Ok(self.sessions.get(results_id).await?.grouped_results)
    }

    pub async fn original_query(&self, results_id: &str) -> Result<String> {
        self.sessions.query(results_id).await
    }

    pub async fn explain(&self, results_id: &str, index: usize) -> Result<String> {
        explain::explain(&self.sessions, self.generator.as_ref(), results_id, index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryMode;
    use crate::store::memory::InMemorySessionStore;
    use crate::store::Retention;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedRetriever {
        hits: Vec<RetrievalHit>,
        calls: AtomicUsize,
        last: Mutex<Option<ValidatedQuery>>,
    }

    impl FixedRetriever {
        fn new(hits: Vec<RetrievalHit>) -> Self {
            Self {
                hits,
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn retrieve(&self, _query: &str, params: &ValidatedQuery) -> Result<Vec<RetrievalHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some(params.clone());
            Ok(self.hits.clone())
        }
    }

    #[derive(Default)]
    struct CountingGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for CountingGenerator {
        async fn generate(&self, _prompt: &str, context: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("generated from {} bytes", context.len()))
        }
    }

    fn hit(doc: &str, score: f64) -> RetrievalHit {
        RetrievalHit {
            document_id: doc.to_string(),
            content: format!("chunk of {}", doc),
            score,
            title: Some(format!("Dataset {}", doc)),
            url: None,
        }
    }

    fn pipeline(
        retriever: Arc<FixedRetriever>,
        generator: Arc<CountingGenerator>,
    ) -> QueryPipeline {
        QueryPipeline::new(
            retriever,
            generator,
            ResultsSessions::new(Arc::new(InMemorySessionStore::new()), Retention::default()),
            QueryDefaults::default(),
        )
    }

    fn example_hits() -> Vec<RetrievalHit> {
        vec![hit("A", 0.9), hit("B", 0.7), hit("A", 0.95)]
    }

    #[tokio::test]
    async fn test_submit_groups_and_stores() {
        let retriever = Arc::new(FixedRetriever::new(example_hits()));
        let generator = Arc::new(CountingGenerator::default());
        let p = pipeline(retriever.clone(), generator.clone());

        let params = QueryParams {
            top_k: Some(2),
            ..Default::default()
        };
        let submitted = p.submit("  broadband speed  ", &params, false).await.unwrap();
        let results = match &submitted.response {
            Response::Grouped { results } => results.clone(),
            other => panic!("expected grouped response, got {:?}", other),
        };
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);

        assert_eq!(p.results(&submitted.results_id).await.unwrap(), results);
        assert_eq!(
            p.original_query(&submitted.results_id).await.unwrap(),
            "broadband speed"
        );
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_params_fail_before_retrieval() {
        let retriever = Arc::new(FixedRetriever::new(example_hits()));
        let p = pipeline(retriever.clone(), Arc::new(CountingGenerator::default()));

        let bad_alpha = QueryParams {
            alpha: Some(1.5),
            ..Default::default()
        };
        let bad_top_k = QueryParams {
            top_k: Some(0),
            ..Default::default()
        };
        for params in [bad_alpha, bad_top_k] {
            let err = p.submit("q", &params, false).await.unwrap_err();
            assert!(matches!(err, Error::InvalidParameter(_)));
        }
        let err = p.submit("   ", &QueryParams::default(), false).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));

        assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
        assert_eq!(p.sessions().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_validated_params_forwarded() {
        let retriever = Arc::new(FixedRetriever::new(vec![]));
        let p = pipeline(retriever.clone(), Arc::new(CountingGenerator::default()));
        let params = QueryParams {
            top_k: Some(4),
            mode: Some(QueryMode::Sparse),
            alpha: Some(0.2),
        };
        let submitted = p.submit("q", &params, false).await.unwrap();
        let forwarded = retriever.last.lock().clone().unwrap();
        assert_eq!(forwarded.top_k, 4);
        assert_eq!(forwarded.mode, QueryMode::Sparse);
        assert_eq!(forwarded.alpha(), None);
        assert_eq!(
            submitted.response,
            Response::Grouped { results: vec![] }
        );
    }

    #[tokio::test]
    async fn test_summarize_returns_generated_and_keeps_session() {
        let retriever = Arc::new(FixedRetriever::new(example_hits()));
        let generator = Arc::new(CountingGenerator::default());
        let p = pipeline(retriever, generator.clone());

        let submitted = p.submit("q", &QueryParams::default(), true).await.unwrap();
        match &submitted.response {
            Response::Generated { sources, .. } => {
                assert_eq!(sources.len(), 2);
                assert_eq!(sources[0].id, "A");
            }
            other => panic!("expected generated response, got {:?}", other),
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(p.results(&submitted.results_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_explain_bounds_checked() {
        let retriever = Arc::new(FixedRetriever::new(vec![
            hit("A", 0.9),
            hit("B", 0.8),
            hit("C", 0.7),
        ]));
        let generator = Arc::new(CountingGenerator::default());
        let p = pipeline(retriever, generator.clone());

        let submitted = p.submit("q", &QueryParams::default(), false).await.unwrap();
        let err = p.explain(&submitted.results_id, 5).await.unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 5, len: 3 }));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

        p.explain(&submitted.results_id, 2).await.unwrap();
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_results_id() {
        let p = pipeline(
            Arc::new(FixedRetriever::new(vec![])),
            Arc::new(CountingGenerator::default()),
        );
        assert!(matches!(
            p.results("missing").await,
            Err(Error::NoQueryFound(_))
        ));
        assert!(matches!(
            p.original_query("missing").await,
            Err(Error::NoQueryFound(_))
        ));
    }
}
