//! Results sessions: binding a results id to a query and its grouped results.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{GroupedResult, ResultsSession};
use crate::store::{Retention, SessionStore};

/// Attempts before giving up on finding an unused id. A v4 collision is
/// already astronomically unlikely; the bound only guards a broken store.
const MAX_ID_ATTEMPTS: usize = 8;

/// Session service on top of an injected [`SessionStore`].
#[derive(Clone)]
pub struct ResultsSessions {
    store: Arc<dyn SessionStore>,
    retention: Retention,
}

impl ResultsSessions {
    pub fn new(store: Arc<dyn SessionStore>, retention: Retention) -> Self {
        Self { store, retention }
    }

    /// Store `(query, grouped)` under a fresh results id and return the id.
    ///
    /// Retention is applied in the same atomic step as the insert, so the
    /// store never grows past `max_sessions`, even under concurrent
    /// creates. Ids are never reused: an id already present in the store is
    /// regenerated.
    pub async fn create(&self, query: &str, grouped: Vec<GroupedResult>) -> Result<String> {
        let now = Utc::now();
        let mut session = ResultsSession {
            results_id: String::new(),
            query: query.to_string(),
            grouped_results: grouped,
            created_at: now,
        };

        for _ in 0..MAX_ID_ATTEMPTS {
            session.results_id = Uuid::new_v4().to_string();
            if let Some(pruned) = self
                .store
                .prune_and_put(&session, &self.retention, now)
                .await?
            {
                if pruned > 0 {
                    tracing::debug!(pruned, "pruned results sessions");
                }
                return Ok(session.results_id);
            }
            tracing::warn!(results_id = %session.results_id, "results id collision, regenerating");
        }

        Err(Error::Other(anyhow::anyhow!(
            "could not allocate a unique results id after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }

    /// Look up a session. Unknown and expired ids both yield
    /// [`Error::NoQueryFound`]; expired sessions are deleted on the way.
    pub async fn get(&self, results_id: &str) -> Result<ResultsSession> {
        let session = self
            .store
            .get(results_id)
            .await?
            .ok_or_else(|| Error::NoQueryFound(results_id.to_string()))?;

        if self.retention.is_expired(&session, Utc::now()) {
            self.store.delete(results_id).await?;
            return Err(Error::NoQueryFound(results_id.to_string()));
        }
        Ok(session)
    }

    pub async fn query(&self, results_id: &str) -> Result<String> {
        Ok(self.get(results_id).await?.query)
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.store.len().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemorySessionStore;
    use chrono::Duration;
    use std::collections::HashSet;

    fn grouped(id: &str) -> GroupedResult {
        GroupedResult {
            id: id.to_string(),
            title: Some(format!("Dataset {}", id)),
            url: None,
            score: 0.5,
            content: format!("content of {}", id),
            chunks: 1,
        }
    }

    fn sessions(retention: Retention) -> ResultsSessions {
        ResultsSessions::new(Arc::new(InMemorySessionStore::new()), retention)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let s = sessions(Retention::default());
        let id = s.create("deprivation index", vec![grouped("A")]).await.unwrap();
        let session = s.get(&id).await.unwrap();
        assert_eq!(session.query, "deprivation index");
        assert_eq!(session.grouped_results, vec![grouped("A")]);
        assert_eq!(s.query(&id).await.unwrap(), "deprivation index");
    }

    #[tokio::test]
    async fn test_unknown_id_is_typed_not_found() {
        let s = sessions(Retention::default());
        let err = s.get("nope").await.unwrap_err();
        assert!(matches!(err, Error::NoQueryFound(ref id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let s = sessions(Retention::default());
        let a = s.create("housing", vec![grouped("A")]).await.unwrap();
        let b = s.create("retail", vec![grouped("B"), grouped("C")]).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(s.get(&a).await.unwrap().grouped_results, vec![grouped("A")]);
        assert_eq!(
            s.get(&b).await.unwrap().grouped_results,
            vec![grouped("B"), grouped("C")]
        );
    }

    #[tokio::test]
    async fn test_expired_session_is_not_found() {
        let s = sessions(Retention {
            max_sessions: 10,
            ttl: Some(Duration::zero()),
        });
        let id = s.create("q", vec![]).await.unwrap();
        let err = s.get(&id).await.unwrap_err();
        assert!(matches!(err, Error::NoQueryFound(_)));
        assert_eq!(s.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let s = sessions(Retention {
            max_sessions: 3,
            ttl: None,
        });
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(s.create(&format!("q{}", i), vec![]).await.unwrap());
        }
        assert_eq!(s.len().await.unwrap(), 3);
        assert!(s.get(&ids[0]).await.is_err());
        assert!(s.get(&ids[1]).await.is_err());
        assert_eq!(s.query(&ids[4]).await.unwrap(), "q4");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creation_never_collides() {
        let s = sessions(Retention::new(10_000, 0));
        let mut handles = Vec::new();
        for i in 0..200 {
            let s = s.clone();
            handles.push(tokio::spawn(async move {
                let query = format!("query {}", i);
                let id = s.create(&query, vec![grouped(&i.to_string())]).await.unwrap();
                (id, query)
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            let (id, query) = handle.await.unwrap();
            assert!(seen.insert(id.clone()), "duplicate results id {}", id);
            assert_eq!(s.query(&id).await.unwrap(), query);
        }
        assert_eq!(s.len().await.unwrap(), 200);
    }
}
