//! In-memory [`SessionStore`] implementation.
//!
//! A `HashMap` plus an insertion-order queue behind one `parking_lot`
//! write lock, so the id check and the insertion never interleave with
//! another writer.

use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::models::ResultsSession;

use super::{Retention, SessionStore};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, ResultsSession>,
    /// Results ids, oldest first. May hold ids already deleted from
    /// `sessions`; those are skipped lazily.
    order: VecDeque<String>,
}

impl Inner {
    fn compact(&mut self) {
        let sessions = &self.sessions;
        self.order.retain(|id| sessions.contains_key(id));
    }

    fn put_if_absent(&mut self, session: &ResultsSession) -> bool {
        if self.sessions.contains_key(&session.results_id) {
            return false;
        }
        self.sessions
            .insert(session.results_id.clone(), session.clone());
        self.order.push_back(session.results_id.clone());
        true
    }

    fn prune(&mut self, retention: &Retention, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();

        self.sessions.retain(|_, s| !retention.is_expired(s, now));
        self.compact();

        while self.sessions.len() >= retention.max_sessions {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.sessions.remove(&oldest);
                }
                None => break,
            }
        }

        before - self.sessions.len()
    }
}

#[derive(Default)]
pub struct InMemorySessionStore {
    inner: RwLock<Inner>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put_if_absent(&self, session: &ResultsSession) -> Result<bool> {
        Ok(self.inner.write().put_if_absent(session))
    }

    async fn get(&self, results_id: &str) -> Result<Option<ResultsSession>> {
        Ok(self.inner.read().sessions.get(results_id).cloned())
    }

    async fn delete(&self, results_id: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        let removed = inner.sessions.remove(results_id).is_some();
        if removed && inner.order.len() > inner.sessions.len() * 2 + 16 {
            inner.compact();
        }
        Ok(removed)
    }

    async fn prune(&self, retention: &Retention, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.inner.write().prune(retention, now))
    }

    async fn prune_and_put(
        &self,
        session: &ResultsSession,
        retention: &Retention,
        now: DateTime<Utc>,
    ) -> Result<Option<usize>> {
        let mut inner = self.inner.write();
        let pruned = inner.prune(retention, now);
        Ok(inner.put_if_absent(session).then_some(pruned))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.inner.read().sessions.len())
    }
}
