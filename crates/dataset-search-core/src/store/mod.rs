//! Results-session storage abstraction.
//!
//! The [`SessionStore`] trait is the ownership boundary for results
//! sessions: the query pipeline never touches a global map, it talks to an
//! injected store. Backends must be `Send + Sync` so one store can serve
//! concurrent requests.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`put_if_absent`](SessionStore::put_if_absent) | Atomic insert-if-absent |
//! | [`get`](SessionStore::get) | Look up a session by results id |
//! | [`delete`](SessionStore::delete) | Remove a session |
//! | [`prune`](SessionStore::prune) | Apply a [`Retention`] policy |
//! | [`prune_and_put`](SessionStore::prune_and_put) | Both of the above as one atomic step |
//! | [`len`](SessionStore::len) | Number of stored sessions |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::models::ResultsSession;

/// Bounds on session-store growth.
#[derive(Debug, Clone, PartialEq)]
pub struct Retention {
    /// Capacity; the oldest sessions are evicted first.
    pub max_sessions: usize,
    /// Sessions older than this are expired. `None` disables expiry.
    pub ttl: Option<Duration>,
}

impl Retention {
    pub fn new(max_sessions: usize, ttl_secs: u64) -> Self {
        let ttl = (ttl_secs > 0).then(|| Duration::seconds(ttl_secs.min(u32::MAX as u64) as i64));
        Self {
            max_sessions: max_sessions.max(1),
            ttl,
        }
    }

    pub fn is_expired(&self, session: &ResultsSession, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => now - session.created_at >= ttl,
            None => false,
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self::new(1000, 86_400)
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert `session` unless its `results_id` is already taken.
    ///
    /// Returns `false` (and stores nothing) on collision. The check and the
    /// insertion form one atomic step.
    async fn put_if_absent(&self, session: &ResultsSession) -> Result<bool>;

    async fn get(&self, results_id: &str) -> Result<Option<ResultsSession>>;

    /// Returns whether a session was removed.
    async fn delete(&self, results_id: &str) -> Result<bool>;

    /// Drop expired sessions, then the oldest ones until there is room for
    /// one more insert under `retention.max_sessions`.
    ///
    /// Returns the number of sessions removed.
    async fn prune(&self, retention: &Retention, now: DateTime<Utc>) -> Result<usize>;

    /// [`prune`](SessionStore::prune) then
    /// [`put_if_absent`](SessionStore::put_if_absent) without another writer
    /// in between, so concurrent inserts cannot overshoot
    /// `retention.max_sessions`.
    ///
    /// Returns `None` on id collision, otherwise the number pruned.
    async fn prune_and_put(
        &self,
        session: &ResultsSession,
        retention: &Retention,
        now: DateTime<Utc>,
    ) -> Result<Option<usize>>;

    async fn len(&self) -> Result<usize>;
}
