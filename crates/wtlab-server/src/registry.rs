//! Registry of live sessions, used to close them all on shutdown.
//!
//! Each entry carries the session's own sink, so channel counters are kept
//! per session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use wtlab_core::{ChannelKind, Session, TracingSink};

/// A registered session and the sink its handler reports to.
#[derive(Clone)]
pub struct SessionEntry {
    pub session: Arc<dyn Session>,
    pub sink: Arc<TracingSink>,
}

/// Concurrent map of session id → entry.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session with fresh counters. Returns its entry and the
    /// number of live sessions.
    pub async fn register(&self, session: Arc<dyn Session>) -> (SessionEntry, usize) {
        let entry = SessionEntry {
            session,
            sink: Arc::new(TracingSink::new()),
        };
        let mut sessions = self.sessions.write().await;
        sessions.insert(entry.session.id(), entry.clone());
        (entry, sessions.len())
    }

    /// Counter of `kind` for a live session.
    pub async fn count(&self, id: u64, kind: ChannelKind) -> Option<u64> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| entry.sink.counters().get(kind))
    }

    pub async fn remove(&self, id: u64) -> Option<SessionEntry> {
        let removed = self.sessions.write().await.remove(&id);
        if removed.is_some() {
            debug!(session = id, "session unregistered");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close every registered session and wait up to `grace` for each to
    /// report closure. Returns how many sessions were asked to close.
    pub async fn close_all(&self, reason: &str, grace: Duration) -> usize {
        let sessions: Vec<Arc<dyn Session>> = self
            .sessions
            .read()
            .await
            .values()
            .map(|entry| entry.session.clone())
            .collect();
        if sessions.is_empty() {
            return 0;
        }
        info!(count = sessions.len(), reason, "closing all sessions");

        let waits = sessions.iter().map(|session| {
            let session = session.clone();
            let reason = reason.as_bytes().to_vec();
            async move {
                session.close(0, &reason);
                if tokio::time::timeout(grace, session.closed()).await.is_err() {
                    warn!(session = session.id(), "session did not close within grace period");
                }
            }
        });
        join_all(waits).await;
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wtlab_core::mock::MockSession;
    use wtlab_core::EventSink;

    #[tokio::test]
    async fn register_and_remove() {
        let registry = SessionRegistry::new();
        let (a, _) = MockSession::pair();
        let (b, _) = MockSession::pair();
        assert_eq!(registry.register(a.clone()).await.1, 1);
        assert_eq!(registry.register(b.clone()).await.1, 2);

        assert!(registry.remove(a.id()).await.is_some());
        assert!(registry.remove(a.id()).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn counters_are_kept_per_session() {
        let registry = SessionRegistry::new();
        let (a, _) = MockSession::pair();
        let (b, _) = MockSession::pair();
        let (entry_a, _) = registry.register(a.clone()).await;
        registry.register(b.clone()).await;

        entry_a.sink.on_count(ChannelKind::Datagram);
        entry_a.sink.on_count(ChannelKind::Datagram);

        assert_eq!(registry.count(a.id(), ChannelKind::Datagram).await, Some(2));
        assert_eq!(registry.count(b.id(), ChannelKind::Datagram).await, Some(0));
        registry.remove(a.id()).await;
        assert_eq!(registry.count(a.id(), ChannelKind::Datagram).await, None);
    }

    #[tokio::test]
    async fn close_all_closes_every_session() {
        let registry = SessionRegistry::new();
        let mut ends = Vec::new();
        for _ in 0..3 {
            let (server_end, client_end) = MockSession::pair();
            registry.register(server_end.clone()).await;
            ends.push((server_end, client_end));
        }

        let closed = registry.close_all("shutdown", Duration::from_secs(1)).await;
        assert_eq!(closed, 3);
        for (server_end, client_end) in &ends {
            assert_eq!(server_end.close_calls(), 1);
            assert!(client_end.is_closed());
        }
    }

    #[tokio::test]
    async fn close_all_on_empty_registry() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.len().await, 0);
        assert_eq!(registry.close_all("shutdown", Duration::from_millis(10)).await, 0);
    }
}
