//! Session registry implementation

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::session::{SessionId, SessionState, StreamSession};

/// Result of claiming a URL for a new session
#[derive(Debug)]
pub enum Claim {
    /// A new session was registered and is now `Starting`
    Created(Arc<StreamSession>),
    /// A session already owns the URL
    Existing(Arc<StreamSession>),
}

/// Registry of live sessions keyed by source URL
///
/// Thread-safe via `RwLock`. Reads (status queries) vastly outnumber writes
/// (start, stop).
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<StreamSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the session for a URL
    pub async fn get(&self, url: &str) -> Option<Arc<StreamSession>> {
        self.sessions.read().await.get(url).cloned()
    }

    /// Register a new session for `url` unless a live one exists
    ///
    /// A leftover session that already reached `Stopped` is replaced. The new
    /// session enters `Starting` before the lock is released, so concurrent
    /// callers observe it as live.
    pub async fn claim<F>(&self, url: &str, make: F) -> Claim
    where
        F: FnOnce() -> StreamSession,
    {
        let mut sessions = self.sessions.write().await;

        if let Some(existing) = sessions.get(url) {
            if existing.state() != SessionState::Stopped {
                return Claim::Existing(Arc::clone(existing));
            }
            tracing::debug!(
                stream = %existing.source(),
                session_id = existing.id(),
                "Replacing stopped session"
            );
        }

        let session = Arc::new(make());
        session.mark_starting();
        sessions.insert(url.to_string(), Arc::clone(&session));

        tracing::debug!(
            stream = %session.source(),
            session_id = session.id(),
            total = sessions.len(),
            "Session registered"
        );

        Claim::Created(session)
    }

    /// Remove the entry for `url` if it still belongs to session `id`
    ///
    /// Returns whether an entry was removed. A newer session registered under
    /// the same URL is left alone.
    pub async fn remove_if(&self, url: &str, id: SessionId) -> bool {
        let mut sessions = self.sessions.write().await;

        match sessions.get(url) {
            Some(session) if session.id() == id => {
                sessions.remove(url);
                tracing::debug!(session_id = id, total = sessions.len(), "Session unregistered");
                true
            }
            _ => false,
        }
    }

    /// URLs of sessions that are not `Stopped`, sorted
    pub async fn active_urls(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut urls: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.state().is_active())
            .map(|(url, _)| url.clone())
            .collect();
        urls.sort();
        urls
    }

    /// Every registered session
    pub async fn sessions(&self) -> Vec<Arc<StreamSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Drain the registry, returning every session
    pub async fn take_all(&self) -> Vec<Arc<StreamSession>> {
        self.sessions.write().await.drain().map(|(_, s)| s).collect()
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no sessions are registered
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StreamSource;

    fn make(id: SessionId, url: &str) -> impl FnOnce() -> StreamSession + '_ {
        move || StreamSession::new(id, StreamSource::parse(url, "").unwrap())
    }

    #[tokio::test]
    async fn test_claim_creates_starting_session() {
        let registry = SessionRegistry::new();
        let url = "rtmp://127.0.0.1/live/a";

        let claim = registry.claim(url, make(1, url)).await;
        let session = match claim {
            Claim::Created(session) => session,
            Claim::Existing(_) => panic!("expected a new session"),
        };

        assert_eq!(session.state(), SessionState::Starting);
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.active_urls().await, vec![url.to_string()]);
        assert_eq!(registry.get(url).await.unwrap().id(), 1);
    }

    #[tokio::test]
    async fn test_claim_returns_existing() {
        let registry = SessionRegistry::new();
        let url = "rtmp://127.0.0.1/live/a";

        registry.claim(url, make(1, url)).await;
        let claim = registry.claim(url, make(2, url)).await;

        assert!(matches!(claim, Claim::Existing(ref s) if s.id() == 1));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_claim_replaces_stopped_session() {
        let registry = SessionRegistry::new();
        let url = "rtmp://127.0.0.1/live/a";

        if let Claim::Created(session) = registry.claim(url, make(1, url)).await {
            // Stop before launch leaves it Stopped but still registered
            session.stop().await;
        }

        let claim = registry.claim(url, make(2, url)).await;
        assert!(matches!(claim, Claim::Created(ref s) if s.id() == 2));
    }

    #[tokio::test]
    async fn test_remove_if_checks_identity() {
        let registry = SessionRegistry::new();
        let url = "http://127.0.0.1/hls/a.m3u8";

        registry.claim(url, make(7, url)).await;

        assert!(!registry.remove_if(url, 8).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove_if(url, 7).await);
        assert!(registry.is_empty().await);

        assert!(!registry.remove_if(url, 7).await);
    }

    #[tokio::test]
    async fn test_active_urls_sorted_and_filtered() {
        let registry = SessionRegistry::new();
        let urls = [
            "rtsp://127.0.0.1/c",
            "rtmp://127.0.0.1/live/b",
            "http://127.0.0.1/a.m3u8",
        ];

        for (i, url) in urls.iter().enumerate() {
            registry.claim(url, make(i as SessionId, url)).await;
        }

        let stopped = registry.get(urls[0]).await.unwrap();
        stopped.stop().await;

        assert_eq!(
            registry.active_urls().await,
            vec![
                "http://127.0.0.1/a.m3u8".to_string(),
                "rtmp://127.0.0.1/live/b".to_string(),
            ]
        );
        assert_eq!(registry.sessions().await.len(), 3);
    }

    #[tokio::test]
    async fn test_take_all() {
        let registry = SessionRegistry::new();
        let url = "rtsp://127.0.0.1/a";
        registry.claim(url, make(1, url)).await;

        let taken = registry.take_all().await;
        assert_eq!(taken.len(), 1);
        assert!(registry.is_empty().await);
    }
}
