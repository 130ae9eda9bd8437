//! Loading parsed sessions by id.

use crate::error::SessionLoadError;
use crate::parser::LogRecordParser;
use crate::session::{Session, SessionId};
use crate::source::SessionSource;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Resolves a session id to a parsed, immutable [`Session`].
#[async_trait]
pub trait SessionLoader: Send + Sync {
    async fn load(&self, session_id: &SessionId) -> Result<Arc<Session>, SessionLoadError>;
}

/// Read-through cache of parsed sessions.
///
/// Entries are immutable. Concurrent loads of the same id keep whichever
/// entry was inserted first.
#[derive(Default)]
pub struct SessionCache {
    entries: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.entries.read().await.get(session_id).cloned()
    }

    /// Insert `session` unless an entry exists; returns the entry now cached.
    pub async fn insert_if_absent(&self, session: Arc<Session>) -> Arc<Session> {
        self.entries
            .write()
            .await
            .entry(session.session_id.clone())
            .or_insert(session)
            .clone()
    }

    pub async fn invalidate(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.entries.write().await.remove(session_id)
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Fetches raw logs from a [`SessionSource`] and parses them.
pub struct SessionRepository {
    source: Arc<dyn SessionSource>,
    parser: LogRecordParser,
    cache: Option<SessionCache>,
}

impl SessionRepository {
    pub fn new(source: Arc<dyn SessionSource>) -> Self {
        Self {
            source,
            parser: LogRecordParser::new(),
            cache: None,
        }
    }

    pub fn with_parser(mut self, parser: LogRecordParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_cache(mut self) -> Self {
        self.cache = Some(SessionCache::new());
        self
    }

    pub fn source(&self) -> &Arc<dyn SessionSource> {
        &self.source
    }

    pub fn cache(&self) -> Option<&SessionCache> {
        self.cache.as_ref()
    }

    /// Drop any cached entry and load the session afresh.
    pub async fn reload(&self, session_id: &SessionId) -> Result<Arc<Session>, SessionLoadError> {
        if let Some(cache) = &self.cache {
            cache.invalidate(session_id).await;
        }
        self.load(session_id).await
    }

    async fn fetch_and_parse(&self, session_id: &SessionId) -> Result<Session, SessionLoadError> {
        let raw = self.source.fetch_session_metrics(session_id).await?;
        let session = self.parser.parse(&raw.summary, &raw.content);
        debug!(
            session = %session_id,
            source = self.source.name(),
            series = session.metric_series.len(),
            skipped = session.parse_report.records_skipped,
            "Parsed session log"
        );
        Ok(session)
    }
}

#[async_trait]
impl SessionLoader for SessionRepository {
    async fn load(&self, session_id: &SessionId) -> Result<Arc<Session>, SessionLoadError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(session_id).await {
                debug!(session = %session_id, "Session cache hit");
                return Ok(hit);
            }
        }
        let session = Arc::new(self.fetch_and_parse(session_id).await?);
        match &self.cache {
            Some(cache) => Ok(cache.insert_if_absent(session).await),
            None => Ok(session),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::session::SessionSummary;
    use crate::source::RawSessionLog;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl SessionSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        async fn list_sessions(&self) -> Result<Vec<SessionSummary>, SourceError> {
            Ok(Vec::new())
        }

        async fn fetch_session_metrics(
            &self,
            session_id: &SessionId,
        ) -> Result<RawSessionLog, SessionLoadError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if session_id.as_str() == "broken" {
                return Err(SessionLoadError::NotFound {
                    session_id: session_id.clone(),
                });
            }
            Ok(RawSessionLog {
                summary: SessionSummary {
                    session_id: session_id.clone(),
                    display_name: session_id.to_string(),
                    model_name: None,
                    log_location: format!("models/cpt/{session_id}/CPT_1.json"),
                    latest_iteration: None,
                    started_at: None,
                },
                content: br#"{"metrics": [{"iteration": 10, "val_loss": 1.0}]}"#.to_vec(),
            })
        }
    }

    fn repository() -> (Arc<CountingSource>, SessionRepository) {
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
        });
        let repo = SessionRepository::new(source.clone()).with_cache();
        (source, repo)
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_loads() {
        let (source, repo) = repository();
        let id = SessionId::new("run");
        let first = repo.load(&id).await.unwrap();
        let second = repo.load(&id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reload_refetches() {
        let (source, repo) = repository();
        let id = SessionId::new("run");
        let first = repo.load(&id).await.unwrap();
        let reloaded = repo.reload(&id).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let (_source, repo) = repository();
        let err = repo.load(&SessionId::new("broken")).await.unwrap_err();
        assert_eq!(err.session_id().as_str(), "broken");
        assert!(repo.cache().unwrap().is_empty().await);
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first() {
        let (_source, repo) = repository();
        let id = SessionId::new("run");
        let loaded = repo.load(&id).await.unwrap();
        let cache = repo.cache().unwrap();
        let fresh = Arc::new((*loaded).clone());
        let kept = cache.insert_if_absent(fresh.clone()).await;
        assert!(Arc::ptr_eq(&kept, &loaded));
        assert!(!Arc::ptr_eq(&kept, &fresh));
        assert_eq!(cache.len().await, 1);
    }
}
