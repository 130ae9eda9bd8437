//! Where training sessions and their raw logs come from.
//!
//! A [`SessionSource`] lists the sessions it knows about and fetches the raw
//! log of one of them. Parsing happens elsewhere; sources only move bytes.

pub mod directory;
pub mod http;

pub use directory::DirectorySource;
pub use http::HttpSource;

use crate::error::{SessionLoadError, SourceError};
use crate::session::{SessionId, SessionSummary};
use async_trait::async_trait;

/// Raw log content of one session together with its listing entry.
#[derive(Debug, Clone)]
pub struct RawSessionLog {
    pub summary: SessionSummary,
    pub content: Vec<u8>,
}

/// A provider of training sessions.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Short name for logs (`"directory"`, `"http"`).
    fn name(&self) -> &str;

    /// Every session this source can fetch.
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, SourceError>;

    /// Raw log content of one session.
    async fn fetch_session_metrics(
        &self,
        session_id: &SessionId,
    ) -> Result<RawSessionLog, SessionLoadError>;
}
