//! Error types for the Tunescope engine.
//!
//! Uses `thiserror` for structured variants covering configuration,
//! session loading and comparison. Missing data (short series, no
//! validation samples) is never an error; it shows up as empty results.

use crate::session::SessionId;

/// Top-level error type for the Tunescope core library.
#[derive(Debug, thiserror::Error)]
pub enum TunescopeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session source error: {0}")]
    Source(#[from] SourceError),

    #[error("Session load error: {0}")]
    Load(#[from] SessionLoadError),

    #[error("Comparison error: {0}")]
    Compare(#[from] CompareError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Failure to enumerate the sessions a source knows about.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("Unexpected response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

/// Failure to fetch or read one session.
///
/// The aggregator recovers from these by dropping the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionLoadError {
    #[error("Session not found: {session_id}")]
    NotFound { session_id: SessionId },

    #[error("Failed to read log for session {session_id}: {source}")]
    Io {
        session_id: SessionId,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request for session {session_id} failed: {message}")]
    Http {
        session_id: SessionId,
        message: String,
    },

    #[error("Training service rejected request for session {session_id}: {message}")]
    Service {
        session_id: SessionId,
        message: String,
    },
}

impl SessionLoadError {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::NotFound { session_id }
            | Self::Io { session_id, .. }
            | Self::Http { session_id, .. }
            | Self::Service { session_id, .. } => session_id,
        }
    }
}

/// Why a single log record was skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("record {index} is not an object")]
    NotAnObject { index: usize },

    #[error("record {index} has no iteration")]
    MissingIteration { index: usize },

    #[error("record {index} has an iteration that is not a non-negative integer")]
    InvalidIteration { index: usize },

    #[error("series '{metric}' has mismatched x/y lengths ({x_len} vs {y_len})")]
    MismatchedSeries {
        metric: String,
        x_len: usize,
        y_len: usize,
    },

    #[error("series '{metric}' point {index} is not numeric")]
    InvalidPoint { metric: String, index: usize },

    #[error("{count} non-finite value(s) (NaN/Infinity) read as missing")]
    NonFiniteValues { count: usize },
}

/// Errors surfaced by a comparison request.
#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    #[error("Comparison was cancelled before it completed")]
    Cancelled,
}

/// A type alias for results using the top-level `TunescopeError`.
pub type Result<T> = std::result::Result<T, TunescopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_load() {
        let err = TunescopeError::Load(SessionLoadError::NotFound {
            session_id: SessionId::new("qwen_lr1e_05"),
        });
        assert_eq!(
            err.to_string(),
            "Session load error: Session not found: qwen_lr1e_05"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = TunescopeError::Config(ConfigError::Invalid {
            message: "analysis.stability_window must be >= 1".into(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration: analysis.stability_window must be >= 1"
        );
    }

    #[test]
    fn test_error_display_source() {
        let err = TunescopeError::Source(SourceError::Http {
            url: "http://localhost:5001/api/training/sessions".into(),
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "Session source error: HTTP request to http://localhost:5001/api/training/sessions failed: connection refused"
        );
    }

    #[test]
    fn test_load_error_session_id() {
        let err = SessionLoadError::Http {
            session_id: SessionId::new("a"),
            message: "connection refused".into(),
        };
        assert_eq!(err.session_id().as_str(), "a");
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: TunescopeError = serde_err.into();
        assert!(matches!(err, TunescopeError::Serialization(_)));
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::MismatchedSeries {
            metric: "val_loss".into(),
            x_len: 3,
            y_len: 2,
        };
        assert_eq!(
            err.to_string(),
            "series 'val_loss' has mismatched x/y lengths (3 vs 2)"
        );
        assert_eq!(
            ParseError::NonFiniteValues { count: 2 }.to_string(),
            "2 non-finite value(s) (NaN/Infinity) read as missing"
        );
    }
}
