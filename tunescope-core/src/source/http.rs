//! Training service over HTTP.
//!
//! `GET {base}/api/training/sessions` lists sessions; `POST {base}/api/logs/raw`
//! with `{"log_file": ...}` returns the raw log text.

use super::{RawSessionLog, SessionSource};
use crate::error::{SessionLoadError, SourceError};
use crate::parser::parse_timestamp;
use crate::session::{SessionId, SessionSummary};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct SessionsResponse {
    #[serde(default)]
    training_sessions: Vec<ServiceSession>,
}

#[derive(Debug, Deserialize)]
struct ServiceSession {
    session_id: String,
    #[serde(default)]
    session_name: Option<String>,
    log_file: String,
    #[serde(default)]
    model_name: Option<String>,
    #[serde(default)]
    latest_iteration: Option<u64>,
    #[serde(default)]
    start_time: Option<String>,
}

impl From<ServiceSession> for SessionSummary {
    fn from(s: ServiceSession) -> Self {
        let started_at = s
            .start_time
            .map(serde_json::Value::String)
            .as_ref()
            .and_then(parse_timestamp);
        Self {
            display_name: s.session_name.unwrap_or_else(|| s.session_id.clone()),
            session_id: SessionId::new(s.session_id),
            model_name: s.model_name,
            log_location: s.log_file,
            latest_iteration: s.latest_iteration,
            started_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct RawLogRequest<'a> {
    log_file: &'a str,
}

#[derive(Debug, Deserialize)]
struct RawLogResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    logs: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Fetches sessions from a running training service.
pub struct HttpSource {
    base_url: String,
    client: reqwest::Client,
    /// Session listings from the last `list_sessions` call, for log lookups.
    known: RwLock<HashMap<SessionId, SessionSummary>>,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Http {
                url: base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            base_url,
            client,
            known: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn sessions_url(&self) -> String {
        format!("{}/api/training/sessions", self.base_url)
    }

    fn raw_log_url(&self) -> String {
        format!("{}/api/logs/raw", self.base_url)
    }

    async fn summary_for(&self, session_id: &SessionId) -> Result<SessionSummary, SessionLoadError> {
        if let Some(summary) = self.known.read().await.get(session_id).cloned() {
            return Ok(summary);
        }
        let listed = self
            .list_sessions()
            .await
            .map_err(|e| SessionLoadError::Http {
                session_id: session_id.clone(),
                message: e.to_string(),
            })?;
        listed
            .into_iter()
            .find(|s| &s.session_id == session_id)
            .ok_or_else(|| SessionLoadError::NotFound {
                session_id: session_id.clone(),
            })
    }
}

#[async_trait]
impl SessionSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, SourceError> {
        let url = self.sessions_url();
        let http_error = |e: reqwest::Error| SourceError::Http {
            url: url.clone(),
            message: e.to_string(),
        };
        let response = self.client.get(&url).send().await.map_err(http_error)?;
        if !response.status().is_success() {
            return Err(SourceError::InvalidResponse {
                url: url.clone(),
                message: format!("status {}", response.status()),
            });
        }
        let body: SessionsResponse = response.json().await.map_err(|e| SourceError::InvalidResponse {
            url: url.clone(),
            message: e.to_string(),
        })?;

        let summaries: Vec<SessionSummary> = body
            .training_sessions
            .into_iter()
            .map(SessionSummary::from)
            .collect();
        let mut known = self.known.write().await;
        known.clear();
        known.extend(summaries.iter().map(|s| (s.session_id.clone(), s.clone())));
        debug!(count = summaries.len(), url = %url, "Listed service sessions");
        Ok(summaries)
    }

    async fn fetch_session_metrics(
        &self,
        session_id: &SessionId,
    ) -> Result<RawSessionLog, SessionLoadError> {
        let summary = self.summary_for(session_id).await?;
        let http_error = |message: String| SessionLoadError::Http {
            session_id: session_id.clone(),
            message,
        };

        let response = self
            .client
            .post(self.raw_log_url())
            .json(&RawLogRequest {
                log_file: &summary.log_location,
            })
            .send()
            .await
            .map_err(|e| http_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(http_error(format!("status {}", response.status())));
        }
        let body: RawLogResponse = response
            .json()
            .await
            .map_err(|e| http_error(e.to_string()))?;

        match (body.success, body.logs) {
            (true, Some(logs)) => Ok(RawSessionLog {
                summary,
                content: logs.into_bytes(),
            }),
            _ => Err(SessionLoadError::Service {
                session_id: session_id.clone(),
                message: body
                    .error
                    .unwrap_or_else(|| "response carried no logs".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_session_maps_to_summary() {
        let body: SessionsResponse = serde_json::from_str(
            r#"{"training_sessions": [{
                "session_id": "qwen_lr1e_05",
                "session_name": "Qwen LR 1e-5",
                "log_file": "/models/cpt/qwen_lr1e_05/CPT_20250601.json",
                "model_name": "Qwen/Qwen3-4B",
                "latest_iteration": 300,
                "start_time": "2025-06-01T12:00:00"
            }, {
                "session_id": "bare",
                "log_file": "/models/ift/bare/IFT_1.json"
            }]}"#,
        )
        .unwrap();
        let summaries: Vec<SessionSummary> = body
            .training_sessions
            .into_iter()
            .map(SessionSummary::from)
            .collect();
        assert_eq!(summaries[0].display_name, "Qwen LR 1e-5");
        assert_eq!(summaries[0].latest_iteration, Some(300));
        assert!(summaries[0].started_at.is_some());
        assert_eq!(summaries[1].display_name, "bare");
        assert!(summaries[1].model_name.is_none());
    }

    #[test]
    fn test_base_url_is_normalized() {
        let source = HttpSource::new("http://localhost:5001/", Duration::from_secs(5)).unwrap();
        assert_eq!(source.sessions_url(), "http://localhost:5001/api/training/sessions");
        assert_eq!(source.raw_log_url(), "http://localhost:5001/api/logs/raw");
    }

    #[test]
    fn test_raw_log_failure_payload() {
        let body: RawLogResponse =
            serde_json::from_str(r#"{"success": false, "error": "log not found"}"#).unwrap();
        assert!(!body.success);
        assert_eq!(body.error.as_deref(), Some("log not found"));
    }
}
