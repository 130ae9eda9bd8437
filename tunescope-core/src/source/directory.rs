//! Local session directories.
//!
//! Layout: `<root>/<session_dir>/{CPT,IFT}_<timestamp>.json`. The directory
//! name is the session id. When a directory holds several logs the one with
//! the greatest file name (the newest timestamp) is used.

use super::{RawSessionLog, SessionSource};
use crate::error::{SessionLoadError, SourceError};
use crate::parser::{iteration_value, parse_timestamp};
use crate::session::{SessionId, SessionSummary};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const LOG_PREFIXES: [&str; 2] = ["CPT_", "IFT_"];

/// Reads sessions from one or more local root directories.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    roots: Vec<PathBuf>,
}

impl DirectorySource {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Session id -> newest log file. Earlier roots win on id collisions.
    fn discover(&self) -> BTreeMap<SessionId, PathBuf> {
        let mut found: BTreeMap<SessionId, PathBuf> = BTreeMap::new();
        for root in &self.roots {
            if !root.is_dir() {
                debug!(root = %root.display(), "Session root does not exist, skipping");
                continue;
            }
            let mut in_root: BTreeMap<SessionId, PathBuf> = BTreeMap::new();
            for entry in WalkDir::new(root).min_depth(2).max_depth(2) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(root = %root.display(), error = %e, "Failed to read session directory entry");
                        continue;
                    }
                };
                if !entry.file_type().is_file() || !is_session_log(entry.path()) {
                    continue;
                }
                let Some(id) = entry
                    .path()
                    .parent()
                    .and_then(Path::file_name)
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                else {
                    continue;
                };
                let path = entry.into_path();
                in_root
                    .entry(SessionId::new(id))
                    .and_modify(|current| {
                        if path.file_name() > current.file_name() {
                            *current = path.clone();
                        }
                    })
                    .or_insert_with(|| path.clone());
            }
            for (id, path) in in_root {
                found.entry(id).or_insert(path);
            }
        }
        found
    }

    fn find_log(&self, session_id: &SessionId) -> Option<PathBuf> {
        let id = session_id.as_str();
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return None;
        }
        self.roots
            .iter()
            .map(|root| root.join(id))
            .filter(|dir| dir.is_dir())
            .find_map(|dir| newest_log_in(&dir))
    }
}

fn is_session_log(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".json") && LOG_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

fn newest_log_in(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_session_log(e.path()))
        .map(|e| e.into_path())
        .max_by(|a, b| a.file_name().cmp(&b.file_name()))
}

/// Build a listing entry from a log file's content without a full parse.
pub(crate) fn summarize(session_id: &SessionId, path: &Path, content: &[u8]) -> SessionSummary {
    let root: Value = serde_json::from_slice(content).unwrap_or(Value::Null);
    let config = root.get("config");
    let model_name = config
        .and_then(|c| c.get("model_name").or_else(|| c.get("base_model")))
        .or_else(|| root.get("model_name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let latest_iteration = match root.get("metrics") {
        Some(Value::Array(records)) => records
            .iter()
            .filter_map(|r| r.get("iteration").and_then(iteration_value))
            .max(),
        Some(Value::Object(series)) => series
            .values()
            .filter_map(|s| s.get("x").and_then(Value::as_array))
            .flat_map(|xs| xs.iter().filter_map(iteration_value))
            .max(),
        _ => None,
    };
    SessionSummary {
        session_id: session_id.clone(),
        display_name: session_id.to_string(),
        model_name,
        log_location: path.to_string_lossy().into_owned(),
        latest_iteration,
        started_at: root.get("start_time").and_then(parse_timestamp),
    }
}

#[async_trait]
impl SessionSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, SourceError> {
        let mut summaries = Vec::new();
        for (id, path) in self.discover() {
            match tokio::fs::read(&path).await {
                Ok(content) => summaries.push(summarize(&id, &path, &content)),
                Err(source) => {
                    warn!(path = %path.display(), error = %source, "Failed to read session log, skipping");
                }
            }
        }
        debug!(count = summaries.len(), "Listed local sessions");
        Ok(summaries)
    }

    async fn fetch_session_metrics(
        &self,
        session_id: &SessionId,
    ) -> Result<RawSessionLog, SessionLoadError> {
        let path = self
            .find_log(session_id)
            .ok_or_else(|| SessionLoadError::NotFound {
                session_id: session_id.clone(),
            })?;
        let content = tokio::fs::read(&path)
            .await
            .map_err(|source| SessionLoadError::Io {
                session_id: session_id.clone(),
                source,
            })?;
        Ok(RawSessionLog {
            summary: summarize(session_id, &path, &content),
            content,
        })
    }
}
