//! Mapping checkpoint ids to on-disk adapter artifacts.

use super::CheckpointId;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const ADAPTER_SUFFIX: &str = "_adapters.safetensors";

/// Resolves a checkpoint id to the artifact that stores it.
pub trait CheckpointResolver: Send + Sync {
    fn resolve(&self, session: &Session, checkpoint_id: &CheckpointId) -> Option<PathBuf>;
}

/// A checkpoint file found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointArtifact {
    pub iteration: u64,
    pub checkpoint_id: CheckpointId,
    pub path: PathBuf,
}

/// Resolves `<digits>_adapters.safetensors` files in a session directory.
///
/// Matching is numeric, so `0000300_adapters.safetensors` and
/// `300_adapters.safetensors` both satisfy checkpoint `000300`.
#[derive(Debug, Clone, Default)]
pub struct AdapterDirectoryResolver {
    roots: Vec<PathBuf>,
}

impl AdapterDirectoryResolver {
    /// `roots` are searched for `<root>/<session_id>` when the session has no
    /// local log location.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Directory holding the session's log and adapters.
    pub fn session_dir(&self, session: &Session) -> Option<PathBuf> {
        let from_log = session
            .log_location
            .as_deref()
            .map(Path::new)
            .and_then(Path::parent)
            .filter(|dir| dir.is_dir())
            .map(Path::to_path_buf);
        from_log.or_else(|| {
            self.roots
                .iter()
                .map(|root| root.join(session.session_id.as_str()))
                .find(|dir| dir.is_dir())
        })
    }
}

impl CheckpointResolver for AdapterDirectoryResolver {
    fn resolve(&self, session: &Session, checkpoint_id: &CheckpointId) -> Option<PathBuf> {
        let iteration = checkpoint_id.iteration()?;
        let dir = self.session_dir(session)?;
        let found = list_artifacts(&dir)
            .into_iter()
            .find(|artifact| artifact.iteration == iteration)
            .map(|artifact| artifact.path);
        if found.is_none() {
            debug!(
                session = %session.session_id,
                checkpoint = %checkpoint_id,
                "No adapter file for checkpoint"
            );
        }
        found
    }
}

/// Iteration encoded in an adapter file name, if it follows the convention.
pub fn adapter_iteration(file_name: &str) -> Option<u64> {
    let digits = file_name.strip_suffix(ADAPTER_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Adapter checkpoints directly inside `dir`, newest iteration first.
pub fn list_artifacts(dir: &Path) -> Vec<CheckpointArtifact> {
    let mut artifacts: Vec<CheckpointArtifact> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let iteration = adapter_iteration(e.file_name().to_str()?)?;
            Some(CheckpointArtifact {
                iteration,
                checkpoint_id: CheckpointId::from_iteration(iteration),
                path: e.into_path(),
            })
        })
        .collect();
    artifacts.sort_by(|a, b| b.iteration.cmp(&a.iteration));
    artifacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::LogRecordParser;
    use crate::session::{SessionId, SessionSummary};

    fn session_at(dir: &Path, id: &str) -> Session {
        let summary = SessionSummary {
            session_id: SessionId::new(id),
            display_name: id.to_string(),
            model_name: None,
            log_location: dir.join("CPT_log.json").to_string_lossy().into_owned(),
            latest_iteration: None,
            started_at: None,
        };
        LogRecordParser::new().parse(&summary, b"{}")
    }

    #[test]
    fn test_adapter_iteration_parsing() {
        assert_eq!(adapter_iteration("0000300_adapters.safetensors"), Some(300));
        assert_eq!(adapter_iteration("adapters.safetensors"), None);
        assert_eq!(adapter_iteration("best_adapters.safetensors"), None);
        assert_eq!(adapter_iteration("0000300_adapters.bin"), None);
    }

    #[test]
    fn test_list_artifacts_sorted_descending() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "0000100_adapters.safetensors",
            "0000300_adapters.safetensors",
            "0000200_adapters.safetensors",
            "adapters.safetensors",
            "CPT_log.json",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let iters: Vec<u64> = list_artifacts(dir.path()).iter().map(|a| a.iteration).collect();
        assert_eq!(iters, vec![300, 200, 100]);
    }

    #[test]
    fn test_resolve_matches_numerically() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0000200_adapters.safetensors"), b"").unwrap();
        let session = session_at(dir.path(), "run");
        let resolver = AdapterDirectoryResolver::default();

        let path = resolver.resolve(&session, &CheckpointId::from_iteration(200));
        assert_eq!(path, Some(dir.path().join("0000200_adapters.safetensors")));
        assert!(resolver
            .resolve(&session, &CheckpointId::from_iteration(300))
            .is_none());
    }

    #[test]
    fn test_resolve_via_roots() {
        let root = tempfile::tempdir().unwrap();
        let session_dir = root.path().join("run_a");
        std::fs::create_dir(&session_dir).unwrap();
        std::fs::write(session_dir.join("50_adapters.safetensors"), b"").unwrap();

        let mut session = session_at(&root.path().join("missing"), "run_a");
        session.log_location = None;
        let resolver = AdapterDirectoryResolver::new(vec![root.path().to_path_buf()]);
        assert_eq!(
            resolver.resolve(&session, &CheckpointId::from_iteration(50)),
            Some(session_dir.join("50_adapters.safetensors"))
        );
    }
}
