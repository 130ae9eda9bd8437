//! Multi-session comparison.
//!
//! The aggregator loads each requested session independently, derives the
//! chart series and best checkpoint for every session that loaded, and
//! returns one deterministic [`ComparisonDataset`]:
//!
//! - colors follow requested order among successful loads, never completion order;
//! - sessions are stably sorted by best validation loss (none sorts last);
//! - a failed load drops that session and adds a warning.
//!
//! `compare` is pure with respect to its inputs. Changing the selection means
//! calling it again.

pub mod context;
pub mod palette;
pub mod summary;

pub use context::{AnalysisOptions, ComparisonSession};
pub use palette::{PALETTE, color_for};
pub use summary::SummaryRow;

use crate::align::{GeneralizationGapPoint, generalization_gap};
use crate::checkpoint::{BestCheckpoint, select_best, top_k};
use crate::error::CompareError;
use crate::loader::SessionLoader;
use crate::record::MetricSeries;
use crate::session::{Session, SessionId};
use crate::stats::{StabilityPoint, VariancePoint, rolling_stability, rolling_variance};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Overall outcome of a comparison request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    /// Nothing was requested.
    EmptySelection,
    /// Sessions were requested but none loaded.
    NoData,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationDimension {
    FineTuneMethod,
    TrainingPhase,
}

impl fmt::Display for ClassificationDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FineTuneMethod => f.write_str("fine-tune method"),
            Self::TrainingPhase => f.write_str("training phase"),
        }
    }
}

/// Non-fatal issues found while building a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComparisonWarning {
    SessionLoadFailed {
        session_id: SessionId,
        reason: String,
    },
    ClassificationInferred {
        session_id: SessionId,
        dimension: ClassificationDimension,
        value: String,
        rule: String,
    },
    /// The log could not be parsed into metric series.
    NoMetrics { session_id: SessionId },
}

impl fmt::Display for ComparisonWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionLoadFailed { session_id, reason } => {
                write!(f, "session {session_id} was excluded: {reason}")
            }
            Self::ClassificationInferred {
                session_id,
                dimension,
                value,
                rule,
            } => write!(
                f,
                "session {session_id}: {dimension} '{value}' was inferred ({rule})"
            ),
            Self::NoMetrics { session_id } => {
                write!(f, "session {session_id} has no parsed metrics")
            }
        }
    }
}

/// Derived data for one session in a comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionComparison {
    pub session: Arc<Session>,
    pub color: String,
    pub best_checkpoint: Option<BestCheckpoint>,
    /// Best checkpoints by validation loss, best first.
    pub top_checkpoints: Vec<BestCheckpoint>,
    pub validation_loss: MetricSeries,
    pub validation_perplexity: MetricSeries,
    pub stability: Vec<StabilityPoint>,
    /// Rolling variance of training loss over the stability window.
    pub training_loss_variance: Vec<VariancePoint>,
    pub generalization_gap: Vec<GeneralizationGapPoint>,
}

impl SessionComparison {
    fn build(session: Arc<Session>, color: &str, options: &AnalysisOptions) -> Self {
        let empty = MetricSeries::new();
        let validation_loss = session.validation_loss().unwrap_or(&empty).clone();
        let validation_perplexity = session.validation_perplexity().unwrap_or(&empty).clone();
        let train_loss = session.training_loss().unwrap_or(&empty);

        Self {
            best_checkpoint: select_best(&validation_loss),
            top_checkpoints: top_k(&validation_loss, options.top_k),
            stability: rolling_stability(&validation_loss, options.stability_window),
            training_loss_variance: rolling_variance(train_loss, options.stability_window),
            generalization_gap: generalization_gap(train_loss, &validation_loss),
            validation_loss,
            validation_perplexity,
            color: color.to_string(),
            session,
        }
    }

    /// Sort key: best validation loss, `+inf` when there is none.
    fn rank_key(&self) -> f64 {
        self.best_checkpoint
            .as_ref()
            .map_or(f64::INFINITY, |b| b.validation_loss)
    }
}

/// Everything a rendering layer needs to draw a comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonDataset {
    pub status: ComparisonStatus,
    pub options: AnalysisOptions,
    /// Sessions in display order.
    pub sessions: Vec<SessionComparison>,
    pub summary: Vec<SummaryRow>,
    pub warnings: Vec<ComparisonWarning>,
}

impl ComparisonDataset {
    fn empty(status: ComparisonStatus, options: AnalysisOptions) -> Self {
        Self {
            status,
            options,
            sessions: Vec::new(),
            summary: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Ids excluded because they failed to load.
    pub fn failed_sessions(&self) -> Vec<&SessionId> {
        self.warnings
            .iter()
            .filter_map(|w| match w {
                ComparisonWarning::SessionLoadFailed { session_id, .. } => Some(session_id),
                _ => None,
            })
            .collect()
    }

    pub fn session(&self, id: &SessionId) -> Option<&SessionComparison> {
        self.sessions.iter().find(|s| &s.session.session_id == id)
    }
}

/// Orchestrates session loads and per-session analysis.
#[derive(Debug, Clone, Default)]
pub struct SessionComparisonAggregator {
    options: AnalysisOptions,
}

impl SessionComparisonAggregator {
    pub fn new(options: AnalysisOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Compare the sessions selected in `selection`, using its options.
    pub async fn compare_selection(
        selection: &ComparisonSession,
        loader: &dyn SessionLoader,
    ) -> ComparisonDataset {
        Self::new(selection.options)
            .compare(selection.selected(), loader)
            .await
    }

    /// Load and compare `session_ids` in the given order.
    pub async fn compare(
        &self,
        session_ids: &[SessionId],
        loader: &dyn SessionLoader,
    ) -> ComparisonDataset {
        let mut seen = HashSet::new();
        let ids: Vec<SessionId> = session_ids
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();
        if ids.is_empty() {
            debug!("Comparison requested with no sessions");
            return ComparisonDataset::empty(ComparisonStatus::EmptySelection, self.options);
        }

        let (loaded, warnings) = self.load_all(ids, loader).await;
        self.aggregate(loaded, warnings)
    }

    /// Like [`compare`](Self::compare), but abandons in-flight loads when
    /// `cancel` fires. A cancelled request never yields a partial dataset.
    pub async fn compare_until_cancelled(
        &self,
        session_ids: &[SessionId],
        loader: &dyn SessionLoader,
        cancel: &CancellationToken,
    ) -> Result<ComparisonDataset, CompareError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(sessions = session_ids.len(), "Comparison cancelled");
                Err(CompareError::Cancelled)
            }
            dataset = self.compare(session_ids, loader) => Ok(dataset),
        }
    }

    async fn load_all(
        &self,
        ids: Vec<SessionId>,
        loader: &dyn SessionLoader,
    ) -> (Vec<Arc<Session>>, Vec<ComparisonWarning>) {
        let results: Vec<_> = stream::iter(ids)
            .map(|id| async move {
                let result = loader.load(&id).await;
                (id, result)
            })
            .buffered(self.options.max_concurrent_loads.max(1))
            .collect()
            .await;

        let mut loaded = Vec::with_capacity(results.len());
        let mut warnings = Vec::new();
        for (id, result) in results {
            match result {
                Ok(session) => loaded.push(session),
                Err(e) => {
                    warn!(session = %id, error = %e, "Session failed to load, excluding from comparison");
                    warnings.push(ComparisonWarning::SessionLoadFailed {
                        session_id: id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        (loaded, warnings)
    }

    /// Build a dataset from sessions already loaded, in requested order.
    pub fn aggregate(
        &self,
        loaded: Vec<Arc<Session>>,
        mut warnings: Vec<ComparisonWarning>,
    ) -> ComparisonDataset {
        if loaded.is_empty() {
            warn!(failed = warnings.len(), "No requested session could be loaded");
            let mut dataset = ComparisonDataset::empty(ComparisonStatus::NoData, self.options);
            dataset.warnings = warnings;
            return dataset;
        }

        let mut sessions: Vec<SessionComparison> = loaded
            .into_iter()
            .enumerate()
            .map(|(slot, session)| {
                warnings.extend(session_warnings(&session));
                SessionComparison::build(session, color_for(slot), &self.options)
            })
            .collect();
        sessions.sort_by(|a, b| a.rank_key().total_cmp(&b.rank_key()));

        let summary = sessions.iter().map(SummaryRow::from).collect();
        info!(
            sessions = sessions.len(),
            warnings = warnings.len(),
            "Comparison complete"
        );
        ComparisonDataset {
            status: ComparisonStatus::Complete,
            options: self.options,
            sessions,
            summary,
            warnings,
        }
    }
}

/// Compare `session_ids` with default analysis options.
pub async fn compare(session_ids: &[SessionId], loader: &dyn SessionLoader) -> ComparisonDataset {
    SessionComparisonAggregator::default()
        .compare(session_ids, loader)
        .await
}

fn session_warnings(session: &Session) -> Vec<ComparisonWarning> {
    let mut warnings = Vec::new();
    if !session.has_metrics() {
        warnings.push(ComparisonWarning::NoMetrics {
            session_id: session.session_id.clone(),
        });
    }
    if session.fine_tune_method.is_inferred() {
        warnings.push(ComparisonWarning::ClassificationInferred {
            session_id: session.session_id.clone(),
            dimension: ClassificationDimension::FineTuneMethod,
            value: session.fine_tune_method.value.to_string(),
            rule: session.fine_tune_method.rule.clone(),
        });
    }
    if session.training_phase.is_inferred() {
        warnings.push(ComparisonWarning::ClassificationInferred {
            session_id: session.session_id.clone(),
            dimension: ClassificationDimension::TrainingPhase,
            value: session.training_phase.value.to_string(),
            rule: session.training_phase.rule.clone(),
        });
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionLoadError;
    use crate::parser::LogRecordParser;
    use crate::session::SessionSummary;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    /// In-memory loader; ids missing from `logs` fail. `delays` slow some loads.
    #[derive(Default)]
    struct MemoryLoader {
        logs: HashMap<String, String>,
        delays: HashMap<String, u64>,
    }

    impl MemoryLoader {
        fn with(mut self, id: &str, val: &[(u64, f64)]) -> Self {
            let metrics: Vec<_> = val
                .iter()
                .map(|(i, v)| json!({"iteration": i, "val_loss": v, "train_loss": v + 0.05}))
                .collect();
            let config = json!({"fine_tune_type": "lora", "training_type": "cpt"});
            self.logs.insert(
                id.to_string(),
                json!({"config": config, "metrics": metrics}).to_string(),
            );
            self
        }

        fn delayed(mut self, id: &str, millis: u64) -> Self {
            self.delays.insert(id.to_string(), millis);
            self
        }
    }

    #[async_trait]
    impl SessionLoader for MemoryLoader {
        async fn load(&self, session_id: &SessionId) -> Result<Arc<Session>, SessionLoadError> {
            if let Some(ms) = self.delays.get(session_id.as_str()) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            let raw = self
                .logs
                .get(session_id.as_str())
                .ok_or_else(|| SessionLoadError::NotFound {
                    session_id: session_id.clone(),
                })?;
            let summary = SessionSummary {
                session_id: session_id.clone(),
                display_name: session_id.to_string(),
                model_name: None,
                log_location: format!("models/cpt/{session_id}/CPT_1.json"),
                latest_iteration: None,
                started_at: None,
            };
            Ok(Arc::new(LogRecordParser::new().parse(&summary, raw.as_bytes())))
        }
    }

    fn ids(raw: &[&str]) -> Vec<SessionId> {
        raw.iter().map(|s| SessionId::new(*s)).collect()
    }

    fn order(dataset: &ComparisonDataset) -> Vec<(&str, &str)> {
        dataset
            .sessions
            .iter()
            .map(|s| (s.session.session_id.as_str(), s.color.as_str()))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_selection() {
        let dataset = compare(&[], &MemoryLoader::default()).await;
        assert_eq!(dataset.status, ComparisonStatus::EmptySelection);
        assert!(dataset.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_all_failures_is_no_data() {
        let dataset = compare(&ids(&["x", "y"]), &MemoryLoader::default()).await;
        assert_eq!(dataset.status, ComparisonStatus::NoData);
        assert_eq!(dataset.failed_sessions().len(), 2);
    }

    #[tokio::test]
    async fn test_one_failure_keeps_the_rest() {
        let loader = MemoryLoader::default().with("good", &[(100, 0.9), (200, 0.5)]);
        let dataset = compare(&ids(&["bad", "good"]), &loader).await;
        assert_eq!(dataset.status, ComparisonStatus::Complete);
        assert_eq!(order(&dataset), vec![("good", PALETTE[0])]);
        assert_eq!(dataset.failed_sessions(), vec![&SessionId::new("bad")]);
        assert!(dataset.warnings[0].to_string().contains("bad"));
    }

    #[tokio::test]
    async fn test_sorted_by_best_loss_with_colors_by_request_order() {
        let loader = MemoryLoader::default()
            .with("a", &[(100, 0.9), (200, 0.8)])
            .with("b", &[(100, 0.4)])
            .with("c", &[(100, 0.6)])
            .delayed("a", 30);
        let dataset = compare(&ids(&["a", "b", "c"]), &loader).await;
        assert_eq!(
            order(&dataset),
            vec![("b", PALETTE[1]), ("c", PALETTE[2]), ("a", PALETTE[0])]
        );
        assert_eq!(dataset.summary[0].best_validation_loss, Some(0.4));
    }

    #[tokio::test]
    async fn test_sessions_without_validation_sort_last() {
        let mut loader = MemoryLoader::default().with("scored", &[(10, 1.2)]);
        loader
            .logs
            .insert("text".into(), "plain text training output".into());
        let dataset = compare(&ids(&["text", "scored"]), &loader).await;
        assert_eq!(order(&dataset), vec![("scored", PALETTE[1]), ("text", PALETTE[0])]);
        assert!(dataset.sessions[1].best_checkpoint.is_none());
        assert!(dataset.warnings.iter().any(|w| matches!(
            w,
            ComparisonWarning::NoMetrics { session_id } if session_id.as_str() == "text"
        )));
    }

    #[tokio::test]
    async fn test_repeated_compare_is_deterministic() {
        let loader = MemoryLoader::default()
            .with("a", &[(100, 0.5)])
            .with("b", &[(100, 0.5)])
            .with("c", &[(100, 0.3)])
            .delayed("b", 10);
        let requested = ids(&["a", "b", "c"]);
        let first = compare(&requested, &loader).await;
        let second = compare(&requested, &loader).await;
        assert_eq!(order(&first), order(&second));
        assert_eq!(
            order(&first),
            vec![("c", PALETTE[2]), ("a", PALETTE[0]), ("b", PALETTE[1])]
        );
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_compared_once() {
        let loader = MemoryLoader::default().with("a", &[(100, 0.5)]);
        let dataset = compare(&ids(&["a", "a"]), &loader).await;
        assert_eq!(dataset.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_comparison_returns_error() {
        let loader = MemoryLoader::default()
            .with("slow", &[(100, 0.5)])
            .delayed("slow", 5_000);
        let token = CancellationToken::new();
        let aggregator = SessionComparisonAggregator::default();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let result = aggregator
            .compare_until_cancelled(&ids(&["slow"]), &loader, &token)
            .await;
        assert!(matches!(result, Err(CompareError::Cancelled)));
    }

    #[tokio::test]
    async fn test_selection_options_flow_through() {
        let loader = MemoryLoader::default().with(
            "a",
            &[(10, 0.9), (20, 0.8), (30, 0.7), (40, 0.75)],
        );
        let selection = ComparisonSession::from_ids(
            ["a"],
            AnalysisOptions {
                stability_window: 2,
                top_k: 2,
                max_concurrent_loads: 1,
            },
        );
        let dataset = SessionComparisonAggregator::compare_selection(&selection, &loader).await;
        let entry = &dataset.sessions[0];
        assert_eq!(entry.stability.len(), 2);
        assert_eq!(entry.top_checkpoints.len(), 2);
        assert_eq!(entry.best_checkpoint.as_ref().map(|b| b.iteration), Some(30));
        assert_eq!(dataset.summary[0].best_checkpoint_id.as_deref(), Some("000030"));
    }

    #[tokio::test]
    async fn test_training_loss_variance_uses_the_stability_window() {
        let loader = MemoryLoader::default().with(
            "a",
            &[(10, 0.9), (20, 0.8), (30, 0.7), (40, 0.75)],
        );
        let selection = ComparisonSession::from_ids(
            ["a"],
            AnalysisOptions {
                stability_window: 2,
                ..AnalysisOptions::default()
            },
        );
        let dataset = SessionComparisonAggregator::compare_selection(&selection, &loader).await;
        let variance = &dataset.sessions[0].training_loss_variance;
        let iterations: Vec<u64> = variance.iter().map(|p| p.iteration).collect();
        assert_eq!(iterations, vec![30, 40]);
        // Windows [0.95, 0.85] and [0.85, 0.75].
        for point in variance {
            assert!((point.variance - 0.0025).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_training_loss_variance_is_empty_without_training_loss() {
        let mut loader = MemoryLoader::default();
        loader.logs.insert(
            "val_only".into(),
            json!({"metrics": [
                {"iteration": 10, "val_loss": 1.0},
                {"iteration": 20, "val_loss": 0.9},
                {"iteration": 30, "val_loss": 0.8},
            ]})
            .to_string(),
        );
        let dataset = compare(&ids(&["val_only"]), &loader).await;
        assert!(dataset.sessions[0].training_loss_variance.is_empty());
    }
}
