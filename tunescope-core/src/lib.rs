//! # Tunescope Core
//!
//! Training-run metrics aggregation and checkpoint selection for fine-tuning
//! dashboards. Raw session logs are parsed into metric series, analysed
//! (rolling stability, generalization gap, best checkpoint) and aggregated
//! across sessions into a deterministic comparison dataset.

// Foundation
pub mod config;
pub mod error;
pub mod export;

// Data model
pub mod record;
pub mod session;

// Pipeline
pub mod align;
pub mod checkpoint;
pub mod compare;
pub mod parser;
pub mod stats;

// Session access
pub mod loader;
pub mod source;

// Re-export commonly used types at the crate root.
pub use align::{AlignedPoint, FitBand, GapKind, GeneralizationGapPoint, align, generalization_gap};
pub use checkpoint::{
    AdapterDirectoryResolver, BestCheckpoint, CheckpointId, CheckpointResolver, select_best, top_k,
};
pub use compare::{
    AnalysisOptions, ComparisonDataset, ComparisonSession, ComparisonStatus, ComparisonWarning,
    SessionComparisonAggregator, SummaryRow, compare,
};
pub use config::{TunescopeConfig, load_config};
pub use error::{
    CompareError, ConfigError, ParseError, Result, SessionLoadError, SourceError, TunescopeError,
};
pub use loader::{SessionCache, SessionLoader, SessionRepository};
pub use parser::LogRecordParser;
pub use record::{MetricName, MetricSeries, SeriesPoint, TrainingRecord};
pub use session::{
    Classified, Confidence, FineTuneMethod, Hyperparameters, Session, SessionId, SessionSummary,
    TrainingPhase,
};
pub use source::{DirectorySource, HttpSource, RawSessionLog, SessionSource};
pub use stats::{StabilityBand, StabilityPoint, rolling_stability, rolling_variance};
