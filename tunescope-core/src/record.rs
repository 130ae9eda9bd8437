//! Per-iteration training records and metric series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of a metric stream emitted by a training run.
///
/// Serialized as its snake_case log key so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum MetricName {
    TrainingLoss,
    ValidationLoss,
    TrainingPerplexity,
    ValidationPerplexity,
    LearningRate,
    TokensPerSecond,
    IterationsPerSecond,
    TrainedTokens,
    PeakMemoryGb,
    Other(String),
}

impl MetricName {
    /// Resolve a metric key as it appears in a training log.
    ///
    /// Accepts both snake_case record keys (`val_loss`) and chart titles
    /// (`Validation Loss`), case-insensitively.
    pub fn from_key(key: &str) -> Self {
        let normalized: String = key
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "train_loss" | "training_loss" | "loss" => Self::TrainingLoss,
            "val_loss" | "validation_loss" | "eval_loss" => Self::ValidationLoss,
            "train_perplexity" | "training_perplexity" | "perplexity" => Self::TrainingPerplexity,
            "val_perplexity" | "validation_perplexity" | "eval_perplexity" => {
                Self::ValidationPerplexity
            }
            "learning_rate" | "lr" => Self::LearningRate,
            "tokens_per_sec" | "tokens_per_second" => Self::TokensPerSecond,
            "iterations_per_sec" | "iterations_per_second" => Self::IterationsPerSecond,
            "trained_tokens" => Self::TrainedTokens,
            "peak_memory_gb" | "peak_memory" => Self::PeakMemoryGb,
            _ => Self::Other(normalized),
        }
    }

    /// The snake_case key used when writing this metric back out.
    pub fn as_key(&self) -> &str {
        match self {
            Self::TrainingLoss => "train_loss",
            Self::ValidationLoss => "val_loss",
            Self::TrainingPerplexity => "train_perplexity",
            Self::ValidationPerplexity => "val_perplexity",
            Self::LearningRate => "learning_rate",
            Self::TokensPerSecond => "tokens_per_sec",
            Self::IterationsPerSecond => "iterations_per_sec",
            Self::TrainedTokens => "trained_tokens",
            Self::PeakMemoryGb => "peak_memory_gb",
            Self::Other(name) => name.as_str(),
        }
    }
}

impl From<String> for MetricName {
    fn from(key: String) -> Self {
        Self::from_key(&key)
    }
}

impl From<MetricName> for String {
    fn from(name: MetricName) -> Self {
        name.as_key().to_string()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

/// One emitted measurement at a given iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub iteration: u64,
    pub metric_name: MetricName,
    /// `None` when the metric was not sampled at this iteration.
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A single (iteration, value) sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub iteration: u64,
    pub value: f64,
}

/// Ordered samples of one metric within one session.
///
/// Iterations are strictly increasing. Building from samples that repeat an
/// iteration keeps the last value seen for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    points: Vec<SeriesPoint>,
}

impl MetricSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from `(iteration, value)` pairs in any order.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u64, f64)>,
    {
        let collapsed: BTreeMap<u64, f64> = pairs.into_iter().collect();
        Self {
            points: collapsed
                .into_iter()
                .map(|(iteration, value)| SeriesPoint { iteration, value })
                .collect(),
        }
    }

    /// Collect the sampled values of one metric out of a record stream.
    pub fn from_records<'a, I>(metric: &MetricName, records: I) -> Self
    where
        I: IntoIterator<Item = &'a TrainingRecord>,
    {
        Self::from_pairs(
            records
                .into_iter()
                .filter(|r| &r.metric_name == metric)
                .filter_map(|r| r.value.map(|v| (r.iteration, v))),
        )
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SeriesPoint> {
        self.points.iter()
    }

    pub fn first(&self) -> Option<&SeriesPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&SeriesPoint> {
        self.points.last()
    }

    pub fn iterations(&self) -> impl Iterator<Item = u64> + '_ {
        self.points.iter().map(|p| p.iteration)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }

    /// Value sampled at exactly `iteration`, if any.
    pub fn value_at(&self, iteration: u64) -> Option<f64> {
        self.points
            .binary_search_by_key(&iteration, |p| p.iteration)
            .ok()
            .map(|idx| self.points[idx].value)
    }
}

impl<'a> IntoIterator for &'a MetricSeries {
    type Item = &'a SeriesPoint;
    type IntoIter = std::slice::Iter<'a, SeriesPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
