//! Fine-tuning sessions and their metadata.

use crate::record::{MetricName, MetricSeries};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Stable identifier of a training session (its directory name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How the model weights were updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FineTuneMethod {
    Full,
    #[serde(rename = "lora")]
    LoRA,
    #[serde(rename = "dora")]
    DoRA,
}

impl FineTuneMethod {
    /// Parse a config value such as `"lora"` or `"full"`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" | "full_finetune" | "full_fine_tune" => Some(Self::Full),
            "lora" => Some(Self::LoRA),
            "dora" => Some(Self::DoRA),
            _ => None,
        }
    }
}

impl fmt::Display for FineTuneMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "Full"),
            Self::LoRA => write!(f, "LoRA"),
            Self::DoRA => write!(f, "DoRA"),
        }
    }
}

/// Which stage of the training pipeline a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    ContinuedPretraining,
    InstructionFineTuning,
}

impl TrainingPhase {
    /// Parse a config value such as `"CPT"` or `"IFT"`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpt" | "continued_pretraining" | "pretraining" => Some(Self::ContinuedPretraining),
            "ift" | "sft" | "instruction_fine_tuning" | "instruction" => {
                Some(Self::InstructionFineTuning)
            }
            _ => None,
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Self::ContinuedPretraining => "CPT",
            Self::InstructionFineTuning => "IFT",
        }
    }
}

impl fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// How much a classification can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Read from an explicit config field.
    Definite,
    /// Guessed from names, paths or a fallback default.
    Inferred,
}

/// A classified value tagged with its confidence and the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classified<T> {
    pub value: T,
    pub confidence: Confidence,
    /// Name of the rule that decided the value.
    pub rule: String,
}

impl<T> Classified<T> {
    pub fn definite(value: T, rule: impl Into<String>) -> Self {
        Self {
            value,
            confidence: Confidence::Definite,
            rule: rule.into(),
        }
    }

    pub fn inferred(value: T, rule: impl Into<String>) -> Self {
        Self {
            value,
            confidence: Confidence::Inferred,
            rule: rule.into(),
        }
    }

    pub fn is_inferred(&self) -> bool {
        self.confidence == Confidence::Inferred
    }
}

/// Training hyperparameters, from the embedded config or the display name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub learning_rate: Option<f64>,
    pub batch_size: Option<u32>,
    pub weight_decay: Option<f64>,
    pub lr_decay_factor: Option<f64>,
    pub max_sequence_length: Option<u32>,
    pub warmup_steps: Option<u32>,
    pub max_iterations: Option<u64>,
    pub lr_schedule: Option<String>,
    pub lora_rank: Option<u32>,
    pub lora_scale: Option<f64>,
    pub lora_dropout: Option<f64>,
    /// Number of adapted layers; `-1` means all layers.
    pub lora_layers: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lora_target_modules: Vec<String>,
    /// Fields that were filled from the display name rather than the config.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derived_from_name: Vec<String>,
    /// Config keys not mapped to a typed field.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A checkpoint the training log reports as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCheckpoint {
    pub iteration: u64,
    pub path: PathBuf,
    pub train_loss: Option<f64>,
    pub val_loss: Option<f64>,
    pub train_perplexity: Option<f64>,
    pub val_perplexity: Option<f64>,
    pub learning_rate: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Bookkeeping from one parse of a raw log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseReport {
    pub records_seen: usize,
    pub records_skipped: usize,
    /// Reasons for the first few skipped records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_reasons: Vec<String>,
}

/// A fine-tuning run with its parsed metrics.
///
/// Sessions are immutable once loaded; reloading re-parses from the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub display_name: String,
    pub model_name: Option<String>,
    pub fine_tune_method: Classified<FineTuneMethod>,
    pub training_phase: Classified<TrainingPhase>,
    pub hyperparameters: Hyperparameters,
    pub metric_series: BTreeMap<MetricName, MetricSeries>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub saved_checkpoints: Vec<SavedCheckpoint>,
    pub log_location: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
    /// Opaque log text kept when the log was not structured JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    pub parse_report: ParseReport,
}

impl Session {
    pub fn series(&self, metric: &MetricName) -> Option<&MetricSeries> {
        self.metric_series.get(metric).filter(|s| !s.is_empty())
    }

    pub fn training_loss(&self) -> Option<&MetricSeries> {
        self.series(&MetricName::TrainingLoss)
    }

    pub fn validation_loss(&self) -> Option<&MetricSeries> {
        self.series(&MetricName::ValidationLoss)
    }

    pub fn validation_perplexity(&self) -> Option<&MetricSeries> {
        self.series(&MetricName::ValidationPerplexity)
    }

    /// Whether the log yielded any metric samples at all.
    pub fn has_metrics(&self) -> bool {
        self.metric_series.values().any(|s| !s.is_empty())
    }

    /// Highest iteration seen in any metric stream.
    pub fn latest_iteration(&self) -> Option<u64> {
        self.metric_series
            .values()
            .filter_map(|s| s.last().map(|p| p.iteration))
            .max()
    }
}

/// Listing entry for a session known to a training service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub display_name: String,
    pub model_name: Option<String>,
    /// Where the raw log lives (a file path or a service-side path).
    pub log_location: String,
    pub latest_iteration: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Order sessions for display: by model family, then by parameter count.
///
/// Names without a size token such as `7B` or `1.5b` sort after sized ones.
pub fn sort_for_listing(sessions: &mut [SessionSummary]) {
    sessions.sort_by(|a, b| {
        let a_name = a.model_name.as_deref().unwrap_or("");
        let b_name = b.model_name.as_deref().unwrap_or("");
        model_family(a_name)
            .cmp(&model_family(b_name))
            .then_with(|| match (model_size(a_name), model_size(b_name)) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
}

fn name_tokens(name: &str) -> impl Iterator<Item = String> + '_ {
    name.split(|c: char| !(c.is_ascii_alphanumeric() || c == '.'))
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Billions of parameters from a whole token like `27b`.
fn size_token(token: &str) -> Option<f64> {
    token
        .strip_suffix('b')?
        .parse::<f64>()
        .ok()
        .filter(|size| size.is_finite() && *size > 0.0)
}

fn model_family(name: &str) -> String {
    name_tokens(name)
        .filter(|token| size_token(token).is_none())
        .collect::<Vec<_>>()
        .join("-")
}

fn model_size(name: &str) -> Option<f64> {
    name_tokens(name).find_map(|token| size_token(&token))
}
