//! Summary table rows for a comparison.

use super::SessionComparison;
use crate::align::{FitBand, GapKind};
use crate::session::{Confidence, FineTuneMethod, TrainingPhase};
use crate::stats::StabilityBand;
use serde::{Deserialize, Serialize};

/// One row of the comparison summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub session_id: String,
    pub display_name: String,
    pub color: String,
    pub model_name: Option<String>,
    pub fine_tune_method: FineTuneMethod,
    pub method_confidence: Confidence,
    pub training_phase: TrainingPhase,
    pub phase_confidence: Confidence,
    pub best_iteration: Option<u64>,
    pub best_checkpoint_id: Option<String>,
    pub best_validation_loss: Option<f64>,
    pub latest_iteration: Option<u64>,
    pub final_train_loss: Option<f64>,
    pub final_val_loss: Option<f64>,
    pub final_stability_cv: Option<f64>,
    pub stability_band: Option<StabilityBand>,
    pub final_gap: Option<f64>,
    pub fit_band: Option<FitBand>,
    pub learning_rate: Option<f64>,
    pub batch_size: Option<u32>,
    pub lora_rank: Option<u32>,
    pub max_sequence_length: Option<u32>,
}

impl From<&SessionComparison> for SummaryRow {
    fn from(entry: &SessionComparison) -> Self {
        let session = &entry.session;
        let best = entry.best_checkpoint.as_ref();
        let final_stability = entry.stability.last().map(|p| p.cv_percent);
        let final_gap = entry
            .generalization_gap
            .iter()
            .rev()
            .find(|p| p.kind == GapKind::Measured)
            .map(|p| p.gap);
        let params = &session.hyperparameters;

        Self {
            session_id: session.session_id.to_string(),
            display_name: session.display_name.clone(),
            color: entry.color.clone(),
            model_name: session.model_name.clone(),
            fine_tune_method: session.fine_tune_method.value,
            method_confidence: session.fine_tune_method.confidence,
            training_phase: session.training_phase.value,
            phase_confidence: session.training_phase.confidence,
            best_iteration: best.map(|b| b.iteration),
            best_checkpoint_id: best.map(|b| b.checkpoint_id.to_string()),
            best_validation_loss: best.map(|b| b.validation_loss),
            latest_iteration: session.latest_iteration(),
            final_train_loss: session.training_loss().and_then(|s| s.last()).map(|p| p.value),
            final_val_loss: session.validation_loss().and_then(|s| s.last()).map(|p| p.value),
            final_stability_cv: final_stability,
            stability_band: final_stability.and_then(StabilityBand::classify),
            final_gap,
            fit_band: final_gap.and_then(FitBand::classify),
            learning_rate: params.learning_rate,
            batch_size: params.batch_size,
            lora_rank: params.lora_rank,
            max_sequence_length: params.max_sequence_length,
        }
    }
}
