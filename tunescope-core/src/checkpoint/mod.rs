//! Best-checkpoint selection by validation loss.

pub mod artifact;

pub use artifact::{AdapterDirectoryResolver, CheckpointArtifact, CheckpointResolver};

use crate::record::{MetricSeries, SeriesPoint};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Zero-padded checkpoint token derived from an iteration (`300` -> `"000300"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(String);

impl CheckpointId {
    pub const WIDTH: usize = 6;

    pub fn from_iteration(iteration: u64) -> Self {
        Self(format!("{iteration:0width$}", width = Self::WIDTH))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iteration encoded in the token.
    pub fn iteration(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The minimum-validation-loss point of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestCheckpoint {
    pub iteration: u64,
    pub validation_loss: f64,
    pub checkpoint_id: CheckpointId,
}

impl From<&SeriesPoint> for BestCheckpoint {
    fn from(point: &SeriesPoint) -> Self {
        Self {
            iteration: point.iteration,
            validation_loss: point.value,
            checkpoint_id: CheckpointId::from_iteration(point.iteration),
        }
    }
}

/// Select the checkpoint with the lowest finite validation loss.
///
/// Only a strictly lower value replaces the running best, so ties go to the
/// earliest iteration. `None` when there is no finite value.
pub fn select_best(validation_loss: &MetricSeries) -> Option<BestCheckpoint> {
    let mut best: Option<&SeriesPoint> = None;
    for point in validation_loss.iter().filter(|p| p.value.is_finite()) {
        if best.is_none_or(|b| point.value < b.value) {
            best = Some(point);
        }
    }
    best.map(BestCheckpoint::from)
}

/// The `k` best finite points ordered by (value, iteration).
pub fn top_k(validation_loss: &MetricSeries, k: usize) -> Vec<BestCheckpoint> {
    let mut finite: Vec<&SeriesPoint> = validation_loss
        .iter()
        .filter(|p| p.value.is_finite())
        .collect();
    finite.sort_by(|a, b| {
        a.value
            .total_cmp(&b.value)
            .then_with(|| a.iteration.cmp(&b.iteration))
    });
    finite.into_iter().take(k).map(BestCheckpoint::from).collect()
}
