//! Exact-iteration alignment of sparse and dense metric series.
//!
//! Validation is usually sampled far less often than training loss. Alignment
//! pairs the two only where both were sampled at the same iteration; nothing
//! is interpolated.

use crate::record::MetricSeries;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One aligned sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlignedPoint {
    /// Synthetic iteration-0 anchor for charting. Carries no measurement.
    Origin,
    Matched { iteration: u64, dense: f64, sparse: f64 },
}

impl AlignedPoint {
    pub fn iteration(&self) -> u64 {
        match self {
            Self::Origin => 0,
            Self::Matched { iteration, .. } => *iteration,
        }
    }

    /// `sparse - dense`; zero for the synthetic origin.
    pub fn delta(&self) -> f64 {
        match self {
            Self::Origin => 0.0,
            Self::Matched { dense, sparse, .. } => sparse - dense,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Origin)
    }
}

/// Pair every dense iteration that also appears in `sparse`.
///
/// Returns an empty vector when `sparse` is empty or nothing matches.
/// Otherwise a synthetic [`AlignedPoint::Origin`] leads the result unless a
/// matched point already sits at iteration 0.
pub fn align(dense: &MetricSeries, sparse: &MetricSeries) -> Vec<AlignedPoint> {
    if sparse.is_empty() {
        return Vec::new();
    }
    let lookup: HashMap<u64, f64> = sparse.iter().map(|p| (p.iteration, p.value)).collect();
    let matched: Vec<AlignedPoint> = dense
        .iter()
        .filter_map(|p| {
            lookup.get(&p.iteration).map(|&sparse| AlignedPoint::Matched {
                iteration: p.iteration,
                dense: p.value,
                sparse,
            })
        })
        .collect();
    if matched.is_empty() {
        return matched;
    }
    if matched[0].iteration() == 0 {
        return matched;
    }
    std::iter::once(AlignedPoint::Origin).chain(matched).collect()
}

/// Where a gap value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// Validation and training were both sampled at this iteration.
    Measured,
    /// Training ran but no validation sample exists yet; gap is reported as 0.
    NoValidationYet,
    /// Synthetic iteration-0 anchor.
    Origin,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneralizationGapPoint {
    pub iteration: u64,
    /// `validation_loss - training_loss`.
    pub gap: f64,
    pub kind: GapKind,
}

/// Generalization gap of a session: validation minus training loss.
///
/// Empty when there is no validation data at all.
pub fn generalization_gap(
    train: &MetricSeries,
    validation: &MetricSeries,
) -> Vec<GeneralizationGapPoint> {
    let Some(first_validation) = validation.first().map(|p| p.iteration) else {
        return Vec::new();
    };

    let mut points: Vec<GeneralizationGapPoint> = train
        .iter()
        .take_while(|p| p.iteration < first_validation)
        .map(|p| GeneralizationGapPoint {
            iteration: p.iteration,
            gap: 0.0,
            kind: GapKind::NoValidationYet,
        })
        .collect();

    points.extend(
        align(train, validation)
            .into_iter()
            .filter(|p| !p.is_synthetic())
            .map(|p| GeneralizationGapPoint {
                iteration: p.iteration(),
                gap: p.delta(),
                kind: GapKind::Measured,
            }),
    );

    if points.first().is_some_and(|p| p.iteration != 0) {
        points.insert(
            0,
            GeneralizationGapPoint {
                iteration: 0,
                gap: 0.0,
                kind: GapKind::Origin,
            },
        );
    }
    points
}

/// Presentation band for a generalization gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitBand {
    Underfitting,
    GoodFit,
    Overfitting,
}

pub const FIT_BAND_THRESHOLD: f64 = 0.1;

impl FitBand {
    /// `None` for a NaN or infinite gap.
    pub fn classify(gap: f64) -> Option<Self> {
        if !gap.is_finite() {
            None
        } else if gap < -FIT_BAND_THRESHOLD {
            Some(Self::Underfitting)
        } else if gap > FIT_BAND_THRESHOLD {
            Some(Self::Overfitting)
        } else {
            Some(Self::GoodFit)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Underfitting => "underfitting",
            Self::GoodFit => "good fit",
            Self::Overfitting => "overfitting",
        }
    }
}
