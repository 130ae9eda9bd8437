//! Rolling window statistics over metric series.

use crate::record::MetricSeries;
use serde::{Deserialize, Serialize};

pub const DEFAULT_STABILITY_WINDOW: usize = 10;

/// Coefficient of variation of the trailing window ending before `iteration`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilityPoint {
    pub iteration: u64,
    pub cv_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariancePoint {
    pub iteration: u64,
    pub variance: f64,
}

/// Stability classification of a CV percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityBand {
    Excellent,
    Good,
    Unstable,
}

impl StabilityBand {
    /// `None` for a NaN or infinite CV.
    pub fn classify(cv_percent: f64) -> Option<Self> {
        if !cv_percent.is_finite() {
            None
        } else if cv_percent < 5.0 {
            Some(Self::Excellent)
        } else if cv_percent < 15.0 {
            Some(Self::Good)
        } else {
            Some(Self::Unstable)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Unstable => "unstable",
        }
    }
}

/// Mean and population variance of `values`.
fn moments(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

/// Apply `f` to each trailing window `[i - window, i)` for `i` in `window..len`,
/// tagging the result with the iteration at index `i`.
fn over_trailing_windows<T>(
    series: &MetricSeries,
    window: usize,
    mut f: impl FnMut(u64, &[f64]) -> Option<T>,
) -> Vec<T> {
    if window == 0 || series.len() < window {
        return Vec::new();
    }
    let values: Vec<f64> = series.values().collect();
    series
        .points()
        .iter()
        .enumerate()
        .skip(window)
        .filter_map(|(i, point)| f(point.iteration, &values[i - window..i]))
        .collect()
}

/// Rolling coefficient of variation, `σ / μ * 100`, over trailing windows.
///
/// Empty when `window` is zero or the series is shorter than `window`.
/// Windows with a zero mean or a non-finite result are skipped.
pub fn rolling_stability(series: &MetricSeries, window: usize) -> Vec<StabilityPoint> {
    over_trailing_windows(series, window, |iteration, values| {
        let (mean, variance) = moments(values);
        if mean == 0.0 {
            return None;
        }
        let cv_percent = variance.sqrt() / mean * 100.0;
        cv_percent.is_finite().then_some(StabilityPoint {
            iteration,
            cv_percent,
        })
    })
}

/// Rolling population variance with the same windowing as [`rolling_stability`].
pub fn rolling_variance(series: &MetricSeries, window: usize) -> Vec<VariancePoint> {
    over_trailing_windows(series, window, |iteration, values| {
        let (_, variance) = moments(values);
        variance
            .is_finite()
            .then_some(VariancePoint { iteration, variance })
    })
}
