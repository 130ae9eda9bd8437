//! Plain-text tables for terminal output.

use std::fmt::Write;
use std::path::PathBuf;
use tunescope_core::checkpoint::CheckpointArtifact;
use tunescope_core::session::{Classified, Confidence, SavedCheckpoint};
use tunescope_core::{BestCheckpoint, ComparisonDataset, SessionSummary, SummaryRow};

/// Left-aligned columns separated by two spaces.
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();

    let mut out = String::new();
    let mut push_row = |cells: Vec<&str>| {
        let line = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}", width = *width))
            .collect::<Vec<_>>()
            .join("  ");
        let _ = writeln!(out, "{}", line.trim_end());
    };
    push_row(headers.to_vec());
    push_row(rule.iter().map(String::as_str).collect());
    for row in rows {
        push_row(row.iter().map(String::as_str).collect());
    }
    out
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn loss(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".to_string())
}

/// `LoRA` or `LoRA?` when the value was inferred.
fn tagged(value: impl std::fmt::Display, confidence: Confidence) -> String {
    match confidence {
        Confidence::Definite => value.to_string(),
        Confidence::Inferred => format!("{value}?"),
    }
}

fn classified<T: std::fmt::Display>(value: &Classified<T>) -> String {
    tagged(&value.value, value.confidence)
}

pub fn session_table(sessions: &[SessionSummary]) -> String {
    let rows: Vec<Vec<String>> = sessions
        .iter()
        .map(|s| {
            vec![
                s.session_id.to_string(),
                opt(s.model_name.as_deref()),
                opt(s.latest_iteration),
                opt(s.started_at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())),
            ]
        })
        .collect();
    table(&["SESSION", "MODEL", "ITER", "STARTED"], &rows)
}

fn summary_cells(row: &SummaryRow) -> Vec<String> {
    vec![
        row.session_id.clone(),
        tagged(row.fine_tune_method, row.method_confidence),
        tagged(row.training_phase, row.phase_confidence),
        opt(row.best_checkpoint_id.as_deref()),
        loss(row.best_validation_loss),
        loss(row.final_train_loss),
        loss(row.final_val_loss),
        match (row.final_stability_cv, row.stability_band) {
            (Some(cv), Some(band)) => format!("{cv:.1}% {}", band.label()),
            _ => "-".to_string(),
        },
        match (row.final_gap, row.fit_band) {
            (Some(gap), Some(band)) => format!("{gap:+.3} {}", band.label()),
            _ => "-".to_string(),
        },
        opt(row.learning_rate.map(|lr| format!("{lr:e}"))),
    ]
}

pub fn comparison_table(dataset: &ComparisonDataset) -> String {
    let rows: Vec<Vec<String>> = dataset.summary.iter().map(summary_cells).collect();
    let mut out = table(
        &[
            "SESSION", "METHOD", "PHASE", "BEST", "BEST VAL", "TRAIN", "VAL", "STABILITY", "GAP",
            "LR",
        ],
        &rows,
    );
    if !dataset.warnings.is_empty() {
        out.push('\n');
        for warning in &dataset.warnings {
            let _ = writeln!(out, "warning: {warning}");
        }
    }
    out
}

pub fn best_table(ranked: &[(BestCheckpoint, Option<PathBuf>)]) -> String {
    let rows: Vec<Vec<String>> = ranked
        .iter()
        .enumerate()
        .map(|(rank, (best, path))| {
            vec![
                (rank + 1).to_string(),
                best.checkpoint_id.to_string(),
                best.iteration.to_string(),
                format!("{:.4}", best.validation_loss),
                opt(path.as_ref().map(|p| p.display())),
            ]
        })
        .collect();
    table(&["RANK", "CHECKPOINT", "ITER", "VAL LOSS", "ADAPTER"], &rows)
}

pub fn saved_checkpoint_table(saved: &[SavedCheckpoint]) -> String {
    let rows: Vec<Vec<String>> = saved
        .iter()
        .map(|c| {
            vec![
                c.iteration.to_string(),
                loss(c.train_loss),
                loss(c.val_loss),
                c.path.display().to_string(),
            ]
        })
        .collect();
    table(&["ITER", "TRAIN", "VAL", "PATH"], &rows)
}

pub fn artifact_table(artifacts: &[CheckpointArtifact]) -> String {
    let rows: Vec<Vec<String>> = artifacts
        .iter()
        .map(|a| vec![a.checkpoint_id.to_string(), a.path.display().to_string()])
        .collect();
    table(&["CHECKPOINT", "FILE"], &rows)
}

pub fn session_header(session: &tunescope_core::Session) -> String {
    format!(
        "{} ({}, {} {})",
        session.display_name,
        opt(session.model_name.as_deref()),
        classified(&session.fine_tune_method),
        classified(&session.training_phase),
    )
}
