//! Raw training log parsing.
//!
//! [`LogRecordParser`] turns the bytes of a training log into a [`Session`].
//! Parsing fails soft: a log that is not structured JSON is kept as opaque
//! `raw_content` and the session simply carries no metric series.

pub mod classify;
pub mod hyperparams;
mod layout;

pub use classify::{
    ClassificationInput, ClassificationRule, Classifier, ConfigFieldRule, KeywordRule, RuleChain,
    SessionClassification,
};
pub use layout::{iteration_value, parse_timestamp, resolve_checkpoint_path};

use crate::error::ParseError;
use crate::session::{Hyperparameters, ParseReport, Session, SessionSummary};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Parses raw session logs, classifying each session with a pluggable [`Classifier`].
#[derive(Clone)]
pub struct LogRecordParser {
    classifier: Arc<dyn Classifier>,
}

impl Default for LogRecordParser {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LogRecordParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRecordParser").finish_non_exhaustive()
    }
}

impl LogRecordParser {
    pub fn new() -> Self {
        Self::with_classifier(Arc::new(RuleChain::default()))
    }

    pub fn with_classifier(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    /// Parse a raw log fetched for `summary`.
    pub fn parse(&self, summary: &SessionSummary, raw: &[u8]) -> Session {
        match serde_json::from_slice::<Value>(raw) {
            Ok(root @ (Value::Object(_) | Value::Array(_))) => self.parse_value(summary, &root),
            Ok(_) => {
                debug!(session = %summary.session_id, "Log is a JSON scalar, keeping raw content");
                self.opaque(summary, raw)
            }
            Err(e) => {
                if let Some((root, replaced)) = lenient_json(raw) {
                    debug!(
                        session = %summary.session_id,
                        replaced,
                        "Log contains NaN/Infinity tokens, reading them as missing values"
                    );
                    let mut session = self.parse_value(summary, &root);
                    note_non_finite(&mut session.parse_report, replaced);
                    return session;
                }
                warn!(
                    session = %summary.session_id,
                    error = %e,
                    "Log is not valid JSON, keeping raw content"
                );
                self.opaque(summary, raw)
            }
        }
    }

    /// Parse an already-decoded JSON document.
    pub fn parse_value(&self, summary: &SessionSummary, root: &Value) -> Session {
        let config = root.get("config").and_then(Value::as_object);
        let parsed = layout::extract(root);
        if parsed.report.records_skipped > 0 {
            debug!(
                session = %summary.session_id,
                seen = parsed.report.records_seen,
                skipped = parsed.report.records_skipped,
                "Skipped malformed log entries"
            );
        }

        let mut session = self.base_session(summary, config, parsed.report);
        session.metric_series = parsed.metric_series;
        session.saved_checkpoints = parsed.saved_checkpoints;
        session.model_name = model_name(config, root).or_else(|| summary.model_name.clone());
        session.started_at = root
            .get("start_time")
            .and_then(parse_timestamp)
            .or(summary.started_at);
        session.status = root.get("status").and_then(Value::as_str).map(str::to_string);
        session
    }

    fn opaque(&self, summary: &SessionSummary, raw: &[u8]) -> Session {
        let mut session = self.base_session(summary, None, ParseReport::default());
        session.raw_content = Some(String::from_utf8_lossy(raw).into_owned());
        session
    }

    fn base_session(
        &self,
        summary: &SessionSummary,
        config: Option<&Map<String, Value>>,
        parse_report: ParseReport,
    ) -> Session {
        let mut hyperparameters = config
            .map(hyperparams::from_config)
            .unwrap_or_else(Hyperparameters::default);
        hyperparams::fill_from_name(&mut hyperparameters, &summary.display_name);
        if summary.session_id.as_str() != summary.display_name {
            hyperparams::fill_from_name(&mut hyperparameters, summary.session_id.as_str());
        }

        let classification = self.classifier.classify(&ClassificationInput {
            config,
            display_name: &summary.display_name,
            log_location: Some(&summary.log_location),
        });

        Session {
            session_id: summary.session_id.clone(),
            display_name: summary.display_name.clone(),
            model_name: summary.model_name.clone(),
            fine_tune_method: classification.fine_tune_method,
            training_phase: classification.training_phase,
            hyperparameters,
            metric_series: Default::default(),
            saved_checkpoints: Vec::new(),
            log_location: Some(summary.log_location.clone()),
            started_at: summary.started_at,
            status: None,
            raw_content: None,
            parse_report,
        }
    }
}

/// Bare number tokens Python's `json.dump` writes for non-finite floats.
const NON_FINITE_TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

/// Retry a document that failed strict parsing with its non-finite tokens
/// replaced by `null`. Returns the document and the number of replacements.
fn lenient_json(raw: &[u8]) -> Option<(Value, usize)> {
    let text = std::str::from_utf8(raw).ok()?;
    let (patched, replaced) = replace_non_finite(text);
    if replaced == 0 {
        return None;
    }
    match serde_json::from_str::<Value>(&patched) {
        Ok(root @ (Value::Object(_) | Value::Array(_))) => Some((root, replaced)),
        _ => None,
    }
}

/// Replace non-finite tokens outside string literals.
fn replace_non_finite(text: &str) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut replaced = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(token) = NON_FINITE_TOKENS.iter().find(|t| rest.starts_with(**t)) {
            out.push_str("null");
            rest = &rest[token.len()..];
            replaced += 1;
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    (out, replaced)
}

fn note_non_finite(report: &mut ParseReport, count: usize) {
    report.records_skipped += count;
    if report.skip_reasons.len() < layout::MAX_SKIP_REASONS {
        report
            .skip_reasons
            .push(ParseError::NonFiniteValues { count }.to_string());
    }
}

fn model_name(config: Option<&Map<String, Value>>, root: &Value) -> Option<String> {
    config
        .and_then(|c| {
            ["model_name", "base_model", "model"]
                .iter()
                .find_map(|key| c.get(*key).and_then(Value::as_str))
        })
        .or_else(|| root.get("model_name").and_then(Value::as_str))
        .map(str::to_string)
}
