//! Structured log layouts.
//!
//! Three JSON shapes are understood and may be mixed in one document:
//! per-iteration record arrays, `{x, y}` series maps and chart payloads.

use crate::error::ParseError;
use crate::record::{MetricName, MetricSeries, TrainingRecord};
use crate::session::{ParseReport, SavedCheckpoint};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Skip reasons kept verbatim in the report; later ones are only counted.
pub(crate) const MAX_SKIP_REASONS: usize = 10;

/// Record keys that describe the record rather than a metric.
const RECORD_META_KEYS: &[&str] = &[
    "iteration",
    "iter",
    "step",
    "timestamp",
    "time",
    "checkpoint_saved",
    "checkpoint_path",
];

/// Everything the layouts yielded for one log.
#[derive(Debug, Default)]
pub(crate) struct ParsedLayout {
    pub metric_series: BTreeMap<MetricName, MetricSeries>,
    pub saved_checkpoints: Vec<SavedCheckpoint>,
    pub report: ParseReport,
}

#[derive(Default)]
struct Collector {
    pairs: BTreeMap<MetricName, Vec<(u64, f64)>>,
    checkpoints: Vec<SavedCheckpoint>,
    report: ParseReport,
}

impl Collector {
    fn skip(&mut self, reason: ParseError) {
        debug!(reason = %reason, "Skipping malformed log entry");
        self.report.records_skipped += 1;
        if self.report.skip_reasons.len() < MAX_SKIP_REASONS {
            self.report.skip_reasons.push(reason.to_string());
        }
    }

    fn push_records(&mut self, records: Vec<TrainingRecord>) {
        for record in records {
            let Some(value) = record.value else { continue };
            self.pairs
                .entry(record.metric_name)
                .or_default()
                .push((record.iteration, value));
        }
    }

    fn finish(self) -> ParsedLayout {
        let metric_series = self
            .pairs
            .into_iter()
            .map(|(name, pairs)| (name, MetricSeries::from_pairs(pairs)))
            .filter(|(_, series)| !series.is_empty())
            .collect();
        ParsedLayout {
            metric_series,
            saved_checkpoints: self.checkpoints,
            report: self.report,
        }
    }
}

/// Extract metric series and saved checkpoints from a parsed JSON document.
pub(crate) fn extract(root: &Value) -> ParsedLayout {
    let mut collector = Collector::default();
    match root {
        Value::Array(entries) => record_log(entries, &mut collector),
        Value::Object(obj) => {
            match obj.get("metrics") {
                Some(Value::Array(entries)) => record_log(entries, &mut collector),
                Some(Value::Object(series)) => series_map(series, &mut collector),
                _ => {}
            }
            if let Some(Value::Object(series)) = obj.get("series") {
                series_map(series, &mut collector);
            }
            if let Some(Value::Object(charts)) = obj.get("charts") {
                chart_payload(charts, &mut collector);
            }
        }
        _ => {}
    }
    collector.finish()
}

fn record_log(entries: &[Value], collector: &mut Collector) {
    let mut records = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        collector.report.records_seen += 1;
        let Value::Object(fields) = entry else {
            collector.skip(ParseError::NotAnObject { index });
            continue;
        };
        let Some(raw_iteration) = ["iteration", "iter", "step"]
            .iter()
            .find_map(|key| fields.get(*key).filter(|v| !v.is_null()))
        else {
            collector.skip(ParseError::MissingIteration { index });
            continue;
        };
        let Some(iteration) = iteration_value(raw_iteration) else {
            collector.skip(ParseError::InvalidIteration { index });
            continue;
        };
        let timestamp = fields
            .get("timestamp")
            .or_else(|| fields.get("time"))
            .and_then(parse_timestamp);

        for (key, value) in fields {
            if RECORD_META_KEYS.contains(&key.as_str()) {
                continue;
            }
            let value = match value {
                Value::Null => None,
                other => match numeric(other) {
                    Some(v) => Some(v),
                    None => continue,
                },
            };
            records.push(TrainingRecord {
                iteration,
                metric_name: MetricName::from_key(key),
                value,
                timestamp,
            });
        }

        if let Some(checkpoint) = saved_checkpoint(iteration, fields, timestamp) {
            collector.checkpoints.push(checkpoint);
        }
    }
    collector.push_records(records);
}

fn series_map(series: &Map<String, Value>, collector: &mut Collector) {
    for (name, entry) in series {
        let Value::Object(fields) = entry else { continue };
        xy_series(&MetricName::from_key(name), fields, collector);
    }
}

fn chart_payload(charts: &Map<String, Value>, collector: &mut Collector) {
    for group in charts.values() {
        let Some(Value::Array(datasets)) = group.get("data") else {
            continue;
        };
        for dataset in datasets {
            let Value::Object(fields) = dataset else { continue };
            let Some(name) = fields
                .get("name")
                .or_else(|| fields.get("label"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            xy_series(&MetricName::from_key(name), fields, collector);
        }
    }
}

fn xy_series(metric: &MetricName, fields: &Map<String, Value>, collector: &mut Collector) {
    let empty = Vec::new();
    let xs = fields.get("x").and_then(Value::as_array).unwrap_or(&empty);
    let ys = fields.get("y").and_then(Value::as_array).unwrap_or(&empty);
    collector.report.records_seen += xs.len().max(ys.len());

    if xs.len() != ys.len() {
        let surplus = xs.len().abs_diff(ys.len());
        collector.skip(ParseError::MismatchedSeries {
            metric: metric.to_string(),
            x_len: xs.len(),
            y_len: ys.len(),
        });
        // `skip` counted one entry; the rest of the unmatched tail is skipped too.
        collector.report.records_skipped += surplus.saturating_sub(1);
    }

    let mut records = Vec::with_capacity(xs.len().min(ys.len()));
    for (index, (x, y)) in xs.iter().zip(ys).enumerate() {
        let Some(iteration) = iteration_value(x) else {
            collector.skip(ParseError::InvalidPoint {
                metric: metric.to_string(),
                index,
            });
            continue;
        };
        let value = match y {
            Value::Null => None,
            other => match numeric(other) {
                Some(v) => Some(v),
                None => {
                    collector.skip(ParseError::InvalidPoint {
                        metric: metric.to_string(),
                        index,
                    });
                    continue;
                }
            },
        };
        records.push(TrainingRecord {
            iteration,
            metric_name: metric.clone(),
            value,
            timestamp: None,
        });
    }
    collector.push_records(records);
}

fn saved_checkpoint(
    iteration: u64,
    fields: &Map<String, Value>,
    timestamp: Option<DateTime<Utc>>,
) -> Option<SavedCheckpoint> {
    if fields.get("checkpoint_saved").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    let raw_path = fields.get("checkpoint_path").and_then(Value::as_str)?;
    let path = resolve_checkpoint_path(iteration, raw_path)?;
    let metric = |key: &str| fields.get(key).and_then(numeric);
    Some(SavedCheckpoint {
        iteration,
        path,
        train_loss: metric("train_loss"),
        val_loss: metric("val_loss"),
        train_perplexity: metric("train_perplexity"),
        val_perplexity: metric("val_perplexity"),
        learning_rate: metric("learning_rate"),
        timestamp,
    })
}

/// Pick the adapter file out of a possibly compound `"a and b."` log path.
pub fn resolve_checkpoint_path(iteration: u64, raw: &str) -> Option<PathBuf> {
    let expected = format!("{iteration:07}_adapters.safetensors");
    let parts: Vec<&str> = raw.split(" and ").map(str::trim).collect();
    let chosen = parts
        .iter()
        .find(|part| part.contains(&expected))
        .or_else(|| parts.last())?;
    let cleaned = chosen.trim_end_matches('.').trim();
    (!cleaned.is_empty()).then(|| PathBuf::from(cleaned))
}

/// Interpret a JSON value as a non-negative integral iteration.
///
/// Floats are accepted only when integral and within `u64` range.
pub fn iteration_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .filter(|f| *f < u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Finite numbers only; `"nan"` or `"inf"` strings are not values.
fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v: &f64| v.is_finite())
}

/// Parse RFC 3339, naive ISO-8601 (taken as UTC) or epoch seconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        Value::Number(n) => {
            let secs = n.as_f64()?;
            if !secs.is_finite() {
                return None;
            }
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9) as u32;
            DateTime::from_timestamp(whole as i64, nanos)
        }
        _ => None,
    }
}
