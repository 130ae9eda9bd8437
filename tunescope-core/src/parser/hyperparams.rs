//! Hyperparameter extraction from the embedded config and the display name.

use crate::session::Hyperparameters;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static LR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[_\-/])lr(\d+(?:\.\d+)?(?:e_?-?\d+)?)").expect("valid lr pattern")
});
static BS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[_\-/])bs(\d+)").expect("valid bs pattern"));
static SEQ_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|[_\-/])seq(\d+)").expect("valid seq pattern"));
static DECAY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[_\-/])decay(\d+(?:\.\d+)?(?:e_?-?\d+)?)").expect("valid decay pattern")
});

/// Keys consumed into typed fields; everything else lands in `extra`.
const MAPPED_KEYS: &[&str] = &[
    "learning_rate",
    "lr",
    "batch_size",
    "weight_decay",
    "lr_decay_factor",
    "max_seq_length",
    "max_sequence_length",
    "warmup_steps",
    "max_iterations",
    "iters",
    "lr_schedule",
    "lora_rank",
    "lora_scale",
    "lora_dropout",
    "lora_layers",
    "num_layers",
    "lora_target_modules",
    "lora_parameters",
];

/// Build hyperparameters from a config object.
pub fn from_config(config: &Map<String, Value>) -> Hyperparameters {
    let lora = config.get("lora_parameters").and_then(Value::as_object);
    let lora_field = |key: &str| lora.and_then(|l| l.get(key));

    let extra = config
        .iter()
        .filter(|(key, _)| !MAPPED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Hyperparameters {
        learning_rate: first_number(config, &["learning_rate", "lr"]),
        batch_size: first_number(config, &["batch_size"]).and_then(to_u32),
        weight_decay: first_number(config, &["weight_decay"]),
        lr_decay_factor: first_number(config, &["lr_decay_factor"]),
        max_sequence_length: first_number(config, &["max_seq_length", "max_sequence_length"])
            .and_then(to_u32),
        warmup_steps: first_number(config, &["warmup_steps"]).and_then(to_u32),
        max_iterations: first_number(config, &["max_iterations", "iters"]).and_then(to_u64),
        lr_schedule: config.get("lr_schedule").and_then(schedule_name),
        lora_rank: first_number(config, &["lora_rank"])
            .or_else(|| lora_field("rank").and_then(number))
            .and_then(to_u32),
        lora_scale: first_number(config, &["lora_scale"])
            .or_else(|| lora_field("scale").and_then(number)),
        lora_dropout: first_number(config, &["lora_dropout"])
            .or_else(|| lora_field("dropout").and_then(number)),
        lora_layers: first_number(config, &["lora_layers", "num_layers"]).and_then(to_i64),
        lora_target_modules: config
            .get("lora_target_modules")
            .or_else(|| lora_field("keys"))
            .map(string_list)
            .unwrap_or_default(),
        derived_from_name: Vec::new(),
        extra,
    }
}

/// Fill fields the config left empty from `lr`, `bs`, `seq` and `decay`
/// tokens in the display name. Config values are never overwritten.
pub fn fill_from_name(params: &mut Hyperparameters, name: &str) {
    if params.learning_rate.is_none() {
        if let Some(lr) = capture(&LR_PATTERN, name).and_then(parse_encoded_float) {
            params.learning_rate = Some(lr);
            params.derived_from_name.push("learning_rate".into());
        }
    }
    if params.batch_size.is_none() {
        if let Some(bs) = capture(&BS_PATTERN, name).and_then(|s| s.parse().ok()) {
            params.batch_size = Some(bs);
            params.derived_from_name.push("batch_size".into());
        }
    }
    if params.max_sequence_length.is_none() {
        if let Some(seq) = capture(&SEQ_PATTERN, name).and_then(|s| s.parse().ok()) {
            params.max_sequence_length = Some(seq);
            params.derived_from_name.push("max_sequence_length".into());
        }
    }
    if params.lr_decay_factor.is_none() {
        if let Some(decay) = capture(&DECAY_PATTERN, name).and_then(parse_encoded_float) {
            params.lr_decay_factor = Some(decay);
            params.derived_from_name.push("lr_decay_factor".into());
        }
    }
}

fn capture<'a>(pattern: &Regex, name: &'a str) -> Option<&'a str> {
    pattern
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Decode folder-name floats such as `1e_05` (a filesystem-safe `1e-05`).
fn parse_encoded_float(token: &str) -> Option<f64> {
    let decoded = token.replace('_', "-");
    decoded.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn first_number(config: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| config.get(*key).and_then(number))
}

fn to_u32(value: f64) -> Option<u32> {
    (value >= 0.0 && value.fract() == 0.0 && value <= f64::from(u32::MAX)).then(|| value as u32)
}

fn to_u64(value: f64) -> Option<u64> {
    (value >= 0.0 && value.fract() == 0.0).then(|| value as u64)
}

fn to_i64(value: f64) -> Option<i64> {
    (value.fract() == 0.0).then(|| value as i64)
}

fn schedule_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
