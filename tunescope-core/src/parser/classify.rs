//! Fine-tune method and training phase classification.
//!
//! Sessions rarely state both dimensions explicitly, so classification runs a
//! prioritized chain of rules. The first rule that answers a dimension wins;
//! when none does, a structural default (Full / CPT) is used. Every answer
//! carries a [`Confidence`] so callers can tell config facts from guesses.
//!
//! The chain is pluggable: callers can supply their own [`Classifier`] or
//! extend a [`RuleChain`] with extra [`ClassificationRule`]s.

use crate::session::{Classified, FineTuneMethod, TrainingPhase};
use serde_json::{Map, Value};

/// Signals available when classifying a session.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationInput<'a> {
    pub config: Option<&'a Map<String, Value>>,
    pub display_name: &'a str,
    pub log_location: Option<&'a str>,
}

/// Outcome for both classification dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClassification {
    pub fine_tune_method: Classified<FineTuneMethod>,
    pub training_phase: Classified<TrainingPhase>,
}

/// Classifies a session along method and phase.
pub trait Classifier: Send + Sync {
    fn classify(&self, input: &ClassificationInput<'_>) -> SessionClassification;
}

/// One step in a [`RuleChain`]. Return `None` to defer to the next rule.
pub trait ClassificationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn fine_tune_method(&self, _input: &ClassificationInput<'_>) -> Option<Classified<FineTuneMethod>> {
        None
    }

    fn training_phase(&self, _input: &ClassificationInput<'_>) -> Option<Classified<TrainingPhase>> {
        None
    }
}

/// Prioritized rule chain with a structural fallback.
pub struct RuleChain {
    rules: Vec<Box<dyn ClassificationRule>>,
}

impl RuleChain {
    pub fn new(rules: Vec<Box<dyn ClassificationRule>>) -> Self {
        Self { rules }
    }

    /// Append a rule with the lowest priority (still ahead of the fallback).
    pub fn with_rule(mut self, rule: Box<dyn ClassificationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }
}

impl Default for RuleChain {
    fn default() -> Self {
        Self::new(vec![Box::new(ConfigFieldRule), Box::new(KeywordRule)])
    }
}

impl Classifier for RuleChain {
    fn classify(&self, input: &ClassificationInput<'_>) -> SessionClassification {
        let fine_tune_method = self
            .rules
            .iter()
            .find_map(|rule| rule.fine_tune_method(input))
            .unwrap_or_else(|| Classified::inferred(FineTuneMethod::Full, FALLBACK_RULE));
        let training_phase = self
            .rules
            .iter()
            .find_map(|rule| rule.training_phase(input))
            .unwrap_or_else(|| {
                Classified::inferred(TrainingPhase::ContinuedPretraining, FALLBACK_RULE)
            });
        SessionClassification {
            fine_tune_method,
            training_phase,
        }
    }
}

pub const FALLBACK_RULE: &str = "fallback";

/// Reads `fine_tune_type` / `training_type` from the embedded config.
pub struct ConfigFieldRule;

impl ConfigFieldRule {
    fn field<'a>(
        input: &ClassificationInput<'a>,
        keys: &[&'static str],
    ) -> Option<(&'static str, &'a str)> {
        let config = input.config?;
        keys.iter()
            .find_map(|key| config.get(*key).and_then(Value::as_str).map(|v| (*key, v)))
    }
}

impl ClassificationRule for ConfigFieldRule {
    fn name(&self) -> &'static str {
        "config"
    }

    fn fine_tune_method(&self, input: &ClassificationInput<'_>) -> Option<Classified<FineTuneMethod>> {
        let (key, value) = Self::field(input, &["fine_tune_type", "fine_tune_method"])?;
        FineTuneMethod::parse(value).map(|m| Classified::definite(m, format!("config.{key}")))
    }

    fn training_phase(&self, input: &ClassificationInput<'_>) -> Option<Classified<TrainingPhase>> {
        let (key, value) = Self::field(input, &["training_type", "training_phase"])?;
        TrainingPhase::parse(value).map(|p| Classified::definite(p, format!("config.{key}")))
    }
}

/// Matches keywords in the display name and storage path.
///
/// Method keywords are searched nearest first: the display name, the session
/// directory and the log file name, then the remaining ancestor directories.
/// Ancestors only match as whole tokens, so `/home/flora/` is not LoRA.
pub struct KeywordRule;

const METHOD_KEYWORDS: [(&str, FineTuneMethod); 3] = [
    ("dora", FineTuneMethod::DoRA),
    ("lora", FineTuneMethod::LoRA),
    ("full", FineTuneMethod::Full),
];

impl KeywordRule {
    fn match_method(text: &str, whole_token: bool) -> Option<(&'static str, FineTuneMethod)> {
        METHOD_KEYWORDS.into_iter().find(|(keyword, _)| {
            if whole_token {
                text.split(|c: char| !c.is_ascii_alphanumeric())
                    .any(|token| token == *keyword)
            } else {
                text.contains(keyword)
            }
        })
    }
}

impl ClassificationRule for KeywordRule {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn fine_tune_method(&self, input: &ClassificationInput<'_>) -> Option<Classified<FineTuneMethod>> {
        let display = input.display_name.to_ascii_lowercase();
        let location = input.log_location.unwrap_or("").to_ascii_lowercase();
        let mut ancestors: Vec<&str> = location
            .split(['/', '\\'])
            .filter(|component| !component.is_empty())
            .collect();
        let file_name = ancestors.pop().unwrap_or("");
        let session_dir = ancestors.pop().unwrap_or("");

        [display.as_str(), session_dir, file_name]
            .into_iter()
            .find_map(|text| Self::match_method(text, false))
            .or_else(|| {
                ancestors
                    .iter()
                    .rev()
                    .find_map(|component| Self::match_method(component, true))
            })
            .map(|(keyword, method)| Classified::inferred(method, format!("keyword:{keyword}")))
    }

    fn training_phase(&self, input: &ClassificationInput<'_>) -> Option<Classified<TrainingPhase>> {
        let location = input.log_location.unwrap_or("").to_ascii_lowercase();
        let components: Vec<&str> = location.split(['/', '\\']).collect();
        let file_name = components.last().copied().unwrap_or("");
        let display = input.display_name.to_ascii_lowercase();

        for (token, phase) in [
            ("cpt", TrainingPhase::ContinuedPretraining),
            ("ift", TrainingPhase::InstructionFineTuning),
        ] {
            if components
                .iter()
                .rev()
                .skip(1)
                .any(|component| *component == token)
            {
                return Some(Classified::inferred(phase, format!("path:/{token}/")));
            }
            let prefix = format!("{token}_");
            if file_name.starts_with(&prefix) || display.starts_with(&prefix) {
                return Some(Classified::inferred(phase, format!("prefix:{prefix}")));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Confidence;
    use serde_json::json;

    fn input<'a>(
        config: Option<&'a Map<String, Value>>,
        name: &'a str,
        location: Option<&'a str>,
    ) -> ClassificationInput<'a> {
        ClassificationInput {
            config,
            display_name: name,
            log_location: location,
        }
    }

    #[test]
    fn test_config_fields_are_definite() {
        let config = json!({"fine_tune_type": "dora", "training_type": "IFT"});
        let config = config.as_object().unwrap();
        let result = RuleChain::default().classify(&input(Some(config), "full_run", None));
        assert_eq!(result.fine_tune_method.value, FineTuneMethod::DoRA);
        assert_eq!(result.fine_tune_method.confidence, Confidence::Definite);
        assert_eq!(result.fine_tune_method.rule, "config.fine_tune_type");
        assert_eq!(result.training_phase.value, TrainingPhase::InstructionFineTuning);
        assert_eq!(result.training_phase.confidence, Confidence::Definite);
    }

    #[test]
    fn test_keywords_are_inferred() {
        let result = RuleChain::default().classify(&input(
            None,
            "qwen_lora_lr1e_05",
            Some("models/ift/qwen_lora_lr1e_05/IFT_log.json"),
        ));
        assert_eq!(result.fine_tune_method.value, FineTuneMethod::LoRA);
        assert!(result.fine_tune_method.is_inferred());
        assert_eq!(result.training_phase.value, TrainingPhase::InstructionFineTuning);
        assert_eq!(result.training_phase.rule, "path:/ift/");
    }

    #[test]
    fn test_dora_wins_over_lora_substring_order() {
        let result = RuleChain::default().classify(&input(None, "gemma_dora_r16", None));
        assert_eq!(result.fine_tune_method.value, FineTuneMethod::DoRA);
    }

    #[test]
    fn test_unknown_config_value_defers_to_keywords() {
        let config = json!({"fine_tune_type": "prefix"});
        let config = config.as_object().unwrap();
        let result = RuleChain::default().classify(&input(Some(config), "run_lora", None));
        assert_eq!(result.fine_tune_method.value, FineTuneMethod::LoRA);
        assert!(result.fine_tune_method.is_inferred());
    }

    #[test]
    fn test_fallback_when_no_signal() {
        let result = RuleChain::default().classify(&input(None, "run_42", Some("logs/x.json")));
        assert_eq!(result.fine_tune_method.value, FineTuneMethod::Full);
        assert_eq!(result.fine_tune_method.rule, FALLBACK_RULE);
        assert_eq!(result.training_phase.value, TrainingPhase::ContinuedPretraining);
        assert_eq!(result.training_phase.rule, FALLBACK_RULE);
    }

    #[test]
    fn test_log_file_prefix_sets_phase() {
        let result = RuleChain::default().classify(&input(None, "run", Some("runs/a/IFT_2025.json")));
        assert_eq!(result.training_phase.value, TrainingPhase::InstructionFineTuning);
        assert_eq!(result.training_phase.rule, "prefix:ift_");
    }

    struct AlwaysDora;

    impl ClassificationRule for AlwaysDora {
        fn name(&self) -> &'static str {
            "always_dora"
        }

        fn fine_tune_method(&self, _input: &ClassificationInput<'_>) -> Option<Classified<FineTuneMethod>> {
            Some(Classified::inferred(FineTuneMethod::DoRA, "always_dora"))
        }
    }

    #[test]
    fn test_custom_rule_is_consulted_after_builtins() {
        let chain = RuleChain::default().with_rule(Box::new(AlwaysDora));
        assert_eq!(chain.rule_names(), vec!["config", "keyword", "always_dora"]);
        let result = chain.classify(&input(None, "run_42", None));
        assert_eq!(result.fine_tune_method.value, FineTuneMethod::DoRA);
        assert_eq!(result.fine_tune_method.rule, "always_dora");
    }

    #[test]
    fn test_session_name_outranks_parent_directories() {
        let result = RuleChain::default().classify(&input(
            None,
            "gemma_full_lr2e_05",
            Some("/home/flora/models/ift/gemma_full_lr2e_05/IFT_1.json"),
        ));
        assert_eq!(result.fine_tune_method.value, FineTuneMethod::Full);
        assert_eq!(result.fine_tune_method.rule, "keyword:full");
    }

    #[test]
    fn test_ancestor_directories_match_whole_tokens_only() {
        let unrelated = RuleChain::default().classify(&input(
            None,
            "run_42",
            Some("/home/flora/models/cpt/run_42/CPT_1.json"),
        ));
        assert_eq!(unrelated.fine_tune_method.rule, FALLBACK_RULE);

        let grouped = RuleChain::default().classify(&input(
            None,
            "run_42",
            Some("/data/lora-runs/run_42/CPT_1.json"),
        ));
        assert_eq!(grouped.fine_tune_method.value, FineTuneMethod::LoRA);
        assert_eq!(grouped.fine_tune_method.rule, "keyword:lora");
    }
}
