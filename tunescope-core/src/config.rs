//! Configuration system for Tunescope.
//!
//! Uses `figment` for layered configuration: defaults -> user config ->
//! workspace config -> environment -> explicit overrides. Files live at
//! `~/.config/tunescope/config.toml` and `<workspace>/.tunescope/config.toml`.

use crate::compare::AnalysisOptions;
use crate::error::ConfigError;
use crate::stats::DEFAULT_STABILITY_WINDOW;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TunescopeConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub loading: LoadingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Trailing window for the rolling stability chart.
    #[serde(default = "default_stability_window")]
    pub stability_window: usize,
    /// Ranked checkpoints reported per session.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            stability_window: default_stability_window(),
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Local directories holding one subdirectory per session.
    #[serde(default = "default_session_roots")]
    pub session_roots: Vec<PathBuf>,
    /// Training service base URL. When set, sessions come from the service.
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            session_roots: default_session_roots(),
            service_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingConfig {
    #[serde(default = "default_max_concurrent_loads")]
    pub max_concurrent_loads: usize,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: default_max_concurrent_loads(),
            cache_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Write JSON logs to a daily-rolling file in addition to stderr.
    #[serde(default = "default_true")]
    pub json_file: bool,
    /// Log directory; defaults to `<workspace>/.tunescope/logs`.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_file: true,
            directory: None,
        }
    }
}

fn default_stability_window() -> usize {
    DEFAULT_STABILITY_WINDOW
}

fn default_top_k() -> usize {
    3
}

fn default_session_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("models/cpt"), PathBuf::from("models/ift")]
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_loads() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl TunescopeConfig {
    /// Reject values that would make analysis meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };
        if self.analysis.stability_window == 0 {
            return invalid("analysis.stability_window must be >= 1");
        }
        if self.loading.max_concurrent_loads == 0 {
            return invalid("loading.max_concurrent_loads must be >= 1");
        }
        if self.sources.request_timeout_secs == 0 {
            return invalid("sources.request_timeout_secs must be >= 1");
        }
        if let Some(url) = &self.sources.service_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    message: format!("sources.service_url must be an http(s) URL, got '{url}'"),
                });
            }
        }
        Ok(())
    }

    pub fn analysis_options(&self) -> AnalysisOptions {
        AnalysisOptions {
            stability_window: self.analysis.stability_window,
            top_k: self.analysis.top_k,
            max_concurrent_loads: self.loading.max_concurrent_loads,
        }
    }

    /// Session roots resolved against `workspace` when relative.
    pub fn resolved_session_roots(&self, workspace: &Path) -> Vec<PathBuf> {
        self.sources
            .session_roots
            .iter()
            .map(|root| {
                if root.is_absolute() {
                    root.clone()
                } else {
                    workspace.join(root)
                }
            })
            .collect()
    }

    pub fn log_directory(&self, workspace: &Path) -> PathBuf {
        self.logging
            .directory
            .clone()
            .unwrap_or_else(|| workspace_config_dir(workspace).join("logs"))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "tunescope", "tunescope")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

pub fn workspace_config_dir(workspace: &Path) -> PathBuf {
    workspace.join(".tunescope")
}

pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace_config_dir(workspace).join("config.toml")
}

/// Load configuration from all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&TunescopeConfig>,
) -> Result<TunescopeConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TunescopeConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // TUNESCOPE_ANALYSIS__STABILITY_WINDOW, TUNESCOPE_SOURCES__SERVICE_URL, ...
    figment = figment.merge(Env::prefixed("TUNESCOPE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}
