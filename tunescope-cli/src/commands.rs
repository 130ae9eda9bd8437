//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::render;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tunescope_core::checkpoint::artifact::list_artifacts;
use tunescope_core::config::{config_exists, workspace_config_path};
use tunescope_core::session::sort_for_listing;
use tunescope_core::{
    AdapterDirectoryResolver, CheckpointResolver, DirectorySource, HttpSource,
    SessionComparisonAggregator, SessionId, SessionLoader, SessionRepository, SessionSource,
    TunescopeConfig, top_k,
};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config: TunescopeConfig,
) -> anyhow::Result<()> {
    match command {
        Commands::Sessions => handle_sessions(workspace, &config).await,
        Commands::Compare {
            ids,
            window,
            top,
            json,
            output,
        } => handle_compare(ids, window, top, json, output, workspace, &config).await,
        Commands::Best { id, top } => handle_best(&id, top, workspace, &config).await,
        Commands::Checkpoints { id } => handle_checkpoints(&id, workspace, &config).await,
        Commands::Config { action } => handle_config(action, workspace, &config),
    }
}

/// Pick the session source: the training service when a URL is configured,
/// the local session roots otherwise.
fn build_source(
    workspace: &Path,
    config: &TunescopeConfig,
) -> anyhow::Result<Arc<dyn SessionSource>> {
    match &config.sources.service_url {
        Some(url) => {
            debug!(url = %url, "Using training service session source");
            let timeout = Duration::from_secs(config.sources.request_timeout_secs);
            Ok(Arc::new(HttpSource::new(url.clone(), timeout)?))
        }
        None => {
            let roots = config.resolved_session_roots(workspace);
            debug!(roots = ?roots, "Using session directories");
            Ok(Arc::new(DirectorySource::new(roots)))
        }
    }
}

fn build_repository(
    workspace: &Path,
    config: &TunescopeConfig,
) -> anyhow::Result<SessionRepository> {
    let repository = SessionRepository::new(build_source(workspace, config)?);
    Ok(if config.loading.cache_enabled {
        repository.with_cache()
    } else {
        repository
    })
}

async fn handle_sessions(workspace: &Path, config: &TunescopeConfig) -> anyhow::Result<()> {
    let source = build_source(workspace, config)?;
    let mut sessions = source.list_sessions().await?;
    if sessions.is_empty() {
        println!("No training sessions found via {} source.", source.name());
        return Ok(());
    }
    sort_for_listing(&mut sessions);
    print!("{}", render::session_table(&sessions));
    Ok(())
}

async fn handle_compare(
    ids: Vec<String>,
    window: Option<usize>,
    top: Option<usize>,
    json: bool,
    output: Option<PathBuf>,
    workspace: &Path,
    config: &TunescopeConfig,
) -> anyhow::Result<()> {
    let mut options = config.analysis_options();
    if let Some(window) = window {
        anyhow::ensure!(window >= 1, "--window must be at least 1");
        options.stability_window = window;
    }
    if let Some(top) = top {
        options.top_k = top;
    }

    let repository = build_repository(workspace, config)?;
    let ids: Vec<SessionId> = ids.into_iter().map(SessionId::from).collect();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling comparison");
            on_interrupt.cancel();
        }
    });

    let dataset = SessionComparisonAggregator::new(options)
        .compare_until_cancelled(&ids, &repository, &cancel)
        .await?;

    if let Some(path) = &output {
        tunescope_core::export::write_dataset(path, &dataset)?;
        println!("Comparison written to: {}", path.display());
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&dataset)?);
    } else if dataset.summary.is_empty() {
        println!("No data: none of the requested sessions could be loaded.");
        for warning in &dataset.warnings {
            println!("warning: {warning}");
        }
    } else {
        print!("{}", render::comparison_table(&dataset));
    }
    Ok(())
}

async fn handle_best(
    id: &str,
    top: usize,
    workspace: &Path,
    config: &TunescopeConfig,
) -> anyhow::Result<()> {
    let repository = build_repository(workspace, config)?;
    let session = repository.load(&SessionId::new(id)).await?;
    println!("{}", render::session_header(&session));

    let Some(validation) = session.validation_loss() else {
        println!("No validation loss recorded; no checkpoint can be selected.");
        return Ok(());
    };
    let resolver = AdapterDirectoryResolver::new(config.resolved_session_roots(workspace));
    let ranked: Vec<_> = top_k(validation, top.max(1))
        .into_iter()
        .map(|best| {
            let path = resolver.resolve(&session, &best.checkpoint_id);
            (best, path)
        })
        .collect();
    if ranked.is_empty() {
        println!("No finite validation loss recorded; no checkpoint can be selected.");
        return Ok(());
    }
    print!("{}", render::best_table(&ranked));
    Ok(())
}

async fn handle_checkpoints(
    id: &str,
    workspace: &Path,
    config: &TunescopeConfig,
) -> anyhow::Result<()> {
    let repository = build_repository(workspace, config)?;
    let session = repository.load(&SessionId::new(id)).await?;
    println!("{}", render::session_header(&session));

    if session.saved_checkpoints.is_empty() {
        println!("\nNo checkpoints recorded in the session log.");
    } else {
        println!("\nRecorded in log:");
        print!("{}", render::saved_checkpoint_table(&session.saved_checkpoints));
    }

    let resolver = AdapterDirectoryResolver::new(config.resolved_session_roots(workspace));
    let artifacts = resolver
        .session_dir(&session)
        .map(|dir| list_artifacts(&dir))
        .unwrap_or_default();
    if artifacts.is_empty() {
        println!("\nNo adapter files found on disk.");
    } else {
        println!("\nAdapter files on disk:");
        print!("{}", render::artifact_table(&artifacts));
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config: &TunescopeConfig,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = TunescopeConfig::default();
            let written = tunescope_core::export::write_workspace_config(workspace, &default_config)?;
            println!("Created default configuration at: {}", written.display());
            Ok(())
        }
        ConfigAction::Show => {
            if !config_exists(Some(workspace)) {
                println!("# No configuration file found; showing defaults.");
            }
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_session(workspace: &Path, id: &str, val: &[(u64, f64)]) {
        let dir = workspace.join("models").join("cpt").join(id);
        std::fs::create_dir_all(&dir).unwrap();
        let metrics: Vec<_> = val
            .iter()
            .map(|(iteration, loss)| {
                json!({"iteration": iteration, "train_loss": loss + 0.1, "val_loss": loss})
            })
            .collect();
        let body = json!({"config": {"fine_tune_type": "lora"}, "metrics": metrics});
        std::fs::write(dir.join("CPT_20250601_120000.json"), body.to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_config_init() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace, TunescopeConfig::default())
            .await
            .unwrap();

        let config_path = workspace.join(".tunescope").join("config.toml");
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: TunescopeConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed, TunescopeConfig::default());
    }

    #[tokio::test]
    async fn test_config_init_keeps_existing_file() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join(".tunescope");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "[analysis]\ntop_k = 7\n").unwrap();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, dir.path(), TunescopeConfig::default())
            .await
            .unwrap();

        let content = std::fs::read_to_string(config_dir.join("config.toml")).unwrap();
        assert_eq!(content, "[analysis]\ntop_k = 7\n");
    }

    #[tokio::test]
    async fn test_compare_writes_dataset() {
        let dir = TempDir::new().unwrap();
        write_session(dir.path(), "run_a", &[(100, 0.9), (200, 0.6)]);
        write_session(dir.path(), "run_b", &[(100, 0.5), (200, 0.7)]);
        let output = dir.path().join("comparison.json");

        let command = Commands::Compare {
            ids: vec!["run_a".into(), "run_b".into(), "missing".into()],
            window: Some(1),
            top: None,
            json: false,
            output: Some(output.clone()),
        };
        handle_command(command, dir.path(), TunescopeConfig::default())
            .await
            .unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written["status"], "complete");
        assert_eq!(written["summary"][0]["session_id"], "run_b");
        assert_eq!(written["summary"][0]["best_checkpoint_id"], "000100");
        assert_eq!(written["summary"][1]["session_id"], "run_a");
        assert_eq!(written["options"]["stability_window"], 1);
    }

    #[tokio::test]
    async fn test_compare_rejects_zero_window() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Compare {
            ids: vec!["run_a".into()],
            window: Some(0),
            top: None,
            json: false,
            output: None,
        };
        let result = handle_command(command, dir.path(), TunescopeConfig::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_best_for_unknown_session_fails() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Best {
            id: "nope".into(),
            top: 3,
        };
        let result = handle_command(command, dir.path(), TunescopeConfig::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_best_and_checkpoints_for_local_session() {
        let dir = TempDir::new().unwrap();
        write_session(dir.path(), "run_a", &[(100, 0.9), (200, 0.6)]);

        let best = Commands::Best {
            id: "run_a".into(),
            top: 2,
        };
        handle_command(best, dir.path(), TunescopeConfig::default())
            .await
            .unwrap();

        let checkpoints = Commands::Checkpoints { id: "run_a".into() };
        handle_command(checkpoints, dir.path(), TunescopeConfig::default())
            .await
            .unwrap();
    }

    #[test]
    fn service_url_selects_http_source() {
        let dir = TempDir::new().unwrap();
        let mut config = TunescopeConfig::default();
        config.sources.service_url = Some("http://localhost:8000".into());
        let source = build_source(dir.path(), &config).unwrap();
        assert_eq!(source.name(), "http");

        config.sources.service_url = None;
        let source = build_source(dir.path(), &config).unwrap();
        assert_eq!(source.name(), "directory");
    }
}
