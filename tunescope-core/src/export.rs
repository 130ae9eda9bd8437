//! Writing datasets and config files to disk.
//!
//! Writes go to a `.tmp` sibling first and are renamed into place.

use crate::compare::ComparisonDataset;
use crate::config::{TunescopeConfig, workspace_config_path};
use crate::error::Result;
use std::io;
use std::path::{Path, PathBuf};

/// Atomically write raw bytes, creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Write a comparison dataset as pretty-printed JSON.
pub fn write_dataset(path: &Path, dataset: &ComparisonDataset) -> Result<()> {
    let json = serde_json::to_string_pretty(dataset)?;
    atomic_write(path, json.as_bytes())?;
    Ok(())
}

/// Write `config` to `<workspace>/.tunescope/config.toml` and return the path.
pub fn write_workspace_config(workspace: &Path, config: &TunescopeConfig) -> Result<PathBuf> {
    let path = workspace_config_path(workspace);
    atomic_write(&path, config.to_toml()?.as_bytes())?;
    Ok(path)
}
