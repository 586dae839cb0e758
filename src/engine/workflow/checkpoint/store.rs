// SPDX-License-Identifier: MIT

//! File persistence for checkpoints
//!
//! One file per execution identity at `<dir>/<id>.json`. Writes go to a
//! sibling `.tmp` file which is flushed and then renamed over the target.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::Checkpoint;
use crate::sdk::error::CheckpointError;

/// Single-writer checkpoint file for one execution identity
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Checkpoint for `execution_id` under `dir`
    pub fn new(dir: impl AsRef<Path>, execution_id: &str) -> Result<Self, CheckpointError> {
        validate_identity(execution_id)?;
        Ok(Self {
            path: dir.as_ref().join(format!("{}.json", execution_id)),
        })
    }

    /// Checkpoint at an explicit path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the checkpoint is moved once the run completes
    pub fn completed_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoint".to_string());
        self.path.with_file_name(format!("{}.completed.json", stem))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Read the checkpoint, or `None` if there is none
    pub fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;
        let checkpoint =
            serde_json::from_str(&content).map_err(|source| CheckpointError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        Ok(Some(checkpoint))
    }

    /// Atomically replace the checkpoint file
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let contents = serde_json::to_string_pretty(checkpoint)?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CheckpointError::Io { path, source }
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
        }

        let tmp_path = self.tmp_path();
        let mut file = fs::File::create(&tmp_path).map_err(io_err(&tmp_path))?;
        file.write_all(contents.as_bytes())
            .map_err(io_err(&tmp_path))?;
        file.sync_all().map_err(io_err(&tmp_path))?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(io_err(&self.path))?;
        log::debug!("Checkpoint written to {}", self.path.display());
        Ok(())
    }

    /// Move a finished checkpoint aside so the next `load` starts fresh
    pub fn supersede(&self) -> Result<Option<PathBuf>, CheckpointError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let target = self.completed_path();
        fs::rename(&self.path, &target).map_err(|source| CheckpointError::Io {
            path: target.clone(),
            source,
        })?;
        log::info!("Checkpoint superseded: {}", target.display());
        Ok(Some(target))
    }
}

/// Identities become file names; reject anything that could escape the directory
fn validate_identity(execution_id: &str) -> Result<(), CheckpointError> {
    let valid = !execution_id.is_empty()
        && execution_id.len() <= 128
        && execution_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidIdentity(execution_id.to_string()))
    }
}
