// JSON checkpoint of accumulator summary state
use crate::domain::cycle::CycleRecord;
use crate::infrastructure::ring_buffer::RingBufferError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Baseline timestamp, ms since epoch
    pub since: i64,
    pub since_cycles: u64,
    pub since_run_time_ms: i64,
    #[serde(default)]
    pub last_run_time_ms: i64,
    #[serde(default)]
    pub last_off_time_ms: i64,
    #[serde(default)]
    pub cycles: Vec<CycleRecord>,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error on checkpoint {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed checkpoint {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    RingBuffer(#[from] RingBufferError),
}

/// Read a checkpoint. A missing or unreadable file yields `None`; a file that
/// exists but does not parse is an error.
pub fn read_checkpoint(path: &Path) -> Result<Option<Checkpoint>, CheckpointError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("No checkpoint at {}", path.display());
            return Ok(None);
        }
        Err(e) => {
            tracing::warn!("Checkpoint {} unreadable, starting fresh: {}", path.display(), e);
            return Ok(None);
        }
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| CheckpointError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

/// Write `checkpoint` to a sibling temp file, sync it, then rename over `path`.
pub fn write_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
    let io_err = |source: io::Error| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_vec_pretty(checkpoint).map_err(|source| {
        CheckpointError::Malformed {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let tmp_path = temp_path(path);
    let mut file = File::create(&tmp_path).map_err(io_err)?;
    file.write_all(&json).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);
    fs::rename(&tmp_path, path).map_err(io_err)?;

    tracing::debug!(
        "Checkpoint written to {} ({} cycles)",
        path.display(),
        checkpoint.cycles.len()
    );
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
