//! Durable download state
//!
//! One JSON state file per destination, written beside it. Persisted
//! progress counters are untrusted: a crash may land between a segment write
//! and its counter being flushed, so every load is followed by a reconcile
//! pass that reads the actual segment file sizes back from disk.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::downloader::segment::Segment;
use crate::error::DownloadError;

/// Suffix appended to the destination's full file name (not just the stem):
/// `archive.tar` persists as `archive.tar.metadata.json`.
pub const STATE_SUFFIX: &str = ".metadata.json";

/// The durable record of a single URL's download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadState {
    pub url: String,
    /// Destination file.
    pub file: PathBuf,
    /// `None` while the remote size is unknown (no content-length).
    pub total_size: Option<u64>,
    pub segments: Vec<Segment>,
    pub state_path: PathBuf,
}

impl DownloadState {
    /// Sum of reconciled per-segment progress. Derived, never stored as a
    /// source of truth.
    pub fn downloaded(&self) -> u64 {
        self.segments.iter().map(|s| s.downloaded).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.segments.iter().all(Segment::is_complete)
    }
}

/// State file path for a destination: the full file name plus
/// [`STATE_SUFFIX`], in the same directory.
pub fn state_path_for(file: &Path) -> PathBuf {
    file.with_file_name(with_suffix(file, STATE_SUFFIX))
}

/// Segment file path: destination base name plus `-part<index>`, placed in
/// `temp_dir` when one is configured, otherwise beside the destination.
pub fn segment_path_for(file: &Path, temp_dir: Option<&Path>, index: usize) -> PathBuf {
    let name = with_suffix(file, &format!("-part{index}"));
    match temp_dir {
        Some(dir) => dir.join(name),
        None => file.with_file_name(name),
    }
}

fn with_suffix(file: &Path, suffix: &str) -> OsString {
    let mut name = file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    name
}

/// Loads persisted state for `file`, or `None` when no state exists. A state
/// file that cannot be parsed is treated as absent; the download falls back
/// to a fresh probe.
pub async fn load(file: &Path) -> Option<DownloadState> {
    let path = state_path_for(file);
    let content = tokio::fs::read_to_string(&path).await.ok()?;
    match serde_json::from_str::<DownloadState>(&content) {
        Ok(mut state) => {
            state.state_path = path;
            Some(state)
        }
        Err(e) => {
            warn!("ignoring unreadable state file {}: {}", path.display(), e);
            None
        }
    }
}

pub async fn save(state: &DownloadState) -> Result<(), DownloadError> {
    let to_state_err = |message: String| DownloadError::State {
        path: state.state_path.clone(),
        message,
    };
    let json = serde_json::to_string_pretty(state).map_err(|e| to_state_err(e.to_string()))?;
    tokio::fs::write(&state.state_path, json)
        .await
        .map_err(|e| to_state_err(e.to_string()))
}

/// Replaces every segment's progress counter with the actual size of its
/// file on disk (0 when absent). Mandatory after every load and idempotent;
/// disk reality is the sole source of truth for resumability.
pub async fn reconcile(state: &mut DownloadState) {
    for segment in &mut state.segments {
        let on_disk = file_size(&segment.path).await.unwrap_or(0);
        segment.downloaded = match segment.range {
            Some(_) => on_disk.min(segment.expected_size),
            None => on_disk,
        };
    }
    debug!(
        url = state.url,
        downloaded = state.downloaded(),
        "reconciled state from disk"
    );
}

/// Deletes the state file and all segment files. Best-effort: a file that
/// cannot be removed is logged and skipped, never fatal to the download.
pub async fn retire(state: &DownloadState) {
    for segment in &state.segments {
        delete_file(&segment.path).await;
    }
    delete_file(&state.state_path).await;
}

/// Size of `path` on disk, `None` when it does not exist.
pub async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// Removes `path` if present; returns whether a file was actually deleted.
pub async fn delete_file(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("failed to remove {}: {}", path.display(), e);
            false
        }
    }
}
