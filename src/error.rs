//! Error taxonomy for partdl

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for partdl.
///
/// Failures are always scoped to the single URL that produced them; a batch
/// never aborts as a whole because one URL failed.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Malformed request, rejected before any I/O.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The metadata probe could not reach or parse the remote headers.
    #[error("probe of '{url}' failed: {message}")]
    Probe { url: String, message: String },

    /// One byte range could not be fetched. Collected per segment; sibling
    /// segments keep running.
    #[error("segment {index} of '{url}' failed: {message}")]
    SegmentFetch {
        url: String,
        index: usize,
        message: String,
    },

    /// All segment failures for one URL, messages joined by newline.
    #[error("download of '{url}' failed\n{message}")]
    Segments { url: String, message: String },

    /// I/O error while concatenating segments into the destination file.
    /// Completed segment files are left on disk for a later re-finalize.
    #[error("failed to finalize '{}': {source}", file.display())]
    Finalize {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted state file could not be written.
    #[error("state file '{}': {message}", path.display())]
    State { path: PathBuf, message: String },

    /// A segment was submitted after the shared worker pool was shut down.
    #[error("worker pool is closed")]
    PoolClosed,

    /// Per-URL failures of one batch, joined by newline.
    #[error("{0}")]
    Batch(String),
}
