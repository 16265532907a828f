//! Segment finalization
//!
//! Concatenates completed segment files into the destination, strictly in
//! ascending index order. Ordering is a correctness invariant here, not an
//! optimization: a wrongly ordered list is rejected, never reordered.

use std::io;
use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::downloader::segment::Segment;
use crate::error::DownloadError;
use crate::state::{self, DownloadState};

/// Streams the full contents of each segment file into `output_path`, one
/// segment at a time; each read stream is closed before the next opens.
/// Returns the number of bytes written.
pub async fn merge_segments(segments: &[Segment], output_path: &Path) -> Result<u64, DownloadError> {
    let finalize_err = |source: io::Error| DownloadError::Finalize {
        file: output_path.to_path_buf(),
        source,
    };

    if segments.is_empty() {
        return Err(finalize_err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no segments to merge",
        )));
    }
    for (position, segment) in segments.iter().enumerate() {
        if segment.index != position {
            return Err(finalize_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "segments out of order: index {} at position {}",
                    segment.index, position
                ),
            )));
        }
    }

    let mut output = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output_path)
        .await
        .map_err(finalize_err)?;

    let mut total_bytes = 0u64;
    for segment in segments {
        let mut reader = File::open(&segment.path).await.map_err(finalize_err)?;
        let mut buffer = [0u8; 8192];
        let mut copied = 0u64;
        loop {
            let n = reader.read(&mut buffer).await.map_err(finalize_err)?;
            if n == 0 {
                break;
            }
            output.write_all(&buffer[..n]).await.map_err(finalize_err)?;
            copied += n as u64;
            total_bytes += n as u64;
        }
        debug!(index = segment.index, copied, "merged segment");
        // reader dropped here, before the next segment opens
    }

    output.flush().await.map_err(finalize_err)?;
    info!(
        "merged {} segments ({} bytes) into {}",
        segments.len(),
        total_bytes,
        output_path.display()
    );
    Ok(total_bytes)
}

/// Produces the destination file and retires the download's transient state.
/// On merge failure the segment files stay on disk so a subsequent run can
/// re-finalize without re-fetching.
pub async fn finalize(state: &DownloadState) -> Result<u64, DownloadError> {
    let written = merge_segments(&state.segments, &state.file).await?;
    state::retire(state).await;
    Ok(written)
}
