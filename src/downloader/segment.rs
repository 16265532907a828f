//! Byte-range planning and segment fetching

use std::path::PathBuf;

use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::DownloadError;

/// Smallest byte range worth fetching on its own connection.
pub const MIN_SEGMENT_SIZE: u64 = 1024 * 1024;

/// An inclusive byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// One contiguous piece of the target file, fetched and stored independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub url: String,
    /// `None` for the degraded single-fetch mode used when the total size is
    /// unknown.
    pub range: Option<ByteRange>,
    pub path: PathBuf,
    /// `range.len()`, or 0 while the total size is unknown.
    pub expected_size: u64,
    /// Persisted for inspection only; reconciled from the segment file's
    /// actual on-disk size on every load.
    pub downloaded: u64,
}

impl Segment {
    /// An unranged segment never reports complete: its true size is only
    /// known once a fetch runs to the end of the body.
    pub fn is_complete(&self) -> bool {
        self.range.is_some() && self.downloaded == self.expected_size
    }
}

/// How a download will be split. Unknown total size is an explicit outcome,
/// not an empty range list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentPlan {
    /// Zero-byte file; nothing to fetch.
    Empty,
    /// Total size unknown; one unranged fetch.
    Unranged,
    Ranged(Vec<ByteRange>),
}

/// Plans the byte ranges for a download of `total` bytes (`None` = unknown).
pub fn plan(total: Option<u64>, parallelism: usize) -> SegmentPlan {
    match total {
        None => SegmentPlan::Unranged,
        Some(0) => SegmentPlan::Empty,
        Some(n) => SegmentPlan::Ranged(plan_ranges(n, target_segment_size(n, parallelism))),
    }
}

/// Target segment size: an even split across `2 * parallelism` slots, but
/// never below [`MIN_SEGMENT_SIZE`].
pub fn target_segment_size(total: u64, parallelism: usize) -> u64 {
    let slots = parallelism.max(1) as u64 * 2;
    total.div_ceil(slots).max(MIN_SEGMENT_SIZE)
}

/// Splits `total` bytes into contiguous inclusive ranges of `target` bytes
/// plus one trailing remainder. Full coverage, no gaps, no overlaps.
pub fn plan_ranges(total: u64, target: u64) -> Vec<ByteRange> {
    let mut ranges = Vec::new();
    let mut start = 0u64;
    let mut remaining = total;
    while remaining > target {
        ranges.push(ByteRange {
            start,
            end: start + target - 1,
        });
        start += target;
        remaining -= target;
    }
    if remaining > 0 {
        ranges.push(ByteRange {
            start,
            end: start + remaining - 1,
        });
    }
    ranges
}

/// Progress notification sent by a fetcher after every chunk written.
#[derive(Debug, Clone)]
pub struct SegmentProgress {
    pub url: String,
    pub index: usize,
    /// Cumulative bytes on disk for this segment.
    pub downloaded: u64,
}

/// Fetches one segment, resuming from `segment.downloaded` bytes already on
/// disk. The partial file is left intact on failure so a later run can
/// continue from its actual size. No internal retry.
pub async fn fetch_segment(
    client: &Client,
    segment: &Segment,
    progress_tx: mpsc::Sender<SegmentProgress>,
) -> Result<(), DownloadError> {
    let fail = |message: String| DownloadError::SegmentFetch {
        url: segment.url.clone(),
        index: segment.index,
        message,
    };

    let mut downloaded = segment.downloaded;
    let offset = match segment.range {
        Some(range) => range.start + downloaded,
        None => downloaded,
    };
    let range_header = match segment.range {
        Some(range) => {
            if offset > range.end {
                return Ok(());
            }
            Some(format!("bytes={}-{}", offset, range.end))
        }
        None if downloaded > 0 => Some(format!("bytes={downloaded}-")),
        None => None,
    };

    let mut request = client.get(&segment.url);
    if let Some(range) = &range_header {
        request = request.header(header::RANGE, range);
    }
    let response = request.send().await.map_err(|e| fail(e.to_string()))?;
    if !response.status().is_success() {
        return Err(fail(format!("HTTP error: {}", response.status())));
    }
    // A 200 to a request starting past byte 0 is the whole body, not the
    // remainder; appending it would corrupt the segment file.
    if offset > 0 && response.status() == StatusCode::OK {
        return Err(fail("server ignored range request (HTTP 200)".to_string()));
    }

    let mut file = if downloaded > 0 {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&segment.path)
            .await
    } else {
        File::create(&segment.path).await
    }
    .map_err(|e| fail(e.to_string()))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| fail(e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| fail(e.to_string()))?;
        downloaded += chunk.len() as u64;
        let _ = progress_tx
            .send(SegmentProgress {
                url: segment.url.clone(),
                index: segment.index,
                downloaded,
            })
            .await;
    }
    file.flush().await.map_err(|e| fail(e.to_string()))?;

    debug!(index = segment.index, downloaded, "segment finished");
    Ok(())
}
