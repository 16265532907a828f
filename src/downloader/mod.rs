//! Segmented, resumable HTTP downloads.

pub mod engine;
pub mod merger;
pub mod progress;
pub mod segment;

pub use engine::{Downloader, DownloaderOptions};
pub use progress::{DownloadEvent, ProgressSnapshot};
pub use segment::{ByteRange, Segment, SegmentPlan};
