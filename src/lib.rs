//! partdl - segmented, resumable HTTP downloader
//!
//! Splits a remote file into byte ranges, fetches them concurrently under a
//! shared bounded worker pool, persists enough state to survive a crash, and
//! reassembles the destination once every segment has landed. Interrupted
//! downloads resume from whatever segment data is actually on disk.
//!
//! ```no_run
//! use partdl::{Downloader, DownloaderOptions, RemoteFile};
//!
//! # async fn run() -> Result<(), partdl::DownloadError> {
//! Downloader::download_once(
//!     vec![RemoteFile::new("https://example.com/archive.tar.gz")],
//!     DownloaderOptions::default(),
//! )
//! .await
//! # }
//! ```

pub mod downloader;
pub mod error;
pub mod pool;
pub mod probe;
pub mod request;
pub mod state;

pub use downloader::{DownloadEvent, Downloader, DownloaderOptions, ProgressSnapshot};
pub use error::DownloadError;
pub use request::RemoteFile;
