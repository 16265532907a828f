//! Download orchestrator
//!
//! Composes the probe, planner, state store, worker pool, progress
//! aggregator, and merger into a per-URL pipeline, and runs a batch of URLs
//! concurrently. Each URL runs to its own completion or failure; one URL's
//! failure never aborts its siblings.
//!
//! All mutation of a `DownloadState` happens on the per-URL control task.
//! Fetchers report progress by message, never by shared access to the state.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex as StdMutex, OnceLock};
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::downloader::merger;
use crate::downloader::progress::{self, DownloadEvent};
use crate::downloader::segment::{self, Segment, SegmentPlan, SegmentProgress};
use crate::error::DownloadError;
use crate::pool::{available_parallelism, WorkerPool};
use crate::probe;
use crate::request::{self, RemoteFile};
use crate::state::{self, DownloadState};

/// Where downloads land.
#[derive(Debug, Clone, Default)]
pub struct DownloaderOptions {
    /// Directory for destination files whose request carries no explicit
    /// path. Defaults to the current directory.
    pub dir: Option<PathBuf>,
    /// Directory for segment files. Defaults to the destination's directory.
    pub temp_dir: Option<PathBuf>,
}

/// Top-level façade: submit a batch, observe the event stream, shut down.
pub struct Downloader {
    client: Client,
    dir: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    pool: OnceLock<WorkerPool>,
    events_tx: mpsc::UnboundedSender<DownloadEvent>,
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<DownloadEvent>>>,
    /// URLs this instance has already accepted; re-submissions are ignored.
    in_flight: Mutex<HashSet<String>>,
    /// Terminal failure message per URL.
    errors: Mutex<BTreeMap<String, String>>,
}

enum Init {
    Ready(DownloadState),
    /// Destination already holds the full file; nothing to fetch.
    AlreadyComplete { file: PathBuf, size: u64 },
}

impl Downloader {
    pub fn new(options: DownloaderOptions) -> Self {
        let client = Client::builder()
            .user_agent(concat!("partdl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            client,
            dir: options.dir,
            temp_dir: options.temp_dir,
            pool: OnceLock::new(),
            events_tx,
            events_rx: StdMutex::new(Some(events_rx)),
            in_flight: Mutex::new(HashSet::new()),
            errors: Mutex::new(BTreeMap::new()),
        }
    }

    /// Takes the event stream. Single consumer; returns `None` after the
    /// first call.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<DownloadEvent>> {
        self.events_rx.lock().ok()?.take()
    }

    /// Runs a whole batch. URLs already submitted to this instance are
    /// skipped; every accepted URL runs independently and concurrently.
    /// Per-URL failures are recorded (see [`Self::error`]) and emitted as
    /// [`DownloadEvent::Error`], not returned.
    pub async fn download(&self, requests: Vec<RemoteFile>) -> Result<(), DownloadError> {
        if requests.is_empty() {
            return Err(DownloadError::InvalidInput(
                "no downloads requested".to_string(),
            ));
        }

        let mut accepted = Vec::new();
        for req in requests {
            let raw_url = req.url.clone();
            match request::validate(req) {
                Ok(valid) => {
                    let mut in_flight = self.in_flight.lock().await;
                    if in_flight.insert(valid.url.clone()) {
                        accepted.push(valid);
                    } else {
                        debug!(url = valid.url, "already submitted, skipping");
                    }
                }
                // Rejected before any I/O; fatal to this request only.
                Err(e) => self.record_failure(&raw_url, e.to_string()).await,
            }
        }

        futures::future::join_all(accepted.iter().map(|req| self.download_one(req))).await;
        Ok(())
    }

    /// Shuts down the shared worker pool. Idempotent.
    pub fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close();
        }
    }

    /// One-shot convenience: run a batch on a fresh instance, shut the pool
    /// down on every exit path, and fail if any URL failed.
    pub async fn download_once(
        requests: Vec<RemoteFile>,
        options: DownloaderOptions,
    ) -> Result<(), DownloadError> {
        let downloader = Downloader::new(options);
        let result = downloader.download(requests).await;
        downloader.close();
        result?;
        match downloader.error().await {
            Some(message) => Err(DownloadError::Batch(message)),
            None => Ok(()),
        }
    }

    pub async fn has_errors(&self) -> bool {
        !self.errors.lock().await.is_empty()
    }

    /// All per-URL failure messages joined by newline, or `None` when every
    /// URL so far succeeded.
    pub async fn error(&self) -> Option<String> {
        let errors = self.errors.lock().await;
        if errors.is_empty() {
            None
        } else {
            Some(errors.values().cloned().collect::<Vec<_>>().join("\n"))
        }
    }

    fn pool(&self) -> &WorkerPool {
        self.pool
            .get_or_init(|| WorkerPool::new(available_parallelism()))
    }

    fn emit(&self, event: DownloadEvent) {
        // Nobody listening is fine.
        let _ = self.events_tx.send(event);
    }

    async fn record_failure(&self, url: &str, message: String) {
        warn!(url, %message, "download failed");
        self.emit(DownloadEvent::Error {
            url: url.to_string(),
            message: message.clone(),
        });
        self.errors.lock().await.insert(url.to_string(), message);
    }

    async fn download_one(&self, req: &RemoteFile) {
        self.errors.lock().await.remove(&req.url);
        let result = async {
            match self.init_download(req).await? {
                Init::AlreadyComplete { file, size } => {
                    info!(url = req.url, "destination already complete");
                    self.emit(DownloadEvent::Total {
                        url: req.url.clone(),
                        file: file.clone(),
                        size: Some(size),
                    });
                    self.emit(DownloadEvent::Complete {
                        url: req.url.clone(),
                        file,
                        size,
                    });
                    Ok(())
                }
                Init::Ready(state) => self.run_download(state).await,
            }
        }
        .await;
        if let Err(e) = result {
            self.record_failure(&req.url, e.to_string()).await;
        }
    }

    /// Loads resumable state or creates a fresh plan from a probe, then
    /// applies the startup policy for an existing destination file.
    async fn init_download(&self, req: &RemoteFile) -> Result<Init, DownloadError> {
        let url = &req.url;
        let (dest, probed_size) = match &req.file {
            Some(file) => (file.clone(), None),
            None => {
                let meta = probe::probe(&self.client, url).await?;
                let dir = self.dir.clone().unwrap_or_else(|| PathBuf::from("."));
                (dir.join(&meta.file_name), Some(meta.size))
            }
        };

        let mut state = match state::load(&dest).await {
            Some(state) => {
                debug!(url, "resuming from persisted state");
                state
            }
            None => {
                let size = match probed_size {
                    Some(size) => size,
                    None => probe::probe_size(&self.client, url).await?,
                };
                self.plan_state(url, dest.clone(), size)
            }
        };
        state::reconcile(&mut state).await;

        // A destination of exactly the expected size is the finished
        // download of a previous run that crashed before cleanup. Any other
        // size cannot be a valid partial result; partial data lives only in
        // segment files.
        if let Some(dest_size) = state::file_size(&dest).await {
            if state.total_size == Some(dest_size) {
                state::retire(&state).await;
                return Ok(Init::AlreadyComplete {
                    file: dest,
                    size: dest_size,
                });
            }
            state::delete_file(&dest).await;
        }

        state::save(&state).await?;
        Ok(Init::Ready(state))
    }

    fn plan_state(&self, url: &str, dest: PathBuf, size: Option<u64>) -> DownloadState {
        let temp_dir = self.temp_dir.as_deref();
        let make_segment = |index: usize, range| Segment {
            index,
            url: url.to_string(),
            range,
            path: state::segment_path_for(&dest, temp_dir, index),
            expected_size: range.map_or(0, |r: segment::ByteRange| r.len()),
            downloaded: 0,
        };
        let segments = match segment::plan(size, self.pool().parallelism()) {
            SegmentPlan::Empty => Vec::new(),
            SegmentPlan::Unranged => vec![make_segment(0, None)],
            SegmentPlan::Ranged(ranges) => ranges
                .into_iter()
                .enumerate()
                .map(|(index, range)| make_segment(index, Some(range)))
                .collect(),
        };
        DownloadState {
            url: url.to_string(),
            state_path: state::state_path_for(&dest),
            file: dest,
            total_size: size,
            segments,
        }
    }

    /// Per-URL pipeline: fetch the pending segments under the shared pool,
    /// fold progress messages, then finalize once every segment succeeded.
    async fn run_download(&self, mut state: DownloadState) -> Result<(), DownloadError> {
        let url = state.url.clone();
        self.emit(DownloadEvent::Total {
            url: url.clone(),
            file: state.file.clone(),
            size: state.total_size,
        });

        if state.segments.is_empty() {
            // Zero-byte download: produce the empty destination directly.
            tokio::fs::File::create(&state.file)
                .await
                .map_err(|source| DownloadError::Finalize {
                    file: state.file.clone(),
                    source,
                })?;
            state::retire(&state).await;
            self.emit(DownloadEvent::Complete {
                url,
                file: state.file.clone(),
                size: 0,
            });
            return Ok(());
        }

        let pending: Vec<Segment> = state
            .segments
            .iter()
            .filter(|s| !s.is_complete())
            .cloned()
            .collect();

        if !pending.is_empty() {
            let (progress_tx, mut progress_rx) = mpsc::channel::<SegmentProgress>(256);
            let pool = self.pool();
            let mut handles = Vec::with_capacity(pending.len());
            for seg in pending {
                let client = self.client.clone();
                let tx = progress_tx.clone();
                let index = seg.index;
                handles.push((
                    index,
                    pool.spawn(async move { segment::fetch_segment(&client, &seg, tx).await }),
                ));
            }
            drop(progress_tx);

            // Single-writer control loop; ends when every fetcher is done.
            while let Some(p) = progress_rx.recv().await {
                let snapshot = progress::apply_segment_progress(&mut state, p.index, p.downloaded);
                self.emit(DownloadEvent::SegmentProgress {
                    url: url.clone(),
                    index: p.index,
                    downloaded: p.downloaded,
                });
                self.emit(DownloadEvent::Progress(snapshot));
            }

            // Every submitted segment has finished, successfully or not.
            let mut failures = Vec::new();
            for (index, handle) in handles {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => failures.push(e),
                    Err(e) => failures.push(DownloadError::SegmentFetch {
                        url: url.clone(),
                        index,
                        message: e.to_string(),
                    }),
                }
            }
            if !failures.is_empty() {
                return Err(DownloadError::Segments {
                    url,
                    message: join_failures(&failures),
                });
            }
        }

        if state.total_size.is_none() {
            // The unranged fetch just revealed the real size.
            let total = state.downloaded();
            state.total_size = Some(total);
            for seg in &mut state.segments {
                seg.expected_size = seg.downloaded;
            }
        }

        let size = merger::finalize(&state).await?;
        info!(url, size, file = %state.file.display(), "download complete");
        self.emit(DownloadEvent::Complete {
            url,
            file: state.file.clone(),
            size,
        });
        Ok(())
    }
}

/// Segment failure messages for one URL, one per line.
fn join_failures(failures: &[DownloadError]) -> String {
    failures
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
