//! partdl command line interface

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use partdl::{DownloadEvent, Downloader, DownloaderOptions, RemoteFile};

#[derive(Debug, Parser)]
#[command(name = "partdl", version, about = "Segmented, resumable HTTP downloader")]
struct Cli {
    /// URLs to download.
    urls: Vec<String>,

    /// Batch file with one download per line: `URL [DESTINATION]`.
    /// Blank lines and lines starting with `#` are skipped.
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Directory for downloads without an explicit destination.
    #[arg(short, long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Directory for in-progress segment files.
    #[arg(long, value_name = "DIR")]
    temp_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let requests = collect_requests(&cli)?;
    if requests.is_empty() {
        bail!("nothing to download: pass URLs or --input FILE");
    }

    let downloader = Downloader::new(DownloaderOptions {
        dir: cli.dir,
        temp_dir: cli.temp_dir,
    });
    let mut events = downloader
        .events()
        .context("event stream already taken")?;
    let reporter = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            report(&event);
        }
    });

    let result = downloader.download(requests).await;
    downloader.close();
    result?;
    let failed = downloader.error().await;
    drop(downloader);
    let _ = reporter.await;

    if let Some(message) = failed {
        bail!("{message}");
    }
    Ok(())
}

fn collect_requests(cli: &Cli) -> Result<Vec<RemoteFile>> {
    let mut requests: Vec<RemoteFile> = cli.urls.iter().map(|u| RemoteFile::new(u)).collect();
    if let Some(input) = &cli.input {
        let content = std::fs::read_to_string(input)
            .with_context(|| format!("cannot read batch file {}", input.display()))?;
        requests.extend(parse_batch(&content));
    }
    Ok(requests)
}

/// One request per non-comment line; an optional second column names the
/// destination file.
fn parse_batch(content: &str) -> Vec<RemoteFile> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let url = columns.next()?;
            Some(match columns.next() {
                Some(file) => RemoteFile::with_file(url, file),
                None => RemoteFile::new(url),
            })
        })
        .collect()
}

fn report(event: &DownloadEvent) {
    match event {
        DownloadEvent::Total { url, file, size } => match size {
            Some(size) => info!(url, file = %file.display(), size, "download started"),
            None => info!(url, file = %file.display(), "download started, size unknown"),
        },
        DownloadEvent::Progress(snapshot) => {
            info!(
                url = snapshot.url,
                downloaded = snapshot.downloaded,
                percent = snapshot.percent,
                segments = format!(
                    "{}/{}",
                    snapshot.finished_segments, snapshot.segment_count
                ),
                "progress"
            );
        }
        DownloadEvent::SegmentProgress { .. } => {}
        DownloadEvent::Complete { url, file, size } => {
            info!(url, file = %file.display(), size, "download complete");
        }
        DownloadEvent::Error { url, message } => {
            tracing::error!(url, %message, "download failed");
        }
    }
}
