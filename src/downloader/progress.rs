//! Progress aggregation and download events

use std::path::PathBuf;

use crate::state::DownloadState;

/// Per-URL progress, recomputed on every segment update and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub url: String,
    pub file: PathBuf,
    pub downloaded: u64,
    /// `None` while the remote size is unknown.
    pub total: Option<u64>,
    /// Rounded to two decimals; forced to 100 exactly at completion.
    pub percent: f64,
    pub segment_count: usize,
    pub finished_segments: usize,
}

/// Everything observable about a batch of downloads. Tagged variants over a
/// channel instead of a global emitter.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Size and segment plan are established for a URL. Emitted once.
    Total {
        url: String,
        file: PathBuf,
        size: Option<u64>,
    },
    /// Per-URL aggregate snapshot, one per segment update.
    Progress(ProgressSnapshot),
    /// Per-segment cumulative byte count, one per chunk written.
    SegmentProgress {
        url: String,
        index: usize,
        downloaded: u64,
    },
    /// Terminal success for one URL.
    Complete { url: String, file: PathBuf, size: u64 },
    /// Terminal failure for one URL, all segment messages combined.
    Error { url: String, message: String },
}

/// `round(downloaded / total * 10000) / 100`, forced to 100 when the counts
/// match so rounding can never report an unfinished 99.99… at completion.
pub fn percent(downloaded: u64, total: Option<u64>) -> f64 {
    match total {
        Some(t) if downloaded == t => 100.0,
        Some(t) => (downloaded as f64 / t as f64 * 10_000.0).round() / 100.0,
        None => 0.0,
    }
}

/// Folds one segment progress notification into the owning state and
/// recomputes the per-URL snapshot. Counters only move forward, and ranged
/// segments never exceed their expected size.
pub fn apply_segment_progress(
    state: &mut DownloadState,
    index: usize,
    downloaded: u64,
) -> ProgressSnapshot {
    if let Some(segment) = state.segments.get_mut(index) {
        let ceiling = match segment.range {
            Some(_) => downloaded.min(segment.expected_size),
            None => downloaded,
        };
        segment.downloaded = segment.downloaded.max(ceiling);
    }
    snapshot(state)
}

pub fn snapshot(state: &DownloadState) -> ProgressSnapshot {
    let downloaded = state.downloaded();
    ProgressSnapshot {
        url: state.url.clone(),
        file: state.file.clone(),
        downloaded,
        total: state.total_size,
        percent: percent(downloaded, state.total_size),
        segment_count: state.segments.len(),
        finished_segments: state.segments.iter().filter(|s| s.is_complete()).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::segment::{ByteRange, Segment};
    use std::path::Path;

    fn state_with_two_segments() -> DownloadState {
        let url = "https://example.com/data.bin".to_string();
        let file = PathBuf::from("/tmp/data.bin");
        DownloadState {
            url: url.clone(),
            file: file.clone(),
            total_size: Some(2_000),
            segments: vec![
                Segment {
                    index: 0,
                    url: url.clone(),
                    range: Some(ByteRange { start: 0, end: 999 }),
                    path: Path::new("/tmp/data.bin-part0").to_path_buf(),
                    expected_size: 1_000,
                    downloaded: 0,
                },
                Segment {
                    index: 1,
                    url,
                    range: Some(ByteRange {
                        start: 1_000,
                        end: 1_999,
                    }),
                    path: Path::new("/tmp/data.bin-part1").to_path_buf(),
                    expected_size: 1_000,
                    downloaded: 0,
                },
            ],
            state_path: PathBuf::from("/tmp/data.bin.metadata.json"),
        }
    }

    #[test]
    fn percent_rounds_to_two_decimals() {
        assert_eq!(percent(333, Some(1_000)), 33.3);
        assert_eq!(percent(1, Some(3)), 33.33);
        assert_eq!(percent(2, Some(3)), 66.67);
    }

    #[test]
    fn percent_is_forced_to_hundred_at_completion() {
        assert_eq!(percent(1_000, Some(1_000)), 100.0);
        assert_eq!(percent(0, Some(0)), 100.0);
    }

    #[test]
    fn percent_of_unknown_total_is_zero() {
        assert_eq!(percent(5_000, None), 0.0);
    }

    #[test]
    fn fold_updates_sum_and_finished_count() {
        let mut state = state_with_two_segments();

        let s = apply_segment_progress(&mut state, 0, 400);
        assert_eq!(s.downloaded, 400);
        assert_eq!(s.percent, 20.0);
        assert_eq!(s.finished_segments, 0);

        let s = apply_segment_progress(&mut state, 0, 1_000);
        assert_eq!(s.finished_segments, 1);

        let s = apply_segment_progress(&mut state, 1, 1_000);
        assert_eq!(s.downloaded, 2_000);
        assert_eq!(s.percent, 100.0);
        assert_eq!(s.finished_segments, 2);
        assert_eq!(s.segment_count, 2);
    }

    #[test]
    fn fold_never_moves_backwards() {
        let mut state = state_with_two_segments();
        apply_segment_progress(&mut state, 0, 700);
        let s = apply_segment_progress(&mut state, 0, 300);
        assert_eq!(s.downloaded, 700);
    }

    #[test]
    fn fold_clamps_ranged_segment_to_expected_size() {
        let mut state = state_with_two_segments();
        let s = apply_segment_progress(&mut state, 0, 5_000);
        assert_eq!(s.downloaded, 1_000);
    }

    #[test]
    fn fold_ignores_unknown_segment_index() {
        let mut state = state_with_two_segments();
        let s = apply_segment_progress(&mut state, 7, 123);
        assert_eq!(s.downloaded, 0);
    }
}
