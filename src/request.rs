//! Download request input parsing and validation

use std::path::PathBuf;

use url::Url;

use crate::error::DownloadError;

/// A user-supplied download request: a URL plus an optional destination path.
/// When the path is absent it is derived from the remote metadata probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub url: String,
    pub file: Option<PathBuf>,
}

impl RemoteFile {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file: None,
        }
    }

    pub fn with_file(url: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            file: Some(file.into()),
        }
    }
}

impl From<&str> for RemoteFile {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

/// Validates a request before any I/O happens, normalizing protocol-relative
/// URLs (`//host/path` becomes `http://host/path`).
pub fn validate(req: RemoteFile) -> Result<RemoteFile, DownloadError> {
    let url = parse_url(&req.url)?;
    Ok(RemoteFile {
        url,
        file: req.file,
    })
}

/// Checks that `raw` is an absolute (or protocol-relative) http/https URL and
/// returns the normalized form.
pub fn parse_url(raw: &str) -> Result<String, DownloadError> {
    let candidate = if raw.starts_with("//") {
        format!("http:{raw}")
    } else {
        raw.to_string()
    };
    let parsed = Url::parse(&candidate)
        .map_err(|_| DownloadError::InvalidInput(format!("invalid url: {raw}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(candidate),
        other => Err(DownloadError::InvalidInput(format!(
            "unsupported url scheme '{other}': {raw}"
        ))),
    }
}
