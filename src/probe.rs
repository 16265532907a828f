//! Remote metadata resolver
//!
//! Issues a header-only HEAD probe and derives the destination file name and
//! total size from the response. Header parsing is kept in pure functions so
//! the inference rules are testable without a network.

use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::DownloadError;

/// What a probe learned about a URL. `size` is `None` when the server sent
/// no usable content-length, which degrades the download to a single
/// unranged fetch.
#[derive(Debug, Clone)]
pub struct RemoteMetadata {
    pub url: String,
    pub file_name: String,
    pub size: Option<u64>,
}

/// Probes `url` and resolves both the file name and the total size.
pub async fn probe(client: &Client, url: &str) -> Result<RemoteMetadata, DownloadError> {
    let headers = head(client, url).await?;
    let size = content_length(&headers);
    let file_name = file_name_from(
        url,
        header_str(&headers, CONTENT_DISPOSITION.as_str()),
        header_str(&headers, CONTENT_TYPE.as_str()),
    );
    debug!(url, file_name, ?size, "probe resolved");
    Ok(RemoteMetadata {
        url: url.to_string(),
        file_name,
        size,
    })
}

/// Probes `url` for its total size only (the destination path is already
/// known).
pub async fn probe_size(client: &Client, url: &str) -> Result<Option<u64>, DownloadError> {
    let headers = head(client, url).await?;
    Ok(content_length(&headers))
}

async fn head(client: &Client, url: &str) -> Result<HeaderMap, DownloadError> {
    let probe_err = |message: String| DownloadError::Probe {
        url: url.to_string(),
        message,
    };
    let response = client
        .head(url)
        .send()
        .await
        .map_err(|e| probe_err(e.to_string()))?;
    if !response.status().is_success() {
        return Err(probe_err(format!("HTTP error: {}", response.status())));
    }
    Ok(response.headers().clone())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// An absent or unparsable content-length means "unknown size", not an error.
fn content_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, CONTENT_LENGTH.as_str())?.trim().parse().ok()
}

/// File name inference, first match wins:
/// 1. URL path base name, when it carries a non-trivial extension.
/// 2. A name parsed from the content-disposition header.
/// 3. URL path base name, when non-empty.
/// 4. `<hostname>.html`.
///
/// If the winner still has no usable extension, one is looked up from the
/// content-type and appended.
pub fn file_name_from(
    url: &str,
    content_disposition: Option<&str>,
    content_type: Option<&str>,
) -> String {
    let base = url_base_name(url);

    let mut name = if extension_of(&base).is_some() {
        base
    } else if let Some(from_header) = content_disposition.and_then(disposition_file_name) {
        from_header
    } else if !base.is_empty() {
        base
    } else {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "download".to_string());
        format!("{host}.html")
    };

    if extension_of(&name).is_none() {
        if name.ends_with('.') {
            name.pop();
        }
        if let Some(ext) = extension_for_content_type(content_type) {
            name.push('.');
            name.push_str(ext);
        }
    }
    name
}

/// Last path component of the URL, query and fragment excluded.
fn url_base_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            u.path()
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .unwrap_or_default()
}

/// A non-trivial extension: a dot that is neither leading nor trailing.
fn extension_of(name: &str) -> Option<&str> {
    let idx = name.rfind('.')?;
    if idx == 0 || idx == name.len() - 1 {
        return None;
    }
    Some(&name[idx + 1..])
}

/// Extracts a file name from a content-disposition header value, trying the
/// RFC 5987 `filename*=` form, then a quoted `filename="..."`, then a bare
/// `filename=...`. Path separators are stripped from the result.
fn disposition_file_name(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let name = parse_extended(value)
        .or_else(|| parse_quoted(value))
        .or_else(|| parse_bare(value))?;
    let name: String = name.chars().filter(|c| *c != '/' && *c != '\\').collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// `filename*=<charset>'<lang>'<value>`, value terminated by `;` or end.
fn parse_extended(value: &str) -> Option<String> {
    let rest = &value[find_ci(value, "filename*=")? + "filename*=".len()..];
    let mut parts = rest.splitn(3, '\'');
    let _charset = parts.next()?;
    let _lang = parts.next()?;
    let name = parts.next()?.split(';').next().unwrap_or_default().trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// `filename="<value>"`.
fn parse_quoted(value: &str) -> Option<String> {
    let rest = &value[find_ci(value, "filename=")? + "filename=".len()..];
    let inner = rest.strip_prefix('"')?;
    let name = inner.split('"').next().unwrap_or_default();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// `filename=<value>` without quotes, terminated by `;` or end.
fn parse_bare(value: &str) -> Option<String> {
    let rest = &value[find_ci(value, "filename=")? + "filename=".len()..];
    if rest.starts_with('"') {
        return None;
    }
    let name = rest.split(';').next().unwrap_or_default().trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}

/// content-type -> preferred file extension, `None` when the type is unknown.
fn extension_for_content_type(content_type: Option<&str>) -> Option<&'static str> {
    let essence = content_type?.split(';').next()?.trim().to_ascii_lowercase();
    mime_guess::get_mime_extensions_str(&essence)?.first().copied()
}
