//! Download file naming.
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use url::Url;

use crate::error::ProbeError;

pub const DEFAULT_NAME: &str = "download";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Picks the name of a downloaded file.
///
/// Precedence: the Content-Disposition `filename`, the last URL path
/// segment, the sanitized host, then [`DEFAULT_NAME`].
pub fn pick(content_disposition: Option<&str>, url: &Url) -> String {
    content_disposition
        .and_then(from_content_disposition)
        .or_else(|| from_url_path(url))
        .or_else(|| from_host(url))
        .unwrap_or_else(|| DEFAULT_NAME.to_string())
}

pub fn from_content_disposition(value: &str) -> Option<String> {
    value.split(';').map(str::trim).find_map(|param| {
        let (key, raw) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        sanitize(raw.trim().trim_matches('"'))
    })
}

fn from_url_path(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()
        .and_then(|segment| sanitize(&percent_decode_str(segment).decode_utf8_lossy()))
}

fn from_host(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let name: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    let name = name.trim_matches('_');
    (!name.is_empty()).then(|| name.to_string())
}

// Keeps the last path component and drops names that would escape the folder.
fn sanitize(name: &str) -> Option<String> {
    let name = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." || name.chars().any(char::is_control) {
        return None;
    }
    Some(name.to_string())
}

/// Destination names tried in order: the bare name, a timestamped variant,
/// then numbered timestamped variants up to `max_suffix`.
pub fn candidates(name: &str, now: &DateTime<Utc>, max_suffix: u32) -> Vec<String> {
    let (stem, extension) = match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    };
    let timestamp = now.format(TIMESTAMP_FORMAT);

    let mut names = vec![
        name.to_string(),
        format!("{}_{}{}", stem, timestamp, extension),
    ];
    names.extend((1..=max_suffix).map(|n| format!("{}_{}_({}){}", stem, timestamp, n, extension)));
    names
}

/// Creates the first candidate that does not exist yet in `folder`.
pub async fn create_unique(
    folder: &Path,
    name: &str,
    now: &DateTime<Utc>,
    max_suffix: u32,
) -> Result<(PathBuf, File), ProbeError> {
    tokio::fs::create_dir_all(folder)
        .await
        .map_err(|e| ProbeError::FileSystem(format!("{}: {}", folder.display(), e)))?;

    for candidate in candidates(name, now, max_suffix) {
        let path = folder.join(&candidate);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(ProbeError::FileSystem(format!("{}: {}", path.display(), e))),
        }
    }

    Err(ProbeError::FileSystem(format!(
        "no free file name for {} in {}",
        name,
        folder.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_content_disposition_wins() {
        let url = Url::parse("http://example.com/files/archive.zip").unwrap();
        assert_eq!(pick(Some("attachment; filename=\"test.jpg\""), &url), "test.jpg");
        assert_eq!(pick(Some("attachment; FILENAME=plain.txt"), &url), "plain.txt");
    }

    #[test]
    fn test_falls_back_to_url_then_host_then_default() {
        let url = Url::parse("http://example.com/files/archive.zip").unwrap();
        assert_eq!(pick(Some("inline"), &url), "archive.zip");

        let url = Url::parse("http://example.com/").unwrap();
        assert_eq!(pick(None, &url), "example.com");

        let url = Url::parse("file:///").unwrap();
        assert_eq!(pick(None, &url), DEFAULT_NAME);
    }

    #[test]
    fn test_url_segment_is_decoded() {
        let url = Url::parse("http://example.com/files/my%20file.txt").unwrap();
        assert_eq!(pick(None, &url), "my file.txt");

        let url = Url::parse("http://example.com/files/..%2F..%2Fpasswd").unwrap();
        assert_eq!(pick(None, &url), "passwd");
    }

    #[test]
    fn test_names_cannot_escape_folder() {
        assert_eq!(
            from_content_disposition("attachment; filename=\"../../etc/passwd\""),
            Some("passwd".to_string())
        );
        assert_eq!(from_content_disposition("attachment; filename=\"..\""), None);
        assert_eq!(from_content_disposition("attachment; filename=\"\""), None);
    }

    #[test]
    fn test_ipv6_host_is_sanitized() {
        let url = Url::parse("http://[::1]:8080/").unwrap();
        assert_eq!(pick(None, &url), "1");
    }

    #[test]
    fn test_candidates() {
        assert_eq!(
            candidates("test.jpg", &now(), 2),
            vec![
                "test.jpg",
                "test_20240309140507.jpg",
                "test_20240309140507_(1).jpg",
                "test_20240309140507_(2).jpg",
            ]
        );
        assert_eq!(
            candidates("README", &now(), 0),
            vec!["README", "README_20240309140507"]
        );
        assert_eq!(candidates(".profile", &now(), 0)[1], ".profile_20240309140507");
    }

    #[tokio::test]
    async fn test_create_unique_skips_existing_names() {
        let folder = tempfile::tempdir().unwrap();
        std::fs::write(folder.path().join("a.bin"), b"taken").unwrap();
        std::fs::write(folder.path().join("a_20240309140507.bin"), b"taken").unwrap();

        let (path, _file) = create_unique(folder.path(), "a.bin", &now(), 3).await.unwrap();

        assert_eq!(path, folder.path().join("a_20240309140507_(1).bin"));
    }

    #[tokio::test]
    async fn test_create_unique_exhausted() {
        let folder = tempfile::tempdir().unwrap();
        for name in candidates("a.bin", &now(), 1) {
            std::fs::write(folder.path().join(name), b"taken").unwrap();
        }

        let err = create_unique(folder.path(), "a.bin", &now(), 1).await.unwrap_err();

        assert!(matches!(err, ProbeError::FileSystem(_)));
    }
}
