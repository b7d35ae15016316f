//! Input resolution: normalise a user-supplied path or URL to a local file
//! and decide whether it is a PDF or a raster image.
//!
//! Downloads land in a `TempDir` owned by [`ResolvedInput`], so the file is
//! removed when the run finishes, even on panic. Format detection uses magic
//! bytes, not the file extension.

use crate::error::TableExtractError;
use crate::output::DocumentKind;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input: either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local { path: PathBuf, kind: DocumentKind },
    /// Input was a URL; the document was downloaded to a temp directory
    /// that lives as long as this value.
    Downloaded {
        path: PathBuf,
        kind: DocumentKind,
        _temp_dir: TempDir,
    },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local { path, .. } => path,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            ResolvedInput::Local { kind, .. } => *kind,
            ResolvedInput::Downloaded { kind, .. } => *kind,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Classify a document by its first bytes.
pub fn sniff_kind(magic: &[u8]) -> Option<DocumentKind> {
    if magic.starts_with(b"%PDF") {
        Some(DocumentKind::Pdf)
    } else if magic.starts_with(b"\x89PNG")
        || magic.starts_with(&[0xFF, 0xD8, 0xFF])
        || magic.starts_with(b"II*\0")
        || magic.starts_with(b"MM\0*")
    {
        Some(DocumentKind::Image)
    } else {
        None
    }
}

fn magic_of(bytes: &[u8]) -> [u8; 4] {
    let mut magic = [0u8; 4];
    let n = bytes.len().min(4);
    magic[..n].copy_from_slice(&bytes[..n]);
    magic
}

/// Resolve the input string to a local document path.
pub async fn resolve_input(
    input: &str,
    timeout_secs: u64,
) -> Result<ResolvedInput, TableExtractError> {
    if input.trim().is_empty() {
        return Err(TableExtractError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Resolve a local file path, validating existence and format.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, TableExtractError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(TableExtractError::FileNotFound { path });
    }

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(TableExtractError::PermissionDenied { path });
        }
        Err(e) => {
            return Err(TableExtractError::DocumentRead {
                path,
                detail: e.to_string(),
            });
        }
    };

    let mut head = Vec::with_capacity(4);
    file.by_ref()
        .take(4)
        .read_to_end(&mut head)
        .map_err(|e| TableExtractError::DocumentRead {
            path: path.clone(),
            detail: e.to_string(),
        })?;

    let kind = sniff_kind(&head).ok_or_else(|| TableExtractError::UnsupportedFormat {
        path: path.clone(),
        magic: magic_of(&head),
    })?;

    debug!("Resolved local {:?}: {}", kind, path.display());
    Ok(ResolvedInput::Local { path, kind })
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, TableExtractError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| TableExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            TableExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            TableExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(TableExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| TableExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let temp_dir = TempDir::new().map_err(|e| TableExtractError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url));

    let kind = sniff_kind(&bytes).ok_or_else(|| TableExtractError::UnsupportedFormat {
        path: file_path.clone(),
        magic: magic_of(&bytes),
    })?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| TableExtractError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        kind,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL if it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn sniffs_known_formats() {
        assert_eq!(sniff_kind(b"%PDF-1.7"), Some(DocumentKind::Pdf));
        assert_eq!(sniff_kind(b"\x89PNG\r\n"), Some(DocumentKind::Image));
        assert_eq!(sniff_kind(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(DocumentKind::Image));
        assert_eq!(sniff_kind(b"PK\x03\x04"), None);
        assert_eq!(sniff_kind(b""), None);
    }

    #[test]
    fn filename_from_url_falls_back() {
        assert_eq!(filename_from_url("https://x.org/a/rates.pdf"), "rates.pdf");
        assert_eq!(filename_from_url("https://x.org/a/"), "downloaded");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.err().unwrap();
        assert!(matches!(err, TableExtractError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn unsupported_format_is_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"PK\x03\x04 not a pdf").unwrap();
        let err = resolve_input(tmp.path().to_str().unwrap(), 5).await.err().unwrap();
        assert!(matches!(err, TableExtractError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn local_pdf_is_resolved() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"%PDF-1.4\n").unwrap();
        let resolved = resolve_input(tmp.path().to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.kind(), DocumentKind::Pdf);
        assert_eq!(resolved.path(), tmp.path());
    }
}
