//! Input resolution: turn a browser upload, a local path or a URL into an
//! [`Upload`] whose type is on the allow-list.
//!
//! The allow-list is checked before any bytes reach the rasteriser, so a
//! `text/plain` upload is rejected without ever touching pdfium.

use crate::error::MenuError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Upload types the rasteriser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Pdf,
    Jpeg,
    Png,
}

impl MediaType {
    /// Map a MIME type onto the allow-list (`application/pdf`, `image/jpeg`,
    /// `image/jpg`, `image/png`). Parameters such as `; charset=` are ignored.
    pub fn from_mime(mime: &str) -> Result<Self, MenuError> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => Ok(MediaType::Pdf),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Ok(MediaType::Jpeg),
            "image/png" => Ok(MediaType::Png),
            _ => Err(MenuError::UnsupportedFormat {
                mime: mime.to_string(),
            }),
        }
    }

    /// Guess from a file extension (`pdf`, `jpg`, `jpeg`, `png`).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(MediaType::Pdf),
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "png" => Some(MediaType::Png),
            _ => None,
        }
    }

    /// Identify the type from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(MediaType::Pdf)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(MediaType::Jpeg)
        } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(MediaType::Png)
        } else {
            None
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            MediaType::Pdf => "application/pdf",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
        }
    }
}

/// A file accepted at the upload boundary.
#[derive(Clone)]
pub struct Upload {
    pub file_name: String,
    pub media_type: MediaType,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("file_name", &self.file_name)
            .field("media_type", &self.media_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl Upload {
    /// Accept an upload whose MIME type was declared by the client.
    pub fn new(
        file_name: impl Into<String>,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<Self, MenuError> {
        let media_type = MediaType::from_mime(mime)?;
        Ok(Self {
            file_name: file_name.into(),
            media_type,
            bytes,
        })
    }

    /// Accept bytes whose type is inferred from the name, then the content.
    pub fn detect(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, MenuError> {
        let file_name = file_name.into();
        let sniffed = MediaType::sniff(&bytes);
        let media_type = match (MediaType::from_file_name(&file_name), sniffed) {
            (Some(MediaType::Pdf), Some(MediaType::Pdf)) | (None, Some(MediaType::Pdf)) => {
                MediaType::Pdf
            }
            (Some(MediaType::Pdf), _) => {
                return Err(MenuError::CorruptDocument {
                    name: file_name,
                    detail: format!("missing %PDF header, first bytes: {:?}", magic(&bytes)),
                })
            }
            (_, Some(found)) => found,
            (Some(ext), None) => ext,
            (None, None) => {
                return Err(MenuError::UnsupportedFormat {
                    mime: format!("unknown type of '{file_name}'"),
                })
            }
        };
        Ok(Self {
            file_name,
            media_type,
            bytes,
        })
    }
}

fn magic(bytes: &[u8]) -> &[u8] {
    &bytes[..bytes.len().min(4)]
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a local file or download a URL into an [`Upload`].
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Upload, MenuError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<Upload, MenuError> {
    if path_str.trim().is_empty() {
        return Err(MenuError::InvalidInput {
            input: path_str.to_string(),
        });
    }
    let path = PathBuf::from(path_str);

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(MenuError::PermissionDenied { path });
        }
        Err(_) => return Err(MenuError::FileNotFound { path }),
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.to_string());
    debug!("Read local upload: {} ({} bytes)", path.display(), bytes.len());
    Upload::detect(file_name, bytes)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Upload, MenuError> {
    info!("Downloading menu from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| MenuError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            MenuError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            MenuError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(MenuError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let declared = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| MediaType::from_mime(v).ok());
    let file_name = file_name_from_url(url);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| MenuError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?
        .to_vec();

    info!("Downloaded {} bytes", bytes.len());

    match declared {
        Some(media_type) if MediaType::sniff(&bytes).map_or(true, |s| s == media_type) => {
            Ok(Upload {
                file_name,
                media_type,
                bytes,
            })
        }
        _ => Upload::detect(file_name, bytes),
    }
}

/// Last non-empty path segment of the URL, or `download`.
fn file_name_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_accepts_menu_types() {
        assert_eq!(MediaType::from_mime("application/pdf").unwrap(), MediaType::Pdf);
        assert_eq!(MediaType::from_mime("image/jpg").unwrap(), MediaType::Jpeg);
        assert_eq!(MediaType::from_mime("IMAGE/JPEG").unwrap(), MediaType::Jpeg);
        assert_eq!(
            MediaType::from_mime("image/png; charset=binary").unwrap(),
            MediaType::Png
        );
    }

    #[test]
    fn allow_list_rejects_text_plain() {
        let err = Upload::new("menu.txt", "text/plain", b"Tea 10".to_vec()).unwrap_err();
        assert!(matches!(err, MenuError::UnsupportedFormat { ref mime } if mime == "text/plain"));
    }

    #[test]
    fn detect_prefers_content_over_misleading_extension() {
        let png = b"\x89PNG\r\n\x1a\n rest".to_vec();
        let upload = Upload::detect("photo.jpg", png).unwrap();
        assert_eq!(upload.media_type, MediaType::Png);
    }

    #[test]
    fn detect_rejects_fake_pdf() {
        let err = Upload::detect("menu.pdf", b"hello".to_vec()).unwrap_err();
        assert!(matches!(err, MenuError::CorruptDocument { .. }));
    }

    #[test]
    fn detect_rejects_unknown() {
        let err = Upload::detect("notes", b"hello".to_vec()).unwrap_err();
        assert!(matches!(err, MenuError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/menu.pdf"));
        assert!(is_url("http://example.com/menu.pdf"));
        assert!(!is_url("/tmp/menu.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn url_file_names() {
        assert_eq!(file_name_from_url("https://x.test/a/menu.pdf"), "menu.pdf");
        assert_eq!(file_name_from_url("https://x.test/"), "download");
    }

    #[tokio::test]
    async fn missing_local_file() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, MenuError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn local_png_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("menu.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\n....").unwrap();
        let upload = resolve_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(upload.file_name, "menu.png");
        assert_eq!(upload.media_type, MediaType::Png);
    }
}
