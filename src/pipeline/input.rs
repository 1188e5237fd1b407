//! Input resolution: turn a user-supplied path or URL into a [`SourceDocument`].
//!
//! The voter path sends the document bytes straight to the provider, so
//! unlike a rasterising pipeline we only need the bytes and an accurate MIME
//! tag. The MIME tag is taken from the magic bytes when they are
//! recognisable and from the file extension otherwise; anything that is
//! neither a PDF nor a common image format is rejected up front rather than
//! producing five confused voter replies.

use crate::error::Pdf2LatexError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_PNG: &str = "image/png";
pub const MIME_JPEG: &str = "image/jpeg";

/// Immutable document bytes plus MIME tag.
///
/// Cloning is cheap: the bytes are shared, so every voter and the judge can
/// hold the same document without copying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    bytes: Arc<[u8]>,
    mime_type: String,
}

impl SourceDocument {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type == MIME_PDF
    }

    /// Base64 attachment for a multimodal request.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(STANDARD.encode(&self.bytes), self.mime_type.as_str())
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a [`SourceDocument`].
///
/// URLs are downloaded into memory; local paths are read from disk.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<SourceDocument, Pdf2LatexError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input).await
    }
}

/// Infer the MIME type from magic bytes, then from the file extension.
pub fn sniff_mime(bytes: &[u8], name: &str) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF") {
        return Some(MIME_PDF);
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some(MIME_PNG);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(MIME_JPEG);
    }
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "png" => Some(MIME_PNG),
        "jpg" | "jpeg" => Some(MIME_JPEG),
        _ => None,
    }
}

async fn resolve_local(path_str: &str) -> Result<SourceDocument, Pdf2LatexError> {
    let path = PathBuf::from(path_str);

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2LatexError::PermissionDenied { path });
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Pdf2LatexError::FileNotFound { path });
        }
        Err(_) => return Err(Pdf2LatexError::InvalidInput { input: path_str.to_string() }),
    };

    let mime = sniff_mime(&bytes, path_str).ok_or_else(|| Pdf2LatexError::UnsupportedFormat {
        input: path_str.to_string(),
        detail: "expected a PDF, PNG or JPEG file".to_string(),
    })?;

    debug!("Resolved local input: {} ({}, {} bytes)", path.display(), mime, bytes.len());
    Ok(SourceDocument::new(bytes, mime))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<SourceDocument, Pdf2LatexError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Pdf2LatexError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Pdf2LatexError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Pdf2LatexError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Pdf2LatexError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Pdf2LatexError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let mime = sniff_mime(&bytes, url_file_name(url).as_str()).ok_or_else(|| {
        Pdf2LatexError::UnsupportedFormat {
            input: url.to_string(),
            detail: "downloaded content is not a PDF, PNG or JPEG".to_string(),
        }
    })?;

    info!("Downloaded {} bytes ({})", bytes.len(), mime);
    Ok(SourceDocument::new(bytes.to_vec(), mime))
}

/// Last path segment of a URL, used only for extension sniffing.
fn url_file_name(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .unwrap_or_default()
}
