//! Error types for the menu-vision library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`MenuError`] — **Fatal for the current action**: the upload cannot be
//!   rasterised, no credential is available, an export cannot be written.
//!   Returned as `Err(MenuError)` from the top-level functions.
//!
//! * [`ExtractionError`] — **Non-fatal**: a single image produced no items
//!   (API failure, unparseable reply) but the other selected images are still
//!   processed. Stored inside [`crate::output::ImageResult`].
//!
//! * [`ModelError`] — transport-level failure of one vision-model call. The
//!   extraction stage turns it into [`ExtractionError::ApiFailed`] once the
//!   retry policy gives up.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the menu-vision library.
#[derive(Debug, Error)]
pub enum MenuError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Menu file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The upload is not a PDF, JPEG or PNG.
    #[error("Unsupported file type '{mime}'. Upload a PDF, JPEG or PNG menu.")]
    UnsupportedFormat { mime: String },

    // ── Rasterisation errors ──────────────────────────────────────────────
    /// The document could not be opened or decoded.
    #[error("'{name}' could not be read: {detail}")]
    CorruptDocument { name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{name}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{name}'")]
    WrongPassword { name: String },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterizationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/dir-containing-libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// The document rendered to zero images.
    #[error("'{name}' contains no pages")]
    EmptyDocument { name: String },

    /// The image selection matched none of the session's images.
    #[error("No images selected (the upload has {total} images)")]
    NothingSelected { total: usize },

    // ── Model errors ──────────────────────────────────────────────────────
    /// No API key was supplied for the session.
    #[error("No API key supplied.\nEnter your OpenAI API key (or set OPENAI_API_KEY) to continue.")]
    MissingCredential,

    /// The configured provider could not be initialised.
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Session / I/O errors ──────────────────────────────────────────────
    /// The session workspace could not be created, written or removed.
    #[error("Workspace error at '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The session has no uploaded images yet.
    #[error("Nothing uploaded yet. Upload a menu first.")]
    NoUpload,

    /// The session has not produced any extraction results yet.
    #[error("No extracted menu items yet. Process at least one image first.")]
    NoResults,

    /// Could not create or write an export file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Export / editing errors ───────────────────────────────────────────
    /// CSV serialisation failed.
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialisation failed.
    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A table edit addressed a row or column that does not exist.
    #[error("No cell at row {row}, column '{column}'")]
    CellOutOfRange { row: usize, column: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single image.
///
/// The image contributes zero menu items; the remaining selected images are
/// still processed.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ExtractionError {
    /// The image file could not be read or encoded.
    #[error("Image {image}: could not be read: {detail}")]
    ImageUnreadable { image: usize, detail: String },

    /// The vision-model call failed (auth, timeout, rate limit, HTTP error).
    #[error("Image {image}: model call failed after {retries} retries: {detail}")]
    ApiFailed {
        image: usize,
        retries: u32,
        detail: String,
    },

    /// The reply contained a `[...]` span that is not a valid item array.
    #[error("Image {image}: failed to parse JSON from the model reply: {detail}")]
    ParseFailed { image: usize, detail: String },

    /// An item's `prices` and `priceLabels` have different lengths.
    #[error("Image {image}: item '{item}' has {prices} prices but {labels} price labels")]
    MalformedRecord {
        image: usize,
        item: String,
        prices: usize,
        labels: usize,
    },
}

impl ExtractionError {
    /// 1-based index of the image the error belongs to.
    pub fn image(&self) -> usize {
        match self {
            ExtractionError::ImageUnreadable { image, .. }
            | ExtractionError::ApiFailed { image, .. }
            | ExtractionError::ParseFailed { image, .. }
            | ExtractionError::MalformedRecord { image, .. } => *image,
        }
    }
}

/// Failure of a single vision-model request.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// 401/403 — retrying will not help.
    #[error("authentication rejected by '{provider}': {detail}")]
    Auth { provider: String, detail: String },

    /// 429 — the caller may back off and retry.
    #[error("rate limit exceeded for '{provider}'")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// The request exceeded the configured timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Any other non-success HTTP status.
    #[error("HTTP {status} from '{provider}': {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    /// Connection or protocol failure before a status was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response had no message content.
    #[error("response from '{provider}' contained no message content")]
    EmptyResponse { provider: String },

    /// Error reported by an `edgequake-llm` provider.
    #[error("{0}")]
    Provider(String),
}

impl ModelError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::RateLimited { .. }
            | ModelError::Timeout { .. }
            | ModelError::Transport(_) => true,
            ModelError::Http { status, .. } => *status >= 500,
            ModelError::Auth { .. } | ModelError::EmptyResponse { .. } => false,
            ModelError::Provider(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_display() {
        let e = MenuError::UnsupportedFormat {
            mime: "text/plain".into(),
        };
        assert!(e.to_string().contains("text/plain"));
    }

    #[test]
    fn malformed_record_display() {
        let e = ExtractionError::MalformedRecord {
            image: 2,
            item: "Dal".into(),
            prices: 2,
            labels: 1,
        };
        let msg = e.to_string();
        assert!(msg.contains("Image 2"), "got: {msg}");
        assert!(msg.contains("'Dal'"), "got: {msg}");
        assert_eq!(e.image(), 2);
    }

    #[test]
    fn api_failed_display() {
        let e = ExtractionError::ApiFailed {
            image: 3,
            retries: 0,
            detail: "HTTP 500".into(),
        };
        assert!(e.to_string().contains("HTTP 500"));
    }

    #[test]
    fn retryable_classification() {
        assert!(ModelError::Timeout { secs: 60 }.is_retryable());
        assert!(ModelError::RateLimited {
            provider: "openai".into(),
            retry_after_secs: None
        }
        .is_retryable());
        assert!(ModelError::Http {
            provider: "openai".into(),
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!ModelError::Http {
            provider: "openai".into(),
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!ModelError::Auth {
            provider: "openai".into(),
            detail: "bad key".into()
        }
        .is_retryable());
    }
}
