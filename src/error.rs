//! Error types for the edgequake-tables library.
//!
//! Two families of errors reflect two distinct failure modes:
//!
//! * [`TableExtractError`]: **Fatal**: the run cannot proceed at all (the
//!   input cannot be read, a detector could not be reached, the output cannot
//!   be written). Returned as `Err(TableExtractError)` from the top-level
//!   `extract*` functions.
//!
//! * [`ModelError`], [`PageRecognitionError`], [`RefinementError`] and
//!   [`MergeGeometryError`]: **Non-fatal**: one page, one fragment or one
//!   table is affected. These are logged, counted in
//!   [`crate::output::ExtractionSummary`] and the run continues with whatever
//!   could be reconstructed.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-tables library.
#[derive(Debug, Error)]
pub enum TableExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
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

    /// The file exists but is neither a PDF nor a supported raster image.
    #[error("Unsupported document format: '{path}'\nFirst bytes: {magic:?}")]
    UnsupportedFormat { path: PathBuf, magic: [u8; 4] },

    /// The file looked like a supported format but could not be decoded.
    #[error("Failed to read document '{path}': {detail}")]
    DocumentRead { path: PathBuf, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/dir/containing/libpdfium, or install pdfium\n\
system-wide so it can be found on the default library search path.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Detector errors ───────────────────────────────────────────────────
    /// The layout model failed; without regions there is nothing to stitch against.
    #[error("Layout detection failed: {0}")]
    LayoutDetectionFailed(#[source] ModelError),

    /// The table-structure model failed for a batch of pages.
    #[error("Table structure detection failed: {0}")]
    TableDetectionFailed(#[source] ModelError),

    /// A model collaborator could not be constructed.
    #[error("Failed to initialise model backend '{backend}': {detail}")]
    ModelInit { backend: String, detail: String },

    /// The configured reasoning provider is not initialised (missing API key etc.).
    #[error("Reasoning provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure reported by a detection or recognition collaborator.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ModelError {
    /// The accelerator ran out of memory. On the OCR stage this moves the
    /// recognizer into degraded mode for every remaining page.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The request never produced a response (connection refused, timeout).
    #[error("request failed: {0}")]
    Request(String),

    /// The collaborator answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response could not be decoded into predictions.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// `true` when the failure means the accelerated tier should be abandoned.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, ModelError::ResourceExhausted(_))
    }
}

/// A single page whose OCR result was dropped.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageRecognitionError {
    /// The recognition model returned an error for this page.
    #[error("Page {page}: recognition failed: {source}")]
    Model {
        page: usize,
        #[source]
        source: ModelError,
    },

    /// The worker task recognising this page panicked or was cancelled.
    #[error("Page {page}: OCR worker aborted: {detail}")]
    WorkerAborted { page: usize, detail: String },
}

impl PageRecognitionError {
    /// 1-based page the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageRecognitionError::Model { page, .. } => *page,
            PageRecognitionError::WorkerAborted { page, .. } => *page,
        }
    }
}

/// Why a table refinement did not produce a usable result.
///
/// Every variant leads to the identity fallback: the table is emitted exactly
/// as the stitcher produced it.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RefinementError {
    /// Network-level failure (connection, TLS, provider SDK error).
    #[error("request failed: {0}")]
    Request(String),

    /// The call did not complete within `api_timeout_secs`.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The service answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The reply body (or the embedded table JSON) was not valid JSON.
    #[error("reply is not valid JSON: {0}")]
    InvalidReply(String),

    /// The reply JSON did not contain the expected content path.
    #[error("reply is missing expected content: {0}")]
    MissingContent(String),

    /// The refined table JSON did not match the table it was asked about.
    #[error("reply does not match the table schema: {0}")]
    Schema(String),
}

impl RefinementError {
    /// Transport-level failures are worth retrying; malformed replies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            RefinementError::Request(_) | RefinementError::Timeout { .. } => true,
            RefinementError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A table fragment the stitcher could not use.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum MergeGeometryError {
    /// The fragment has no cells, so it has no first or last row.
    #[error("fragment on page {page} has no rows")]
    NoRows { page: usize },

    /// Two cells of the fragment claim the same grid position.
    #[error("fragment on page {page} has duplicate cell ({row_id}, {col_id})")]
    DuplicateCell {
        page: usize,
        row_id: u32,
        col_id: u32,
    },

    /// A cell box is degenerate or not finite.
    #[error("fragment on page {page} has an invalid cell box at row {row_id}")]
    InvalidBox { page: usize, row_id: u32 },

    /// Renumbering the fragment's rows would overflow `u32`.
    #[error("fragment on page {page}: row {row_id} cannot be renumbered without overflow")]
    RowIdOverflow { page: usize, row_id: u32 },
}
