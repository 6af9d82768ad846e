//! Error types for the viewer2pdf library.
//!
//! Three error types reflect the three phases that can fail for real:
//!
//! * [`ScrapeError`]: **fatal**, the run cannot produce a document at all
//!   (bad configuration, scratch directory unusable, nothing downloaded,
//!   assembly failed). Returned as `Err(ScrapeError)` from [`crate::run()`].
//!
//! * [`AssemblyError`]: the PDF could not be written. Wrapped by
//!   [`ScrapeError::Assembly`] when it surfaces from a run.
//!
//! * [`DeliveryError`]: the relay rejected or never received the document.
//!   Never fatal: a finished PDF stays on disk and the failure is recorded in
//!   [`crate::output::DeliveryStatus::Failed`].
//!
//! Fetch-phase problems are not errors at all. They are classified into
//! [`crate::pipeline::fetch::FetchOutcome`] values and absorbed by the scan
//! policy.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by a viewer2pdf run.
#[derive(Debug, Error)]
pub enum ScrapeError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client could not be constructed (TLS backend, bad header value).
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    // ── Filesystem errors ─────────────────────────────────────────────────
    /// The scratch directory for page images could not be created.
    #[error("Cannot create scratch directory '{path}': {source}")]
    ScratchDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Fetch phase ───────────────────────────────────────────────────────
    /// Every module ended without a single accepted page.
    #[error(
        "No page images were downloaded from {modules} module(s).\n\
Likely causes:\n\
  1. The PHPSESSID session credential has expired\n\
  2. The subfolder is wrong\n\
  3. Your IP is temporarily blocked by the viewer"
    )]
    NoPagesDownloaded { modules: usize },

    // ── Assembly phase ────────────────────────────────────────────────────
    /// The PDF could not be assembled or written.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Fatal errors from [`crate::pipeline::assemble::PdfAssembler`].
///
/// A single undecodable image is not one of these; it is skipped and
/// reported in [`crate::output::AssemblyReport::skipped`].
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// None of the input files could be decoded, so there is nothing to write.
    #[error("None of the {attempted} downloaded page images could be decoded")]
    NoDecodablePages { attempted: usize },

    /// lopdf refused to build or serialise the document.
    #[error("PDF construction failed: {detail}")]
    Pdf { detail: String },

    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a [`crate::pipeline::deliver::DeliverySink`].
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The assembled document could not be opened for streaming.
    #[error("Cannot open '{path}' for delivery: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The relay HTTP client or request could not be built.
    #[error("Failed to build relay request: {0}")]
    Client(String),

    /// The request never completed (connection refused, timeout, reset).
    #[error("Relay request failed: {0}")]
    Transport(String),

    /// Reading the document failed while its bytes were being streamed.
    #[error("Streaming the document to the relay failed: {source}")]
    Stream {
        #[source]
        source: std::io::Error,
    },

    /// The relay answered with a non-success status.
    #[error("Relay API error (status {status}): {body}")]
    Rejected { status: u16, body: String },
}
