//! # viewer2pdf
//!
//! Download the page images of a document from a session-authenticated web
//! viewer and bind them into a single A4 PDF, optionally relaying the result
//! through a messaging API.
//!
//! ## Why this crate?
//!
//! Some document viewers only ever serve one rendered page at a time, as a
//! JPEG behind a session cookie, with no way to download the whole document.
//! This crate walks the viewer page by page until it signals the end,
//! keeps every page image it gets, and lays each one onto its own PDF page
//! without recompressing it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! viewer (HTTP, PHPSESSID cookie)
//!  │
//!  ├─ 1. Fetch     GET each page, classify: accepted / retryable / stop
//!  ├─ 2. Scan      pages 1..N per module, modules M1..M9 in order, paced
//!  ├─ 3. Assemble  one A4 page per image, JPEG embedded as-is (spawn_blocking)
//!  └─ 4. Deliver   stream the PDF to the relay as multipart (optional)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use viewer2pdf::{run, ScrapeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScrapeConfig::builder()
//!         .base_url("https://viewer.example.com/view.php")
//!         .subfolder("course/2024")
//!         .session_id("0123456789abcdef")
//!         .output_name("Course Notes")
//!         .build()?;
//!     let summary = run(&config).await?;
//!     eprintln!(
//!         "{} pages → {}",
//!         summary.assembly.pages_written,
//!         summary.assembly.output_path.display()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `viewer2pdf` binary (clap + anyhow + indicatif + tracing-subscriber + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! viewer2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DeliveryConfig, ScrapeConfig, ScrapeConfigBuilder};
pub use error::{AssemblyError, DeliveryError, ScrapeError};
pub use output::{
    AssemblyReport, DeliveryStatus, DocumentSet, ModuleEnd, ModuleResult, PageFile, RunSummary,
    SkippedImage,
};
pub use pipeline::assemble::PdfAssembler;
pub use pipeline::deliver::{Delivery, DeliverySink, RelaySink};
pub use pipeline::fetch::{FetchOutcome, FetchRequest, HttpPageFetcher, PageFetcher, StopReason};
pub use pipeline::scan::{DocumentSetScanner, ModuleScanner};
pub use progress::{NoopProgressCallback, ProgressCallback, ScrapeProgressCallback};
pub use run::{run, run_sync, run_with};
