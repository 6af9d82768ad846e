//! Progress-callback trait for run events.
//!
//! Inject an [`Arc<dyn ScrapeProgressCallback>`] via
//! [`crate::config::ScrapeConfigBuilder::progress_callback`] to receive
//! events as the pipeline fetches pages, assembles the document and hands it
//! to the relay. The library never prints; where events end up (terminal,
//! log file, nowhere) is the host's business.
//!
//! # Example
//!
//! ```rust
//! use viewer2pdf::{ScrapeConfig, ScrapeProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     saved: AtomicUsize,
//! }
//!
//! impl ScrapeProgressCallback for CountingCallback {
//!     fn on_page_saved(&self, module_id: &str, page: u32, bytes: u64) {
//!         self.saved.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{module_id} page {page}: {bytes} bytes");
//!     }
//! }
//!
//! let config = ScrapeConfig::builder()
//!     .base_url("https://viewer.example.com/view.php")
//!     .session_id("abc")
//!     .output_name("doc")
//!     .progress_callback(Arc::new(CountingCallback { saved: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ModuleEnd;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Called by the pipeline as a run progresses.
///
/// Implementations must be `Send + Sync`: assembly runs on a blocking worker
/// thread and reports from there. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait ScrapeProgressCallback: Send + Sync {
    /// Called once before the first module is fetched.
    fn on_run_start(&self, modules: usize, page_budget: u32) {
        let _ = (modules, page_budget);
    }

    /// Called before the first page request of a module.
    ///
    /// `index` is 1-based.
    fn on_module_start(&self, module_id: &str, index: usize, total: usize) {
        let _ = (module_id, index, total);
    }

    /// A page was accepted and written to the scratch directory.
    fn on_page_saved(&self, module_id: &str, page: u32, bytes: u64) {
        let _ = (module_id, page, bytes);
    }

    /// A page attempt failed at the transport level.
    ///
    /// `consecutive` counts failures in a row within the module, this one included.
    fn on_page_failed(&self, module_id: &str, page: u32, consecutive: u32, error: &str) {
        let _ = (module_id, page, consecutive, error);
    }

    /// A module's scan ended.
    fn on_module_complete(&self, module_id: &str, pages: usize, end: &ModuleEnd) {
        let _ = (module_id, pages, end);
    }

    /// The fetch phase finished for every module.
    fn on_download_complete(&self, total_files: usize, elapsed: Duration) {
        let _ = (total_files, elapsed);
    }

    /// Called once before the first image is placed.
    fn on_assembly_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// An input file has been attempted (placed or skipped). `index` is 1-based.
    fn on_assembly_page(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// An input file could not be decoded and was left out of the document.
    fn on_image_skipped(&self, path: &Path, reason: &str) {
        let _ = (path, reason);
    }

    /// The document was written.
    fn on_assembly_complete(&self, pages: usize, output: &Path) {
        let _ = (pages, output);
    }

    /// The document is about to be uploaded to the relay.
    fn on_delivery_start(&self, recipient: &str, bytes: u64) {
        let _ = (recipient, bytes);
    }

    fn on_delivery_complete(&self, recipient: &str) {
        let _ = recipient;
    }

    fn on_delivery_error(&self, recipient: &str, error: &str) {
        let _ = (recipient, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ScrapeProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ScrapeConfig`].
pub type ProgressCallback = Arc<dyn ScrapeProgressCallback>;
