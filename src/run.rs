//! Run entry points: fetch every module, assemble one PDF, optionally deliver.
//!
//! [`run`] wires the HTTP implementations from the config. [`run_with`] takes
//! the fetcher and delivery sink as arguments so hosts and tests can swap
//! either one out.
//!
//! `scratch_dir` is a parent directory. Each run downloads into its own
//! `run-*` subdirectory there and only ever removes that subdirectory, plus
//! the parent when the run created it and it is empty again.

use crate::config::ScrapeConfig;
use crate::error::ScrapeError;
use crate::output::{DeliveryStatus, DocumentSet, RunSummary};
use crate::pipeline::assemble::PdfAssembler;
use crate::pipeline::deliver::{Delivery, DeliverySink, RelaySink};
use crate::pipeline::fetch::{HttpPageFetcher, PageFetcher};
use crate::pipeline::scan::DocumentSetScanner;
use std::path::Path;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Scrape, assemble and (when configured) deliver using the HTTP backends.
///
/// # Errors
/// Returns `Err(ScrapeError)` only when no document can be produced:
/// - the HTTP client or scratch directory cannot be set up
/// - no page was downloaded from any module
/// - the PDF could not be assembled
///
/// A failed delivery is not an error; see [`RunSummary::delivery`].
pub async fn run(config: &ScrapeConfig) -> Result<RunSummary, ScrapeError> {
    let fetcher = HttpPageFetcher::new(config)?;
    let sink = match &config.delivery {
        Some(delivery) => Some(
            RelaySink::new(delivery.clone(), config.delivery_timeout_secs)
                .map_err(|e| ScrapeError::HttpClient(e.to_string()))?,
        ),
        None => None,
    };
    run_with(config, &fetcher, sink.as_ref().map(|s| s as &dyn DeliverySink)).await
}

/// Run the pipeline with a caller-supplied fetcher and delivery sink.
///
/// Delivery happens only when both `config.delivery` and `sink` are set.
pub async fn run_with<F>(
    config: &ScrapeConfig,
    fetcher: &F,
    sink: Option<&dyn DeliverySink>,
) -> Result<RunSummary, ScrapeError>
where
    F: PageFetcher + ?Sized,
{
    let total_start = Instant::now();
    let parent = config.scratch_dir.as_path();
    let parent_existed = tokio::fs::try_exists(parent).await.unwrap_or(true);

    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| ScrapeError::ScratchDir {
            path: parent.to_path_buf(),
            source,
        })?;
    let run_dir = tempfile::Builder::new()
        .prefix("run-")
        .tempdir_in(parent)
        .map_err(|source| ScrapeError::ScratchDir {
            path: parent.to_path_buf(),
            source,
        })?;
    let scratch = run_dir.path().to_path_buf();
    debug!("Scratch directory: {}", scratch.display());

    // ── Fetch ────────────────────────────────────────────────────────────
    info!(
        "Fetching {} module(s), up to {} pages each",
        config.module_ids.len(),
        config.max_pages
    );
    let download_start = Instant::now();
    let scanner = DocumentSetScanner::new(fetcher, config, &scratch);
    let modules = scanner.scan_all(&config.module_ids, config.max_pages).await;
    let set = DocumentSet::from_modules(&config.module_ids, &modules);
    let download_elapsed = download_start.elapsed();

    info!(
        "Downloaded {} page image(s) in {:.1}s",
        set.len(),
        download_elapsed.as_secs_f64()
    );
    if let Some(cb) = &config.progress_callback {
        cb.on_download_complete(set.len(), download_elapsed);
    }

    if set.is_empty() {
        remove_scratch(run_dir, parent, parent_existed).await;
        return Err(ScrapeError::NoPagesDownloaded {
            modules: modules.len(),
        });
    }
    let downloaded_files = set.len();

    // ── Assemble ─────────────────────────────────────────────────────────
    let output_path = config.output_path();
    let assembler = PdfAssembler::default()
        .with_title(config.output_name.clone())
        .with_progress(config.progress_callback.clone());
    let files = set.into_files();
    let target = output_path.clone();
    let assembled = tokio::task::spawn_blocking(move || assembler.assemble(&files, &target))
        .await
        .map_err(|e| ScrapeError::Internal(format!("Assembly task failed: {e}")))?;
    let assembly = match assembled {
        Ok(report) => report,
        Err(e) => {
            let kept = run_dir.keep();
            warn!("Assembly failed; downloaded pages kept in {}", kept.display());
            return Err(e.into());
        }
    };

    info!(
        "PDF written: {} ({} pages)",
        assembly.output_path.display(),
        assembly.pages_written
    );
    remove_scratch(run_dir, parent, parent_existed).await;

    // ── Deliver ──────────────────────────────────────────────────────────
    let delivery = match (&config.delivery, sink) {
        (Some(settings), Some(sink)) => {
            let request = Delivery {
                file_path: output_path,
                recipient: settings.recipient.clone(),
                display_name: config.output_name.clone(),
            };
            deliver(config, sink, &request).await
        }
        _ => DeliveryStatus::NotConfigured,
    };

    Ok(RunSummary {
        modules,
        downloaded_files,
        assembly,
        delivery,
        download_duration_ms: download_elapsed.as_millis() as u64,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    })
}

/// Blocking wrapper around [`run`] for callers without a tokio runtime.
pub fn run_sync(config: &ScrapeConfig) -> Result<RunSummary, ScrapeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ScrapeError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(run(config))
}

async fn deliver(
    config: &ScrapeConfig,
    sink: &dyn DeliverySink,
    request: &Delivery,
) -> DeliveryStatus {
    let progress = config.progress_callback.as_ref();
    let bytes = tokio::fs::metadata(&request.file_path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    info!("Sending {} to {}", request.file_path.display(), request.recipient);
    if let Some(cb) = progress {
        cb.on_delivery_start(&request.recipient, bytes);
    }

    match sink.deliver(request).await {
        Ok(()) => {
            info!("Delivered to {}", request.recipient);
            if let Some(cb) = progress {
                cb.on_delivery_complete(&request.recipient);
            }
            DeliveryStatus::Delivered {
                recipient: request.recipient.clone(),
            }
        }
        Err(e) => {
            let error = e.to_string();
            warn!("Delivery to {} failed: {}", request.recipient, error);
            if let Some(cb) = progress {
                cb.on_delivery_error(&request.recipient, &error);
            }
            DeliveryStatus::Failed {
                recipient: request.recipient.clone(),
                error,
            }
        }
    }
}

/// Remove this run's subdirectory, then `parent` if the run created it and
/// nothing else lives there.
async fn remove_scratch(run_dir: TempDir, parent: &Path, parent_existed: bool) {
    let dir = run_dir.keep();
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => debug!("Removed scratch directory {}", dir.display()),
        Err(e) => warn!("Could not remove scratch directory {}: {}", dir.display(), e),
    }
    if !parent_existed {
        // Fails when the directory is not empty.
        if let Err(e) = tokio::fs::remove_dir(parent).await {
            debug!("Keeping {}: {}", parent.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AssemblyError, DeliveryError};
    use crate::pipeline::fetch::{FetchOutcome, FetchRequest, StopReason};
    use crate::progress::ScrapeProgressCallback;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Writes a real JPEG for the first `pages` pages of each listed module.
    struct DiskFetcher {
        pages: Vec<(String, u32)>,
        corrupt: bool,
    }

    #[async_trait]
    impl PageFetcher for DiskFetcher {
        async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
            let Some((_, n)) = self.pages.iter().find(|(m, _)| *m == request.module_id) else {
                return FetchOutcome::Stop(StopReason::NotFound);
            };
            if request.page_number > *n {
                return FetchOutcome::Stop(StopReason::NotFound);
            }
            let path = request.destination.clone();
            if self.corrupt {
                std::fs::write(&path, vec![0x42u8; 4096]).unwrap();
            } else {
                RgbImage::from_pixel(40, 60, Rgb([200, 10, 10]))
                    .save_with_format(&path, image::ImageFormat::Jpeg)
                    .unwrap();
            }
            FetchOutcome::Accepted { bytes: 4096, path }
        }
    }

    struct RecordingSink {
        seen: Mutex<Vec<Delivery>>,
        fail: bool,
    }

    #[async_trait]
    impl DeliverySink for RecordingSink {
        async fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
            self.seen.lock().unwrap().push(delivery.clone());
            if self.fail {
                Err(DeliveryError::Rejected {
                    status: 500,
                    body: "session not found".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl ScrapeProgressCallback for Events {
        fn on_download_complete(&self, total_files: usize, _elapsed: Duration) {
            self.0.lock().unwrap().push(format!("downloaded:{total_files}"));
        }
        fn on_delivery_start(&self, recipient: &str, _bytes: u64) {
            self.0.lock().unwrap().push(format!("send:{recipient}"));
        }
        fn on_delivery_error(&self, recipient: &str, _error: &str) {
            self.0.lock().unwrap().push(format!("send-failed:{recipient}"));
        }
    }

    fn config(dir: &TempDir, modules: &[&str]) -> ScrapeConfig {
        ScrapeConfig::builder()
            .base_url("http://viewer/view.php")
            .session_id("tok")
            .output_name("Course")
            .output_dir(dir.path())
            .scratch_dir(dir.path().join("scratch"))
            .module_ids(modules.iter().copied())
            .request_delay(Duration::ZERO)
            .module_pause(Duration::ZERO)
            .delivery(crate::config::DeliveryConfig::from_parts(
                Some("http://relay".into()),
                Some("key".into()),
                Some("default".into()),
                Some("628123".into()),
            ))
            .build()
            .unwrap()
    }

    fn fetcher(pages: &[(&str, u32)]) -> DiskFetcher {
        DiskFetcher {
            pages: pages.iter().map(|(m, n)| (m.to_string(), *n)).collect(),
            corrupt: false,
        }
    }

    #[tokio::test]
    async fn produces_pdf_and_removes_scratch() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["M1", "M2", "M3"]);
        let fetcher = fetcher(&[("M1", 2), ("M3", 1)]);

        let summary = run_with(&cfg, &fetcher, None).await.unwrap();

        assert_eq!(summary.downloaded_files, 3);
        assert_eq!(summary.modules.len(), 3);
        assert_eq!(summary.assembly.pages_written, 3);
        assert_eq!(summary.delivery, DeliveryStatus::NotConfigured);
        assert!(dir.path().join("Course.pdf").exists());
        assert!(!cfg.scratch_dir.exists());
    }

    #[tokio::test]
    async fn nothing_downloaded_is_fatal_and_leaves_no_scratch() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["M1", "M2"]);
        let fetcher = fetcher(&[]);

        let err = run_with(&cfg, &fetcher, None).await.unwrap_err();
        assert!(
            matches!(err, ScrapeError::NoPagesDownloaded { modules: 2 }),
            "got: {err:?}"
        );
        assert!(!cfg.scratch_dir.exists());
        assert!(!dir.path().join("Course.pdf").exists());
    }

    #[tokio::test]
    async fn assembly_failure_keeps_scratch_for_inspection() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, &["M1"]);
        let mut fetcher = fetcher(&[("M1", 2)]);
        fetcher.corrupt = true;

        let err = run_with(&cfg, &fetcher, None).await.unwrap_err();
        assert!(matches!(
            err,
            ScrapeError::Assembly(AssemblyError::NoDecodablePages { attempted: 2 })
        ));
        let run_dirs = subdirs(&cfg.scratch_dir);
        assert_eq!(run_dirs.len(), 1);
        assert!(run_dirs[0].join("M1_page_001.jpg").exists());
        assert!(run_dirs[0].join("M1_page_002.jpg").exists());
    }

    fn subdirs(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_dir())
            .collect()
    }

    #[tokio::test]
    async fn existing_scratch_contents_survive_every_outcome() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, &["M1"]);
        cfg.scratch_dir = dir.path().to_path_buf();
        let thesis = dir.path().join("thesis.docx");
        std::fs::write(&thesis, b"chapter one").unwrap();
        std::fs::create_dir(dir.path().join("notes")).unwrap();

        let err = run_with(&cfg, &fetcher(&[]), None).await.unwrap_err();
        assert!(matches!(err, ScrapeError::NoPagesDownloaded { .. }));
        assert_eq!(std::fs::read(&thesis).unwrap(), b"chapter one");

        run_with(&cfg, &fetcher(&[("M1", 2)]), None).await.unwrap();
        assert_eq!(std::fs::read(&thesis).unwrap(), b"chapter one");
        assert!(dir.path().join("notes").is_dir());
        assert!(dir.path().join("Course.pdf").exists());
        // Only the pre-existing subdirectory is left.
        assert_eq!(subdirs(dir.path()), [dir.path().join("notes")]);
    }

    #[tokio::test]
    async fn delivers_output_under_its_display_name() {
        let dir = TempDir::new().unwrap();
        let events = Arc::new(Events::default());
        let mut cfg = config(&dir, &["M1"]);
        cfg.progress_callback = Some(events.clone() as Arc<dyn ScrapeProgressCallback>);
        let fetcher = fetcher(&[("M1", 1)]);
        let sink = RecordingSink {
            seen: Mutex::new(Vec::new()),
            fail: false,
        };

        let summary = run_with(&cfg, &fetcher, Some(&sink)).await.unwrap();

        assert_eq!(
            summary.delivery,
            DeliveryStatus::Delivered {
                recipient: "628123".into()
            }
        );
        let seen = sink.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].file_path, dir.path().join("Course.pdf"));
        assert_eq!(seen[0].display_name, "Course");
        assert_eq!(
            *events.0.lock().unwrap(),
            ["downloaded:1", "send:628123"]
        );
    }

    #[tokio::test]
    async fn failed_delivery_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let events = Arc::new(Events::default());
        let mut cfg = config(&dir, &["M1"]);
        cfg.progress_callback = Some(events.clone() as Arc<dyn ScrapeProgressCallback>);
        let fetcher = fetcher(&[("M1", 1)]);
        let sink = RecordingSink {
            seen: Mutex::new(Vec::new()),
            fail: true,
        };

        let summary = run_with(&cfg, &fetcher, Some(&sink)).await.unwrap();

        match &summary.delivery {
            DeliveryStatus::Failed { recipient, error } => {
                assert_eq!(recipient, "628123");
                assert!(error.contains("500"), "got: {error}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(dir.path().join("Course.pdf").exists());
        assert!(events
            .0
            .lock()
            .unwrap()
            .contains(&"send-failed:628123".to_string()));
    }

    #[tokio::test]
    async fn sink_without_delivery_settings_is_not_used() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir, &["M1"]);
        cfg.delivery = None;
        let fetcher = fetcher(&[("M1", 1)]);
        let sink = RecordingSink {
            seen: Mutex::new(Vec::new()),
            fail: false,
        };

        let summary = run_with(&cfg, &fetcher, Some(&sink)).await.unwrap();
        assert_eq!(summary.delivery, DeliveryStatus::NotConfigured);
        assert!(sink.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unusable_scratch_dir_is_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let mut cfg = config(&dir, &["M1"]);
        cfg.scratch_dir = blocker.join("scratch");
        let fetcher = fetcher(&[("M1", 1)]);

        let err = run_with(&cfg, &fetcher, None).await.unwrap_err();
        assert!(matches!(err, ScrapeError::ScratchDir { .. }), "got: {err:?}");
    }
}
