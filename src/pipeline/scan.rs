//! Scan policy: walk each module's page index until the viewer says stop.
//!
//! Strictly sequential. Pages of a module are requested one after another
//! and modules one after another, with fixed pauses in between, so the load
//! on the viewer stays predictable and the consecutive-failure counter means
//! "this module keeps failing" rather than "the network hiccupped somewhere".

use crate::config::ScrapeConfig;
use crate::output::{DocumentSet, ModuleEnd, ModuleResult, PageFile};
use crate::pipeline::fetch::{FetchOutcome, FetchRequest, PageFetcher};
use crate::progress::ProgressCallback;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Transport failures in a row that end a module.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Drives a [`PageFetcher`] across the pages of one module.
pub struct ModuleScanner<'a, F: PageFetcher + ?Sized> {
    fetcher: &'a F,
    config: &'a ScrapeConfig,
    /// Directory the pages of this run are saved into.
    scratch: &'a Path,
}

impl<'a, F: PageFetcher + ?Sized> ModuleScanner<'a, F> {
    pub fn new(fetcher: &'a F, config: &'a ScrapeConfig, scratch: &'a Path) -> Self {
        Self {
            fetcher,
            config,
            scratch,
        }
    }

    /// Fetch pages `1..=page_budget` of `module_id` until a stop condition.
    ///
    /// - Accepted: keep the file, reset the failure counter, continue.
    /// - Stop: end the module immediately.
    /// - Retryable: count it; at [`MAX_CONSECUTIVE_FAILURES`] end the module,
    ///   otherwise move on to the next page (the failed page is not retried).
    pub async fn scan(&self, module_id: &str, page_budget: u32) -> ModuleResult {
        let progress = self.config.progress_callback.as_ref();
        let mut page_files = Vec::new();
        let mut consecutive: u32 = 0;
        let mut failed_attempts: u32 = 0;

        for page in 1..=page_budget {
            let request = FetchRequest::for_page(self.config, module_id, page, self.scratch);

            match self.fetcher.fetch(&request).await {
                FetchOutcome::Accepted { bytes, path } => {
                    info!("  [OK] {} page {} ({} bytes)", module_id, page, bytes);
                    if let Some(cb) = progress {
                        cb.on_page_saved(module_id, page, bytes);
                    }
                    page_files.push(PageFile { page, path });
                    consecutive = 0;
                }
                FetchOutcome::Stop(reason) => {
                    debug!("{} page {}: {}", module_id, page, reason);
                    info!("  Module {} finished at page {}", module_id, page - 1);
                    return ModuleResult {
                        module_id: module_id.to_string(),
                        page_files,
                        failed_attempts,
                        end: ModuleEnd::Stopped(reason),
                    };
                }
                FetchOutcome::Retryable(error) => {
                    consecutive += 1;
                    failed_attempts += 1;
                    warn!("  [ERROR] {} page {}: {}", module_id, page, error);
                    if let Some(cb) = progress {
                        cb.on_page_failed(module_id, page, consecutive, &error);
                    }
                    if consecutive >= MAX_CONSECUTIVE_FAILURES {
                        warn!(
                            "  {} consecutive errors in {}, moving to the next module",
                            consecutive, module_id
                        );
                        return ModuleResult {
                            module_id: module_id.to_string(),
                            page_files,
                            failed_attempts,
                            end: ModuleEnd::FailureBudget { consecutive },
                        };
                    }
                }
            }

            pause(self.config.request_delay).await;
        }

        ModuleResult {
            module_id: module_id.to_string(),
            page_files,
            failed_attempts,
            end: ModuleEnd::PageBudget {
                budget: page_budget,
            },
        }
    }
}

/// Drives [`ModuleScanner`] across the configured modules.
pub struct DocumentSetScanner<'a, F: PageFetcher + ?Sized> {
    modules: ModuleScanner<'a, F>,
    config: &'a ScrapeConfig,
}

impl<'a, F: PageFetcher + ?Sized> DocumentSetScanner<'a, F> {
    pub fn new(fetcher: &'a F, config: &'a ScrapeConfig, scratch: &'a Path) -> Self {
        Self {
            modules: ModuleScanner::new(fetcher, config, scratch),
            config,
        }
    }

    /// Scan every module in order, never skipping one because a previous
    /// module came back empty. Returns the per-module results in order.
    pub async fn scan_all(&self, module_ids: &[String], page_budget: u32) -> Vec<ModuleResult> {
        let progress: Option<&ProgressCallback> = self.config.progress_callback.as_ref();
        if let Some(cb) = progress {
            cb.on_run_start(module_ids.len(), page_budget);
        }

        let mut results = Vec::with_capacity(module_ids.len());
        for (i, module_id) in module_ids.iter().enumerate() {
            if i > 0 {
                debug!("Pausing {:?} before module {}", self.config.module_pause, module_id);
                pause(self.config.module_pause).await;
            }

            info!("=== Module {} ({}/{}) ===", module_id, i + 1, module_ids.len());
            if let Some(cb) = progress {
                cb.on_module_start(module_id, i + 1, module_ids.len());
            }

            let result = self.modules.scan(module_id, page_budget).await;

            if let Some(cb) = progress {
                cb.on_module_complete(module_id, result.page_count(), &result.end);
            }
            results.push(result);
        }
        results
    }

    /// Scan every module and aggregate the accepted files in document order.
    pub async fn run(&self, module_ids: &[String], page_budget: u32) -> DocumentSet {
        let results = self.scan_all(module_ids, page_budget).await;
        DocumentSet::from_modules(module_ids, &results)
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fetch::{page_file_name, StopReason};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Replays a fixed outcome per (module, page); anything unlisted is a 404.
    #[derive(Default)]
    struct ScriptedFetcher {
        script: HashMap<(String, u32), Outcome>,
        calls: Mutex<Vec<(String, u32)>>,
    }

    #[derive(Clone, Copy)]
    enum Outcome {
        Ok,
        Fail,
        Status(u16),
    }

    impl ScriptedFetcher {
        fn with(mut self, module: &str, pages: impl IntoIterator<Item = u32>, o: Outcome) -> Self {
            for p in pages {
                self.script.insert((module.to_string(), p), o);
            }
            self
        }

        fn calls(&self) -> Vec<(String, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
            let key = (request.module_id.clone(), request.page_number);
            self.calls.lock().unwrap().push(key.clone());
            match self.script.get(&key) {
                Some(Outcome::Ok) => FetchOutcome::Accepted {
                    bytes: 50_000,
                    path: request.destination.clone(),
                },
                Some(Outcome::Fail) => FetchOutcome::Retryable("connection reset".into()),
                Some(Outcome::Status(code)) => {
                    FetchOutcome::Stop(StopReason::UnexpectedStatus(*code))
                }
                None => FetchOutcome::Stop(StopReason::NotFound),
            }
        }
    }

    fn config(modules: &[&str]) -> ScrapeConfig {
        ScrapeConfig::builder()
            .base_url("http://viewer/view.php")
            .session_id("tok")
            .output_name("out")
            .module_ids(modules.iter().copied())
            .request_delay(Duration::ZERO)
            .module_pause(Duration::ZERO)
            .build()
            .unwrap()
    }

    fn scanner<'a>(fetcher: &'a ScriptedFetcher, cfg: &'a ScrapeConfig) -> ModuleScanner<'a, ScriptedFetcher> {
        ModuleScanner::new(fetcher, cfg, Path::new("scratch"))
    }

    fn file_names<'p>(paths: impl IntoIterator<Item = &'p std::path::PathBuf>) -> Vec<String> {
        paths
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn pages_of(result: &ModuleResult) -> Vec<String> {
        file_names(result.page_files.iter().map(|f| &f.path))
    }

    #[tokio::test]
    async fn stops_at_first_not_found() {
        let fetcher = ScriptedFetcher::default().with("M1", 1..=3, Outcome::Ok);
        let cfg = config(&["M1"]);
        let result = scanner(&fetcher, &cfg).scan("M1", 200).await;

        assert_eq!(
            pages_of(&result),
            ["M1_page_001.jpg", "M1_page_002.jpg", "M1_page_003.jpg"]
        );
        assert_eq!(result.end, ModuleEnd::Stopped(StopReason::NotFound));
        // Page 4 was the last request; nothing beyond the stop.
        assert_eq!(fetcher.calls().len(), 4);
    }

    #[tokio::test]
    async fn terminal_stop_on_first_page_yields_nothing() {
        let fetcher = ScriptedFetcher::default().with("M1", [1], Outcome::Status(500));
        let cfg = config(&["M1"]);
        let result = scanner(&fetcher, &cfg).scan("M1", 200).await;

        assert!(result.page_files.is_empty());
        assert_eq!(result.end, ModuleEnd::Stopped(StopReason::UnexpectedStatus(500)));
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn five_consecutive_failures_end_the_module() {
        let fetcher = ScriptedFetcher::default()
            .with("M1", [1], Outcome::Ok)
            .with("M1", 2..=6, Outcome::Fail)
            .with("M1", 7..=10, Outcome::Ok);
        let cfg = config(&["M1"]);
        let result = scanner(&fetcher, &cfg).scan("M1", 200).await;

        assert_eq!(pages_of(&result), ["M1_page_001.jpg"]);
        assert_eq!(result.end, ModuleEnd::FailureBudget { consecutive: 5 });
        assert_eq!(result.failed_attempts, 5);
        assert_eq!(fetcher.calls().len(), 6);
    }

    #[tokio::test]
    async fn accepted_page_resets_failure_counter() {
        // 4 failures, a success, 4 failures, a success: never reaches 5 in a row.
        let fetcher = ScriptedFetcher::default()
            .with("M1", 1..=4, Outcome::Fail)
            .with("M1", [5], Outcome::Ok)
            .with("M1", 6..=9, Outcome::Fail)
            .with("M1", [10], Outcome::Ok);
        let cfg = config(&["M1"]);
        let result = scanner(&fetcher, &cfg).scan("M1", 200).await;

        assert_eq!(pages_of(&result), ["M1_page_005.jpg", "M1_page_010.jpg"]);
        assert_eq!(result.failed_attempts, 8);
        assert_eq!(result.end, ModuleEnd::Stopped(StopReason::NotFound));
    }

    #[tokio::test]
    async fn failed_page_is_skipped_not_retried() {
        let fetcher = ScriptedFetcher::default()
            .with("M1", [1], Outcome::Ok)
            .with("M1", [2], Outcome::Fail)
            .with("M1", [3], Outcome::Ok);
        let cfg = config(&["M1"]);
        scanner(&fetcher, &cfg).scan("M1", 200).await;

        let pages: Vec<u32> = fetcher.calls().into_iter().map(|(_, p)| p).collect();
        assert_eq!(pages, [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn page_budget_is_a_hard_bound() {
        let fetcher = ScriptedFetcher::default().with("M1", 1..=50, Outcome::Ok);
        let cfg = config(&["M1"]);
        let result = scanner(&fetcher, &cfg).scan("M1", 10).await;

        assert_eq!(result.page_count(), 10);
        assert_eq!(result.end, ModuleEnd::PageBudget { budget: 10 });
        assert_eq!(fetcher.calls().len(), 10);
    }

    #[tokio::test]
    async fn accepted_pages_are_contiguous_from_one() {
        let fetcher = ScriptedFetcher::default().with("M1", 1..=7, Outcome::Ok);
        let cfg = config(&["M1"]);
        let result = scanner(&fetcher, &cfg).scan("M1", 200).await;

        for (i, file) in result.page_files.iter().enumerate() {
            assert_eq!(file.page, i as u32 + 1);
            assert_eq!(file.path, Path::new("scratch").join(page_file_name("M1", file.page)));
        }
    }

    #[tokio::test]
    async fn empty_module_does_not_short_circuit_the_set() {
        let fetcher = ScriptedFetcher::default()
            .with("M1", 1..=2, Outcome::Ok)
            .with("M3", 1..=1, Outcome::Ok);
        let cfg = config(&["M1", "M2", "M3"]);
        let scanner = DocumentSetScanner::new(&fetcher, &cfg, Path::new("scratch"));
        let results = scanner.scan_all(&cfg.module_ids, 200).await;

        let counts: Vec<usize> = results.iter().map(ModuleResult::page_count).collect();
        assert_eq!(counts, [2, 0, 1]);

        let set = DocumentSet::from_modules(&cfg.module_ids, &results);
        assert_eq!(
            file_names(set.files()),
            ["M1_page_001.jpg", "M1_page_002.jpg", "M3_page_001.jpg"]
        );
    }

    #[tokio::test]
    async fn modules_are_scanned_in_order() {
        let fetcher = ScriptedFetcher::default()
            .with("M1", [1], Outcome::Ok)
            .with("M2", [1], Outcome::Ok);
        let cfg = config(&["M1", "M2"]);
        let set = DocumentSetScanner::new(&fetcher, &cfg, Path::new("scratch"))
            .run(&cfg.module_ids, 5)
            .await;

        let modules: Vec<String> = fetcher.calls().into_iter().map(|(m, _)| m).collect();
        assert_eq!(modules, ["M1", "M1", "M2", "M2"]);
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn tenth_module_lands_after_the_ninth() {
        let ids: Vec<String> = crate::config::default_module_ids(10);
        let mut fetcher = ScriptedFetcher::default();
        for id in &ids {
            fetcher = fetcher.with(id, 1..=2, Outcome::Ok);
        }
        let cfg = config(&ids.iter().map(String::as_str).collect::<Vec<_>>());

        let set = DocumentSetScanner::new(&fetcher, &cfg, Path::new("scratch"))
            .run(&cfg.module_ids, 5)
            .await;

        let names = file_names(set.files());
        assert_eq!(names.len(), 20);
        assert_eq!(names[0], "M1_page_001.jpg");
        assert_eq!(names[2], "M2_page_001.jpg");
        assert_eq!(names[16], "M9_page_001.jpg");
        assert_eq!(names[18], "M10_page_001.jpg");
        assert_eq!(names[19], "M10_page_002.jpg");
    }
}
