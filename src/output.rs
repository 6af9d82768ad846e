//! Result types produced by each phase of a run.

use crate::pipeline::fetch::StopReason;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Why a module's scan ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleEnd {
    /// The viewer signalled there are no more pages.
    Stopped(StopReason),
    /// Too many transport failures in a row.
    FailureBudget { consecutive: u32 },
    /// Every page up to the budget was attempted without a stop signal.
    PageBudget { budget: u32 },
}

impl fmt::Display for ModuleEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleEnd::Stopped(reason) => write!(f, "stopped: {reason}"),
            ModuleEnd::FailureBudget { consecutive } => {
                write!(f, "{consecutive} consecutive errors, moving on")
            }
            ModuleEnd::PageBudget { budget } => write!(f, "page budget of {budget} reached"),
        }
    }
}

/// One accepted page on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageFile {
    /// 1-based page index within the module.
    pub page: u32,
    pub path: PathBuf,
}

/// Outcome of scanning one module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleResult {
    pub module_id: String,
    /// Accepted pages in fetch order (ascending page number).
    pub page_files: Vec<PageFile>,
    /// Transport failures seen in this module (not necessarily consecutive).
    pub failed_attempts: u32,
    pub end: ModuleEnd,
}

impl ModuleResult {
    /// Number of accepted pages.
    pub fn page_count(&self) -> usize {
        self.page_files.len()
    }
}

/// Every accepted page file of a run, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentSet {
    files: Vec<PathBuf>,
}

impl DocumentSet {
    /// Order every accepted page by module position in `module_ids`, then by
    /// page number.
    ///
    /// Results for a module missing from `module_ids` go last, in the order
    /// they were given.
    pub fn from_modules(module_ids: &[String], modules: &[ModuleResult]) -> Self {
        let mut keyed: Vec<(usize, u32, &PathBuf)> = modules
            .iter()
            .flat_map(|m| {
                let position = module_ids
                    .iter()
                    .position(|id| *id == m.module_id)
                    .unwrap_or(usize::MAX);
                m.page_files.iter().map(move |f| (position, f.page, &f.path))
            })
            .collect();
        keyed.sort_by_key(|(position, page, _)| (*position, *page));
        Self {
            files: keyed.into_iter().map(|(_, _, path)| path.clone()).collect(),
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn into_files(self) -> Vec<PathBuf> {
        self.files
    }
}

/// An input file that did not make it into the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub reason: String,
}

/// What the assembler produced.
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub output_path: PathBuf,
    pub pages_written: usize,
    pub skipped: Vec<SkippedImage>,
}

/// Result of the optional delivery step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Not all delivery settings were present; nothing was sent.
    NotConfigured,
    Delivered { recipient: String },
    /// The relay failed. The document on disk is unaffected.
    Failed { recipient: String, error: String },
}

/// Terminal summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub modules: Vec<ModuleResult>,
    pub downloaded_files: usize,
    pub assembly: AssemblyReport,
    pub delivery: DeliveryStatus,
    pub download_duration_ms: u64,
    pub total_duration_ms: u64,
}
