//! CLI binary for viewer2pdf.
//!
//! A thin shim over the library crate that maps environment variables and
//! flags to `ScrapeConfig` and prints progress and results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use viewer2pdf::config::{redact, DEFAULT_MAX_PAGES, DEFAULT_RELAY_SESSION};
use viewer2pdf::{
    run, DeliveryConfig, DeliveryStatus, ModuleEnd, ProgressCallback, RunSummary, ScrapeConfig,
    ScrapeError, ScrapeProgressCallback,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner while pages are fetched (the page count is
/// unknown until each module stops), then a bar while the PDF is assembled.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Pages saved in the current module.
    module_pages: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Connecting to viewer…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            module_pages: AtomicUsize::new(0),
        })
    }

    /// Switch to the full progress-bar style once the file count is known.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Assembling");
        self.bar.set_message("");
        self.bar.reset_elapsed();
    }
}

impl ScrapeProgressCallback for CliProgressCallback {
    fn on_run_start(&self, modules: usize, page_budget: u32) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Fetching {modules} module(s), up to {page_budget} pages each…"
            ))
        ));
    }

    fn on_module_start(&self, module_id: &str, index: usize, total: usize) {
        self.module_pages.store(0, Ordering::SeqCst);
        self.bar.set_prefix(format!("{module_id} {index}/{total}"));
        self.bar.set_message("page 1");
    }

    fn on_page_saved(&self, _module_id: &str, page: u32, bytes: u64) {
        let n = self.module_pages.fetch_add(1, Ordering::SeqCst) + 1;
        self.bar.set_message(format!(
            "page {page}  {}  {}",
            dim(&format!("{:>4} KB", bytes / 1024)),
            dim(&format!("{n} saved"))
        ));
    }

    fn on_page_failed(&self, module_id: &str, page: u32, consecutive: u32, error: &str) {
        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            let mut s: String = error.chars().take(79).collect();
            s.push('\u{2026}');
            s
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {module_id} page {page:>3}  {}  {}",
            red("✗"),
            red(&msg),
            dim(&format!("({consecutive} in a row)")),
        ));
    }

    fn on_module_complete(&self, module_id: &str, pages: usize, end: &ModuleEnd) {
        let mark = match end {
            ModuleEnd::FailureBudget { .. } => red("✗"),
            _ if pages == 0 => dim("·"),
            _ => green("✓"),
        };
        self.bar.println(format!(
            "  {mark} {module_id:<4} {:>4} pages  {}",
            pages,
            dim(&end.to_string())
        ));
    }

    fn on_download_complete(&self, total_files: usize, elapsed: Duration) {
        self.bar.println(format!(
            "{} {} page images downloaded  {}",
            if total_files == 0 { red("✘") } else { green("✔") },
            bold(&total_files.to_string()),
            dim(&format!("{:.1}s", elapsed.as_secs_f64())),
        ));
        if total_files == 0 {
            self.bar.finish_and_clear();
        }
    }

    fn on_assembly_start(&self, total_files: usize) {
        self.activate_bar(total_files);
    }

    fn on_assembly_page(&self, index: usize, _total: usize) {
        self.bar.set_position(index as u64);
    }

    fn on_image_skipped(&self, path: &Path, reason: &str) {
        self.bar.println(format!(
            "  {} skipped {}  {}",
            cyan("⚠"),
            path.display(),
            dim(reason)
        ));
    }

    fn on_assembly_complete(&self, pages: usize, output: &Path) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} PDF written: {}  {}",
            green("✔"),
            bold(&output.display().to_string()),
            dim(&format!("{pages} pages"))
        );
    }

    fn on_delivery_start(&self, recipient: &str, bytes: u64) {
        eprintln!(
            "{} Sending to {}  {}",
            cyan("◆"),
            bold(recipient),
            dim(&format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0)))
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Everything from .env in the working directory
  viewer2pdf

  # Explicit values
  viewer2pdf --base-url https://viewer.example.com/view.php \
             --subfolder course/2024 --phpsessid 0123456789abcdef \
             --output-name "Course Notes"

  # Only the first three modules, no pacing (local test server)
  viewer2pdf --modules 3 --request-delay-ms 0 --module-pause-ms 0

  # Machine-readable summary
  viewer2pdf --json > summary.json

ENVIRONMENT VARIABLES:
  BASE_URL          Viewer endpoint (required)
  SUBFOLDER         Document subfolder on the viewer
  PHPSESSID         Session cookie value (required)
  OUTPUT_NAME       Output file name without .pdf (required)
  MAX_PAGE          Highest page index tried per module (default 200)
  USER_AGENT        User-Agent header
  REFERER           Referer header
  ACCEPT            Accept header
  WAHA_API_URL      Relay root URL          ┐
  WAHA_API_KEY      Relay API key           │ delivery runs only when
  WAHA_SESSION      Relay session (default) │ all four are set
  WAHA_RECIPIENT    Recipient phone number  ┘

  A .env file in the working directory is loaded first when present.
  RUST_LOG overrides the log filter.
"#;

/// Download a paged document from a web viewer and bind it into one PDF.
#[derive(Parser, Debug)]
#[command(
    name = "viewer2pdf",
    version,
    about = "Download a paged document from a web viewer and bind it into one PDF",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Viewer endpoint; the page query string is appended to it.
    #[arg(long, env = "BASE_URL")]
    base_url: String,

    /// Document subfolder on the viewer.
    #[arg(long, env = "SUBFOLDER", default_value = "")]
    subfolder: String,

    /// Session cookie value sent as PHPSESSID.
    #[arg(long, env = "PHPSESSID", hide_env_values = true)]
    phpsessid: String,

    /// Output file name without extension.
    #[arg(long, env = "OUTPUT_NAME")]
    output_name: String,

    /// Highest page index tried per module (zero or negative: 200).
    #[arg(long, env = "MAX_PAGE", allow_negative_numbers = true)]
    max_page: Option<i64>,

    /// Number of modules to fetch (M1..MN).
    #[arg(long, default_value_t = 9, value_parser = clap::value_parser!(u16).range(1..))]
    modules: u16,

    #[arg(long, env = "USER_AGENT", default_value = viewer2pdf::config::DEFAULT_USER_AGENT)]
    user_agent: String,

    #[arg(long, env = "REFERER", default_value = "")]
    referer: String,

    #[arg(long, env = "ACCEPT", default_value = viewer2pdf::config::DEFAULT_ACCEPT)]
    accept: String,

    /// Directory the PDF is written into.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Directory holding the per-run page image folder.
    #[arg(long, default_value = viewer2pdf::config::DEFAULT_SCRATCH_DIR)]
    scratch_dir: PathBuf,

    /// Pause after each page request, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    request_delay_ms: u64,

    /// Pause between modules, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    module_pause_ms: u64,

    /// Per-page request timeout in seconds.
    #[arg(long, default_value_t = 60)]
    fetch_timeout: u64,

    /// Upload timeout for the finished PDF in seconds.
    #[arg(long, default_value_t = 600)]
    delivery_timeout: u64,

    /// Relay root URL.
    #[arg(long, env = "WAHA_API_URL")]
    waha_api_url: Option<String>,

    /// Relay API key.
    #[arg(long, env = "WAHA_API_KEY", hide_env_values = true)]
    waha_api_key: Option<String>,

    /// Relay session name.
    #[arg(long, env = "WAHA_SESSION", default_value = DEFAULT_RELAY_SESSION)]
    waha_session: String,

    /// Recipient phone number (without @c.us).
    #[arg(long, env = "WAHA_RECIPIENT")]
    waha_recipient: Option<String>,

    /// Load environment variables from this file instead of ./.env.
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress display.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // clap reads the environment, so the .env file has to be loaded first.
    load_env_file()?;
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress display is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ScrapeProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    if !cli.quiet && !cli.json {
        print_banner(&config);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = match run(&config).await {
        Ok(summary) => summary,
        Err(e @ ScrapeError::NoPagesDownloaded { .. }) => {
            return Err(e).context("No files downloaded, nothing to assemble");
        }
        Err(e @ ScrapeError::Assembly(_)) => {
            return Err(e).with_context(|| {
                format!(
                    "PDF assembly failed; downloaded pages kept in a run-* directory under {}",
                    config.scratch_dir.display()
                )
            });
        }
        Err(e) => return Err(e).context("Run failed"),
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&summary, show_progress);
    }

    Ok(())
}

/// Load `--env-file PATH` (must exist) or `./.env` (optional).
///
/// Runs before clap so the values can feed `env = "…"` arguments.
fn load_env_file() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut explicit: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        if arg == "--env-file" {
            explicit = args.next().map(PathBuf::from);
        } else if let Some(path) = arg.strip_prefix("--env-file=") {
            explicit = Some(PathBuf::from(path));
        }
    }

    match explicit {
        Some(path) => {
            dotenvy::from_path(&path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

/// Map CLI args to `ScrapeConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ScrapeConfig> {
    let max_pages = match cli.max_page {
        Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
        _ => DEFAULT_MAX_PAGES,
    };

    let delivery = DeliveryConfig::from_parts(
        cli.waha_api_url.clone(),
        cli.waha_api_key.clone(),
        Some(cli.waha_session.clone()),
        cli.waha_recipient.clone(),
    );

    let mut builder = ScrapeConfig::builder()
        .base_url(cli.base_url.trim())
        .subfolder(cli.subfolder.trim())
        .session_id(cli.phpsessid.trim())
        .output_name(cli.output_name.trim())
        .output_dir(&cli.output_dir)
        .max_pages(max_pages)
        .module_count(usize::from(cli.modules))
        .user_agent(cli.user_agent.as_str())
        .referer(cli.referer.as_str())
        .accept(cli.accept.as_str())
        .scratch_dir(&cli.scratch_dir)
        .request_delay(Duration::from_millis(cli.request_delay_ms))
        .module_pause(Duration::from_millis(cli.module_pause_ms))
        .fetch_timeout_secs(cli.fetch_timeout)
        .delivery_timeout_secs(cli.delivery_timeout)
        .delivery(delivery);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_banner(config: &ScrapeConfig) {
    let modules = match (config.module_ids.first(), config.module_ids.last()) {
        (Some(first), Some(last)) if config.module_ids.len() > 1 => {
            format!("{first}..{last} ({})", config.module_ids.len())
        }
        (Some(only), _) => only.clone(),
        _ => String::new(),
    };
    let delivery = match &config.delivery {
        Some(d) => format!("{} via {}", d.chat_id(), d.api_url),
        None => dim("disabled"),
    };

    eprintln!("{}", bold("viewer2pdf"));
    eprintln!("  Base URL:   {}", config.base_url);
    eprintln!("  Subfolder:  {}", config.subfolder);
    eprintln!("  PHPSESSID:  {}", redact(&config.session_id));
    eprintln!("  Output:     {}", config.output_path().display());
    eprintln!("  Max pages:  {} per module", config.max_pages);
    eprintln!("  Modules:    {modules}");
    eprintln!("  Delivery:   {delivery}");
    eprintln!();
}

fn print_summary(summary: &RunSummary, progress_shown: bool) {
    let assembly = &summary.assembly;

    // The progress display already announced the PDF.
    if !progress_shown {
        eprintln!(
            "{}  {}/{} pages  {}ms  →  {}",
            if assembly.skipped.is_empty() {
                green("✔")
            } else {
                cyan("⚠")
            },
            assembly.pages_written,
            summary.downloaded_files,
            summary.total_duration_ms,
            bold(&assembly.output_path.display().to_string()),
        );
    }
    if !assembly.skipped.is_empty() {
        eprintln!(
            "   {} image(s) could not be decoded and were left out",
            red(&assembly.skipped.len().to_string())
        );
    }

    match &summary.delivery {
        DeliveryStatus::Delivered { recipient } => {
            eprintln!("{} Sent to {}", green("✔"), bold(recipient));
        }
        DeliveryStatus::Failed { recipient, error } => {
            eprintln!("{} Delivery to {} failed: {}", red("✘"), recipient, red(error));
            eprintln!(
                "   The PDF is still available at {}",
                assembly.output_path.display()
            );
        }
        DeliveryStatus::NotConfigured => {
            eprintln!(
                "   {}",
                dim("Delivery not configured (set WAHA_API_URL, WAHA_API_KEY and WAHA_RECIPIENT)")
            );
        }
    }
}
