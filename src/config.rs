//! Configuration types for a scrape-and-assemble run.
//!
//! All run behaviour is controlled through [`ScrapeConfig`], built via its
//! [`ScrapeConfigBuilder`]. The pipeline never reads the environment itself:
//! the CLI (or any other host) resolves every value up front and hands over a
//! finished config, so two runs with the same config behave the same.

use crate::error::ScrapeError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default `MAX_PAGE` when unset, zero or negative.
pub const DEFAULT_MAX_PAGES: u32 = 200;

/// Default number of modules (`M1`..`M9`).
pub const DEFAULT_MODULE_COUNT: usize = 9;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

pub const DEFAULT_ACCEPT: &str = "image/webp,image/apng,image/*,*/*;q=0.8";

pub const DEFAULT_SCRATCH_DIR: &str = "temp_images";

/// Relay session name used when `WAHA_SESSION` is not set.
pub const DEFAULT_RELAY_SESSION: &str = "default";

/// Configuration for one scrape-and-assemble run.
///
/// Built via [`ScrapeConfig::builder()`].
///
/// # Example
/// ```rust
/// use viewer2pdf::ScrapeConfig;
///
/// let config = ScrapeConfig::builder()
///     .base_url("https://viewer.example.com/view.php")
///     .subfolder("course/2024")
///     .session_id("abc123")
///     .output_name("Course Notes")
///     .build()
///     .unwrap();
/// assert_eq!(config.subfolder, "course/2024/");
/// assert_eq!(config.max_pages, 200);
/// ```
#[derive(Clone)]
pub struct ScrapeConfig {
    /// Viewer endpoint; the page query string is appended to it verbatim.
    pub base_url: String,

    /// Document subfolder on the viewer. Always ends with `/`.
    pub subfolder: String,

    /// Value of the `PHPSESSID` cookie sent with every page request.
    pub session_id: String,

    /// Output document name without extension; the file is `{output_name}.pdf`.
    pub output_name: String,

    /// Directory the PDF is written into. Default: the working directory.
    pub output_dir: PathBuf,

    /// Highest page index attempted per module. Default: 200.
    pub max_pages: u32,

    /// Modules fetched in order. Default: `M1`..`M9`.
    pub module_ids: Vec<String>,

    pub user_agent: String,
    pub referer: String,
    pub accept: String,

    /// Parent of the per-run page directory. Default: `temp_images`.
    ///
    /// Each run works in its own `run-*` subdirectory; other contents are
    /// left alone.
    pub scratch_dir: PathBuf,

    /// Pause after every page attempt that lets the scan continue. Default: 1 s.
    pub request_delay: Duration,

    /// Pause between two modules. Default: 3 s.
    pub module_pause: Duration,

    /// Per-page request timeout in seconds. Default: 60.
    pub fetch_timeout_secs: u64,

    /// Timeout for the document upload in seconds. Default: 600.
    ///
    /// Much longer than the page timeout since the whole PDF goes up in one
    /// request.
    pub delivery_timeout_secs: u64,

    /// Relay delivery settings. `None` disables delivery.
    pub delivery: Option<DeliveryConfig>,

    /// Receiver for progress events. `None` means no events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            subfolder: "/".to_string(),
            session_id: String::new(),
            output_name: String::new(),
            output_dir: PathBuf::from("."),
            max_pages: DEFAULT_MAX_PAGES,
            module_ids: default_module_ids(DEFAULT_MODULE_COUNT),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: String::new(),
            accept: DEFAULT_ACCEPT.to_string(),
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            request_delay: Duration::from_secs(1),
            module_pause: Duration::from_secs(3),
            fetch_timeout_secs: 60,
            delivery_timeout_secs: 600,
            delivery: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ScrapeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrapeConfig")
            .field("base_url", &self.base_url)
            .field("subfolder", &self.subfolder)
            .field("session_id", &redact(&self.session_id))
            .field("output_name", &self.output_name)
            .field("output_dir", &self.output_dir)
            .field("max_pages", &self.max_pages)
            .field("module_ids", &self.module_ids)
            .field("scratch_dir", &self.scratch_dir)
            .field("request_delay", &self.request_delay)
            .field("module_pause", &self.module_pause)
            .field("delivery", &self.delivery)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ScrapeProgressCallback>"),
            )
            .finish()
    }
}

impl ScrapeConfig {
    /// Create a new builder for `ScrapeConfig`.
    pub fn builder() -> ScrapeConfigBuilder {
        ScrapeConfigBuilder {
            config: Self::default(),
        }
    }

    /// `{base}?doc={module}&format=jpg&subfolder={subfolder}&page={page}`
    pub fn page_url(&self, module_id: &str, page: u32) -> String {
        format!(
            "{}?doc={}&format=jpg&subfolder={}&page={}",
            self.base_url, module_id, self.subfolder, page
        )
    }

    /// Where the assembled document is written: `{output_dir}/{output_name}.pdf`.
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.pdf", self.output_name))
    }
}

/// Builder for [`ScrapeConfig`].
#[derive(Debug)]
pub struct ScrapeConfigBuilder {
    config: ScrapeConfig,
}

impl ScrapeConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set the subfolder; a trailing `/` is appended when missing.
    pub fn subfolder(mut self, subfolder: impl Into<String>) -> Self {
        self.config.subfolder = normalize_subfolder(subfolder.into());
        self
    }

    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.config.session_id = id.into();
        self
    }

    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.config.output_name = name.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Set the per-module page budget; `0` falls back to [`DEFAULT_MAX_PAGES`].
    pub fn max_pages(mut self, n: u32) -> Self {
        self.config.max_pages = if n == 0 { DEFAULT_MAX_PAGES } else { n };
        self
    }

    pub fn module_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.module_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Use `M1`..`M{count}` as the module list.
    pub fn module_count(mut self, count: usize) -> Self {
        self.config.module_ids = default_module_ids(count);
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.config.referer = referer.into();
        self
    }

    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.config.accept = accept.into();
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = dir.into();
        self
    }

    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.config.request_delay = delay;
        self
    }

    pub fn module_pause(mut self, pause: Duration) -> Self {
        self.config.module_pause = pause;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs.max(1);
        self
    }

    pub fn delivery_timeout_secs(mut self, secs: u64) -> Self {
        self.config.delivery_timeout_secs = secs.max(1);
        self
    }

    pub fn delivery(mut self, delivery: Option<DeliveryConfig>) -> Self {
        self.config.delivery = delivery;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ScrapeConfig, ScrapeError> {
        let c = &self.config;
        if c.base_url.trim().is_empty() {
            return Err(ScrapeError::InvalidConfig("BASE_URL must not be empty".into()));
        }
        if c.session_id.trim().is_empty() {
            return Err(ScrapeError::InvalidConfig("PHPSESSID must not be empty".into()));
        }
        if c.output_name.trim().is_empty() {
            return Err(ScrapeError::InvalidConfig("OUTPUT_NAME must not be empty".into()));
        }
        if c.module_ids.is_empty() {
            return Err(ScrapeError::InvalidConfig(
                "At least one module must be configured".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Settings for relaying the finished document through the messaging API.
#[derive(Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Relay root URL, e.g. `http://localhost:3000`.
    pub api_url: String,
    /// Sent as `X-Api-Key`.
    pub api_key: String,
    /// Relay session name passed as the `session` query parameter.
    pub session: String,
    /// Phone-number style recipient; `@c.us` is appended on the wire.
    pub recipient: String,
}

impl DeliveryConfig {
    /// Build a delivery config only when every value is present and non-empty.
    ///
    /// Any missing value disables delivery entirely.
    pub fn from_parts(
        api_url: Option<String>,
        api_key: Option<String>,
        session: Option<String>,
        recipient: Option<String>,
    ) -> Option<Self> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Some(Self {
            api_url: non_empty(api_url)?.trim_end_matches('/').to_string(),
            api_key: non_empty(api_key)?,
            session: non_empty(session)?,
            recipient: non_empty(recipient)?,
        })
    }

    /// `{api_url}/api/sendFile`
    pub fn send_file_url(&self) -> String {
        format!("{}/api/sendFile", self.api_url)
    }

    /// The relay's chat identifier for the recipient.
    pub fn chat_id(&self) -> String {
        format!("{}@c.us", self.recipient)
    }
}

impl fmt::Debug for DeliveryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("session", &self.session)
            .field("recipient", &self.recipient)
            .finish()
    }
}

/// `M1`..`M{count}`.
pub fn default_module_ids(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("M{i}")).collect()
}

/// Append a trailing `/` unless one is already there.
pub fn normalize_subfolder(mut subfolder: String) -> String {
    if !subfolder.ends_with('/') {
        subfolder.push('/');
    }
    subfolder
}

/// Show only the first 10 characters of a credential.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(10).collect();
    format!("{prefix}...")
}
