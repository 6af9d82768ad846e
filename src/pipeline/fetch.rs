//! Page fetching: one authenticated GET per page, classified into an outcome.
//!
//! The viewer has no "end of document" marker. A module ends when a page
//! request comes back 404, with any other non-200 status, or with a body so
//! small it can only be an error page served as 200 (the usual symptom of an
//! expired session). Transport failures say nothing about the module and are
//! left to the scan policy in [`crate::pipeline::scan`].

use crate::config::ScrapeConfig;
use crate::error::ScrapeError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, REFERER, USER_AGENT};
use reqwest::StatusCode;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Bodies shorter than this are error pages, not page images.
pub const MIN_PAGE_BYTES: u64 = 2000;

/// One page request. Built per attempt and thrown away afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub module_id: String,
    /// 1-based.
    pub page_number: u32,
    pub target_url: String,
    /// Value of the `PHPSESSID` cookie.
    pub auth_token: String,
    /// Where an accepted page is written.
    pub destination: PathBuf,
}

impl FetchRequest {
    /// Request for one page, saved under `scratch` as [`page_file_name`].
    pub fn for_page(
        config: &ScrapeConfig,
        module_id: &str,
        page_number: u32,
        scratch: &Path,
    ) -> Self {
        Self {
            module_id: module_id.to_string(),
            page_number,
            target_url: config.page_url(module_id, page_number),
            auth_token: config.session_id.clone(),
            destination: scratch.join(page_file_name(module_id, page_number)),
        }
    }

    /// `Cookie` header value.
    pub fn cookie(&self) -> String {
        format!("PHPSESSID={}", self.auth_token)
    }
}

/// Why a module has no further pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// 404: the normal end of a module.
    NotFound,
    /// Any other non-200 status. Indistinguishable from rate limiting on
    /// this viewer, so the module is not retried.
    UnexpectedStatus(u16),
    /// 200 with fewer than [`MIN_PAGE_BYTES`] bytes.
    PayloadTooSmall { bytes: u64 },
    /// 200, but the body could not be read or stored in full.
    BodyInterrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::NotFound => f.write_str("not found"),
            StopReason::UnexpectedStatus(code) => write!(f, "unexpected status {code}"),
            StopReason::PayloadTooSmall { bytes } => {
                write!(f, "payload too small ({bytes} bytes), session probably expired")
            }
            StopReason::BodyInterrupted => f.write_str("body interrupted"),
        }
    }
}

/// Classified result of a single page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page was written to `path`.
    Accepted { bytes: u64, path: PathBuf },
    /// Transport-level failure; the module may still have pages.
    Retryable(String),
    /// The module has no more pages.
    Stop(StopReason),
}

/// Fetches one page to its `destination`.
///
/// On [`FetchOutcome::Accepted`] a file exists at the returned path; on any
/// other outcome no file is left at `destination`.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome;
}

/// Scratch file name for a page: `{module}_page_{page:03}.jpg`.
pub fn page_file_name(module_id: &str, page_number: u32) -> String {
    format!("{module_id}_page_{page_number:03}.jpg")
}

/// Failure while saving a 200 body.
enum SaveError {
    /// The destination file could not be created.
    Create(String),
    /// Reading, writing or flushing failed part way.
    Body(String),
}

/// [`PageFetcher`] backed by `reqwest`.
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    /// Build a client carrying the viewer headers as defaults.
    ///
    /// The cookie is not a default header; it comes from each request's
    /// `auth_token`.
    pub fn new(config: &ScrapeConfig) -> Result<Self, ScrapeError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value("User-Agent", &config.user_agent)?);
        headers.insert(REFERER, header_value("Referer", &config.referer)?);
        headers.insert(ACCEPT, header_value("Accept", &config.accept)?);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| ScrapeError::HttpClient(e.to_string()))?;

        Ok(Self { client })
    }

    /// Stream the body to `path`, returning the byte count.
    ///
    /// Any error leaves no file behind.
    async fn save_body(
        &self,
        response: reqwest::Response,
        path: &Path,
    ) -> Result<u64, SaveError> {
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| SaveError::Create(format!("cannot create {}: {e}", path.display())))?;

        let mut written: u64 = 0;
        let mut body = response.bytes_stream();
        let result: Result<(), String> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| format!("body read failed: {e}"))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| format!("write failed: {e}"))?;
                written += chunk.len() as u64;
            }
            file.flush().await.map_err(|e| format!("flush failed: {e}"))
        }
        .await;
        drop(file);

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(path).await;
            return Err(SaveError::Body(e));
        }
        Ok(written)
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let path = request.destination.clone();

        let response = match self
            .client
            .get(&request.target_url)
            .header(COOKIE, request.cookie())
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let kind = if e.is_timeout() { "timeout" } else { "HTTP error" };
                return FetchOutcome::Retryable(format!("{kind}: {e}"));
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return FetchOutcome::Stop(StopReason::NotFound);
        }
        if status != StatusCode::OK {
            return FetchOutcome::Stop(StopReason::UnexpectedStatus(status.as_u16()));
        }

        let bytes = match self.save_body(response, &path).await {
            Ok(n) => n,
            Err(SaveError::Create(e)) => return FetchOutcome::Retryable(e),
            Err(SaveError::Body(e)) => {
                warn!(
                    "{} page {}: {e}",
                    request.module_id, request.page_number
                );
                return FetchOutcome::Stop(StopReason::BodyInterrupted);
            }
        };

        if bytes < MIN_PAGE_BYTES {
            let _ = tokio::fs::remove_file(&path).await;
            return FetchOutcome::Stop(StopReason::PayloadTooSmall { bytes });
        }

        debug!(
            "{} page {}: {} bytes → {}",
            request.module_id,
            request.page_number,
            bytes,
            path.display()
        );
        FetchOutcome::Accepted { bytes, path }
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ScrapeError> {
    HeaderValue::from_str(value)
        .map_err(|e| ScrapeError::InvalidConfig(format!("{name} header is not valid: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_file_name_is_zero_padded() {
        assert_eq!(page_file_name("M1", 1), "M1_page_001.jpg");
        assert_eq!(page_file_name("M9", 42), "M9_page_042.jpg");
        assert_eq!(page_file_name("M2", 200), "M2_page_200.jpg");
        assert_eq!(page_file_name("M2", 1000), "M2_page_1000.jpg");
    }

    #[test]
    fn padded_names_sort_in_page_order() {
        let mut names: Vec<String> = [10, 2, 100, 1].iter().map(|p| page_file_name("M1", *p)).collect();
        names.sort();
        assert_eq!(
            names,
            ["M1_page_001.jpg", "M1_page_002.jpg", "M1_page_010.jpg", "M1_page_100.jpg"]
        );
    }

    #[test]
    fn request_for_page_uses_config() {
        let config = ScrapeConfig::builder()
            .base_url("http://viewer/view.php")
            .subfolder("x")
            .session_id("tok")
            .output_name("o")
            .build()
            .unwrap();
        let req = FetchRequest::for_page(&config, "M4", 7, Path::new("scratch/run-1"));
        assert_eq!(req.target_url, "http://viewer/view.php?doc=M4&format=jpg&subfolder=x/&page=7");
        assert_eq!(req.auth_token, "tok");
        assert_eq!(req.page_number, 7);
        assert_eq!(req.destination, Path::new("scratch/run-1/M4_page_007.jpg"));
    }

    #[test]
    fn cookie_carries_the_session_id() {
        let req = FetchRequest {
            module_id: "M1".into(),
            page_number: 1,
            target_url: "http://viewer/view.php".into(),
            auth_token: "sess-0123456789abcdef".into(),
            destination: PathBuf::from("p.jpg"),
        };
        assert_eq!(req.cookie(), "PHPSESSID=sess-0123456789abcdef");
    }

    #[test]
    fn invalid_header_is_config_error() {
        let config = ScrapeConfig::builder()
            .base_url("http://viewer/view.php")
            .session_id("tok")
            .output_name("o")
            .referer("bad\nvalue")
            .build()
            .unwrap();
        let err = HttpPageFetcher::new(&config).err().expect("header must be rejected");
        assert!(err.to_string().contains("Referer"));
    }

    #[test]
    fn stop_reason_display() {
        assert_eq!(StopReason::NotFound.to_string(), "not found");
        assert!(StopReason::PayloadTooSmall { bytes: 1999 }
            .to_string()
            .contains("1999"));
        assert_eq!(StopReason::BodyInterrupted.to_string(), "body interrupted");
    }
}
