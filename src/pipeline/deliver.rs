//! Delivery: hand the finished PDF to a messaging relay.
//!
//! The relay takes a multipart upload. Documents can be large, so the file
//! is never read into memory as a whole: a reader task pushes fixed-size
//! chunks into a bounded channel and the request body pulls from the other
//! end. When the channel is full the reader waits; when the reader hits an
//! I/O error it sends that error down the channel, which aborts the request.

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Bytes per body chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between the reader and the request.
const CHANNEL_DEPTH: usize = 4;

/// A document to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub file_path: PathBuf,
    /// Relay-level recipient (phone-number style, without `@c.us`).
    pub recipient: String,
    /// Human name of the document; used in the caption and as the file name.
    pub display_name: String,
}

/// Somewhere a finished document can be sent.
///
/// Failure is reported, never fatal: the document already exists on disk.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError>;
}

/// [`DeliverySink`] posting to `{api_url}/api/sendFile?session={session}`.
pub struct RelaySink {
    client: reqwest::Client,
    config: DeliveryConfig,
}

impl RelaySink {
    pub fn new(config: DeliveryConfig, timeout_secs: u64) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DeliveryError::Client(e.to_string()))?;
        Ok(Self { client, config })
    }
}

/// Caption attached to the uploaded document.
pub fn caption(display_name: &str) -> String {
    format!("📚 {display_name}\n\nSent automatically by viewer2pdf")
}

#[async_trait]
impl DeliverySink for RelaySink {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
        let open_err = |source: io::Error| DeliveryError::FileOpen {
            path: delivery.file_path.clone(),
            source,
        };
        let file = File::open(&delivery.file_path).await.map_err(open_err)?;
        let len = file.metadata().await.map_err(open_err)?.len();

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let reader = tokio::spawn(pump_file(file, tx));

        let body = reqwest::Body::wrap_stream(ReceiverStream::new(rx));
        let part = Part::stream_with_length(body, len)
            .file_name(format!("{}.pdf", delivery.display_name))
            .mime_str("application/pdf")
            .map_err(|e| DeliveryError::Client(e.to_string()))?;
        // File names go out verbatim, not percent-encoded.
        let form = Form::new()
            .percent_encode_noop()
            .text("chatId", format!("{}@c.us", delivery.recipient))
            .text("caption", caption(&delivery.display_name))
            .part("file", part);

        debug!(
            "Uploading {} ({} bytes) to {}",
            delivery.file_path.display(),
            len,
            self.config.send_file_url()
        );
        let sent = self
            .client
            .post(self.config.send_file_url())
            .query(&[("session", self.config.session.as_str())])
            .header("X-Api-Key", &self.config.api_key)
            .multipart(form)
            .send()
            .await;

        // The reader's own failure explains a broken request better than the
        // transport error it caused.
        match reader.await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => return Err(DeliveryError::Stream { source }),
            Err(join) => {
                return Err(DeliveryError::Stream {
                    source: io::Error::other(format!("reader task failed: {join}")),
                })
            }
        }

        let response = sent.map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Copy `file` into `tx` chunk by chunk.
///
/// Stops quietly if the receiving side is gone (the request already ended).
async fn pump_file(
    mut file: File,
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
) -> Result<(), io::Error> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match file.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => {
                if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => {
                let _ = tx.send(Err(io::Error::new(e.kind(), e.to_string()))).await;
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn caption_mentions_document() {
        let c = caption("Module Pack");
        assert!(c.contains("Module Pack"));
        assert!(c.starts_with("📚"));
    }

    #[tokio::test]
    async fn pump_forwards_every_byte_in_bounded_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pdf");
        let content: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let (tx, mut rx) = mpsc::channel(CHANNEL_DEPTH);
        let file = File::open(&path).await.unwrap();
        let reader = tokio::spawn(pump_file(file, tx));

        let mut received = Vec::new();
        let mut chunks = 0;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= CHUNK_SIZE);
            received.extend_from_slice(&chunk);
            chunks += 1;
        }
        reader.await.unwrap().unwrap();

        assert_eq!(received, content);
        assert!(chunks >= 4);
    }

    #[tokio::test]
    async fn pump_stops_quietly_when_receiver_is_gone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, vec![7u8; CHUNK_SIZE * 10]).unwrap();

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let file = File::open(&path).await.unwrap();
        assert!(pump_file(file, tx).await.is_ok());
    }

    #[tokio::test]
    async fn missing_file_is_reported_before_any_request() {
        let config = DeliveryConfig::from_parts(
            Some("http://127.0.0.1:1".into()),
            Some("key".into()),
            Some("default".into()),
            Some("628123".into()),
        )
        .unwrap();
        let sink = RelaySink::new(config, 5).unwrap();
        let err = sink
            .deliver(&Delivery {
                file_path: PathBuf::from("/definitely/not/here.pdf"),
                recipient: "628123".into(),
                display_name: "x".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::FileOpen { .. }), "got: {err:?}");
    }
}
