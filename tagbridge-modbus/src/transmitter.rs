//! Per-tag upload to the telemetry sink.

use std::time::Duration;

use reqwest::{Client, Url};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use tagbridge_common::{ReadingSet, TagValue};

/// Path of the sink's upsert endpoint, relative to its base URL.
pub const UPDATE_PATH: &str = "api/plc/update";

/// Error type for transmission.
#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    #[error("{failed} of {total} tags failed to update")]
    Partial { failed: usize, total: usize },
    #[error("Stopped after {sent} of {total} tags")]
    Interrupted { sent: usize, total: usize },
    #[error("Invalid sink URL: {0}")]
    Url(String),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Outcome of a fully successful [`Transmitter::send_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitSummary {
    pub success_count: usize,
    pub total: usize,
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    tag: &'a str,
    value: TagValue,
}

/// Sends each reading to the sink as its own request.
#[derive(Debug, Clone)]
pub struct Transmitter {
    client: Client,
    update_url: Url,
}

impl Transmitter {
    /// Build a transmitter posting to `{base}/api/plc/update`.
    pub fn new(base: &Url, timeout: Duration) -> Result<Self, TransmitError> {
        let update_url = base
            .join(UPDATE_PATH)
            .map_err(|e| TransmitError::Url(e.to_string()))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, update_url })
    }

    pub fn update_url(&self) -> &Url {
        &self.update_url
    }

    /// Send every reading, one request each.
    ///
    /// A failed send never stops the rest. Any failure makes the whole call
    /// fail with the number of failed tags.
    pub async fn send_all(&self, readings: &ReadingSet) -> Result<TransmitSummary, TransmitError> {
        self.send_until(readings, None).await
    }

    /// Like [`send_all`](Self::send_all), but checks `stop` before each
    /// request and gives up with `Interrupted` once it reads `true`.
    pub async fn send_until(
        &self,
        readings: &ReadingSet,
        stop: Option<&watch::Receiver<bool>>,
    ) -> Result<TransmitSummary, TransmitError> {
        let total = readings.len();
        let mut success_count = 0;
        let mut failed = 0;

        for (sent, reading) in readings.iter().enumerate() {
            if stop.is_some_and(|rx| *rx.borrow()) {
                info!(sent, total, "Shutdown requested, abandoning remaining tags");
                return Err(TransmitError::Interrupted { sent, total });
            }
            match self.send_one(&reading.tag, reading.value).await {
                Ok(status) => {
                    debug!(tag = %reading.tag, value = %reading.value, status, "Tag updated");
                    success_count += 1;
                }
                Err(message) => {
                    warn!(tag = %reading.tag, error = %message, "Failed to update tag");
                    failed += 1;
                }
            }
        }

        info!(
            sent = success_count,
            total,
            timestamp = %readings.timestamp,
            "Batch update"
        );

        if failed > 0 {
            return Err(TransmitError::Partial { failed, total });
        }
        Ok(TransmitSummary {
            success_count,
            total,
        })
    }

    async fn send_one(&self, tag: &str, value: TagValue) -> Result<u16, String> {
        let response = self
            .client
            .post(self.update_url.clone())
            .json(&UpdateRequest { tag, value })
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(format!("HTTP {}", status.as_u16()))
        }
    }
}
