//! Delivery batcher and webhook sink

use crate::conversion::ConversionRecord;
use crate::error::{ExportError, Result};
use async_trait::async_trait;
use metrics::increment_counter;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

/// Destination for a batch of conversion records.
#[async_trait]
pub trait ConversionSink: Send + Sync {
    /// Sends the whole batch in one request.
    async fn send(&self, records: &[ConversionRecord]) -> Result<()>;
}

/// Posts batches as a JSON array to a webhook URL.
pub struct WebhookSink {
    client: Client,
    url: Url,
}

impl WebhookSink {
    /// Creates a sink for `url` with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::Config` for an unparseable URL and
    /// `ExportError::Http` if the HTTP client cannot be built.
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| ExportError::Config(format!("invalid webhook url '{}': {}", url, e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(ExportError::from)?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ConversionSink for WebhookSink {
    async fn send(&self, records: &[ConversionRecord]) -> Result<()> {
        debug!(url = %self.url, records = records.len(), "Posting conversions to webhook");

        let response = self
            .client
            .post(self.url.clone())
            .json(records)
            .send()
            .await
            .map_err(|e| ExportError::Delivery(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::Delivery(format!(
                "webhook returned {}: {}",
                status.as_u16(),
                body
            ))
            .into());
        }

        Ok(())
    }
}

/// Accumulates a cycle's conversion records and ships them as one batch.
pub struct DeliveryBatcher {
    sink: Arc<dyn ConversionSink>,
    pending: Vec<ConversionRecord>,
}

impl DeliveryBatcher {
    /// Creates an empty batcher.
    pub fn new(sink: Arc<dyn ConversionSink>) -> Self {
        Self {
            sink,
            pending: Vec::new(),
        }
    }

    /// Queues a record for the next flush.
    pub fn push(&mut self, record: ConversionRecord) {
        self.pending.push(record);
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops queued records without sending them.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Sends all queued records as one batch.
    ///
    /// An empty queue sends nothing. The queue is emptied whether or not
    /// the send succeeds. Returns the number of records delivered.
    ///
    /// # Errors
    ///
    /// Returns the sink's error; the batch is not retried.
    pub async fn flush(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            debug!("No conversions to deliver");
            return Ok(0);
        }

        let batch = std::mem::take(&mut self.pending);
        match self.sink.send(&batch).await {
            Ok(()) => {
                increment_counter!("gclid_export_deliveries_total", "outcome" => "success");
                info!(records = batch.len(), "Delivered conversions");
                Ok(batch.len())
            }
            Err(e) => {
                increment_counter!("gclid_export_deliveries_total", "outcome" => "failure");
                error!(records = batch.len(), error = %e, "Delivery failed");
                Err(e)
            }
        }
    }
}
