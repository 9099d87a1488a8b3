//! # Batch Sinks
//!
//! Where the sync engine sends batches. The engine holds one primary sink
//! and any number of best-effort mirrors.
//!
//! ```text
//! POST {backend_url}
//! { "batch_id": "…uuid…", "records": [ OfflineRecord, … ] }
//!
//! 2xx      ──► Ok(())
//! non-2xx  ──► BatchUploadFailed { cause: "HTTP 503 …" }
//! I/O      ──► Http(..)
//! ```
//!
//! The backend must treat a repeated `batch_id` as a no-op: a batch whose
//! outcome was lost is re-sent with a new id but the same record ids.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use eld_core::OfflineRecord;

use crate::error::{SyncError, SyncResult};

/// Destination for a batch of offline records.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Uploads one batch. `Ok` means every record in it was accepted.
    async fn upload_batch(&self, batch_id: &str, records: &[OfflineRecord]) -> SyncResult<()>;

    /// Short label for logs.
    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    batch_id: &'a str,
    records: &'a [OfflineRecord],
}

// =============================================================================
// HTTP Sink
// =============================================================================

/// Posts batches as JSON to a backend endpoint.
#[derive(Debug, Clone)]
pub struct HttpBatchSink {
    client: reqwest::Client,
    url: Url,
}

impl HttpBatchSink {
    /// Creates a sink for `url`, with a per-request timeout.
    pub fn new(url: &str, timeout: Duration) -> SyncResult<Self> {
        let url = Url::parse(url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpBatchSink { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl BatchSink for HttpBatchSink {
    async fn upload_batch(&self, batch_id: &str, records: &[OfflineRecord]) -> SyncResult<()> {
        debug!(url = %self.url, batch_id, count = records.len(), "Posting batch");

        let response = self
            .client
            .post(self.url.clone())
            .json(&BatchRequest { batch_id, records })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SyncError::BatchUploadFailed {
                cause: format!("HTTP {} {}", status.as_u16(), body.trim()),
            })
        }
    }

    fn name(&self) -> &str {
        self.url.host_str().unwrap_or("http")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use eld_core::TelemetryRecord;

    #[test]
    fn test_batch_request_shape() {
        let record = OfflineRecord::from_telemetry(
            TelemetryRecord::new(serde_json::json!({ "speed_mph": 12.0 }), "PT30"),
            Utc::now(),
        );
        let records = [record];
        let body = serde_json::to_value(BatchRequest {
            batch_id: "b-1",
            records: &records,
        })
        .unwrap();

        assert_eq!(body["batch_id"], "b-1");
        assert_eq!(body["records"][0]["payload"]["speed_mph"], 12.0);
        assert_eq!(body["records"][0]["synced"], false);
    }

    #[test]
    fn test_rejects_bad_url() {
        let err = HttpBatchSink::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_retryable() {
        let sink = HttpBatchSink::new("http://127.0.0.1:9/batches", Duration::from_secs(2)).unwrap();
        assert_eq!(sink.name(), "127.0.0.1");

        let err = sink.upload_batch("b-1", &[]).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
