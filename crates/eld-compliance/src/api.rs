//! # Compliance API
//!
//! Backend endpoint for duty-status changes made on the driver's behalf.
//!
//! ```text
//! POST {api_url}
//! {
//!   "status": "on_duty_not_driving",
//!   "location": { "latitude": 41.88, "longitude": -87.63 },
//!   "odometer_miles": 125000,
//!   "remark": "Automatic switch after 300s stopped",
//!   "changed_at": "2026-01-01T12:00:00Z"
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use eld_core::{DutyStatus, Location};

use crate::error::{ComplianceError, ComplianceResult};

/// One duty-status change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutyStatusChange {
    pub status: DutyStatus,
    pub location: Option<Location>,
    pub odometer_miles: u32,
    pub remark: String,
    pub changed_at: DateTime<Utc>,
}

#[async_trait]
pub trait ComplianceApi: Send + Sync {
    async fn change_duty_status(&self, change: &DutyStatusChange) -> ComplianceResult<()>;
}

// =============================================================================
// HTTP Client
// =============================================================================

#[derive(Debug, Clone)]
pub struct HttpComplianceApi {
    client: reqwest::Client,
    url: Url,
}

impl HttpComplianceApi {
    pub fn new(url: &str, timeout: Duration) -> ComplianceResult<Self> {
        let url = Url::parse(url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpComplianceApi { client, url })
    }
}

#[async_trait]
impl ComplianceApi for HttpComplianceApi {
    async fn change_duty_status(&self, change: &DutyStatusChange) -> ComplianceResult<()> {
        debug!(url = %self.url, status = %change.status, "Posting duty status change");

        let response = self.client.post(self.url.clone()).json(change).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(ComplianceError::ApiFailed {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_wire_shape() {
        let change = DutyStatusChange {
            status: DutyStatus::OnDutyNotDriving,
            location: Some(Location {
                latitude: 41.88,
                longitude: -87.63,
            }),
            odometer_miles: 125_000,
            remark: "auto".into(),
            changed_at: Utc::now(),
        };
        let json = serde_json::to_value(&change).unwrap();

        assert_eq!(json["status"], "on_duty_not_driving");
        assert_eq!(json["odometer_miles"], 125_000);
        assert_eq!(json["location"]["latitude"], 41.88);
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(matches!(
            HttpComplianceApi::new("::", Duration::from_secs(1)),
            Err(ComplianceError::InvalidConfig(_))
        ));
    }
}
