//! # Notify Pump
//!
//! Runs while a device is authenticated. Turns every `NotifyReceived` frame
//! into a [`TelemetryRecord`] and hands it to the ingest queue.
//!
//! ```text
//! NotifyReceived(bytes) ──► packet::decode ──ok──► TelemetryRecord::from_sample
//!                                         └─err─► TelemetryRecord { raw hex }
//!                                                        │
//!                                                        ▼
//!                                          mpsc::Sender<TelemetryRecord>
//! ```
//!
//! Undecodable frames are still forwarded as opaque payloads.

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use eld_core::{packet, TelemetryRecord};

use crate::events::{LinkEvent, Subscription};

/// Builds a record from one raw notification.
pub fn frame_to_record(data: &[u8], origin: &str) -> TelemetryRecord {
    match packet::decode(data) {
        Ok(sample) => TelemetryRecord::from_sample(&sample, origin),
        Err(err) => {
            debug!(origin = %origin, error = %err, "Keeping undecodable frame as raw payload");
            TelemetryRecord::new(
                json!({
                    "raw": packet::to_hex(data),
                    "decode_error": err.to_string(),
                }),
                origin,
            )
        }
    }
}

/// Why the pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpExit {
    Stopped,
    LinkLost,
}

pub(crate) async fn run_pump(
    mut events: Subscription,
    token: CancellationToken,
    origin: String,
    sink: Option<mpsc::Sender<TelemetryRecord>>,
) -> PumpExit {
    info!(origin = %origin, "Telemetry pump started");

    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => return PumpExit::Stopped,
            event = events.recv() => event,
        };

        match event {
            Some(LinkEvent::NotifyReceived(data)) => {
                let record = frame_to_record(&data, &origin);
                if let Some(sink) = &sink {
                    if sink.send(record).await.is_err() {
                        warn!("Telemetry sink closed, frame dropped");
                    }
                }
            }
            Some(LinkEvent::Disconnected) => {
                warn!(origin = %origin, "Link lost while authenticated");
                return PumpExit::LinkLost;
            }
            Some(_) => {}
            None => return PumpExit::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eld_core::{DutyStatus, TelemetrySample};

    #[test]
    fn test_valid_frame_becomes_sample_record() {
        let sample = TelemetrySample {
            speed_mph: 62.5,
            rpm: 1800,
            fuel_level_pct: 50,
            odometer_miles: 200_000,
            duty_status: DutyStatus::Driving,
            location: None,
        };
        let record = frame_to_record(&packet::encode(&sample), "PT30");

        assert_eq!(record.origin, "PT30");
        assert_eq!(record.sample(), Some(sample));
    }

    #[test]
    fn test_garbage_frame_kept_raw() {
        let record = frame_to_record(&[0xde, 0xad], "PT30");

        assert_eq!(record.payload["raw"], "dead");
        assert!(record.payload["decode_error"].is_string());
        assert!(record.sample().is_none());
    }
}
