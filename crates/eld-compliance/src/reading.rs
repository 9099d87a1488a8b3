//! Latest vehicle state as seen by the monitors.

use eld_core::{DutyStatus, Location, TelemetrySample};

/// What the monitors need from a telemetry sample.
///
/// Both monitors read it from a `watch` channel, so they always see the
/// newest reading and never a backlog.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleReading {
    pub speed_mph: f64,
    pub duty_status: DutyStatus,
    pub odometer_miles: u32,
    pub location: Option<Location>,
}

impl Default for VehicleReading {
    fn default() -> Self {
        VehicleReading {
            speed_mph: 0.0,
            duty_status: DutyStatus::OffDuty,
            odometer_miles: 0,
            location: None,
        }
    }
}

impl From<&TelemetrySample> for VehicleReading {
    fn from(sample: &TelemetrySample) -> Self {
        VehicleReading {
            speed_mph: sample.speed_mph,
            duty_status: sample.duty_status,
            odometer_miles: sample.odometer_miles,
            location: sample.location,
        }
    }
}
