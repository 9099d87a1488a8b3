//! # Telemetry Frame Codec
//!
//! Decodes the fixed-length frames an ELD pushes through `notify-received`.
//!
//! ## Frame Layout (14 bytes, big-endian)
//! ```text
//! ┌──────┬──────┬─────────┬───────┬──────┬────────────┬──────┬──────┬──────┐
//! │ 0x7E │ 0x01 │ speed   │ rpm   │ fuel │ odometer   │ duty │ csum │ 0x7F │
//! │ 1    │ 1    │ u16     │ u16   │ u8   │ u32        │ u8   │ u8   │ 1    │
//! └──────┴──────┴─────────┴───────┴──────┴────────────┴──────┴──────┴──────┘
//!   start  type   mph×10    rev/min  %     miles        code   Σ%256  end
//! ```
//!
//! The checksum is the sum of every byte before it, modulo 256.

use crate::error::PacketError;
use crate::types::{DutyStatus, TelemetrySample};

/// Start-of-frame flag.
pub const FRAME_START: u8 = 0x7E;

/// Packet type for engine/odometer telemetry.
pub const PACKET_TYPE_TELEMETRY: u8 = 0x01;

/// End-of-frame flag.
pub const FRAME_END: u8 = 0x7F;

/// Total frame length in bytes.
pub const FRAME_LEN: usize = 14;

const CHECKSUM_INDEX: usize = 12;

/// Decodes a telemetry frame.
///
/// Trailing bytes after the end flag are ignored; some firmware pads
/// notifications to the negotiated MTU.
pub fn decode(bytes: &[u8]) -> Result<TelemetrySample, PacketError> {
    if bytes.len() < FRAME_LEN {
        return Err(PacketError::TooShort {
            expected: FRAME_LEN,
            actual: bytes.len(),
        });
    }

    let frame = &bytes[..FRAME_LEN];

    if frame[0] != FRAME_START || frame[FRAME_LEN - 1] != FRAME_END {
        return Err(PacketError::BadFrame(format!(
            "start={:#04x} end={:#04x}",
            frame[0],
            frame[FRAME_LEN - 1]
        )));
    }

    if frame[1] != PACKET_TYPE_TELEMETRY {
        return Err(PacketError::BadFrame(format!(
            "unsupported packet type {:#04x}",
            frame[1]
        )));
    }

    let expected = checksum(&frame[..CHECKSUM_INDEX]);
    let actual = frame[CHECKSUM_INDEX];
    if expected != actual {
        return Err(PacketError::ChecksumMismatch { expected, actual });
    }

    let speed_tenths = u16::from_be_bytes([frame[2], frame[3]]);
    let rpm = u16::from_be_bytes([frame[4], frame[5]]);
    let fuel_level_pct = frame[6];
    let odometer_miles = u32::from_be_bytes([frame[7], frame[8], frame[9], frame[10]]);
    let duty_status =
        DutyStatus::from_code(frame[11]).ok_or(PacketError::UnknownDutyStatus(frame[11]))?;

    Ok(TelemetrySample {
        speed_mph: f64::from(speed_tenths) / 10.0,
        rpm,
        fuel_level_pct,
        odometer_miles,
        duty_status,
        location: None,
    })
}

/// Encodes a sample into a frame. Used by simulators and tests.
///
/// Speed is clamped to the representable range (0 to 6553.5 mph).
pub fn encode(sample: &TelemetrySample) -> Vec<u8> {
    let speed_tenths = (sample.speed_mph * 10.0).round().clamp(0.0, f64::from(u16::MAX)) as u16;

    let mut frame = Vec::with_capacity(FRAME_LEN);
    frame.push(FRAME_START);
    frame.push(PACKET_TYPE_TELEMETRY);
    frame.extend_from_slice(&speed_tenths.to_be_bytes());
    frame.extend_from_slice(&sample.rpm.to_be_bytes());
    frame.push(sample.fuel_level_pct);
    frame.extend_from_slice(&sample.odometer_miles.to_be_bytes());
    frame.push(sample.duty_status.code());
    frame.push(checksum(&frame));
    frame.push(FRAME_END);
    frame
}

/// Hex rendering used when a frame is kept as an opaque payload.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}
