use std::time::Duration;

use crate::mikrotik::{Acceleration, DecodeError, TagFlags, TagStatus};

pub const VERSION: u8 = 1;
pub const PAYLOAD_LEN: usize = 18;

const ACCELERATION_LIMIT: f64 = 16.0;
const TEMPERATURE_MIN_C: f64 = -50.0;
const TEMPERATURE_MAX_C: f64 = 100.0;
const BATTERY_MAX: u8 = 100;

/// Decodes a version 1 payload.
///
/// Layout, all fields little-endian:
///
/// ```text
///  0      version
///  1      encrypted (non-zero if the rest is AES encrypted)
///  2..4   salt
///  4..6   acceleration x, signed 8.8 fixed point
///  6..8   acceleration y
///  8..10  acceleration z
/// 10..12  temperature, signed 8.8 fixed point
/// 12..16  uptime in seconds
/// 16      flags
/// 17      battery percentage
/// ```
pub fn decode(v: &[u8]) -> Result<TagStatus, DecodeError> {
    if v.len() != PAYLOAD_LEN {
        return Err(DecodeError::Length {
            expected: PAYLOAD_LEN,
            actual: v.len(),
        });
    }
    if v[0] != VERSION {
        return Err(DecodeError::UnsupportedVersion(v[0]));
    }
    if v[1] != 0 {
        return Err(DecodeError::Encrypted);
    }

    let salt = u16::from_le_bytes([v[2], v[3]]);
    let acceleration = Acceleration {
        x: acceleration_axis(fixed_8_8([v[4], v[5]])),
        y: acceleration_axis(fixed_8_8([v[6], v[7]])),
        z: acceleration_axis(fixed_8_8([v[8], v[9]])),
    };
    let temperature_c = Some(fixed_8_8([v[10], v[11]]))
        .filter(|t| (TEMPERATURE_MIN_C..=TEMPERATURE_MAX_C).contains(t));
    let uptime = u32::from_le_bytes([v[12], v[13], v[14], v[15]]);
    let battery_percentage = Some(v[17]).filter(|b| *b <= BATTERY_MAX);

    Ok(TagStatus {
        version: v[0],
        salt,
        acceleration,
        temperature_c,
        uptime: Duration::from_secs(uptime as u64),
        flags: TagFlags(v[16]),
        battery_percentage,
    })
}

fn fixed_8_8(bytes: [u8; 2]) -> f64 {
    i16::from_le_bytes(bytes) as f64 / 256.0
}

fn acceleration_axis(value: f64) -> Option<f64> {
    Some(value).filter(|a| a.abs() <= ACCELERATION_LIMIT)
}
