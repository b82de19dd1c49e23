use std::collections::HashMap;
use std::time::Duration;

pub mod v1;

/// btle manufacturer id (MikroTik SIA)
pub const MANUFACTURER_ID: u16 = 0x094F;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid payload length: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u8),
    #[error("payload is encrypted")]
    Encrypted,
}

/// Accelerometer axes in m/s². An axis is `None` when the tag reported a
/// value outside the sensor range.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Acceleration {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl Acceleration {
    pub fn total(&self) -> Option<f64> {
        let (x, y, z) = (self.x?, self.y?, self.z?);
        Some((x * x + y * y + z * z).sqrt())
    }
}

/// Event bits carried in the flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TagFlags(pub u8);

impl TagFlags {
    pub const REED_SWITCH: u8 = 0x01;
    pub const ACCEL_TILT: u8 = 0x02;
    pub const ACCEL_FREE_FALL: u8 = 0x04;
    pub const IMPACT_X: u8 = 0x08;
    pub const IMPACT_Y: u8 = 0x10;
    pub const IMPACT_Z: u8 = 0x20;

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn reed_switch(&self) -> bool {
        self.contains(Self::REED_SWITCH)
    }

    pub fn accel_tilt(&self) -> bool {
        self.contains(Self::ACCEL_TILT)
    }

    pub fn accel_free_fall(&self) -> bool {
        self.contains(Self::ACCEL_FREE_FALL)
    }

    pub fn impact_x(&self) -> bool {
        self.contains(Self::IMPACT_X)
    }

    pub fn impact_y(&self) -> bool {
        self.contains(Self::IMPACT_Y)
    }

    pub fn impact_z(&self) -> bool {
        self.contains(Self::IMPACT_Z)
    }
}

/// One decoded advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct TagStatus {
    pub version: u8,
    pub salt: u16,
    pub acceleration: Acceleration,
    pub temperature_c: Option<f64>,
    pub uptime: Duration,
    pub flags: TagFlags,
    pub battery_percentage: Option<u8>,
}

impl TagStatus {
    /// Picks the MikroTik entry out of an advertisement's manufacturer data.
    /// Returns `None` if the advertisement is not from a MikroTik device.
    pub fn from_mfg_data(d: &HashMap<u16, Vec<u8>>) -> Option<Result<TagStatus, DecodeError>> {
        d.get(&MANUFACTURER_ID).map(|bytes| v1::decode(bytes))
    }
}

/// Renders an uptime as `1d 2h 3m 4s`.
pub fn format_uptime(uptime: Duration) -> String {
    let mut secs = uptime.as_secs();
    let days = secs / (24 * 3600);
    secs %= 24 * 3600;
    let hours = secs / 3600;
    secs %= 3600;
    let minutes = secs / 60;
    let seconds = secs % 60;
    format!("{days}d {hours}h {minutes}m {seconds}s")
}
