//! The sensors each tag exposes.
//!
//! Every configured tag is one device with a fixed set of sensors. A sensor's
//! unique id is derived from the tag's MAC so it stays stable across renames.

use std::fmt;

use crate::mac_address::MacAddress;
use crate::mikrotik::TagStatus;

pub const MANUFACTURER: &str = "MikroTik";
pub const MODEL: &str = "BLE Tag";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Battery,
    Rssi,
    AccelerationX,
    AccelerationY,
    AccelerationZ,
    TotalAcceleration,
    Uptime,
    FlagReedSwitch,
    FlagAccelTilt,
    FlagAccelFreeFall,
    FlagImpactX,
    FlagImpactY,
    FlagImpactZ,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Temperature,
    Battery,
    SignalStrength,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    Number(f64),
    Integer(i64),
    Flag(bool),
    Text(String),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Number(n) => write!(f, "{n:.2}"),
            SensorValue::Integer(n) => write!(f, "{n}"),
            SensorValue::Flag(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            SensorValue::Text(s) => f.write_str(s),
        }
    }
}

impl SensorKind {
    pub const ALL: [SensorKind; 14] = [
        SensorKind::Temperature,
        SensorKind::Battery,
        SensorKind::Rssi,
        SensorKind::AccelerationX,
        SensorKind::AccelerationY,
        SensorKind::AccelerationZ,
        SensorKind::TotalAcceleration,
        SensorKind::Uptime,
        SensorKind::FlagReedSwitch,
        SensorKind::FlagAccelTilt,
        SensorKind::FlagAccelFreeFall,
        SensorKind::FlagImpactX,
        SensorKind::FlagImpactY,
        SensorKind::FlagImpactZ,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Battery => "battery",
            SensorKind::Rssi => "rssi",
            SensorKind::AccelerationX => "acceleration_x",
            SensorKind::AccelerationY => "acceleration_y",
            SensorKind::AccelerationZ => "acceleration_z",
            SensorKind::TotalAcceleration => "total_acceleration",
            SensorKind::Uptime => "uptime",
            SensorKind::FlagReedSwitch => "flag_reed_switch",
            SensorKind::FlagAccelTilt => "flag_accel_tilt",
            SensorKind::FlagAccelFreeFall => "flag_accel_free_fall",
            SensorKind::FlagImpactX => "flag_impact_x",
            SensorKind::FlagImpactY => "flag_impact_y",
            SensorKind::FlagImpactZ => "flag_impact_z",
        }
    }

    /// `flag_impact_x` -> `Flag Impact X`
    pub fn title(&self) -> String {
        self.key()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            SensorKind::Temperature => Some("°C"),
            SensorKind::Battery => Some("%"),
            SensorKind::Rssi => Some("dBm"),
            SensorKind::AccelerationX
            | SensorKind::AccelerationY
            | SensorKind::AccelerationZ
            | SensorKind::TotalAcceleration => Some("m/s²"),
            _ => None,
        }
    }

    pub fn device_class(&self) -> Option<DeviceClass> {
        match self {
            SensorKind::Temperature => Some(DeviceClass::Temperature),
            SensorKind::Battery => Some(DeviceClass::Battery),
            SensorKind::Rssi => Some(DeviceClass::SignalStrength),
            _ => None,
        }
    }

    /// Value of this sensor for a decoded advertisement. RSSI is not part of
    /// the payload and is taken from the radio instead.
    pub fn value(&self, status: &TagStatus, rssi: Option<i16>) -> Option<SensorValue> {
        let flags = &status.flags;
        match self {
            SensorKind::Temperature => status.temperature_c.map(SensorValue::Number),
            SensorKind::Battery => status
                .battery_percentage
                .map(|b| SensorValue::Integer(b as i64)),
            SensorKind::Rssi => rssi.map(|r| SensorValue::Integer(r as i64)),
            SensorKind::AccelerationX => status.acceleration.x.map(SensorValue::Number),
            SensorKind::AccelerationY => status.acceleration.y.map(SensorValue::Number),
            SensorKind::AccelerationZ => status.acceleration.z.map(SensorValue::Number),
            SensorKind::TotalAcceleration => status.acceleration.total().map(SensorValue::Number),
            SensorKind::Uptime => Some(SensorValue::Text(crate::mikrotik::format_uptime(
                status.uptime,
            ))),
            SensorKind::FlagReedSwitch => Some(SensorValue::Flag(flags.reed_switch())),
            SensorKind::FlagAccelTilt => Some(SensorValue::Flag(flags.accel_tilt())),
            SensorKind::FlagAccelFreeFall => Some(SensorValue::Flag(flags.accel_free_fall())),
            SensorKind::FlagImpactX => Some(SensorValue::Flag(flags.impact_x())),
            SensorKind::FlagImpactY => Some(SensorValue::Flag(flags.impact_y())),
            SensorKind::FlagImpactZ => Some(SensorValue::Flag(flags.impact_z())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifier: MacAddress,
    pub name: String,
    pub manufacturer: &'static str,
    pub model: &'static str,
}

impl DeviceInfo {
    pub fn new(name: &str, mac: MacAddress) -> Self {
        Self {
            identifier: mac,
            name: name.to_string(),
            manufacturer: MANUFACTURER,
            model: MODEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sensor {
    pub kind: SensorKind,
    pub name: String,
    pub unique_id: String,
}

impl Sensor {
    pub fn new(device_name: &str, mac: MacAddress, kind: SensorKind) -> Self {
        Self {
            kind,
            name: format!("{} {}", device_name, kind.title()),
            unique_id: format!("{}_{}", mac.compact(), kind.key()),
        }
    }
}

/// All sensors of one device, in display order.
pub fn sensors_for(device: &DeviceInfo) -> Vec<Sensor> {
    SensorKind::ALL
        .iter()
        .map(|kind| Sensor::new(&device.name, device.identifier, *kind))
        .collect()
}
