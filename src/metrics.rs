use prometheus_exporter::prometheus::{Gauge, IntCounter, Opts, Registry};

use crate::config::TagConfig;
use crate::mikrotik::{TagFlags, TagStatus};

const FLAGS: [(&str, u8); 6] = [
    ("reed_switch", TagFlags::REED_SWITCH),
    ("accel_tilt", TagFlags::ACCEL_TILT),
    ("accel_free_fall", TagFlags::ACCEL_FREE_FALL),
    ("impact_x", TagFlags::IMPACT_X),
    ("impact_y", TagFlags::IMPACT_Y),
    ("impact_z", TagFlags::IMPACT_Z),
];

/// Gauges and counters for one configured tag, labelled with its name and MAC.
pub struct TagMetrics {
    pub temperature_c: Gauge,
    pub battery_percentage: Gauge,
    pub rssi_dbm: Gauge,
    pub acceleration_x: Gauge,
    pub acceleration_y: Gauge,
    pub acceleration_z: Gauge,
    pub total_acceleration: Gauge,
    pub uptime_seconds: Gauge,
    pub flags: Vec<(u8, Gauge)>,
    pub up: Gauge,
    pub advertisements: IntCounter,
    pub decode_errors: IntCounter,
}

fn opts(tag: &TagConfig, name: &str, help: &str) -> Opts {
    Opts::new(name, help)
        .const_label("device_name", tag.name.as_str())
        .const_label("mac", tag.mac.to_string().as_str())
}

fn gauge(registry: &Registry, opts: Opts) -> prometheus_exporter::prometheus::Result<Gauge> {
    let g = Gauge::with_opts(opts)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn counter(registry: &Registry, opts: Opts) -> prometheus_exporter::prometheus::Result<IntCounter> {
    let c = IntCounter::with_opts(opts)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl TagMetrics {
    pub fn register(
        registry: &Registry,
        tag: &TagConfig,
    ) -> prometheus_exporter::prometheus::Result<TagMetrics> {
        let mut flags = Vec::with_capacity(FLAGS.len());
        for (flag, bit) in FLAGS {
            let opts = opts(tag, "mikrotik_tag_flag", "Event flag reported by the tag (1 = set)")
                .const_label("flag", flag);
            flags.push((bit, gauge(registry, opts)?));
        }

        Ok(TagMetrics {
            temperature_c: gauge(
                registry,
                opts(tag, "mikrotik_tag_temperature_celsius", "Temperature in Celsius"),
            )?,
            battery_percentage: gauge(
                registry,
                opts(tag, "mikrotik_tag_battery_percentage", "Battery percentage"),
            )?,
            rssi_dbm: gauge(
                registry,
                opts(tag, "mikrotik_tag_rssi_dbm", "Received signal strength in dBm"),
            )?,
            acceleration_x: gauge(
                registry,
                opts(tag, "mikrotik_tag_acceleration_x_mps2", "Acceleration on the X axis in m/s²"),
            )?,
            acceleration_y: gauge(
                registry,
                opts(tag, "mikrotik_tag_acceleration_y_mps2", "Acceleration on the Y axis in m/s²"),
            )?,
            acceleration_z: gauge(
                registry,
                opts(tag, "mikrotik_tag_acceleration_z_mps2", "Acceleration on the Z axis in m/s²"),
            )?,
            total_acceleration: gauge(
                registry,
                opts(tag, "mikrotik_tag_total_acceleration_mps2", "Magnitude of the acceleration vector in m/s²"),
            )?,
            uptime_seconds: gauge(
                registry,
                opts(tag, "mikrotik_tag_uptime_seconds", "Tag uptime in seconds"),
            )?,
            flags,
            up: gauge(
                registry,
                opts(tag, "mikrotik_tag_up", "1 if the tag was heard from recently"),
            )?,
            advertisements: counter(
                registry,
                opts(tag, "mikrotik_tag_advertisements_total", "Number of btle advertisements read"),
            )?,
            decode_errors: counter(
                registry,
                opts(tag, "mikrotik_tag_decode_errors_total", "Number of advertisements that failed to decode"),
            )?,
        })
    }

    /// Unavailable readings keep the gauge at its last known value.
    pub fn write(&self, status: &TagStatus, rssi: Option<i16>) {
        set_some(&self.temperature_c, status.temperature_c);
        set_some(&self.battery_percentage, status.battery_percentage.map(f64::from));
        set_some(&self.rssi_dbm, rssi.map(f64::from));
        set_some(&self.acceleration_x, status.acceleration.x);
        set_some(&self.acceleration_y, status.acceleration.y);
        set_some(&self.acceleration_z, status.acceleration.z);
        set_some(&self.total_acceleration, status.acceleration.total());
        self.uptime_seconds.set(status.uptime.as_secs() as f64);
        for (bit, g) in &self.flags {
            g.set(if status.flags.contains(*bit) { 1.0 } else { 0.0 });
        }
        self.up.set(1.0);
        self.advertisements.inc();
    }
}

fn set_some(g: &Gauge, value: Option<f64>) {
    if let Some(v) = value {
        g.set(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mikrotik::{Acceleration, TagStatus};
    use std::time::Duration;

    fn tag(name: &str, mac: &str) -> TagConfig {
        TagConfig {
            name: name.to_string(),
            mac: mac.parse().unwrap(),
        }
    }

    fn status() -> TagStatus {
        TagStatus {
            version: 1,
            salt: 7,
            acceleration: Acceleration { x: Some(0.0), y: Some(3.0), z: Some(4.0) },
            temperature_c: Some(4.5),
            uptime: Duration::from_secs(120),
            flags: TagFlags(TagFlags::IMPACT_Z),
            battery_percentage: Some(93),
        }
    }

    #[test]
    fn test_write_status() {
        let registry = Registry::new();
        let metrics = TagMetrics::register(&registry, &tag("Freezer", "aa:bb:cc:dd:ee:ff")).unwrap();

        metrics.write(&status(), Some(-64));

        assert_eq!(metrics.temperature_c.get(), 4.5);
        assert_eq!(metrics.battery_percentage.get(), 93.0);
        assert_eq!(metrics.rssi_dbm.get(), -64.0);
        assert_eq!(metrics.total_acceleration.get(), 5.0);
        assert_eq!(metrics.uptime_seconds.get(), 120.0);
        assert_eq!(metrics.up.get(), 1.0);
        assert_eq!(metrics.advertisements.get(), 1);
        for (bit, g) in &metrics.flags {
            let expected = if *bit == TagFlags::IMPACT_Z { 1.0 } else { 0.0 };
            assert_eq!(g.get(), expected);
        }
    }

    #[test]
    fn test_unavailable_keeps_last_value() {
        let registry = Registry::new();
        let metrics = TagMetrics::register(&registry, &tag("Freezer", "aa:bb:cc:dd:ee:ff")).unwrap();
        metrics.write(&status(), Some(-64));

        let mut partial = status();
        partial.temperature_c = None;
        partial.acceleration.x = None;
        partial.battery_percentage = Some(92);
        metrics.write(&partial, None);

        assert_eq!(metrics.temperature_c.get(), 4.5);
        assert_eq!(metrics.total_acceleration.get(), 5.0);
        assert_eq!(metrics.rssi_dbm.get(), -64.0);
        assert_eq!(metrics.battery_percentage.get(), 92.0);
        assert_eq!(metrics.advertisements.get(), 2);
    }

    #[test]
    fn test_two_tags_share_a_registry() {
        let registry = Registry::new();
        TagMetrics::register(&registry, &tag("Freezer", "aa:bb:cc:dd:ee:01")).unwrap();
        TagMetrics::register(&registry, &tag("Garage", "aa:bb:cc:dd:ee:02")).unwrap();

        let families = registry.gather();
        let temperature = families
            .iter()
            .find(|f| f.get_name() == "mikrotik_tag_temperature_celsius")
            .unwrap();
        assert_eq!(temperature.get_metric().len(), 2);

        let flags = families.iter().find(|f| f.get_name() == "mikrotik_tag_flag").unwrap();
        assert_eq!(flags.get_metric().len(), 12);
    }

    #[test]
    fn test_same_tag_twice_is_rejected() {
        let registry = Registry::new();
        let t = tag("Freezer", "aa:bb:cc:dd:ee:ff");
        TagMetrics::register(&registry, &t).unwrap();
        assert!(TagMetrics::register(&registry, &t).is_err());
    }
}
