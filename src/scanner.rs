use anyhow::{anyhow, bail, Context, Result};
use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::StreamExt;
use log::{debug, info, warn};
use prometheus_exporter::prometheus::{self, Registry};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::{AppConfig, TagConfig};
use crate::mac_address::MacAddress;
use crate::metrics::TagMetrics;
use crate::mikrotik::{self, DecodeError, TagStatus, MANUFACTURER_ID};

pub struct TagState {
    pub config: TagConfig,
    pub metrics: TagMetrics,
    pub last_seen: Option<Instant>,
    up: bool,
}

/// What became of one advertisement.
#[derive(Debug, PartialEq)]
pub enum Observation {
    /// Not one of the configured tags.
    Unknown,
    /// No MikroTik manufacturer data in the advertisement.
    NotMikrotik,
    Decoded { name: String, status: TagStatus },
    Failed(DecodeError),
}

/// The configured tags, keyed by MAC.
pub struct TagRegistry {
    tags: HashMap<MacAddress, TagState>,
}

impl TagRegistry {
    pub fn new(registry: &Registry, tags: &[TagConfig]) -> prometheus::Result<TagRegistry> {
        let mut states = HashMap::with_capacity(tags.len());
        for tag in tags {
            let metrics = TagMetrics::register(registry, tag)?;
            states.insert(
                tag.mac,
                TagState {
                    config: tag.clone(),
                    metrics,
                    last_seen: None,
                    up: false,
                },
            );
        }
        Ok(TagRegistry { tags: states })
    }

    #[cfg(test)]
    pub fn get(&self, mac: &MacAddress) -> Option<&TagState> {
        self.tags.get(mac)
    }

    pub fn observe(
        &mut self,
        mac: MacAddress,
        manufacturer_data: &HashMap<u16, Vec<u8>>,
        rssi: Option<i16>,
        now: Instant,
    ) -> Observation {
        let Some(state) = self.tags.get_mut(&mac) else {
            return Observation::Unknown;
        };

        match TagStatus::from_mfg_data(manufacturer_data) {
            None => Observation::NotMikrotik,
            Some(Err(e)) => {
                state.metrics.decode_errors.inc();
                Observation::Failed(e)
            }
            Some(Ok(status)) => {
                state.metrics.write(&status, rssi);
                state.last_seen = Some(now);
                state.up = true;
                Observation::Decoded {
                    name: state.config.name.clone(),
                    status,
                }
            }
        }
    }

    /// Marks tags not heard from within `stale_after` as down. Returns the
    /// tags that went down on this call.
    pub fn mark_stale(&mut self, now: Instant, stale_after: Duration) -> Vec<&TagConfig> {
        let mut stale = Vec::new();
        for state in self.tags.values_mut() {
            let expired = state
                .last_seen
                .map_or(false, |seen| now.saturating_duration_since(seen) > stale_after);
            if state.up && expired {
                state.up = false;
                state.metrics.up.set(0.0);
                stale.push(&state.config);
            }
        }
        stale
    }
}

pub async fn adapter(index: usize) -> Result<Adapter> {
    let manager = Manager::new().await.context("Failed to open Bluetooth manager")?;
    let adapters = manager.adapters().await?;
    adapters
        .into_iter()
        .nth(index)
        .ok_or_else(|| anyhow!("No Bluetooth adapter #{index} found"))
}

/// Listens for advertisements until the event stream ends.
pub async fn run(config: &AppConfig) -> Result<()> {
    let mut tags = TagRegistry::new(prometheus::default_registry(), &config.tags)
        .context("Failed to register tag metrics")?;

    let central = adapter(config.scanner.adapter).await?;
    let mut events = central.events().await?;
    central
        .start_scan(ScanFilter::default())
        .await
        .context("Failed to start scanning")?;
    info!("Listening for {} tag(s)", config.tags.len());

    let stale_after = config.scanner.stale_after();
    let mut interval = tokio::time::interval(stale_after);

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    bail!("Bluetooth event stream ended");
                };
                handle_event(&central, &mut tags, event).await;
            }
            _ = interval.tick() => {
                for tag in tags.mark_stale(Instant::now(), stale_after) {
                    warn!("{} ({}) not heard from in {:?}", tag.name, tag.mac, stale_after);
                }
            }
        }
    }
}

async fn handle_event(central: &Adapter, tags: &mut TagRegistry, event: CentralEvent) {
    let CentralEvent::ManufacturerDataAdvertisement {
        id,
        manufacturer_data,
    } = event
    else {
        return;
    };
    if !manufacturer_data.contains_key(&MANUFACTURER_ID) {
        return;
    }

    let (mac, rssi) = match resolve(central, &id).await {
        Ok(found) => found,
        Err(e) => {
            warn!("Failed to look up peripheral {id:?}: {e:#}");
            return;
        }
    };

    match tags.observe(mac, &manufacturer_data, rssi, Instant::now()) {
        Observation::Decoded { name, status } => debug!(
            "{} -- Temp: {:?}, Battery: {:?}, RSSI: {:?}, Uptime: {}, Flags: {:#04x}",
            name,
            status.temperature_c,
            status.battery_percentage,
            rssi,
            mikrotik::format_uptime(status.uptime),
            status.flags.0
        ),
        Observation::Failed(e) => {
            warn!("Failed to decode advertisement from {mac}: {e}");
        }
        Observation::Unknown => debug!("Ignoring unconfigured MikroTik tag {mac}"),
        Observation::NotMikrotik => {}
    }
}

async fn resolve(central: &Adapter, id: &PeripheralId) -> Result<(MacAddress, Option<i16>)> {
    let peripheral = central.peripheral(id).await?;
    let rssi = peripheral.properties().await?.and_then(|p| p.rssi);
    Ok((MacAddress::from(peripheral.address()), rssi))
}

/// A MikroTik tag seen during a one-off scan.
#[derive(Debug)]
pub struct DiscoveredTag {
    pub mac: MacAddress,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    pub status: Result<TagStatus, DecodeError>,
}

/// Scans for `duration` and returns every peripheral advertising MikroTik
/// manufacturer data.
pub async fn discover(adapter_index: usize, duration: Duration) -> Result<Vec<DiscoveredTag>> {
    let central = adapter(adapter_index).await?;

    central.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let found = collect(&central).await;
    if let Err(e) = central.stop_scan().await {
        warn!("Failed to stop scanning: {e}");
    }
    found
}

async fn collect(central: &Adapter) -> Result<Vec<DiscoveredTag>> {
    let mut seen = Vec::new();
    for peripheral in central.peripherals().await? {
        let mac = MacAddress::from(peripheral.address());
        seen.push((mac, peripheral.properties().await));
    }
    Ok(tags_from_properties(seen))
}

/// Keeps the peripherals that advertise MikroTik data. A peripheral whose
/// properties could not be read is logged and skipped.
fn tags_from_properties(
    seen: impl IntoIterator<Item = (MacAddress, btleplug::Result<Option<PeripheralProperties>>)>,
) -> Vec<DiscoveredTag> {
    let mut found = Vec::new();
    for (mac, props) in seen {
        let props = match props {
            Ok(Some(props)) => props,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping {mac}: {e}");
                continue;
            }
        };
        if let Some(status) = TagStatus::from_mfg_data(&props.manufacturer_data) {
            found.push(DiscoveredTag {
                mac,
                local_name: props.local_name,
                rssi: props.rssi,
                status,
            });
        }
    }
    found
}
