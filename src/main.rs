use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use env_logger::{Builder, WriteStyle};
use log::{error, info, LevelFilter};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod config;
mod mac_address;
mod metrics;
mod mikrotik;
mod scanner;
mod sensor;

use crate::config::{AppConfig, TagConfig, DEFAULT_CONFIG_FILE};
use crate::mac_address::MacAddress;
use crate::mikrotik::TagStatus;
use crate::sensor::{DeviceInfo, SensorKind};

#[derive(Parser)]
#[command(name = "mikrotik-tag-exporter")]
#[command(about = "Exports MikroTik BLE Tag telemetry as Prometheus metrics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for the configured tags and serve their metrics
    Run {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// List MikroTik tags in range
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
        /// Bluetooth adapter index
        #[arg(short, long, default_value = "0")]
        adapter: usize,
    },
    /// Add a tag to the configuration file
    Add {
        /// Friendly name of the tag
        #[arg(short, long)]
        name: String,
        /// Bluetooth address, e.g. 2C:C8:1B:4B:BE:F1
        #[arg(short, long)]
        mac: MacAddress,
        /// Configuration file, created if missing
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Validate a configuration file and list the sensors it defines
    CheckConfig {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Decode a raw manufacturer data payload given as hex
    Decode { payload: String },
}

fn init_logging(level: LevelFilter) {
    // RUST_LOG, when set, wins over the configured level
    Builder::new()
        .filter_level(level)
        .parse_default_env()
        .write_style(WriteStyle::Auto)
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config } => {
            let config = AppConfig::from_file(&config)?;
            init_logging(config.get_log_level());
            run(config).await
        }
        Commands::Scan { duration, adapter } => {
            init_logging(LevelFilter::Info);
            scan(adapter, Duration::from_secs(duration)).await
        }
        Commands::Add { name, mac, config } => {
            init_logging(LevelFilter::Info);
            add(&config, TagConfig { name, mac })
        }
        Commands::CheckConfig { config } => {
            init_logging(LevelFilter::Warn);
            check_config(&AppConfig::from_file(&config)?)
        }
        Commands::Decode { payload } => {
            init_logging(LevelFilter::Warn);
            decode(&payload)
        }
    };

    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    config.validate()?;

    let listen = config.exporter.listen_addr()?;
    let _exporter = prometheus_exporter::start(listen)
        .with_context(|| format!("Failed to start metrics server on {listen}"))?;
    info!("Serving metrics on http://{listen}/metrics");

    scanner::run(&config).await
}

async fn scan(adapter: usize, duration: Duration) -> anyhow::Result<()> {
    println!("Scanning for MikroTik tags ({} seconds)...", duration.as_secs());

    let found = scanner::discover(adapter, duration).await?;

    println!("\nFound {} tags:", found.len());
    for tag in found {
        let name = tag.local_name.unwrap_or_else(|| "Unknown".to_string());
        let rssi = tag
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "N/A".to_string());
        match tag.status {
            Ok(status) => println!(
                "  {} ({}) RSSI: {} Temp: {} Battery: {}",
                name,
                tag.mac,
                rssi,
                status
                    .temperature_c
                    .map(|t| format!("{t:.2} °C"))
                    .unwrap_or_else(|| "N/A".to_string()),
                status
                    .battery_percentage
                    .map(|b| format!("{b}%"))
                    .unwrap_or_else(|| "N/A".to_string()),
            ),
            Err(e) => println!("  {} ({}) RSSI: {} [{}]", name, tag.mac, rssi, e),
        }
    }
    Ok(())
}

fn add(path: &Path, tag: TagConfig) -> anyhow::Result<()> {
    let (name, mac) = (tag.name.clone(), tag.mac);
    let config = AppConfig::add_tag(path, tag)?;
    println!(
        "Added {} ({}) to {}, {} tag(s) configured",
        name,
        mac,
        path.display(),
        config.tags.len()
    );
    Ok(())
}

fn check_config(config: &AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    config.exporter.listen_addr()?;

    for tag in &config.tags {
        let device = DeviceInfo::new(&tag.name, tag.mac);
        println!("{} ({} {}, {})", device.name, device.manufacturer, device.model, device.identifier);
        for sensor in sensor::sensors_for(&device) {
            let unit = sensor.kind.unit().unwrap_or("");
            let class = sensor
                .kind
                .device_class()
                .map(|c| format!("{c:?}"))
                .unwrap_or_default();
            println!("  {:<40} {:<36} {:<6} {}", sensor.name, sensor.unique_id, unit, class);
        }
    }
    println!("Configuration OK: {} tag(s)", config.tags.len());
    Ok(())
}

fn decode(payload: &str) -> anyhow::Result<()> {
    let bytes = parse_hex(payload)?;
    let status = mikrotik::v1::decode(&bytes).context("Failed to decode payload")?;
    println!("Payload version {}, salt {:#06x}", status.version, status.salt);
    for line in describe(&status) {
        println!("{line}");
    }
    Ok(())
}

fn describe(status: &TagStatus) -> Vec<String> {
    SensorKind::ALL
        .iter()
        .filter(|kind| **kind != SensorKind::Rssi)
        .map(|kind| {
            let value = kind
                .value(status, None)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unavailable".to_string());
            match kind.unit() {
                Some(unit) if value != "unavailable" => format!("{}: {} {}", kind.title(), value, unit),
                _ => format!("{}: {}", kind.title(), value),
            }
        })
        .collect()
}

/// Accepts `0100...`, `01 00 ...` or `01:00:...`, with an optional `0x`.
fn parse_hex(s: &str) -> anyhow::Result<Vec<u8>> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let digits: Vec<char> = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits in {s:?}");
    }
    digits
        .chunks(2)
        .map(|pair| {
            let byte: String = pair.iter().collect();
            u8::from_str_radix(&byte, 16).with_context(|| format!("invalid hex byte {byte:?}"))
        })
        .collect()
}
