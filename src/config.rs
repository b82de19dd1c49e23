use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use log::{debug, info, LevelFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::mac_address::MacAddress;

pub const DEFAULT_CONFIG_FILE: &str = "mikrotik-tags.toml";
const ENV_PREFIX: &str = "MIKROTIK_TAG";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tag #{index} has an empty name")]
    EmptyName { index: usize },
    #[error("already_configured: {mac} is listed more than once")]
    AlreadyConfigured { mac: MacAddress },
    #[error("no tags configured")]
    NoTags,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TagConfig {
    pub name: String,
    pub mac: MacAddress,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExporterConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerConfig {
    #[serde(default)]
    pub adapter: usize,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub exporter: ExporterConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub tags: Vec<TagConfig>,
}

fn default_listen() -> String {
    "0.0.0.0:9888".to_string()
}

fn default_stale_after_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            adapter: 0,
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exporter: ExporterConfig::default(),
            scanner: ScannerConfig::default(),
            logging: LoggingConfig::default(),
            tags: Vec::new(),
        }
    }
}

impl ExporterConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("Invalid exporter listen address {:?}", self.listen))
    }
}

impl ScannerConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs.max(1))
    }
}

impl AppConfig {
    pub fn get_log_level(&self) -> LevelFilter {
        match self.logging.level.to_lowercase().as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            "off" => LevelFilter::Off,
            _ => LevelFilter::Info,
        }
    }

    /// Loads the file, then applies `MIKROTIK_TAG__SECTION__KEY` overrides
    /// from the environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load(path.as_ref(), ENV_PREFIX)
    }

    fn load(config_path: &Path, env_prefix: &str) -> Result<Self> {
        debug!("Loading configuration from {}", config_path.display());

        let config = Config::builder()
            .add_source(File::from(config_path).format(FileFormat::Toml))
            .add_source(Environment::with_prefix(env_prefix).separator("__"))
            .build()
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize config")?;

        Ok(app_config)
    }

    /// Same checks the setup form used to make: every tag needs a name, and a
    /// MAC may only be configured once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tags.is_empty() {
            return Err(ConfigError::NoTags);
        }
        let mut seen = HashSet::new();
        for (index, tag) in self.tags.iter().enumerate() {
            if tag.name.trim().is_empty() {
                return Err(ConfigError::EmptyName { index });
            }
            if !seen.insert(tag.mac) {
                return Err(ConfigError::AlreadyConfigured { mac: tag.mac });
            }
        }
        Ok(())
    }

    /// Adds a tag to the file at `path`, creating it with defaults if it does
    /// not exist yet. Nothing is written if the result fails validation.
    pub fn add_tag<P: AsRef<Path>>(path: P, tag: TagConfig) -> Result<Self> {
        let config_path = path.as_ref();
        let mut config = if config_path.exists() {
            Self::from_file(config_path)?
        } else {
            info!("{} not found, starting a new configuration", config_path.display());
            Self::default()
        };

        config.tags.push(tag);
        config.validate()?;
        config.save(config_path)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config_path = path.as_ref();
        let config_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(config_path, config_str)
            .with_context(|| format!("Failed to save config to {}", config_path.display()))?;

        info!("Configuration saved to {}", config_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(
            config.exporter.listen_addr().unwrap(),
            "0.0.0.0:9888".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.scanner.adapter, 0);
        assert_eq!(config.scanner.stale_after(), Duration::from_secs(60));
        assert_eq!(config.get_log_level(), LevelFilter::Info);
        assert!(config.tags.is_empty());
    }

    #[test]
    fn test_bad_listen_address() {
        let mut config = AppConfig::default();
        config.exporter.listen = "localhost".to_string();
        assert!(config.exporter.listen_addr().is_err());
    }

    #[test]
    fn test_from_file() {
        let temp_file = write_config(
            r#"
[exporter]
listen = "127.0.0.1:9100"

[scanner]
adapter = 1
stale_after_secs = 120

[logging]
level = "debug"

[[tags]]
name = "Freezer"
mac = "2c:c8:1b:4b:be:f1"

[[tags]]
name = "Front door"
mac = "2CC81B4BBEF2"
"#,
        );

        let config = AppConfig::from_file(temp_file.path()).unwrap();

        assert_eq!(config.exporter.listen, "127.0.0.1:9100");
        assert_eq!(config.scanner.adapter, 1);
        assert_eq!(config.scanner.stale_after(), Duration::from_secs(120));
        assert_eq!(config.get_log_level(), LevelFilter::Debug);
        assert_eq!(config.tags.len(), 2);
        assert_eq!(config.tags[0].name, "Freezer");
        assert_eq!(config.tags[0].mac.to_string(), "2C:C8:1B:4B:BE:F1");
        assert_eq!(config.tags[1].mac.compact(), "2CC81B4BBEF2");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sections_default_when_missing() {
        let temp_file = write_config(
            r#"
[[tags]]
name = "Freezer"
mac = "2c:c8:1b:4b:be:f1"
"#,
        );

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.exporter.listen, default_listen());
        assert_eq!(config.scanner.stale_after_secs, 60);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_mac_fails_to_load() {
        let temp_file = write_config(
            r#"
[[tags]]
name = "Freezer"
mac = "not-a-mac"
"#,
        );

        let err = AppConfig::from_file(temp_file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("invalid_mac"));
    }

    #[test]
    fn test_validate() {
        let mac: MacAddress = "2c:c8:1b:4b:be:f1".parse().unwrap();
        let mut config = AppConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::NoTags));

        config.tags.push(TagConfig { name: "Freezer".into(), mac });
        assert!(config.validate().is_ok());

        config.tags.push(TagConfig { name: "Duplicate".into(), mac });
        assert_eq!(config.validate(), Err(ConfigError::AlreadyConfigured { mac }));

        config.tags.pop();
        config.tags.push(TagConfig {
            name: "  ".into(),
            mac: "2c:c8:1b:4b:be:f2".parse().unwrap(),
        });
        assert_eq!(config.validate(), Err(ConfigError::EmptyName { index: 1 }));
    }

    #[test]
    fn test_save_config() {
        let mut config = AppConfig::default();
        config.exporter.listen = "127.0.0.1:9200".to_string();
        config.logging.level = "warn".to_string();
        config.tags.push(TagConfig {
            name: "Garage".to_string(),
            mac: "aa:bb:cc:dd:ee:ff".parse().unwrap(),
        });

        let temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        config.save(temp_file.path()).unwrap();

        let loaded = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.exporter.listen, config.exporter.listen);
        assert_eq!(loaded.get_log_level(), LevelFilter::Warn);
        assert_eq!(loaded.tags, config.tags);
    }

    #[test]
    fn test_environment_overrides_file() {
        let temp_file = write_config(
            r#"
[scanner]
adapter = 1

[[tags]]
name = "Freezer"
mac = "2c:c8:1b:4b:be:f1"
"#,
        );

        // private prefix so tests running alongside never see the variable
        std::env::set_var("MIKROTIK_TAG_ENVTEST__SCANNER__ADAPTER", "3");
        let loaded = AppConfig::load(temp_file.path(), "MIKROTIK_TAG_ENVTEST");
        std::env::remove_var("MIKROTIK_TAG_ENVTEST__SCANNER__ADAPTER");

        let config = loaded.unwrap();
        assert_eq!(config.scanner.adapter, 3);
        assert_eq!(config.scanner.stale_after_secs, 60);
        assert_eq!(config.tags.len(), 1);
    }

    #[test]
    fn test_add_tag_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.toml");

        let config = AppConfig::add_tag(
            &path,
            TagConfig {
                name: "Freezer".to_string(),
                mac: "2c:c8:1b:4b:be:f1".parse().unwrap(),
            },
        )
        .unwrap();
        assert_eq!(config.tags.len(), 1);

        let loaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(loaded.tags, config.tags);
        assert_eq!(loaded.exporter.listen, default_listen());
    }

    #[test]
    fn test_add_same_mac_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.toml");
        let mac: MacAddress = "2c:c8:1b:4b:be:f1".parse().unwrap();

        AppConfig::add_tag(&path, TagConfig { name: "Freezer".into(), mac }).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let err = AppConfig::add_tag(&path, TagConfig { name: "Fridge".into(), mac }).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::AlreadyConfigured { mac })
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }
}
