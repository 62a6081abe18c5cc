//! acqsrv configuration
//!
//! Loaded from YAML (`config/acqsrv.yaml` by default) merged with `ACQSRV_`
//! environment variables, nested keys separated by `__`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::RegisterCatalog;
use crate::error::{AcqSrvError, Result};
use crate::transport::TcpClientConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/acqsrv.yaml";
pub const ENV_PREFIX: &str = "ACQSRV_";

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_timeout_ms() -> u64 {
    3_000
}

fn default_retries() -> u32 {
    2
}

fn default_reconnect_interval_ms() -> u64 {
    5_000
}

fn default_max_concurrent_reads() -> usize {
    16
}

fn default_port() -> u16 {
    502
}

fn default_slave_id() -> u8 {
    1
}

fn default_measurement() -> String {
    "tapgen".to_string()
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

fn default_compress_after_days() -> u64 {
    7
}

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub modbus: ModbusConfig,
    #[serde(default)]
    pub groups: Vec<DeviceGroup>,
    /// InfluxDB 2.x storage sink
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    /// CSV export sink
    #[serde(default)]
    pub export: Option<ExportConfig>,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModbusConfig {
    #[serde(default)]
    pub tcp: TcpSettings,
}

/// Polling and transport timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Concurrent device reads per group
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            connect_timeout_ms: default_timeout_ms(),
            read_timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_concurrent_reads: default_max_concurrent_reads(),
        }
    }
}

impl TcpSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Upper bound for one device read including transport retries
    ///
    /// Each attempt may wait `read_timeout`; each retry may also reconnect.
    pub fn device_deadline(&self) -> Duration {
        let attempts = self.retries.saturating_add(1);
        self.read_timeout() * attempts + self.connect_timeout() * self.retries
    }

    pub fn client_config(&self) -> TcpClientConfig {
        TcpClientConfig {
            connect_timeout: self.connect_timeout(),
            read_timeout: self.read_timeout(),
            retries: self.retries,
        }
    }
}

/// Devices polled and reported together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub name: String,
    #[serde(default)]
    pub devices: Vec<DeviceEndpoint>,
}

/// One physical field device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    /// Unique id, also the connection health key
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    /// Selects the catalog points read from this device
    pub device_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    #[serde(default = "default_measurement")]
    pub measurement: String,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log root; `TAPGEN_LOG_DIR` takes precedence
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub json: bool,
    #[serde(default = "default_compress_after_days")]
    pub compress_after_days: u64,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            dir: None,
            json: false,
            compress_after_days: default_compress_after_days(),
        }
    }
}

impl AppConfig {
    /// Load from a YAML file merged with `ACQSRV_*` environment variables
    pub fn load(path: &Path) -> Result<Self> {
        common::config_loader::load_layered(path, ENV_PREFIX)
            .map_err(|e| AcqSrvError::config(e.to_string()))
    }

    pub fn device_count(&self) -> usize {
        self.groups.iter().map(|g| g.devices.len()).sum()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceEndpoint> {
        self.groups.iter().flat_map(|g| g.devices.iter())
    }

    /// Reject configurations the poller cannot run; warn about suspicious ones
    pub fn validate(&self, catalog: &RegisterCatalog) -> Result<()> {
        let tcp = &self.modbus.tcp;
        if tcp.poll_interval_ms == 0 {
            return Err(AcqSrvError::config("modbus.tcp.poll_interval_ms must be > 0"));
        }
        if tcp.read_timeout_ms == 0 {
            return Err(AcqSrvError::config("modbus.tcp.read_timeout_ms must be > 0"));
        }
        if tcp.max_concurrent_reads == 0 {
            return Err(AcqSrvError::config(
                "modbus.tcp.max_concurrent_reads must be > 0",
            ));
        }

        let mut group_names = HashSet::new();
        let mut device_names = HashSet::new();
        for group in &self.groups {
            if group.name.trim().is_empty() {
                return Err(AcqSrvError::config("Group name must not be empty"));
            }
            // Group names become part of export file names
            if group.name.contains(['/', '\\']) || group.name.contains("..") {
                return Err(AcqSrvError::config(format!(
                    "Group name {:?} must not contain path separators or '..'",
                    group.name
                )));
            }
            if !group_names.insert(group.name.as_str()) {
                return Err(AcqSrvError::config(format!(
                    "Duplicate group name: {}",
                    group.name
                )));
            }
            if group.devices.is_empty() {
                warn!("Group {} has no devices", group.name);
            }

            for device in &group.devices {
                if device.name.trim().is_empty() {
                    return Err(AcqSrvError::config(format!(
                        "Device without a name in group {}",
                        group.name
                    )));
                }
                if !device_names.insert(device.name.as_str()) {
                    return Err(AcqSrvError::config(format!(
                        "Duplicate device name: {}",
                        device.name
                    )));
                }
                if device.host.trim().is_empty() {
                    return Err(AcqSrvError::config(format!(
                        "Device {} has an empty host",
                        device.name
                    )));
                }
                if device.port == 0 {
                    return Err(AcqSrvError::config(format!(
                        "Device {} has port 0",
                        device.name
                    )));
                }
                if !catalog.contains_type(&device.device_type) {
                    warn!(
                        "Device {} has unknown type '{}' and will produce no samples",
                        device.name, device.device_type
                    );
                }
            }
        }

        if self.groups.is_empty() {
            warn!("No device groups configured");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
modbus:
  tcp:
    poll_interval_ms: 5000
groups:
  - name: site1
    devices:
      - { name: k24-1, host: 10.0.0.5, port: 502, slave_id: 1, device_type: k24 }
      - { name: bs600-1, host: 10.0.0.6, device_type: bs600 }
  - name: site2
    devices:
      - { name: sui-1, host: 10.0.1.5, slave_id: 3, device_type: sui-201 }
export:
  dir: data_export
"#;

    fn endpoint(name: &str) -> DeviceEndpoint {
        DeviceEndpoint {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 502,
            slave_id: 1,
            device_type: "k24".to_string(),
        }
    }

    #[test]
    fn test_load_with_defaults_and_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("acqsrv.yaml", SAMPLE)?;
            jail.set_env("ACQSRV_MODBUS__TCP__RETRIES", "5");

            let config = AppConfig::load(Path::new("acqsrv.yaml")).unwrap();
            let tcp = &config.modbus.tcp;
            assert_eq!(tcp.poll_interval_ms, 5000);
            assert_eq!(tcp.retries, 5);
            assert_eq!(tcp.read_timeout_ms, 3000);
            assert_eq!(tcp.reconnect_interval_ms, 5000);

            assert_eq!(config.groups.len(), 2);
            assert_eq!(config.device_count(), 3);
            let bs600 = &config.groups[0].devices[1];
            assert_eq!(bs600.port, 502);
            assert_eq!(bs600.slave_id, 1);
            assert!(config.storage.is_none());
            assert_eq!(
                config.export.as_ref().unwrap().dir,
                PathBuf::from("data_export")
            );

            config.validate(&RegisterCatalog::builtin()).unwrap();
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let catalog = RegisterCatalog::builtin();
        let mut config = AppConfig {
            groups: vec![
                DeviceGroup {
                    name: "site1".to_string(),
                    devices: vec![endpoint("a")],
                },
                DeviceGroup {
                    name: "site2".to_string(),
                    devices: vec![endpoint("a")],
                },
            ],
            ..Default::default()
        };
        assert!(config.validate(&catalog).is_err());

        config.groups[1].devices[0].name = "b".to_string();
        config.validate(&catalog).unwrap();

        config.groups[1].name = "site1".to_string();
        assert!(config.validate(&catalog).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let catalog = RegisterCatalog::builtin();

        let mut config = AppConfig::default();
        config.modbus.tcp.poll_interval_ms = 0;
        assert!(config.validate(&catalog).is_err());

        let mut device = endpoint("a");
        device.port = 0;
        let config = AppConfig {
            groups: vec![DeviceGroup {
                name: "site1".to_string(),
                devices: vec![device],
            }],
            ..Default::default()
        };
        assert!(config.validate(&catalog).is_err());
    }

    #[test]
    fn test_validate_rejects_path_like_group_names() {
        let catalog = RegisterCatalog::builtin();
        for name in ["../etc", "site/1", "site\\1", ".."] {
            let config = AppConfig {
                groups: vec![DeviceGroup {
                    name: name.to_string(),
                    devices: vec![endpoint("a")],
                }],
                ..Default::default()
            };
            assert!(config.validate(&catalog).is_err(), "{name}");
        }

        let config = AppConfig {
            groups: vec![DeviceGroup {
                name: "site-1.north".to_string(),
                devices: vec![endpoint("a")],
            }],
            ..Default::default()
        };
        config.validate(&catalog).unwrap();
    }

    #[test]
    fn test_unknown_device_type_is_only_a_warning() {
        let mut device = endpoint("a");
        device.device_type = "mystery".to_string();
        let config = AppConfig {
            groups: vec![DeviceGroup {
                name: "site1".to_string(),
                devices: vec![device],
            }],
            ..Default::default()
        };
        config.validate(&RegisterCatalog::builtin()).unwrap();
    }

    #[test]
    fn test_device_deadline_covers_retries() {
        let tcp = TcpSettings::default();
        assert_eq!(tcp.device_deadline(), Duration::from_millis(3000 * 3 + 3000 * 2));
    }
}
