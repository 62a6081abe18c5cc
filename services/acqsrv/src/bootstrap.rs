//! Service assembly from configuration

use std::sync::Arc;

use tracing::info;

use crate::catalog::RegisterCatalog;
use crate::config::{AppConfig, DeviceEndpoint};
use crate::error::Result;
use crate::health::ConnectionHealthManager;
use crate::poller::Poller;
use crate::reader::DeviceReader;
use crate::sink::{CsvExportSink, InfluxSink, SampleSink};
use crate::transport::{ModbusTcpClient, RegisterClient};

/// Wired acquisition engine
pub struct AcquisitionService {
    pub poller: Arc<Poller>,
    pub health: Arc<ConnectionHealthManager>,
}

impl AcquisitionService {
    /// Build with one Modbus TCP client per configured device and the configured sinks
    pub fn from_config(config: &AppConfig, catalog: Arc<RegisterCatalog>) -> Result<Self> {
        let tcp = config.modbus.tcp.client_config();
        let sinks = sinks_from_config(config, &catalog)?;
        Ok(Self::assemble(
            config,
            catalog,
            sinks,
            |endpoint| -> Box<dyn RegisterClient> {
                Box::new(ModbusTcpClient::new(endpoint.host.clone(), endpoint.port, tcp))
            },
        ))
    }

    /// Build with caller-provided transports and sinks
    pub fn assemble<F>(
        config: &AppConfig,
        catalog: Arc<RegisterCatalog>,
        sinks: Vec<Arc<dyn SampleSink>>,
        mut make_client: F,
    ) -> Self
    where
        F: FnMut(&DeviceEndpoint) -> Box<dyn RegisterClient>,
    {
        let tcp = &config.modbus.tcp;

        let mut health =
            ConnectionHealthManager::new(tcp.reconnect_interval(), tcp.connect_timeout());
        for endpoint in config.devices() {
            health.register(endpoint.name.clone(), make_client(endpoint));
        }
        let health = Arc::new(health);

        let reader = Arc::new(DeviceReader::new(
            Arc::clone(&health),
            catalog,
            tcp.device_deadline(),
        ));

        info!(
            "Acquisition engine: {} groups, {} devices, {} sinks",
            config.groups.len(),
            health.len(),
            sinks.len()
        );

        let poller = Poller::new(config.groups.clone(), reader, tcp.poll_interval())
            .with_sinks(sinks)
            .with_max_concurrent_reads(tcp.max_concurrent_reads);

        Self {
            poller: Arc::new(poller),
            health,
        }
    }
}

/// Storage and export sinks enabled in the configuration
pub fn sinks_from_config(
    config: &AppConfig,
    catalog: &RegisterCatalog,
) -> Result<Vec<Arc<dyn SampleSink>>> {
    let mut sinks: Vec<Arc<dyn SampleSink>> = Vec::new();

    if let Some(storage) = &config.storage {
        info!("Storage sink: InfluxDB {} ({})", storage.url, storage.bucket);
        sinks.push(Arc::new(InfluxSink::new(storage)?));
    }
    if let Some(export) = &config.export {
        info!("Export sink: CSV in {}", export.dir.display());
        sinks.push(Arc::new(CsvExportSink::from_groups(
            export.dir.clone(),
            &config.groups,
            catalog,
        )));
    }

    Ok(sinks)
}
