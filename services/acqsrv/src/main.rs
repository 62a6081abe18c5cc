//! Acquisition service (`acqsrv`)
//!
//! Polls Modbus TCP field devices on a fixed schedule and forwards per-group sample
//! batches to InfluxDB and daily CSV files.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use acqsrv::{AcquisitionService, AppConfig, RegisterCatalog};
use common::logging::{self, LogConfig};
use common::ServiceArgs;
use errors::{TapgenError, TapgenErrorTrait, TapgenResult};

const SERVICE_NAME: &str = "acqsrv";

/// How long shutdown waits for running ticks before closing transports
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> TapgenResult<()> {
    let args = ServiceArgs::parse();

    // Logging is not up yet; the log directory comes from this config
    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Failed to load {} ({}): {}",
                args.config.display(),
                e.error_code(),
                e
            );
            return Err(e.into());
        },
    };

    let logging_ready = if args.validate {
        logging::init(SERVICE_NAME, args.level_directive())
    } else {
        logging::init_with_config(LogConfig {
            service_name: SERVICE_NAME.to_string(),
            log_dir: logging::resolve_log_root(config.logging.dir.as_deref()),
            level: args.level_directive().to_string(),
            enable_json: config.logging.json,
            compress_after_days: config.logging.compress_after_days,
            ..Default::default()
        })
    };
    logging_ready.map_err(|e| TapgenError::StartupFailed(format!("logging: {e}")))?;

    info!("Starting {} v{}", SERVICE_NAME, env!("CARGO_PKG_VERSION"));

    let catalog = RegisterCatalog::builtin();
    catalog.validate()?;
    config.validate(&catalog)?;

    let tcp = &config.modbus.tcp;
    info!(
        "Config: {} groups, {} devices, poll {}ms, read timeout {}ms, retries {}, reconnect {}ms",
        config.groups.len(),
        config.device_count(),
        tcp.poll_interval_ms,
        tcp.read_timeout_ms,
        tcp.retries,
        tcp.reconnect_interval_ms
    );

    if args.validate {
        for group in &config.groups {
            for device in &group.devices {
                info!(
                    "  {}/{}: {}:{} unit {} type {} ({} points)",
                    group.name,
                    device.name,
                    device.host,
                    device.port,
                    device.slave_id,
                    device.device_type,
                    catalog.points_for(&device.device_type).len()
                );
            }
        }
        info!("Validation completed successfully");
        return Ok(());
    }

    let service = AcquisitionService::from_config(&config, Arc::new(catalog))?;

    if args.once {
        let report = service.poller.tick().await;
        for group in &report.groups {
            info!(
                "{}: {} samples, {} devices read, failed {:?}, busy {:?}",
                group.group, group.samples, group.devices_read, group.failed, group.skipped_busy
            );
        }
        service.health.close_all().await;
        return Ok(());
    }

    let token = CancellationToken::new();
    let signals = common::shutdown::cancel_on_shutdown(token.clone());

    let poller = Arc::clone(&service.poller);
    if let Err(e) = tokio::spawn(poller.run(token.clone())).await {
        error!("Poller task failed: {}", e);
    }

    if !service.poller.wait_idle(SHUTDOWN_GRACE).await {
        error!(
            "{} ticks still running after {:?}",
            service.poller.in_flight(),
            SHUTDOWN_GRACE
        );
    }
    for health in service.health.snapshot() {
        info!("Final health {}: connected={}", health.device, health.connected);
    }
    service.health.close_all().await;

    signals.abort();
    info!("{} stopped", SERVICE_NAME);
    Ok(())
}
