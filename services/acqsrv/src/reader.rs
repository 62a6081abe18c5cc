//! Device reader
//!
//! One batched register read per device per tick, decoded through the catalog.
//! A failed or timed-out read yields no samples; it is never partially decoded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::time::timeout;
use errors::TapgenErrorTrait;
use tracing::{debug, error, warn, Level};

use crate::catalog::{RegisterCatalog, RegisterPoint, RegisterWindow};
use crate::codec;
use crate::config::DeviceEndpoint;
use crate::error::AcqSrvError;
use crate::health::{Acquire, ConnectionHealthManager};
use crate::sample::Sample;

/// What happened to one device in one tick
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// Read succeeded
    Samples(Vec<Sample>),
    /// The device type has no catalog points
    NoPoints,
    /// A previous read on this device is still running; skipped this tick
    Busy,
    /// Not connected, throttled, or not registered with the health manager
    Unavailable,
    /// The read failed or timed out
    Failed,
}

impl ReadOutcome {
    pub fn into_samples(self) -> Vec<Sample> {
        match self {
            ReadOutcome::Samples(samples) => samples,
            _ => Vec::new(),
        }
    }
}

pub struct DeviceReader {
    health: Arc<ConnectionHealthManager>,
    catalog: Arc<RegisterCatalog>,
    read_timeout: Duration,
}

impl DeviceReader {
    /// `read_timeout` bounds the whole batched read of one device
    pub fn new(
        health: Arc<ConnectionHealthManager>,
        catalog: Arc<RegisterCatalog>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            health,
            catalog,
            read_timeout,
        }
    }

    pub fn health(&self) -> &Arc<ConnectionHealthManager> {
        &self.health
    }

    pub fn catalog(&self) -> &RegisterCatalog {
        &self.catalog
    }

    /// Samples for one device; empty on any failure
    pub async fn read(&self, group: &str, endpoint: &DeviceEndpoint) -> Vec<Sample> {
        self.read_device(group, endpoint).await.into_samples()
    }

    pub async fn read_device(&self, group: &str, endpoint: &DeviceEndpoint) -> ReadOutcome {
        let points = self.catalog.points_for(&endpoint.device_type);
        self.read_points(group, endpoint, points).await
    }

    /// Read `points` from `endpoint` in a single request
    pub async fn read_points(
        &self,
        group: &str,
        endpoint: &DeviceEndpoint,
        points: &[RegisterPoint],
    ) -> ReadOutcome {
        let Some(window) = RegisterWindow::covering(points) else {
            debug!(
                "Device {} ({}) has no catalog points",
                endpoint.name, endpoint.device_type
            );
            return ReadOutcome::NoPoints;
        };

        let mut lease = match self.health.try_acquire(&endpoint.name) {
            Acquire::Ready(lease) => lease,
            Acquire::Busy => {
                warn!(
                    "Device {} still busy with the previous read, skipping",
                    endpoint.name
                );
                return ReadOutcome::Busy;
            },
            Acquire::Unknown => {
                warn!("Device {} is not registered", endpoint.name);
                return ReadOutcome::Unavailable;
            },
        };

        if !lease.ensure_connected().await {
            return ReadOutcome::Unavailable;
        }

        let timestamp = Local::now();
        let result = timeout(
            self.read_timeout,
            lease.read_words(endpoint.slave_id, window.start, window.count),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AcqSrvError::timeout(format!(
                "read exceeded {:?}",
                self.read_timeout
            )))
        })
        .and_then(|words| {
            if words.len() < usize::from(window.count) {
                Err(AcqSrvError::data(format!(
                    "expected {} registers, got {}",
                    window.count,
                    words.len()
                )))
            } else {
                Ok(words)
            }
        });

        let words = match result {
            Ok(words) => words,
            Err(e) => {
                let context = format!(
                    "Read {}/{} [{}+{}] failed",
                    group, endpoint.name, window.start, window.count
                );
                match e.log_level() {
                    Level::ERROR => error!("{} ({}): {}", context, e.error_code(), e),
                    Level::WARN => warn!("{} ({}): {}", context, e.error_code(), e),
                    _ => debug!("{} ({}): {}", context, e.error_code(), e),
                }
                lease.fail().await;
                return ReadOutcome::Failed;
            },
        };
        lease.report_outcome(true);

        let samples = points
            .iter()
            .map(|point| {
                let raw = codec::decode(point.data_type, &words, window.offset_of(point));
                let scaled = codec::scale_and_round(raw, point.scale);
                let value = if scaled.is_finite() {
                    Some(scaled)
                } else {
                    debug!(
                        "{}/{} decoded to non-finite value {}",
                        endpoint.name, point.code, scaled
                    );
                    None
                };

                Sample {
                    group: group.to_string(),
                    device: endpoint.name.clone(),
                    code: point.code.clone(),
                    display_name: point.display_name.clone(),
                    unit: point.unit.clone(),
                    value,
                    timestamp,
                }
            })
            .collect::<Vec<_>>();

        debug!("Read {}/{}: {} samples", group, endpoint.name, samples.len());
        ReadOutcome::Samples(samples)
    }
}
