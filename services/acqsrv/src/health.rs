//! Connection health manager
//!
//! Owns one [`RegisterClient`] per configured device together with its connection
//! state. Every device has its own transport lock and its own state lock, so work on
//! two different devices never contends. Transport errors stop here: callers only
//! see booleans and state.
//!
//! Throttling: a device that failed is not reconnected more often than once per
//! `reconnect_interval`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::transport::RegisterClient;

type ClientHandle = Box<dyn RegisterClient>;

/// Connection state of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionHealth {
    pub connected: bool,
    /// Time of the most recent failed connect or read
    pub last_failure_at: Option<Instant>,
}

/// Point-in-time view of one device's health
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub device: String,
    pub connected: bool,
    pub last_failure_at: Option<Instant>,
}

struct DeviceSlot {
    client: Arc<AsyncMutex<ClientHandle>>,
    health: Mutex<ConnectionHealth>,
}

impl DeviceSlot {
    fn mark_connected(&self) {
        let mut health = self.health.lock();
        health.connected = true;
    }

    fn mark_failed(&self) {
        let mut health = self.health.lock();
        health.connected = false;
        health.last_failure_at = Some(Instant::now());
    }
}

/// Result of trying to take a device for a read
pub enum Acquire {
    /// Exclusive access to the device's transport
    Ready(DeviceLease),
    /// A previous read on this device is still in flight
    Busy,
    /// No device with that name is configured
    Unknown,
}

/// Exclusive access to one device's transport for the duration of a read
///
/// Dropping the lease releases the device.
pub struct DeviceLease {
    name: String,
    slot: Arc<DeviceSlot>,
    client: OwnedMutexGuard<ClientHandle>,
    reconnect_interval: Duration,
    connect_timeout: Duration,
}

impl DeviceLease {
    pub fn device(&self) -> &str {
        &self.name
    }

    /// Connect if needed, honouring the reconnect throttle
    pub async fn ensure_connected(&mut self) -> bool {
        {
            let health = self.slot.health.lock();
            if health.connected {
                return true;
            }
            if let Some(failed_at) = health.last_failure_at {
                let since = failed_at.elapsed();
                if since < self.reconnect_interval {
                    debug!(
                        "Reconnect throttled for {}: {:?} left",
                        self.name,
                        self.reconnect_interval - since
                    );
                    return false;
                }
            }
        }

        match timeout(self.connect_timeout, self.client.init()).await {
            Ok(Ok(())) => {
                info!("Device {} connected ({})", self.name, self.client.endpoint());
                self.slot.mark_connected();
                true
            },
            Ok(Err(e)) => {
                warn!("Device {} connect failed: {}", self.name, e);
                self.slot.mark_failed();
                false
            },
            Err(_) => {
                warn!(
                    "Device {} connect timed out after {:?}",
                    self.name, self.connect_timeout
                );
                self.client.close().await;
                self.slot.mark_failed();
                false
            },
        }
    }

    pub async fn read_words(&mut self, unit_id: u8, start: u16, count: u16) -> Result<Vec<u16>> {
        self.client.read_words(unit_id, start, count).await
    }

    /// Record the outcome of a read attempt
    pub fn report_outcome(&self, success: bool) {
        if success {
            self.slot.mark_connected();
        } else {
            self.slot.mark_failed();
        }
    }

    /// Mark the device failed and drop its connection so the next attempt starts clean
    pub async fn fail(&mut self) {
        self.slot.mark_failed();
        self.client.close().await;
    }
}

/// Keyed connection state for every configured device
pub struct ConnectionHealthManager {
    devices: HashMap<String, Arc<DeviceSlot>>,
    reconnect_interval: Duration,
    connect_timeout: Duration,
}

impl ConnectionHealthManager {
    pub fn new(reconnect_interval: Duration, connect_timeout: Duration) -> Self {
        Self {
            devices: HashMap::new(),
            reconnect_interval,
            connect_timeout,
        }
    }

    /// Register the transport for a device; replaces any previous one
    pub fn register(&mut self, name: impl Into<String>, client: ClientHandle) {
        let name = name.into();
        let slot = Arc::new(DeviceSlot {
            client: Arc::new(AsyncMutex::new(client)),
            health: Mutex::new(ConnectionHealth::default()),
        });
        if self.devices.insert(name.clone(), slot).is_some() {
            warn!("Device {} registered twice, keeping the latest", name);
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    fn lease(
        &self,
        name: &str,
        slot: &Arc<DeviceSlot>,
        client: OwnedMutexGuard<ClientHandle>,
    ) -> DeviceLease {
        DeviceLease {
            name: name.to_string(),
            slot: Arc::clone(slot),
            client,
            reconnect_interval: self.reconnect_interval,
            connect_timeout: self.connect_timeout,
        }
    }

    /// Take a device without waiting; busy devices are reported, not queued
    pub fn try_acquire(&self, name: &str) -> Acquire {
        let Some(slot) = self.devices.get(name) else {
            return Acquire::Unknown;
        };
        match Arc::clone(&slot.client).try_lock_owned() {
            Ok(client) => Acquire::Ready(self.lease(name, slot, client)),
            Err(_) => Acquire::Busy,
        }
    }

    /// Take a device, waiting for an in-flight read to finish
    pub async fn acquire(&self, name: &str) -> Option<DeviceLease> {
        let slot = self.devices.get(name)?;
        let client = Arc::clone(&slot.client).lock_owned().await;
        Some(self.lease(name, slot, client))
    }

    /// Connect the device if needed
    ///
    /// Returns `true` without I/O when already connected and `false` without I/O
    /// while the reconnect throttle holds. Unknown names return `false`.
    pub async fn ensure_connected(&self, name: &str) -> bool {
        match self.acquire(name).await {
            Some(mut lease) => lease.ensure_connected().await,
            None => {
                warn!("ensure_connected: device {} is not configured", name);
                false
            },
        }
    }

    /// Record a read outcome for a device
    pub fn report_outcome(&self, name: &str, success: bool) {
        match self.devices.get(name) {
            Some(slot) if success => slot.mark_connected(),
            Some(slot) => slot.mark_failed(),
            None => warn!("report_outcome: device {} is not configured", name),
        }
    }

    /// Mark a device failed and close its transport, waiting for any in-flight read
    ///
    /// For reads that ended without reporting, such as a panicked device task.
    pub async fn fail(&self, name: &str) {
        match self.acquire(name).await {
            Some(mut lease) => lease.fail().await,
            None => warn!("fail: device {} is not configured", name),
        }
    }

    pub fn health(&self, name: &str) -> Option<ConnectionHealth> {
        self.devices.get(name).map(|slot| *slot.health.lock())
    }

    /// Health of every device, sorted by name
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let mut snapshot: Vec<_> = self
            .devices
            .iter()
            .map(|(name, slot)| {
                let health = *slot.health.lock();
                HealthSnapshot {
                    device: name.clone(),
                    connected: health.connected,
                    last_failure_at: health.last_failure_at,
                }
            })
            .collect();
        snapshot.sort_by(|a, b| a.device.cmp(&b.device));
        snapshot
    }

    /// Close every transport, waiting for in-flight reads
    pub async fn close_all(&self) {
        for (name, slot) in &self.devices {
            slot.client.lock().await.close().await;
            slot.health.lock().connected = false;
            debug!("Closed transport for {}", name);
        }
        info!("Closed {} device transports", self.devices.len());
    }
}
