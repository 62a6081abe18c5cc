//! Shared fakes for acqsrv integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use acqsrv::config::{AppConfig, DeviceEndpoint, DeviceGroup, TcpSettings};
use acqsrv::error::{AcqSrvError, Result};
use acqsrv::{
    AcquisitionService, DataType, RegisterCatalog, RegisterClient, RegisterPoint, Sample,
    SampleSink,
};
use async_trait::async_trait;
use parking_lot::Mutex;

/// Behaviour and counters of one fake device
#[derive(Default)]
pub struct DeviceScript {
    pub words: Mutex<Vec<u16>>,
    pub fail_init: AtomicBool,
    pub fail_read: AtomicBool,
    pub panic_read: AtomicBool,
    pub delay: Mutex<Duration>,
    pub inits: AtomicUsize,
    pub reads: AtomicUsize,
    pub closes: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl DeviceScript {
    pub fn returning(words: Vec<u16>) -> Arc<Self> {
        let script = Self::default();
        *script.words.lock() = words;
        Arc::new(script)
    }

    pub fn failing_reads() -> Arc<Self> {
        let script = Self::default();
        script.fail_read.store(true, Ordering::SeqCst);
        Arc::new(script)
    }

    pub fn failing_connect() -> Arc<Self> {
        let script = Self::default();
        script.fail_init.store(true, Ordering::SeqCst);
        Arc::new(script)
    }

    pub fn panicking() -> Arc<Self> {
        let script = Self::default();
        script.panic_read.store(true, Ordering::SeqCst);
        Arc::new(script)
    }

    pub fn slow(words: Vec<u16>, delay: Duration) -> Arc<Self> {
        let script = Self::returning(words);
        *script.delay.lock() = delay;
        script
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

pub struct FakeClient {
    script: Arc<DeviceScript>,
    open: bool,
}

impl FakeClient {
    pub fn new(script: Arc<DeviceScript>) -> Self {
        Self {
            script,
            open: false,
        }
    }
}

#[async_trait]
impl RegisterClient for FakeClient {
    async fn init(&mut self) -> Result<()> {
        self.script.inits.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_init.load(Ordering::SeqCst) {
            return Err(AcqSrvError::connection("connection refused"));
        }
        self.open = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.open
    }

    async fn read_words(&mut self, _unit_id: u8, _start: u16, count: u16) -> Result<Vec<u16>> {
        let script = Arc::clone(&self.script);
        script.reads.fetch_add(1, Ordering::SeqCst);
        let active = script.active.fetch_add(1, Ordering::SeqCst) + 1;
        script.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = *script.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        script.active.fetch_sub(1, Ordering::SeqCst);

        if script.panic_read.load(Ordering::SeqCst) {
            panic!("driver bug");
        }
        if script.fail_read.load(Ordering::SeqCst) {
            return Err(AcqSrvError::connection("connection reset by peer"));
        }

        let mut words = script.words.lock().clone();
        words.resize(usize::from(count), 0);
        Ok(words)
    }

    async fn close(&mut self) {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        self.open = false;
    }

    fn endpoint(&self) -> String {
        "fake".to_string()
    }
}

/// Sink that records every batch it receives
#[derive(Default)]
pub struct RecordingSink {
    name: String,
    fail: bool,
    pub batches: Mutex<Vec<(String, Vec<Sample>)>>,
}

impl RecordingSink {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Default::default()
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: true,
            ..Default::default()
        })
    }

    pub fn batches_for(&self, group: &str) -> Vec<Vec<Sample>> {
        self.batches
            .lock()
            .iter()
            .filter(|(g, _)| g == group)
            .map(|(_, batch)| batch.clone())
            .collect()
    }
}

#[async_trait]
impl SampleSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, group: &str, batch: &[Sample]) -> Result<()> {
        self.batches.lock().push((group.to_string(), batch.to_vec()));
        if self.fail {
            return Err(AcqSrvError::sink(&self.name, "backend unavailable"));
        }
        Ok(())
    }
}

/// Catalog with a single "flowmeter" type: `flow` INT32 x0.001 at register 0
pub fn flow_catalog() -> Arc<RegisterCatalog> {
    Arc::new(RegisterCatalog::new(vec![RegisterPoint::new(
        "flowmeter",
        "flow",
        0,
        DataType::Int32,
        0.001,
        "L",
    )]))
}

/// Registers decoding to `flow = 12.345`
pub fn flow_words() -> Vec<u16> {
    vec![0x0000, 0x3039]
}

pub fn endpoint(name: &str, device_type: &str) -> DeviceEndpoint {
    DeviceEndpoint {
        name: name.to_string(),
        host: "127.0.0.1".to_string(),
        port: 502,
        slave_id: 1,
        device_type: device_type.to_string(),
    }
}

pub fn group(name: &str, devices: Vec<DeviceEndpoint>) -> DeviceGroup {
    DeviceGroup {
        name: name.to_string(),
        devices,
    }
}

/// Fast timings, no transport retries
pub fn test_config(groups: Vec<DeviceGroup>) -> AppConfig {
    let mut config = AppConfig {
        groups,
        ..Default::default()
    };
    config.modbus.tcp = TcpSettings {
        poll_interval_ms: 100,
        connect_timeout_ms: 200,
        read_timeout_ms: 500,
        retries: 0,
        reconnect_interval_ms: 1000,
        max_concurrent_reads: 4,
    };
    config
}

/// Build a service whose devices are backed by the given scripts (by device name)
pub fn service(
    config: &AppConfig,
    catalog: Arc<RegisterCatalog>,
    scripts: &HashMap<String, Arc<DeviceScript>>,
    sinks: Vec<Arc<dyn SampleSink>>,
) -> AcquisitionService {
    AcquisitionService::assemble(config, catalog, sinks, |endpoint| -> Box<dyn RegisterClient> {
        let script = scripts
            .get(&endpoint.name)
            .cloned()
            .unwrap_or_else(|| DeviceScript::returning(Vec::new()));
        Box::new(FakeClient::new(script))
    })
}

pub fn scripts(entries: Vec<(&str, Arc<DeviceScript>)>) -> HashMap<String, Arc<DeviceScript>> {
    entries
        .into_iter()
        .map(|(name, script)| (name.to_string(), script))
        .collect()
}
