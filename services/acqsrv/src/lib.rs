//! acqsrv - Modbus device acquisition service
//!
//! Polls flow meters, differential-pressure transmitters and power meters over
//! Modbus TCP, decodes register windows into scaled engineering values and hands
//! per-group sample batches to storage and export sinks.
//!
//! Layers, leaves first:
//! - [`catalog`]: per-device-type register table
//! - [`codec`]: register words to numbers
//! - [`health`]: per-device connection state and reconnect throttle
//! - [`reader`]: one batched read per device
//! - [`poller`]: scheduled fan-out across groups and devices

pub mod bootstrap;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod health;
pub mod poller;
pub mod reader;
pub mod sample;
pub mod sink;
pub mod transport;

pub use bootstrap::AcquisitionService;
pub use catalog::{DataType, RegisterCatalog, RegisterPoint, RegisterWindow};
pub use config::{AppConfig, DeviceEndpoint, DeviceGroup};
pub use error::{AcqSrvError, Result};
pub use health::ConnectionHealthManager;
pub use poller::{PollState, Poller, TickReport};
pub use reader::{DeviceReader, ReadOutcome};
pub use sample::Sample;
pub use sink::SampleSink;
pub use transport::RegisterClient;
