//! Shared building blocks for tapgen services
//!
//! - logging (console + daily rolling files, compression)
//! - layered configuration loading
//! - startup arguments
//! - graceful shutdown

pub mod bootstrap_args;
pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use bootstrap_args::{LogLevel, ServiceArgs};
